//! Manifest-driven batches with per-item failure isolation.
//!
//! A manifest that cannot be parsed, or whose items lack required fields, aborts the batch before
//! anything runs. Once items start executing, an item's failure is recorded in its outcome and the
//! next item runs regardless.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::draft::CreatePath;
use crate::error::{CommandError, ErrorCode};
use crate::types::Uid;

/// What happened to one manifest item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub index: usize,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_path: Option<CreatePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn success(index: usize) -> Self {
        BatchOutcome {
            index,
            ok: true,
            ..BatchOutcome::default()
        }
    }

    pub fn failure(index: usize, err: &CommandError) -> Self {
        BatchOutcome {
            index,
            ok: false,
            error_code: Some(err.code),
            error: Some(err.message.clone()),
            ..BatchOutcome::default()
        }
    }
}

/// How a batch as a whole went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitSignal {
    Success,
    /// Some items succeeded and some failed.
    PartialSuccess,
    /// Every item failed.
    Failure,
}

impl ExitSignal {
    pub fn exit_code(self) -> i32 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::PartialSuccess => 10,
            ExitSignal::Failure => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<BatchOutcome>,
    pub count: usize,
    pub success: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn new(results: Vec<BatchOutcome>) -> Self {
        let success = results.iter().filter(|r| r.ok).count();
        BatchResult {
            count: results.len(),
            failed: results.len() - success,
            success,
            results,
        }
    }

    /// An empty batch counts as a success.
    pub fn exit_signal(&self) -> ExitSignal {
        match (self.success, self.failed) {
            (_, 0) => ExitSignal::Success,
            (0, _) => ExitSignal::Failure,
            _ => ExitSignal::PartialSuccess,
        }
    }
}

/// Run `op` over every item in order, turning each error into a failed outcome.
pub fn run<T, F>(items: &[T], mut op: F) -> BatchResult
where
    F: FnMut(usize, &T) -> Result<BatchOutcome, CommandError>,
{
    let results = items
        .iter()
        .enumerate()
        .map(|(i, item)| match op(i, item) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(index = i, code = %e.code, "batch item failed: {}", e.message);
                BatchOutcome::failure(i, &e)
            }
        })
        .collect();
    BatchResult::new(results)
}

/// One draft to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftCreateItem {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl DraftCreateItem {
    /// The inline body, or the contents of `body_file`.
    pub fn load_body(&self) -> Result<String, CommandError> {
        match (&self.body, &self.body_file) {
            (Some(body), _) if !body.is_empty() => Ok(body.clone()),
            (_, Some(path)) => read_body_file(path),
            _ => Err(CommandError::validation("body or body_file is required")),
        }
    }
}

/// One draft to send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendItem {
    #[serde(default)]
    pub draft_id: String,
    /// Must name the draft when running non-interactively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_send: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

fn read_body_file(path: &Path) -> Result<String, CommandError> {
    if path == Path::new("-") {
        return read_stdin();
    }
    fs::read_to_string(path).map_err(|e| {
        CommandError::validation(format!("cannot read body file {}: {}", path.display(), e))
    })
}

fn read_stdin() -> Result<String, CommandError> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| CommandError::validation(format!("cannot read stdin: {}", e)))?;
    Ok(buf)
}

/// Read manifest bytes from a file, or from stdin when `source` is `-`.
pub fn read_manifest(source: &str) -> Result<Vec<u8>, CommandError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(CommandError::validation("a manifest file or - for stdin is required"));
    }
    if source == "-" {
        return read_stdin().map(String::into_bytes);
    }
    fs::read(source)
        .map_err(|e| CommandError::validation(format!("cannot read manifest {}: {}", source, e)))
}

fn parse_items<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, CommandError> {
    serde_json::from_slice(bytes)
        .map_err(|e| CommandError::validation(format!("invalid manifest: {}", e)))
}

/// Parse a draft-create manifest, rejecting items without recipients or a body source.
pub fn parse_draft_manifest(bytes: &[u8]) -> Result<Vec<DraftCreateItem>, CommandError> {
    let items: Vec<DraftCreateItem> = parse_items(bytes)?;
    for (i, item) in items.iter().enumerate() {
        if item.to.iter().all(|t| t.trim().is_empty()) {
            return Err(CommandError::validation(format!("manifest item {} missing to", i)));
        }
        let has_body = item.body.as_deref().is_some_and(|b| !b.is_empty());
        if !has_body && item.body_file.is_none() {
            return Err(CommandError::validation(format!(
                "manifest item {} needs body or body_file",
                i
            )));
        }
    }
    Ok(items)
}

/// Parse a send-many manifest, rejecting items without a draft id.
pub fn parse_send_manifest(bytes: &[u8]) -> Result<Vec<SendItem>, CommandError> {
    let items: Vec<SendItem> = parse_items(bytes)?;
    for (i, item) in items.iter().enumerate() {
        if item.draft_id.trim().is_empty() {
            return Err(CommandError::validation(format!(
                "manifest item {} missing draft_id",
                i
            )));
        }
    }
    Ok(items)
}
