//! Durable per-user state: default login and idempotency records.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CommandError, ErrorCode};
use crate::idempotency::IdempotencyRecord;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub auth: AuthState,
    pub idempotency: BTreeMap<String, IdempotencyRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

impl State {
    /// Read the state file, starting from an empty state if it does not exist yet.
    pub fn load(path: &Path) -> Result<State, CommandError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file yet");
                return Ok(State::default());
            }
            Err(e) => {
                return Err(CommandError::new(
                    ErrorCode::State,
                    format!("cannot read state {}: {}", path.display(), e),
                ))
            }
        };
        serde_json::from_slice(&raw).map_err(|e| {
            CommandError::new(
                ErrorCode::State,
                format!("corrupt state {}: {}", path.display(), e),
            )
        })
    }

    /// Write the whole state to `path` in one step.
    ///
    /// The new contents go to a temporary file next to `path` which then replaces it, so readers
    /// see either the old state or the new one, never a mix.
    pub fn save(&self, path: &Path) -> Result<(), CommandError> {
        self.write_atomic(path).map_err(|e| {
            CommandError::new(
                ErrorCode::StateSaveFailed,
                format!("cannot save state {}: {}", path.display(), e),
            )
        })
    }

    fn write_atomic(&self, path: &Path) -> io::Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
