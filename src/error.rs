//! IMAP transport errors and the machine-readable command error taxonomy.

use std::fmt;
use std::io::Error as IoError;
use std::result;

use bufstream::IntoInnerError as BufError;
use native_tls::Error as TlsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience wrapper around `Result` for `draftbridge::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while talking to the bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error(transparent)]
    Io(#[from] IoError),
    /// The TLS handshake after `STARTTLS` failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
    /// An error from the `native_tls` library while setting up the connector.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// A `BAD` response from the IMAP server, carrying the raw tagged line.
    #[error("imap command failed: {0}")]
    Bad(String),
    /// A `NO` response from the IMAP server, carrying the raw tagged line.
    #[error("imap command failed: {0}")]
    No(String),
    /// The connection was terminated unexpectedly.
    #[error("connection lost")]
    ConnectionLost,
    /// The server did not open with an untagged greeting.
    #[error("invalid IMAP greeting: {0}")]
    Greeting(String),
    /// Error parsing a server response.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Error validating input data.
    #[error(transparent)]
    Validate(#[from] ValidateError),
    /// The server refused the `APPEND` literal.
    #[error("imap append rejected: {0}")]
    Append(String),
    /// Error handing a message to the SMTP server.
    #[error("smtp send failed: {0}")]
    Smtp(String),
    /// A raw message could not be decoded.
    #[error("message decode failed: {0}")]
    Codec(String),
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

/// An error parsing a server response line.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line does not belong to any known response category.
    #[error("unable to parse response line: {0:?}")]
    Invalid(String),
    /// A UID in a server response or caller input was not a number.
    #[error("invalid uid {0:?}")]
    Uid(String),
}

/// Invalid character found in a string that is sent to the server quoted.
#[derive(Debug, Error)]
#[error("invalid character in input: {0:?}")]
pub struct ValidateError(pub char);

/// Stable machine-readable error codes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[serde(rename = "usage_error")]
    Usage,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "config_error")]
    Config,
    ConfigMissing,
    #[serde(rename = "state_error")]
    State,
    StateSaveFailed,
    AuthMissing,
    NotFound,
    IdempotencyConflict,
    ConfirmationRequired,
    SafetyBlocked,
    RateLimit,
    BridgeUnreachable,
    SendFailed,
    ImapConnectFailed,
    ImapSearchFailed,
    ImapListFailed,
    ImapTagUpdateFailed,
    ImapDraftCreateFailed,
    ImapDraftUpdateFailed,
    ImapDraftDeleteFailed,
    ImapDraftListFailed,
}

/// Coarse error classes, used to decide between "retry" and "fix the input".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Usage,
    Validation,
    Config,
    Auth,
    NotFound,
    Conflict,
    Safety,
    Transient,
    RateLimit,
    Runtime,
}

impl ErrorCode {
    /// The wire name of this code, e.g. `imap_search_failed`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Usage => "usage_error",
            ErrorCode::Validation => "validation_error",
            ErrorCode::Config => "config_error",
            ErrorCode::ConfigMissing => "config_missing",
            ErrorCode::State => "state_error",
            ErrorCode::StateSaveFailed => "state_save_failed",
            ErrorCode::AuthMissing => "auth_missing",
            ErrorCode::NotFound => "not_found",
            ErrorCode::IdempotencyConflict => "idempotency_conflict",
            ErrorCode::ConfirmationRequired => "confirmation_required",
            ErrorCode::SafetyBlocked => "safety_blocked",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::BridgeUnreachable => "bridge_unreachable",
            ErrorCode::SendFailed => "send_failed",
            ErrorCode::ImapConnectFailed => "imap_connect_failed",
            ErrorCode::ImapSearchFailed => "imap_search_failed",
            ErrorCode::ImapListFailed => "imap_list_failed",
            ErrorCode::ImapTagUpdateFailed => "imap_tag_update_failed",
            ErrorCode::ImapDraftCreateFailed => "imap_draft_create_failed",
            ErrorCode::ImapDraftUpdateFailed => "imap_draft_update_failed",
            ErrorCode::ImapDraftDeleteFailed => "imap_draft_delete_failed",
            ErrorCode::ImapDraftListFailed => "imap_draft_list_failed",
        }
    }

    pub fn category(self) -> Category {
        match self {
            ErrorCode::Usage => Category::Usage,
            ErrorCode::Validation => Category::Validation,
            ErrorCode::Config | ErrorCode::ConfigMissing => Category::Config,
            ErrorCode::State | ErrorCode::StateSaveFailed => Category::Runtime,
            ErrorCode::AuthMissing => Category::Auth,
            ErrorCode::NotFound => Category::NotFound,
            ErrorCode::IdempotencyConflict => Category::Conflict,
            ErrorCode::ConfirmationRequired | ErrorCode::SafetyBlocked => Category::Safety,
            ErrorCode::RateLimit => Category::RateLimit,
            ErrorCode::BridgeUnreachable
            | ErrorCode::SendFailed
            | ErrorCode::ImapConnectFailed
            | ErrorCode::ImapSearchFailed
            | ErrorCode::ImapListFailed
            | ErrorCode::ImapTagUpdateFailed
            | ErrorCode::ImapDraftCreateFailed
            | ErrorCode::ImapDraftUpdateFailed
            | ErrorCode::ImapDraftDeleteFailed
            | ErrorCode::ImapDraftListFailed => Category::Transient,
        }
    }

    /// Whether resubmitting the same request unchanged may succeed.
    pub fn retryable(self) -> bool {
        matches!(self.category(), Category::Transient | Category::RateLimit)
    }

    /// Process exit status a command-line front end should use for this code.
    pub fn exit_code(self) -> i32 {
        match self.category() {
            Category::Usage | Category::Validation => 2,
            Category::Config | Category::Auth => 3,
            Category::Transient => 4,
            Category::NotFound => 5,
            Category::Conflict => 6,
            Category::Safety => 7,
            Category::RateLimit => 8,
            Category::Runtime => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error every command handler returns: a stable code plus human detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    pub hint: Option<String>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CommandError {
            code,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Usage, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

impl Serialize for CommandError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("CommandError", 5)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("message", &self.message)?;
        if let Some(ref hint) = self.hint {
            s.serialize_field("hint", hint)?;
        }
        s.serialize_field("category", &self.code.category())?;
        s.serialize_field("retryable", &self.retryable())?;
        s.end()
    }
}

/// Attach an [`ErrorCode`] to a lower-level failure.
pub trait ResultExt<T> {
    fn or_code(self, code: ErrorCode) -> result::Result<T, CommandError>;
}

impl<T, E: fmt::Display> ResultExt<T> for result::Result<T, E> {
    fn or_code(self, code: ErrorCode) -> result::Result<T, CommandError> {
        self.map_err(|e| CommandError::new(code, e.to_string()))
    }
}
