//! Command handlers: the operations a front end exposes, one bridge connection per call.
//!
//! Every handler takes a [`Context`] carrying the configuration, the resolved login, and the
//! injected [`Connector`] and [`SmtpSender`]. Handlers that can replay idempotent requests also
//! take the durable [`State`](crate::state::State); they record into it but never save it. A
//! caller that sees [`Outcome::changed`] saves the state once, so a mutation and its idempotency
//! record always land together.

use std::io;

use crate::config::{Config, Credentials};
use crate::error::{CommandError, Error, ErrorCode};
use crate::mailstore::{Connector, Session};
use crate::smtp::SmtpSender;
use crate::types::ImapId;

mod doctor;
mod draft;
mod mailbox;
mod message;
pub mod responses;
mod search;
mod tag;

pub use self::doctor::doctor;
pub use self::draft::{
    draft_create, draft_create_many, draft_delete, draft_get, draft_list, draft_update,
    DraftCreateParams, DraftListParams, DraftUpdateParams,
};
pub use self::mailbox::{mailbox_list, mailbox_resolve, resolve_mailbox};
pub use self::message::{
    message_get, message_reply, message_send, message_send_many, ReplyParams, SendParams,
};
pub use self::search::{search_drafts, search_messages, SearchParams};
pub use self::tag::{tag_add, tag_list, tag_remove};

pub(crate) const INBOX: &str = "INBOX";

/// Per-invocation switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// Validate and report, but do not change anything on the bridge.
    pub dry_run: bool,
    /// No terminal to confirm on; see [`safety::non_interactive`](crate::safety::non_interactive).
    pub non_interactive: bool,
}

pub struct Context<'a> {
    pub config: &'a Config,
    pub credentials: &'a Credentials,
    pub connector: &'a dyn Connector,
    pub smtp: &'a dyn SmtpSender,
    pub options: Options,
}

impl<'a> Context<'a> {
    pub fn new(
        config: &'a Config,
        credentials: &'a Credentials,
        connector: &'a dyn Connector,
        smtp: &'a dyn SmtpSender,
    ) -> Self {
        Context {
            config,
            credentials,
            connector,
            smtp,
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The bridge account; drafts are written and fallback mail is sent as this address.
    pub(crate) fn account(&self) -> &str {
        &self.credentials.username
    }

    pub(crate) fn session(&self) -> Result<Session, CommandError> {
        Session::open(self.connector, self.credentials).map_err(connect_error)
    }
}

/// A handler's result, and whether it changed anything worth saving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub changed: bool,
}

impl<T> Outcome<T> {
    pub fn changed(value: T) -> Self {
        Outcome {
            value,
            changed: true,
        }
    }

    pub fn unchanged(value: T) -> Self {
        Outcome {
            value,
            changed: false,
        }
    }
}

pub type CommandResult<T> = Result<Outcome<T>, CommandError>;

fn connect_error(e: Error) -> CommandError {
    match e {
        Error::Io(ref err)
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut | io::ErrorKind::NotFound
            ) =>
        {
            CommandError::new(ErrorCode::BridgeUnreachable, e.to_string())
                .with_hint("Check the bridge is running and the ports match the configuration")
        }
        Error::No(_) => CommandError::new(ErrorCode::ImapConnectFailed, e.to_string())
            .with_hint("Check the bridge username and password"),
        e => CommandError::new(ErrorCode::ImapConnectFailed, e.to_string()),
    }
}

/// Parse a caller-supplied draft or message id.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<ImapId, CommandError> {
    ImapId::parse(raw).ok_or_else(|| {
        CommandError::validation(format!("invalid {} {:?}", what, raw.trim()))
            .with_hint("Use imap:<mailbox>:<uid> or a bare uid")
    })
}

/// Trimmed and non-empty, or `None`.
pub(crate) fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connections_are_unreachable() {
        let err = connect_error(Error::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(err.code, ErrorCode::BridgeUnreachable);
        assert!(err.retryable());

        let err = connect_error(Error::No("A0002 NO [AUTHENTICATIONFAILED] bad".into()));
        assert_eq!(err.code, ErrorCode::ImapConnectFailed);
        assert!(err.message.contains("AUTHENTICATIONFAILED"));
    }

    #[test]
    fn ids() {
        assert_eq!(parse_id("imap:Drafts:3", "draft id").unwrap().uid(), 3);
        let err = parse_id("nope", "draft id").unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" a ")), Some("a"));
    }
}
