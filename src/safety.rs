//! The confirmation gate every outgoing send passes through.

use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ErrorCode};
use crate::types::Uid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Without a terminal to prompt on, demand an explicit confirmation token.
    pub require_confirm_non_interactive: bool,
    /// Whether `force` may stand in for the confirmation token at all.
    pub allow_force: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        SafetyPolicy {
            require_confirm_non_interactive: true,
            allow_force: true,
        }
    }
}

/// One send about to happen.
#[derive(Clone, Copy, Debug)]
pub struct SendRequest<'a> {
    pub non_interactive: bool,
    /// Caller-supplied confirmation token; must name the draft being sent.
    pub confirm: &'a str,
    /// The draft's canonical `imap:<mailbox>:<uid>` id.
    pub canonical_id: &'a str,
    pub uid: Uid,
    pub force: bool,
}

impl SafetyPolicy {
    /// Decide whether `req` may go out.
    ///
    /// A forced send under a policy that forbids forcing is refused even when the confirmation
    /// token is correct.
    pub fn check(&self, req: &SendRequest<'_>) -> Result<(), CommandError> {
        let confirm = req.confirm.trim();
        let confirmed = !confirm.is_empty()
            && (confirm == req.canonical_id || confirm == req.uid.to_string());
        if self.require_confirm_non_interactive && req.non_interactive && !confirmed && !req.force
        {
            return Err(CommandError::new(
                ErrorCode::ConfirmationRequired,
                "a confirmation token is required in non-interactive mode",
            )
            .with_hint(format!(
                "Pass the draft id ({}) as the confirmation token, or force the send",
                req.canonical_id
            )));
        }
        if req.force && !self.allow_force {
            return Err(CommandError::new(
                ErrorCode::SafetyBlocked,
                "forced sends are disabled by policy",
            ));
        }
        Ok(())
    }
}

/// Whether the process should behave non-interactively: either asked to explicitly, or stdin is
/// not a terminal.
pub fn non_interactive(explicit: bool) -> bool {
    explicit || !std::io::stdin().is_terminal()
}
