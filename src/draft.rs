//! Draft creation: a direct `APPEND`, or when that is refused, an SMTP self-send that is then
//! moved into the drafts mailbox.

use std::thread;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::Outgoing;
use crate::config::FallbackPolicy;
use crate::error::{Error, Result};
use crate::mailstore::Mailstore;
use crate::smtp::SmtpSender;
use crate::types::Uid;
use crate::utils::quote;

/// Header carrying the correlation token on fallback self-sends.
pub const TOKEN_HEADER: &str = "X-Draft-Token";

const INBOX: &str = "INBOX";

/// Which route a draft took into the drafts mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePath {
    ImapAppend,
    SmtpMoveFallback,
}

/// Where a newly created draft ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    pub mailbox: String,
    pub uid: Uid,
    pub path: CreatePath,
}

/// Store `draft` in the drafts mailbox.
///
/// `APPEND` is tried first. Only if the server refuses it does the fallback run: the message is
/// mailed to `account` with a unique [`TOKEN_HEADER`], INBOX is polled for the token within
/// `policy`, and the hit is moved to the drafts mailbox. Callers must check their idempotency
/// records before calling this, since every fallback sends a real email.
pub fn create_draft(
    store: &mut dyn Mailstore,
    smtp: &dyn SmtpSender,
    policy: &FallbackPolicy,
    account: &str,
    draft: &Outgoing,
) -> Result<Created> {
    let mailbox = store.drafts_mailbox()?;
    let raw = draft.compose(Utc::now());
    match store.append_draft(&mailbox, raw.as_bytes()) {
        Ok(()) => {
            let uid = recover_appended_uid(store, &mailbox)?;
            debug!(%mailbox, uid, "draft appended");
            Ok(Created {
                mailbox,
                uid,
                path: CreatePath::ImapAppend,
            })
        }
        Err(e @ Error::No(_)) | Err(e @ Error::Bad(_)) | Err(e @ Error::Append(_)) => {
            warn!(%mailbox, "append refused, falling back to smtp self-send: {}", e);
            let uid = move_fallback(store, smtp, policy, account, draft, &mailbox)?;
            Ok(Created {
                mailbox,
                uid,
                path: CreatePath::SmtpMoveFallback,
            })
        }
        Err(e) => Err(e),
    }
}

/// Find the UID `APPEND` just assigned: the highest UID in `mailbox`.
///
/// `APPEND` does not report the UID without UIDPLUS, so this is a guess that only holds while
/// nothing else writes to the mailbox between the append and the search.
pub fn recover_appended_uid(store: &mut dyn Mailstore, mailbox: &str) -> Result<Uid> {
    store
        .search(mailbox, "ALL")?
        .into_iter()
        .max()
        .ok_or_else(|| Error::Append(format!("appended message not found in {}", mailbox)))
}

fn move_fallback(
    store: &mut dyn Mailstore,
    smtp: &dyn SmtpSender,
    policy: &FallbackPolicy,
    account: &str,
    draft: &Outgoing,
    drafts: &str,
) -> Result<Uid> {
    let token = format!("draftbridge-{}", Uuid::new_v4());
    let message = draft.clone().header(TOKEN_HEADER, &token);
    smtp.send(
        account,
        &[account.to_string()],
        message.compose(Utc::now()).as_bytes(),
    )?;

    let criteria = format!("HEADER {} {}", TOKEN_HEADER, quote!(token));
    let uid = poll_inbox(store, policy, &criteria)?;
    store.move_message(INBOX, uid, drafts)?;

    match store.search(drafts, &criteria) {
        Ok(uids) if !uids.is_empty() => Ok(uids.into_iter().max().unwrap_or(uid)),
        other => {
            if let Err(e) = other {
                debug!("post-move search failed: {}", e);
            }
            warn!(
                mailbox = drafts,
                uid, "moved draft not found again, returning its INBOX uid"
            );
            Ok(uid)
        }
    }
}

fn poll_inbox(store: &mut dyn Mailstore, policy: &FallbackPolicy, criteria: &str) -> Result<Uid> {
    for attempt in 1..=policy.attempts {
        match store.search(INBOX, criteria) {
            Ok(uids) => {
                if let Some(uid) = uids.into_iter().max() {
                    debug!(attempt, uid, "fallback message arrived");
                    return Ok(uid);
                }
            }
            Err(e) => debug!(attempt, "fallback poll failed: {}", e),
        }
        if attempt < policy.attempts {
            thread::sleep(policy.interval());
        }
    }
    Err(Error::Append(format!(
        "fallback could not locate the sent message in {} after {} attempts",
        INBOX, policy.attempts
    )))
}
