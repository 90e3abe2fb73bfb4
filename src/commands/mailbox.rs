use crate::error::{CommandError, ErrorCode, ResultExt};

use super::responses::{MailboxInfo, MailboxList, MailboxResolve, MatchedBy};
use super::{CommandResult, Context, Outcome};

pub fn mailbox_list(ctx: &Context<'_>) -> CommandResult<MailboxList> {
    let mailboxes = list(ctx)?;
    Ok(Outcome::unchanged(MailboxList {
        count: mailboxes.len(),
        mailboxes,
    }))
}

/// Find one mailbox by name or id.
pub fn mailbox_resolve(ctx: &Context<'_>, query: &str) -> CommandResult<MailboxResolve> {
    if query.trim().is_empty() {
        return Err(CommandError::validation("a mailbox name or id is required"));
    }
    let mailboxes = list(ctx)?;
    let (mailbox, matched_by) = resolve_mailbox(&mailboxes, query)?;
    Ok(Outcome::unchanged(MailboxResolve {
        mailbox,
        matched_by,
    }))
}

fn list(ctx: &Context<'_>) -> Result<Vec<MailboxInfo>, CommandError> {
    let mut session = ctx.session()?;
    let names = session
        .list_mailboxes()
        .or_code(ErrorCode::ImapListFailed)?;
    Ok(names.iter().map(MailboxInfo::from).collect())
}

/// Match `query` against an exact name, then an exact id, then a unique case-insensitive name.
pub fn resolve_mailbox(
    mailboxes: &[MailboxInfo],
    query: &str,
) -> Result<(MailboxInfo, MatchedBy), CommandError> {
    let query = query.trim();
    if let Some(m) = mailboxes.iter().find(|m| m.name == query) {
        return Ok((m.clone(), MatchedBy::NameExact));
    }
    if let Some(m) = mailboxes.iter().find(|m| m.id == query) {
        return Ok((m.clone(), MatchedBy::IdExact));
    }
    let mut matches: Vec<&MailboxInfo> = mailboxes
        .iter()
        .filter(|m| m.name.eq_ignore_ascii_case(query))
        .collect();
    match matches.len() {
        0 => Err(CommandError::not_found(format!(
            "mailbox not found: {:?}",
            query
        ))),
        1 => Ok((matches[0].clone(), MatchedBy::NameCasefold)),
        n => {
            matches.sort_by_key(|m| m.name.to_lowercase());
            let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
            Err(CommandError::validation(format!(
                "ambiguous mailbox name: {:?} matches {} mailboxes",
                query, n
            ))
            .with_hint(format!("Disambiguate with one of: {}", ids.join(", "))))
        }
    }
}
