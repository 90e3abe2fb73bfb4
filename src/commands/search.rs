use crate::error::{CommandError, ErrorCode, ResultExt};
use crate::search::{sort_by_uid_desc, Page, SearchFilters};
use crate::types::Message;

use super::responses::{MessageList, MessageRecord};
use super::{non_empty, CommandResult, Context, Outcome, INBOX};

#[derive(Clone, Debug, Default)]
pub struct SearchParams {
    pub filters: SearchFilters,
    /// Defaults to INBOX; not accepted when searching drafts.
    pub mailbox: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

fn page_of(messages: &mut [Message], page: Page, mailbox: String) -> MessageList {
    sort_by_uid_desc(messages);
    let (items, next_cursor) = page.apply(messages);
    let records: Vec<MessageRecord> = items.iter().map(|m| MessageRecord::new(m, false)).collect();
    MessageList {
        count: records.len(),
        total: messages.len(),
        next_cursor,
        messages: records,
        mailbox,
    }
}

/// Search one mailbox, newest first.
pub fn search_messages(ctx: &Context<'_>, params: &SearchParams) -> CommandResult<MessageList> {
    let criteria = params.filters.criteria()?;
    let page = Page::new(params.cursor.as_deref(), params.limit);
    let mailbox = non_empty(params.mailbox.as_deref()).unwrap_or(INBOX).to_string();

    let mut session = ctx.session()?;
    let mut messages = session
        .list_messages(&mailbox, &criteria)
        .or_code(ErrorCode::ImapSearchFailed)?;
    Ok(Outcome::unchanged(page_of(&mut messages, page, mailbox)))
}

/// Search the drafts mailbox, newest first.
pub fn search_drafts(ctx: &Context<'_>, params: &SearchParams) -> CommandResult<MessageList> {
    if non_empty(params.mailbox.as_deref()).is_some() {
        return Err(CommandError::validation(
            "drafts search always uses the drafts mailbox",
        )
        .with_hint("Drop the mailbox filter, or use a message search instead"));
    }
    let criteria = params.filters.criteria()?;
    let page = Page::new(params.cursor.as_deref(), params.limit);

    let mut session = ctx.session()?;
    let mailbox = session
        .drafts_mailbox()
        .or_code(ErrorCode::ImapSearchFailed)?;
    let mut drafts = session
        .list_messages(&mailbox, &criteria)
        .or_code(ErrorCode::ImapSearchFailed)?;
    Ok(Outcome::unchanged(page_of(&mut drafts, page, mailbox)))
}
