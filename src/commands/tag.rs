use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{CommandError, ErrorCode, ResultExt};
use crate::types::Flag;

use super::responses::{Plan, Planned, TagList, TagUpdate};
use super::{parse_id, CommandResult, Context, Outcome, INBOX};

/// Every keyword in use on INBOX messages, sorted.
pub fn tag_list(ctx: &Context<'_>) -> CommandResult<TagList> {
    let mut session = ctx.session()?;
    let messages = session
        .list_messages(INBOX, "ALL")
        .or_code(ErrorCode::ImapListFailed)?;
    let tags: BTreeSet<&str> = messages.iter().flat_map(|m| m.keywords()).collect();
    let tags: Vec<String> = tags.into_iter().map(str::to_string).collect();
    Ok(Outcome::unchanged(TagList {
        count: tags.len(),
        tags,
    }))
}

pub fn tag_add(ctx: &Context<'_>, message_id: &str, tag: &str) -> CommandResult<Planned<TagUpdate>> {
    update(ctx, message_id, tag, true)
}

pub fn tag_remove(
    ctx: &Context<'_>,
    message_id: &str,
    tag: &str,
) -> CommandResult<Planned<TagUpdate>> {
    update(ctx, message_id, tag, false)
}

fn update(
    ctx: &Context<'_>,
    message_id: &str,
    tag: &str,
    add: bool,
) -> CommandResult<Planned<TagUpdate>> {
    let id = parse_id(message_id, "message id")?;
    let flag = Flag::keyword(tag).ok_or_else(|| {
        CommandError::validation(format!("invalid tag {:?}", tag.trim()))
            .with_hint("Tags are single words without spaces, quotes or parentheses")
    })?;
    let mailbox = id.mailbox().unwrap_or(INBOX).to_string();
    let canonical = id.canonical(INBOX);

    let mut session = ctx.session()?;
    let message = session
        .fetch(&mailbox, id.uid())
        .or_code(ErrorCode::ImapTagUpdateFailed)?
        .ok_or_else(|| CommandError::not_found(format!("message not found: {}", canonical)))?;
    let present = message.flags.contains(&flag);
    if ctx.options.dry_run {
        let action = if add { "tag.add" } else { "tag.remove" };
        return Ok(Outcome::unchanged(Planned::DryRun(
            Plan::new(action).message(canonical),
        )));
    }
    session
        .set_flags(&mailbox, id.uid(), &[flag.clone()], add)
        .or_code(ErrorCode::ImapTagUpdateFailed)?;
    debug!(message = %canonical, %flag, add, "tags updated");
    Ok(Outcome::changed(Planned::Done(TagUpdate {
        message_id: canonical,
        tag: flag.to_string(),
        changed: present != add,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Options;
    use crate::config::{Config, Credentials};
    use crate::testing::{FakeConnector, FakeMailstore, RecordingSender};

    fn kw(name: &str) -> Flag {
        Flag::Keyword(name.to_string())
    }

    #[test]
    fn list_is_sorted_and_unique() {
        let store = FakeMailstore::new();
        store.insert("INBOX", b"Subject: a\r\n\r\nx", &[kw("work"), Flag::Seen]);
        store.insert("INBOX", b"Subject: b\r\n\r\ny", &[kw("bills"), kw("work")]);
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let (config, creds) = (Config::default(), Credentials::new("me@x.com", "pw"));
        let ctx = Context::new(&config, &creds, &connector, &smtp);

        let list = tag_list(&ctx).unwrap().value;
        assert_eq!(list.tags, vec!["bills", "work"]);
        assert_eq!(list.count, 2);
    }

    #[test]
    fn add_and_remove() {
        let store = FakeMailstore::new();
        let uid = store.insert("INBOX", b"Subject: a\r\n\r\nx", &[]);
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let (config, creds) = (Config::default(), Credentials::new("me@x.com", "pw"));
        let ctx = Context::new(&config, &creds, &connector, &smtp);

        let out = tag_add(&ctx, "1", "todo").unwrap();
        assert!(out.changed);
        let done = out.value.done().unwrap();
        assert_eq!(done.message_id, "imap:INBOX:1");
        assert!(done.changed);
        assert_eq!(store.flags("INBOX", uid), vec![kw("todo")]);

        let again = tag_add(&ctx, "imap:INBOX:1", "todo").unwrap().value.done().unwrap();
        assert!(!again.changed);

        let removed = tag_remove(&ctx, "1", "todo").unwrap().value.done().unwrap();
        assert!(removed.changed);
        assert!(store.flags("INBOX", uid).is_empty());
    }

    #[test]
    fn invalid_tag_and_dry_run() {
        let store = FakeMailstore::new();
        store.insert("INBOX", b"Subject: a\r\n\r\nx", &[]);
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let (config, creds) = (Config::default(), Credentials::new("me@x.com", "pw"));
        let ctx = Context::new(&config, &creds, &connector, &smtp);

        for bad in ["", "two words", "\\Seen", "(x)"] {
            let err = tag_add(&ctx, "1", bad).unwrap_err();
            assert_eq!(err.code, ErrorCode::Validation, "{:?}", bad);
        }
        assert_eq!(connector.connects(), 0);

        let dry = Context::new(&config, &creds, &connector, &smtp).with_options(Options {
            dry_run: true,
            ..Options::default()
        });
        let out = tag_add(&dry, "1", "todo").unwrap();
        assert!(matches!(out.value, Planned::DryRun(_)));
        assert_eq!(store.count_calls("store"), 0);

        let err = tag_add(&ctx, "9", "todo").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
