use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::batch::{self, BatchOutcome, BatchResult, SendItem};
use crate::codec::{self, Outgoing};
use crate::draft::create_draft;
use crate::error::{CommandError, ErrorCode, ResultExt};
use crate::idempotency;
use crate::mailstore::Session;
use crate::safety::SendRequest;
use crate::state::State;
use crate::types::{ImapId, Message};

use super::draft::fetch_draft;
use super::responses::{DraftResponse, MessageRecord, MessageResponse, Plan, Planned, SendResponse};
use super::{non_empty, parse_id, CommandResult, Context, Outcome, INBOX};

const SEND: &str = "message.send";
const SEND_MANY: &str = "message.send-many";
const REPLY: &str = "message.reply";

/// Read one message; bare UIDs refer to INBOX.
pub fn message_get(ctx: &Context<'_>, message_id: &str) -> CommandResult<MessageResponse> {
    let id = parse_id(message_id, "message id")?;
    let mailbox = id.mailbox().unwrap_or(INBOX);
    let mut session = ctx.session()?;
    let message = session
        .fetch(mailbox, id.uid())
        .or_code(ErrorCode::ImapSearchFailed)?
        .ok_or_else(|| {
            CommandError::not_found(format!("message not found: {}", id.canonical(INBOX)))
        })?;
    Ok(Outcome::unchanged(MessageResponse {
        message: MessageRecord::new(&message, true),
    }))
}

#[derive(Clone, Debug, Default)]
pub struct SendParams {
    pub draft_id: String,
    /// Confirmation token; must name the draft when non-interactive.
    pub confirm: Option<String>,
    pub force: bool,
    pub idempotency_key: Option<String>,
}

/// What a send's idempotency key is bound to.
///
/// Recipients, subject and body are not part of it. They are only known after fetching the draft,
/// and the content under a given id never changes, since every update produces a new UID. The id
/// as given stands in for the content, so a replay is decided without connecting.
#[derive(Serialize)]
struct SendPayload<'a> {
    draft_id: &'a str,
    confirm: &'a str,
    force: bool,
}

/// Compose the draft as an outgoing message from `account`, keeping its threading headers.
fn outgoing(account: &str, draft: &Message) -> Result<Outgoing, CommandError> {
    if draft.to.is_empty() {
        return Err(CommandError::validation(format!(
            "draft {} has no recipients",
            ImapId::new(draft.mailbox.as_str(), draft.uid)
        )));
    }
    let mut out = Outgoing::new(account, &draft.to, &draft.subject, &draft.body);
    if let Some(ref id) = draft.in_reply_to {
        out = out.header("In-Reply-To", id);
    }
    if let Some(ref refs) = draft.references {
        out = out.header("References", refs);
    }
    Ok(out)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Fetch, gate and send one draft. `None` means the gate passed but this is a dry run.
fn send_one(
    ctx: &Context<'_>,
    session: &mut Session,
    draft_id: &str,
    confirm: &str,
    force: bool,
) -> Result<(String, Option<String>), CommandError> {
    let id = parse_id(draft_id, "draft id")?;
    let draft = fetch_draft(session, &id, ErrorCode::ImapSearchFailed)?;
    let canonical = ImapId::new(draft.mailbox.as_str(), draft.uid).to_string();
    ctx.config.safety.check(&SendRequest {
        non_interactive: ctx.options.non_interactive,
        confirm,
        canonical_id: &canonical,
        uid: draft.uid,
        force,
    })?;
    if ctx.options.dry_run {
        return Ok((canonical, None));
    }
    let message = outgoing(ctx.account(), &draft)?;
    ctx.smtp
        .send(
            ctx.account(),
            &message.to,
            message.compose(Utc::now()).as_bytes(),
        )
        .or_code(ErrorCode::SendFailed)?;
    debug!(draft = %canonical, recipients = message.to.len(), "draft sent");
    Ok((canonical, Some(now())))
}

/// Send a draft through SMTP, behind the confirmation gate.
pub fn message_send(
    ctx: &Context<'_>,
    state: &mut State,
    params: &SendParams,
) -> CommandResult<Planned<SendResponse>> {
    let draft_id = params.draft_id.trim();
    parse_id(draft_id, "draft id")?;
    let confirm = non_empty(params.confirm.as_deref()).unwrap_or_default();
    let payload = SendPayload {
        draft_id,
        confirm,
        force: params.force,
    };
    let key = params.idempotency_key.as_deref().unwrap_or_default();
    if let Some(cached) = idempotency::lookup::<_, SendResponse>(state, key, SEND, &payload)? {
        debug!(key, "replaying message.send");
        return Ok(Outcome::unchanged(Planned::Done(cached)));
    }

    let mut session = ctx.session()?;
    let resp = match send_one(ctx, &mut session, draft_id, confirm, params.force)? {
        (canonical, None) => {
            return Ok(Outcome::unchanged(Planned::DryRun(
                Plan::new(SEND).draft(canonical),
            )))
        }
        (canonical, Some(sent_at)) => SendResponse {
            sent: true,
            draft_id: canonical,
            sent_at,
        },
    };
    idempotency::store(state, key, SEND, &payload, &resp)?;
    Ok(Outcome::changed(Planned::Done(resp)))
}

/// Send every draft in a manifest. Forcing is never allowed here, so under a non-interactive run
/// each item needs its own `confirm_send`.
pub fn message_send_many(
    ctx: &Context<'_>,
    state: &mut State,
    manifest: &[u8],
    idempotency_key: Option<&str>,
) -> CommandResult<BatchResult> {
    let items = batch::parse_send_manifest(manifest)?;
    let key = idempotency_key.unwrap_or_default();
    if let Some(cached) = idempotency::lookup::<_, BatchResult>(state, key, SEND_MANY, &items)? {
        debug!(key, "replaying message.send-many");
        return Ok(Outcome::unchanged(cached));
    }

    let mut session = ctx.session()?;
    let result = batch::run(&items, |i, item: &SendItem| {
        let draft_id = item.draft_id.trim();
        let confirm = non_empty(item.confirm_send.as_deref()).unwrap_or_default();
        let payload = SendPayload {
            draft_id,
            confirm,
            force: false,
        };
        let item_key = item.idempotency_key.as_deref().unwrap_or_default();
        let failed = |e: CommandError| BatchOutcome {
            draft_id: Some(draft_id.to_string()),
            ..BatchOutcome::failure(i, &e)
        };
        let cached = match idempotency::lookup::<_, SendResponse>(state, item_key, SEND, &payload) {
            Ok(cached) => cached,
            Err(e) => return Ok(failed(e)),
        };
        if let Some(cached) = cached {
            return Ok(BatchOutcome {
                draft_id: Some(cached.draft_id),
                sent_at: Some(cached.sent_at),
                ..BatchOutcome::success(i)
            });
        }
        match send_one(ctx, &mut session, draft_id, confirm, false) {
            Ok((canonical, None)) => Ok(BatchOutcome {
                draft_id: Some(canonical),
                dry_run: true,
                ..BatchOutcome::success(i)
            }),
            Ok((canonical, Some(sent_at))) => {
                let resp = SendResponse {
                    sent: true,
                    draft_id: canonical,
                    sent_at,
                };
                idempotency::store(state, item_key, SEND, &payload, &resp)?;
                Ok(BatchOutcome {
                    draft_id: Some(resp.draft_id),
                    sent_at: Some(resp.sent_at),
                    ..BatchOutcome::success(i)
                })
            }
            Err(e) => Ok(failed(e)),
        }
    });

    let changed = !ctx.options.dry_run && result.success > 0;
    if changed {
        idempotency::store(state, key, SEND_MANY, &items, &result)?;
    }
    Ok(Outcome {
        value: result,
        changed,
    })
}

#[derive(Clone, Debug, Default)]
pub struct ReplyParams {
    pub message_id: String,
    /// Replaces the derived `Re:` subject.
    pub subject: Option<String>,
    pub body: String,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct ReplyPayload<'a> {
    message_id: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Draft a reply to a message; bare UIDs refer to INBOX.
pub fn message_reply(
    ctx: &Context<'_>,
    state: &mut State,
    params: &ReplyParams,
) -> CommandResult<Planned<DraftResponse>> {
    let message_id = params.message_id.trim();
    let id = parse_id(message_id, "message id")?;
    if params.body.trim().is_empty() {
        return Err(CommandError::validation("a reply body is required"));
    }
    let subject_override = non_empty(params.subject.as_deref()).unwrap_or_default();
    let payload = ReplyPayload {
        message_id,
        subject: subject_override,
        body: &params.body,
    };
    let key = params.idempotency_key.as_deref().unwrap_or_default();
    if let Some(cached) = idempotency::lookup::<_, DraftResponse>(state, key, REPLY, &payload)? {
        debug!(key, "replaying message.reply");
        return Ok(Outcome::unchanged(Planned::Done(cached)));
    }

    let mailbox = id.mailbox().unwrap_or(INBOX);
    let mut session = ctx.session()?;
    let original = session
        .fetch(mailbox, id.uid())
        .or_code(ErrorCode::ImapSearchFailed)?
        .ok_or_else(|| CommandError::not_found(format!("message not found: {}", id.canonical(INBOX))))?;

    let to = reply_recipients(&original, ctx.account());
    if to.is_empty() {
        return Err(CommandError::validation("the original message has no sender to reply to"));
    }
    let subject = reply_subject(subject_override, &original.subject);
    let mut draft = Outgoing::new(ctx.account(), &to, &subject, &params.body);
    if let Some((in_reply_to, references)) =
        thread_headers(original.message_id.as_deref(), original.references.as_deref())
    {
        draft = draft
            .header("In-Reply-To", &in_reply_to)
            .header("References", &references.join(" "));
    }
    if ctx.options.dry_run {
        return Ok(Outcome::unchanged(Planned::DryRun(
            Plan::new(REPLY).message(id.canonical(INBOX)),
        )));
    }

    let created = create_draft(
        &mut *session,
        ctx.smtp,
        &ctx.config.fallback,
        ctx.account(),
        &draft,
    )
    .or_code(ErrorCode::ImapDraftCreateFailed)?;
    let resp = DraftResponse {
        draft: MessageRecord {
            id: ImapId::new(created.mailbox.as_str(), created.uid).to_string(),
            uid: created.uid,
            from: draft.from.clone(),
            to: draft.to.clone(),
            subject: draft.subject.clone(),
            body: Some(draft.body.clone()),
            ..MessageRecord::default()
        },
        create_path: Some(created.path),
    };
    idempotency::store(state, key, REPLY, &payload, &resp)?;
    Ok(Outcome::changed(Planned::Done(resp)))
}

/// `Re: <subject>` unless it already is a reply; an explicit override wins.
fn reply_subject(override_subject: &str, original: &str) -> String {
    if !override_subject.is_empty() {
        return override_subject.to_string();
    }
    let original = original.trim();
    if original.to_lowercase().starts_with("re:") {
        original.to_string()
    } else if original.is_empty() {
        "Re:".to_string()
    } else {
        format!("Re: {}", original)
    }
}

/// Reply to the sender, or when replying to one's own message, to its original recipients.
fn reply_recipients(original: &Message, account: &str) -> Vec<String> {
    let senders: Vec<String> = mailparse::addrparse(&original.from)
        .map(|list| {
            list.iter()
                .flat_map(codec::addresses)
                .filter(|a| !a.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();
    let from_self = senders.iter().any(|a| a.trim().eq_ignore_ascii_case(account.trim()));
    if from_self && !original.to.is_empty() {
        return original.to.clone();
    }
    if !senders.is_empty() {
        return senders;
    }
    match original.from.trim() {
        "" => Vec::new(),
        from => vec![from.to_string()],
    }
}

fn normalize_message_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        return None;
    }
    if id.starts_with('<') && id.ends_with('>') {
        return Some(id.to_string());
    }
    Some(format!("<{}>", id.trim_matches(|c| c == '<' || c == '>')))
}

/// `In-Reply-To` and `References` for a reply to a message with the given headers.
fn thread_headers(
    message_id: Option<&str>,
    references: Option<&str>,
) -> Option<(String, Vec<String>)> {
    let id = normalize_message_id(message_id?)?;
    let mut refs: Vec<String> = Vec::new();
    for r in references.unwrap_or_default().split_whitespace() {
        if let Some(r) = normalize_message_id(r) {
            if !refs.contains(&r) {
                refs.push(r);
            }
        }
    }
    if !refs.contains(&id) {
        refs.push(id.clone());
    }
    Some((id, refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Options;
    use crate::config::{Config, Credentials, FallbackPolicy};
    use crate::safety::SafetyPolicy;
    use crate::testing::{FakeConnector, FakeMailstore, RecordingSender};
    use crate::types::Flag;

    const ME: &str = "me@example.com";

    fn config(allow_force: bool) -> Config {
        Config {
            safety: SafetyPolicy {
                require_confirm_non_interactive: true,
                allow_force,
            },
            fallback: FallbackPolicy {
                attempts: 1,
                interval_ms: 0,
            },
            ..Config::default()
        }
    }

    fn non_interactive() -> Options {
        Options {
            non_interactive: true,
            ..Options::default()
        }
    }

    fn store_with_draft() -> FakeMailstore {
        let store = FakeMailstore::new();
        store.set_next_uid("Drafts", 42);
        store.insert(
            "Drafts",
            b"From: me@example.com\r\nTo: a@x.com\r\nSubject: hi\r\n\r\nhello",
            &[Flag::Draft],
        );
        store
    }

    fn send(confirm: Option<&str>, force: bool) -> SendParams {
        SendParams {
            draft_id: "imap:Drafts:42".into(),
            confirm: confirm.map(str::to_string),
            force,
            idempotency_key: None,
        }
    }

    #[test]
    fn send_needs_confirmation_non_interactively() {
        let store = store_with_draft();
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp).with_options(non_interactive());
        let mut state = State::default();

        let err = message_send(&ctx, &mut state, &send(None, false)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfirmationRequired);
        let err = message_send(&ctx, &mut state, &send(Some("imap:Drafts:41"), false)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfirmationRequired);
        assert!(smtp.sent().is_empty());

        let out = message_send(&ctx, &mut state, &send(Some("42"), false)).unwrap();
        let resp = out.value.done().unwrap();
        assert_eq!(resp.draft_id, "imap:Drafts:42");
        let sent = smtp.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@x.com"]);
        assert!(String::from_utf8_lossy(&sent[0].raw).contains("Subject: hi\r\n"));
    }

    #[test]
    fn forced_send_blocked_by_policy() {
        let store = store_with_draft();
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(false);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp).with_options(non_interactive());

        let err = message_send(
            &ctx,
            &mut State::default(),
            &send(Some("imap:Drafts:42"), true),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::SafetyBlocked);
        assert!(smtp.sent().is_empty());
    }

    #[test]
    fn send_replay_skips_bridge() {
        let store = store_with_draft();
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp).with_options(non_interactive());
        let mut state = State::default();
        let params = SendParams {
            idempotency_key: Some("send-1".into()),
            ..send(Some("imap:Drafts:42"), false)
        };

        let first = message_send(&ctx, &mut state, &params).unwrap();
        let second = message_send(&ctx, &mut state, &params).unwrap();
        assert_eq!(first.value, second.value);
        assert!(!second.changed);
        assert_eq!(connector.connects(), 1);
        assert_eq!(smtp.sent().len(), 1);
    }

    #[test]
    fn send_dry_run_still_gates() {
        let store = store_with_draft();
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp).with_options(Options {
            dry_run: true,
            non_interactive: true,
        });
        let err = message_send(&ctx, &mut State::default(), &send(None, false)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfirmationRequired);

        let out = message_send(&ctx, &mut State::default(), &send(Some("42"), false)).unwrap();
        assert!(matches!(out.value, Planned::DryRun(_)));
        assert!(smtp.sent().is_empty());
    }

    #[test]
    fn send_many_isolates_failures() {
        let store = store_with_draft();
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp).with_options(non_interactive());
        let manifest = br#"[
            {"draft_id": "imap:Drafts:42", "confirm_send": "imap:Drafts:42"},
            {"draft_id": "imap:Drafts:42"},
            {"draft_id": "imap:Drafts:99", "confirm_send": "99"},
            {"draft_id": "garbage", "confirm_send": "garbage"}
        ]"#;

        let out = message_send_many(&ctx, &mut State::default(), manifest, None).unwrap();
        let result = out.value;
        assert!(out.changed);
        assert_eq!((result.success, result.failed), (1, 3));
        let codes: Vec<Option<ErrorCode>> = result.results.iter().map(|r| r.error_code).collect();
        assert_eq!(
            codes,
            vec![
                None,
                Some(ErrorCode::ConfirmationRequired),
                Some(ErrorCode::NotFound),
                Some(ErrorCode::Validation)
            ]
        );
        assert_eq!(result.results[1].draft_id.as_deref(), Some("imap:Drafts:42"));
        assert_eq!(smtp.sent().len(), 1);
        assert_eq!(store.logouts(), 1);
    }

    #[test]
    fn send_many_bad_manifest_aborts() {
        let connector = FakeConnector::refusing("offline");
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp);
        let err =
            message_send_many(&ctx, &mut State::default(), br#"[{"confirm_send":"1"}]"#, None)
                .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn reply_threads_and_addresses() {
        let store = FakeMailstore::new();
        store.insert(
            "INBOX",
            b"From: Bob <bob@x.com>\r\nTo: me@example.com\r\nSubject: lunch\r\n\
              Message-ID: <m2@x.com>\r\nReferences: <m1@x.com>\r\n\r\nnoon?",
            &[],
        );
        let connector = FakeConnector::new(&store);
        let smtp = RecordingSender::new();
        let config = config(true);
        let creds = Credentials::new(ME, "pw");
        let ctx = Context::new(&config, &creds, &connector, &smtp);

        let out = message_reply(
            &ctx,
            &mut State::default(),
            &ReplyParams {
                message_id: "1".into(),
                body: "sure".into(),
                ..ReplyParams::default()
            },
        )
        .unwrap();
        let resp = out.value.done().unwrap();
        assert_eq!(resp.draft.to, vec!["bob@x.com"]);
        assert_eq!(resp.draft.subject, "Re: lunch");
        let raw = store.raw("Drafts", resp.draft.uid).unwrap();
        assert!(raw.contains("In-Reply-To: <m2@x.com>\r\n"), "{}", raw);
        assert!(raw.contains("References: <m1@x.com> <m2@x.com>\r\n"), "{}", raw);
    }

    #[test]
    fn send_key_binds_id_not_content() {
        let payload = SendPayload {
            draft_id: "imap:Drafts:42",
            confirm: "42",
            force: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"draft_id": "imap:Drafts:42", "confirm": "42", "force": false})
        );
    }

    #[test]
    fn reply_helpers() {
        assert_eq!(reply_subject("", "RE: x"), "RE: x");
        assert_eq!(reply_subject("", ""), "Re:");
        assert_eq!(reply_subject("Custom", "x"), "Custom");

        let own = Message {
            from: "Me <me@example.com>".into(),
            to: vec!["a@x.com".into(), "b@x.com".into()],
            ..Message::default()
        };
        assert_eq!(reply_recipients(&own, ME), vec!["a@x.com", "b@x.com"]);

        assert_eq!(
            thread_headers(Some("abc@x"), Some("<abc@x> <z@x>")),
            Some(("<abc@x>".to_string(), vec!["<abc@x>".to_string(), "<z@x>".to_string()]))
        );
        assert_eq!(thread_headers(None, Some("<z@x>")), None);
    }
}
