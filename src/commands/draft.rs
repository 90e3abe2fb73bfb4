use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::{self, BatchOutcome, BatchResult, DraftCreateItem};
use crate::codec::Outgoing;
use crate::draft::{create_draft, Created};
use crate::error::{CommandError, ErrorCode, ResultExt};
use crate::idempotency;
use crate::mailstore::{Mailstore, Session};
use crate::search::{sort_by_uid_desc, Page, SearchFilters};
use crate::state::State;
use crate::types::{ImapId, Message};

use super::responses::{DeleteResponse, DraftList, DraftResponse, MessageRecord, Plan, Planned};
use super::{non_empty, parse_id, CommandResult, Context, Outcome};

const CREATE: &str = "draft.create";
const CREATE_MANY: &str = "draft.create-many";

#[derive(Clone, Debug, Default)]
pub struct DraftListParams {
    pub query: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub fn draft_list(ctx: &Context<'_>, params: &DraftListParams) -> CommandResult<DraftList> {
    let criteria = SearchFilters {
        query: params.query.clone(),
        from: params.from.clone(),
        to: params.to.clone(),
        after: params.after.clone(),
        before: params.before.clone(),
        ..SearchFilters::default()
    }
    .criteria()?;
    let page = Page::new(params.cursor.as_deref(), params.limit);

    let mut session = ctx.session()?;
    let mailbox = session
        .drafts_mailbox()
        .or_code(ErrorCode::ImapDraftListFailed)?;
    let mut drafts = session
        .list_messages(&mailbox, &criteria)
        .or_code(ErrorCode::ImapDraftListFailed)?;
    sort_by_uid_desc(&mut drafts);
    let (items, next_cursor) = page.apply(&drafts);
    let records: Vec<MessageRecord> = items.iter().map(|m| MessageRecord::new(m, true)).collect();
    Ok(Outcome::unchanged(DraftList {
        count: records.len(),
        total: drafts.len(),
        next_cursor,
        drafts: records,
    }))
}

/// Fetch the draft `id` names, looking in the drafts mailbox when the id is a bare UID.
pub(crate) fn fetch_draft(
    session: &mut Session,
    id: &ImapId,
    code: ErrorCode,
) -> Result<Message, CommandError> {
    let mailbox = match id.mailbox() {
        Some(mailbox) => mailbox.to_string(),
        None => session.drafts_mailbox().or_code(code)?,
    };
    session
        .fetch(&mailbox, id.uid())
        .or_code(code)?
        .ok_or_else(|| CommandError::not_found(format!("draft not found: {}", id.canonical(&mailbox))))
}

pub fn draft_get(ctx: &Context<'_>, draft_id: &str) -> CommandResult<DraftResponse> {
    let id = parse_id(draft_id, "draft id")?;
    let mut session = ctx.session()?;
    let draft = fetch_draft(&mut session, &id, ErrorCode::ImapDraftListFailed)?;
    Ok(Outcome::unchanged(DraftResponse {
        draft: MessageRecord::new(&draft, true),
        create_path: None,
    }))
}

#[derive(Clone, Debug, Default)]
pub struct DraftCreateParams {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub idempotency_key: Option<String>,
}

/// The request fields an idempotency key is bound to.
#[derive(Serialize)]
struct CreatePayload<'a> {
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
}

fn recipients(to: &[String]) -> Result<Vec<String>, CommandError> {
    let to: Vec<String> = to
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if to.is_empty() {
        return Err(CommandError::validation("at least one recipient is required"));
    }
    Ok(to)
}

fn created_response(created: &Created, draft: &Outgoing) -> DraftResponse {
    DraftResponse {
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
    }
}

/// Store a new draft, through `APPEND` or the SMTP fallback.
///
/// A request repeated under the same idempotency key replays the first response without
/// connecting, so a retry never sends a second fallback email.
pub fn draft_create(
    ctx: &Context<'_>,
    state: &mut State,
    params: &DraftCreateParams,
) -> CommandResult<Planned<DraftResponse>> {
    let to = recipients(&params.to)?;
    if params.body.is_empty() {
        return Err(CommandError::validation("body is required"));
    }
    let payload = CreatePayload {
        to: &to,
        subject: &params.subject,
        body: &params.body,
    };
    let key = params.idempotency_key.as_deref().unwrap_or_default();
    if let Some(cached) = idempotency::lookup::<_, DraftResponse>(state, key, CREATE, &payload)? {
        debug!(key, "replaying draft.create");
        return Ok(Outcome::unchanged(Planned::Done(cached)));
    }
    if ctx.options.dry_run {
        return Ok(Outcome::unchanged(Planned::DryRun(Plan::new(CREATE))));
    }

    let mut session = ctx.session()?;
    let draft = Outgoing::new(ctx.account(), &to, &params.subject, &params.body);
    let created = create_draft(
        &mut *session,
        ctx.smtp,
        &ctx.config.fallback,
        ctx.account(),
        &draft,
    )
    .or_code(ErrorCode::ImapDraftCreateFailed)?;
    let resp = created_response(&created, &draft);
    idempotency::store(state, key, CREATE, &payload, &resp)?;
    Ok(Outcome::changed(Planned::Done(resp)))
}

/// Create every draft in a manifest, isolating failures per item.
///
/// `idempotency_key` covers the whole manifest; an item's own key covers just that item, so a
/// partly failed batch can be resubmitted with a new batch key without duplicating the drafts
/// that did get created.
pub fn draft_create_many(
    ctx: &Context<'_>,
    state: &mut State,
    manifest: &[u8],
    idempotency_key: Option<&str>,
) -> CommandResult<BatchResult> {
    let items = batch::parse_draft_manifest(manifest)?;
    let key = idempotency_key.unwrap_or_default();
    if let Some(cached) = idempotency::lookup::<_, BatchResult>(state, key, CREATE_MANY, &items)? {
        debug!(key, "replaying draft.create-many");
        return Ok(Outcome::unchanged(cached));
    }

    let dry_run = ctx.options.dry_run;
    let mut session = if dry_run { None } else { Some(ctx.session()?) };
    let result = batch::run(&items, |i, item: &DraftCreateItem| {
        let body = item.load_body()?;
        let to = recipients(&item.to)?;
        let session = match session {
            Some(ref mut session) => session,
            None => {
                return Ok(BatchOutcome {
                    dry_run: true,
                    ..BatchOutcome::success(i)
                })
            }
        };
        let payload = CreatePayload {
            to: &to,
            subject: &item.subject,
            body: &body,
        };
        let item_key = item.idempotency_key.as_deref().unwrap_or_default();
        let resp = match idempotency::lookup::<_, DraftResponse>(state, item_key, CREATE, &payload)? {
            Some(cached) => cached,
            None => {
                let draft = Outgoing::new(ctx.account(), &to, &item.subject, &body);
                let created = create_draft(
                    &mut **session,
                    ctx.smtp,
                    &ctx.config.fallback,
                    ctx.account(),
                    &draft,
                )
                .or_code(ErrorCode::ImapDraftCreateFailed)?;
                let resp = created_response(&created, &draft);
                idempotency::store(state, item_key, CREATE, &payload, &resp)?;
                resp
            }
        };
        Ok(BatchOutcome {
            draft_id: Some(resp.draft.id),
            uid: Some(resp.draft.uid),
            create_path: resp.create_path,
            ..BatchOutcome::success(i)
        })
    });

    let changed = !dry_run && result.success > 0;
    if changed {
        idempotency::store(state, key, CREATE_MANY, &items, &result)?;
    }
    Ok(Outcome { value: result, changed })
}

#[derive(Clone, Debug, Default)]
pub struct DraftUpdateParams {
    pub draft_id: String,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// Replace a draft with an edited copy.
///
/// Messages cannot be edited in place, so the replacement is created first and the original
/// deleted only once that succeeded. The updated draft has a new id.
pub fn draft_update(
    ctx: &Context<'_>,
    params: &DraftUpdateParams,
) -> CommandResult<Planned<DraftResponse>> {
    let id = parse_id(&params.draft_id, "draft id")?;
    let mut session = ctx.session()?;
    let original = fetch_draft(&mut session, &id, ErrorCode::ImapDraftUpdateFailed)?;
    let old_id = ImapId::new(original.mailbox.as_str(), original.uid);

    let subject = non_empty(params.subject.as_deref()).unwrap_or(original.subject.as_str());
    let body = match params.body.as_deref() {
        Some(body) if !body.is_empty() => body,
        _ => original.body.as_str(),
    };
    if ctx.options.dry_run {
        return Ok(Outcome::unchanged(Planned::DryRun(
            Plan::new("draft.update").draft(old_id.to_string()),
        )));
    }

    let mut draft = Outgoing::new(ctx.account(), &original.to, subject, body);
    if let Some(ref in_reply_to) = original.in_reply_to {
        draft = draft.header("In-Reply-To", in_reply_to);
    }
    if let Some(ref references) = original.references {
        draft = draft.header("References", references);
    }
    let created = create_draft(
        &mut *session,
        ctx.smtp,
        &ctx.config.fallback,
        ctx.account(),
        &draft,
    )
    .or_code(ErrorCode::ImapDraftUpdateFailed)?;
    let new_id = ImapId::new(created.mailbox.as_str(), created.uid);
    if let Err(e) = session.delete(&original.mailbox, original.uid) {
        warn!(old = %old_id, new = %new_id, "replacement created but original not deleted: {}", e);
        return Err(
            CommandError::new(ErrorCode::ImapDraftUpdateFailed, e.to_string()).with_hint(format!(
                "The updated draft is {}; delete {} by hand",
                new_id, old_id
            )),
        );
    }
    Ok(Outcome::changed(Planned::Done(created_response(&created, &draft))))
}

pub fn draft_delete(ctx: &Context<'_>, draft_id: &str) -> CommandResult<Planned<DeleteResponse>> {
    let id = parse_id(draft_id, "draft id")?;
    let mut session = ctx.session()?;
    let mailbox = match id.mailbox() {
        Some(mailbox) => mailbox.to_string(),
        None => session
            .drafts_mailbox()
            .or_code(ErrorCode::ImapDraftDeleteFailed)?,
    };
    let canonical = id.canonical(&mailbox);
    if ctx.options.dry_run {
        return Ok(Outcome::unchanged(Planned::DryRun(
            Plan::new("draft.delete").draft(canonical),
        )));
    }
    session
        .delete(&mailbox, id.uid())
        .or_code(ErrorCode::ImapDraftDeleteFailed)?;
    Ok(Outcome::changed(Planned::Done(DeleteResponse {
        deleted: true,
        draft_id: canonical,
    })))
}
