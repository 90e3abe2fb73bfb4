//! Serializable handler results. Field names are camelCase on the wire.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::draft::CreatePath;
use crate::types::{classify_mailbox, ImapId, MailboxKind, Message, Name, Uid};

/// The result of a mutating handler, or what it would have done under dry-run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Planned<T> {
    Done(T),
    DryRun(Plan),
}

impl<T> Planned<T> {
    /// The finished result, if this was not a dry run.
    pub fn done(self) -> Option<T> {
        match self {
            Planned::Done(value) => Some(value),
            Planned::DryRun(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub action: String,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Plan {
    pub fn new(action: &str) -> Self {
        Plan {
            action: action.to_string(),
            dry_run: true,
            draft_id: None,
            message_id: None,
        }
    }

    pub fn draft(mut self, id: impl Into<String>) -> Self {
        self.draft_id = Some(id.into());
        self
    }

    pub fn message(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MailboxInfo {
    pub id: String,
    pub name: String,
    pub kind: MailboxKind,
}

impl From<&Name> for MailboxInfo {
    fn from(name: &Name) -> Self {
        let (id, kind) = classify_mailbox(name.name());
        MailboxInfo {
            id,
            name: name.name().to_string(),
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MailboxList {
    pub mailboxes: Vec<MailboxInfo>,
    pub count: usize,
}

/// How `mailbox_resolve` matched its query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    NameExact,
    IdExact,
    NameCasefold,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxResolve {
    pub mailbox: MailboxInfo,
    pub matched_by: MatchedBy,
}

/// A draft or message as reported to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub uid: Uid,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl MessageRecord {
    /// Listings leave the body out; single-message reads include it.
    pub fn new(msg: &Message, with_body: bool) -> Self {
        MessageRecord {
            id: ImapId::new(msg.mailbox.as_str(), msg.uid).to_string(),
            uid: msg.uid,
            from: msg.from.clone(),
            to: msg.to.clone(),
            subject: msg.subject.clone(),
            body: if with_body { Some(msg.body.clone()) } else { None },
            date: msg
                .date
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            flags: msg.flags.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftList {
    pub drafts: Vec<MessageRecord>,
    pub count: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftResponse {
    pub draft: MessageRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_path: Option<CreatePath>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub draft_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    pub message: MessageRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    pub messages: Vec<MessageRecord>,
    pub count: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub mailbox: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub sent: bool,
    pub draft_id: String,
    pub sent_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TagList {
    pub tags: Vec<String>,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUpdate {
    pub message_id: String,
    pub tag: String,
    pub changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub addr: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    pub checks: Vec<HealthCheck>,
}
