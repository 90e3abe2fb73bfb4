use std::fmt;

use chrono::{DateTime, Utc};

use super::{Flag, Uid};

/// A message fetched from a mailbox and decoded.
///
/// Records are never edited in place on the server; an update produces a new message with a new
/// UID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub uid: Uid,
    pub mailbox: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// The decoded plain-text body, or the HTML part when no plain part exists.
    pub body: String,
    pub date: Option<DateTime<Utc>>,
    pub flags: Vec<Flag>,
    /// The `Message-ID` header, angle brackets included.
    pub message_id: Option<String>,
    /// The `In-Reply-To` header of a reply.
    pub in_reply_to: Option<String>,
    /// The raw `References` header.
    pub references: Option<String>,
}

impl Message {
    /// Keywords on this message, skipping system flags.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().filter_map(|f| match f {
            Flag::Keyword(k) if !f.is_system() => Some(k.as_str()),
            _ => None,
        })
    }
}

/// A mailbox-scoped message identifier as handed out to callers.
///
/// The canonical form is `imap:<mailbox>:<uid>`. A bare UID is accepted as input too, in which case
/// the mailbox is whatever the operation defaults to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImapId {
    mailbox: Option<String>,
    uid: Uid,
}

impl ImapId {
    pub fn new(mailbox: impl Into<String>, uid: Uid) -> Self {
        ImapId {
            mailbox: Some(mailbox.into()),
            uid,
        }
    }

    /// Parse either `imap:<mailbox>:<uid>` or a bare positive UID.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (mailbox, uid) = match raw.strip_prefix("imap:") {
            Some(rest) => {
                let (mailbox, uid) = rest.rsplit_once(':')?;
                if mailbox.is_empty() {
                    return None;
                }
                (Some(mailbox.to_string()), uid)
            }
            None => (None, raw),
        };
        match uid.parse::<Uid>() {
            Ok(uid) if uid > 0 => Some(ImapId { mailbox, uid }),
            _ => None,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The mailbox named in the id, if it was given in canonical form.
    pub fn mailbox(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }

    /// Canonical form, filling in `default_mailbox` for bare UIDs.
    pub fn canonical(&self, default_mailbox: &str) -> String {
        ImapId::new(self.mailbox().unwrap_or(default_mailbox), self.uid).to_string()
    }
}

impl fmt::Display for ImapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mailbox {
            Some(ref mailbox) => write!(f, "imap:{}:{}", mailbox, self.uid),
            None => write!(f, "{}", self.uid),
        }
    }
}
