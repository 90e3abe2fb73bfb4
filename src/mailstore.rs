//! The mailbox operations the command layer needs, behind a trait so handlers can run against
//! the real bridge or an in-memory fake.

use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::client::Client;
use crate::codec;
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::parse::FetchData;
use crate::types::{Flag, Message, Name, Uid};

/// Used when the server marks no mailbox as `\Drafts` and none is called "Drafts".
pub const DEFAULT_DRAFTS: &str = "Drafts";

/// Mailbox-level access to one logged-in account.
///
/// Every method that names a mailbox selects it first; nothing assumes a mailbox is still
/// selected from an earlier call.
pub trait Mailstore {
    fn list_mailboxes(&mut self) -> Result<Vec<Name>>;

    /// The mailbox drafts live in. See [`drafts_mailbox_name`].
    fn drafts_mailbox(&mut self) -> Result<String> {
        Ok(drafts_mailbox_name(&self.list_mailboxes()?))
    }

    /// UIDs in `mailbox` matching already-rendered `criteria`.
    fn search(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<Uid>>;

    /// Fetch and decode one message; `None` if the UID does not exist.
    fn fetch(&mut self, mailbox: &str, uid: Uid) -> Result<Option<Message>>;

    /// Fetch every message matching `criteria`, in ascending UID order.
    ///
    /// Messages that vanish between the search and the fetch, or that cannot be decoded, are
    /// skipped.
    fn list_messages(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<Message>> {
        let uids = self.search(mailbox, criteria)?;
        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            match self.fetch(mailbox, uid) {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => {}
                Err(Error::Codec(e)) => warn!(mailbox, uid, "skipping undecodable message: {}", e),
                Err(e) => return Err(e),
            }
        }
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    /// Append `raw` to `mailbox` flagged `\Draft`.
    fn append_draft(&mut self, mailbox: &str, raw: &[u8]) -> Result<()>;

    fn move_message(&mut self, from: &str, uid: Uid, to: &str) -> Result<()>;

    /// Add (`add = true`) or remove `flags` on one message.
    fn set_flags(&mut self, mailbox: &str, uid: Uid, flags: &[Flag], add: bool) -> Result<()>;

    /// Flag the message `\Deleted` and expunge the mailbox.
    fn delete(&mut self, mailbox: &str, uid: Uid) -> Result<()>;

    fn logout(&mut self) -> Result<()>;
}

/// Pick the drafts mailbox from a `LIST` result: the one carrying the `\Drafts` special-use
/// attribute, else one named "Drafts" in any case, else [`DEFAULT_DRAFTS`].
pub fn drafts_mailbox_name(names: &[Name]) -> String {
    names
        .iter()
        .find(|n| n.is_drafts())
        .or_else(|| {
            names
                .iter()
                .find(|n| n.name().eq_ignore_ascii_case(DEFAULT_DRAFTS))
        })
        .map(|n| n.name().to_string())
        .unwrap_or_else(|| DEFAULT_DRAFTS.to_string())
}

fn flag_list(flags: &[Flag]) -> String {
    let flags: Vec<String> = flags.iter().map(ToString::to_string).collect();
    format!("({})", flags.join(" "))
}

impl<T: Read + Write> Client<T> {
    // Assumes `mailbox` is already selected.
    fn fetch_selected(&mut self, mailbox: &str, uid: Uid) -> Result<Option<Message>> {
        let FetchData { flags, body, .. } = match self.uid_fetch(uid)? {
            Some(fetch) => fetch,
            None => return Ok(None),
        };
        let body = body.unwrap_or_default();
        let mut msg = codec::decode(&body)?;
        msg.uid = uid;
        msg.mailbox = mailbox.to_string();
        msg.flags = flags.into_iter().map(Flag::from).collect();
        Ok(Some(msg))
    }
}

impl<T: Read + Write> Mailstore for Client<T> {
    fn list_mailboxes(&mut self) -> Result<Vec<Name>> {
        self.list("", "*")
    }

    fn search(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<Uid>> {
        self.select(mailbox)?;
        self.uid_search(criteria)
    }

    fn fetch(&mut self, mailbox: &str, uid: Uid) -> Result<Option<Message>> {
        self.select(mailbox)?;
        self.fetch_selected(mailbox, uid)
    }

    fn list_messages(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<Message>> {
        self.select(mailbox)?;
        let uids = self.uid_search(criteria)?;
        debug!(mailbox, count = uids.len(), "fetching search results");
        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            match self.fetch_selected(mailbox, uid) {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => {}
                Err(Error::Codec(e)) => warn!(mailbox, uid, "skipping undecodable message: {}", e),
                Err(e) => return Err(e),
            }
        }
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    fn append_draft(&mut self, mailbox: &str, raw: &[u8]) -> Result<()> {
        self.select(mailbox)?;
        self.append(mailbox, &[Flag::Draft], raw)
    }

    fn move_message(&mut self, from: &str, uid: Uid, to: &str) -> Result<()> {
        self.select(from)?;
        self.uid_move(&uid.to_string(), to)
    }

    fn set_flags(&mut self, mailbox: &str, uid: Uid, flags: &[Flag], add: bool) -> Result<()> {
        self.select(mailbox)?;
        let op = if add { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
        self.uid_store(&uid.to_string(), &format!("{} {}", op, flag_list(flags)))
    }

    fn delete(&mut self, mailbox: &str, uid: Uid) -> Result<()> {
        self.select(mailbox)?;
        self.uid_store(
            &uid.to_string(),
            &format!("+FLAGS.SILENT {}", flag_list(&[Flag::Deleted])),
        )?;
        self.expunge()
    }

    fn logout(&mut self) -> Result<()> {
        Client::logout(self)
    }
}

/// Opens logged-in [`Mailstore`]s. One connection serves a whole invocation.
pub trait Connector {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Mailstore>>;
}

/// An open mailstore that logs out when dropped, on every exit path.
pub struct Session {
    store: Box<dyn Mailstore>,
}

impl Session {
    pub fn open(connector: &dyn Connector, credentials: &Credentials) -> Result<Session> {
        Ok(Session {
            store: connector.connect(credentials)?,
        })
    }

    pub fn new(store: Box<dyn Mailstore>) -> Session {
        Session { store }
    }
}

impl Deref for Session {
    type Target = dyn Mailstore;

    fn deref(&self) -> &Self::Target {
        &*self.store
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.store
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.store.logout() {
            debug!("logout failed: {}", e);
        }
    }
}
