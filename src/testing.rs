//! In-memory stand-ins for the bridge, for driving the command handlers without a network.
//!
//! Enable the `test_helpers` feature to use these from integration tests:
//!
//! ```toml
//! [dev-dependencies]
//! draftbridge = { version = "0.4", features = ["test_helpers"] }
//! ```
//!
//! [`FakeMailstore`] is a cheaply cloneable handle: every clone sees the same mailboxes, so a test
//! can keep one handle for assertions while the handlers own another through a [`FakeConnector`].
//! A [`RecordingSender`] can be told to deliver self-addressed mail into the fake's INBOX, which is
//! what the draft fallback relies on.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::rc::Rc;

use chrono::NaiveDate;

use crate::codec;
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::mailstore::{Connector, Mailstore};
use crate::smtp::SmtpSender;
use crate::types::{Flag, Message, Name, NameAttribute, Uid};

struct Stored {
    raw: Vec<u8>,
    flags: Vec<Flag>,
}

struct FakeMailbox {
    name: String,
    attributes: Vec<NameAttribute>,
    next_uid: Uid,
    messages: BTreeMap<Uid, Stored>,
}

impl FakeMailbox {
    fn new(name: &str, attributes: Vec<NameAttribute>) -> Self {
        FakeMailbox {
            name: name.to_string(),
            attributes,
            next_uid: 1,
            messages: BTreeMap::new(),
        }
    }

    fn add(&mut self, raw: Vec<u8>, flags: Vec<Flag>) -> Uid {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.insert(uid, Stored { raw, flags });
        uid
    }
}

#[derive(Default)]
struct Inner {
    mailboxes: Vec<FakeMailbox>,
    fail_appends: bool,
    failing_searches: Vec<String>,
    calls: Vec<String>,
    logouts: usize,
}

impl Inner {
    fn mailbox(&mut self, name: &str) -> Result<&mut FakeMailbox> {
        self.mailboxes
            .iter_mut()
            .find(|m| m.name == name || (m.name == "INBOX" && name.eq_ignore_ascii_case("INBOX")))
            .ok_or_else(|| Error::No(format!("A0000 NO [NONEXISTENT] unknown mailbox {}", name)))
    }
}

/// An in-memory account with `INBOX` and `Drafts`.
#[derive(Clone)]
pub struct FakeMailstore {
    inner: Rc<RefCell<Inner>>,
}

impl Default for FakeMailstore {
    fn default() -> Self {
        FakeMailstore::new()
    }
}

impl FakeMailstore {
    pub fn new() -> Self {
        let inner = Inner {
            mailboxes: vec![
                FakeMailbox::new("INBOX", vec![]),
                FakeMailbox::new("Drafts", vec![]),
            ],
            ..Inner::default()
        };
        FakeMailstore {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Add a mailbox, optionally carrying the `\Drafts` special-use attribute.
    pub fn add_mailbox(&self, name: &str, drafts: bool) {
        let attributes = if drafts {
            vec![NameAttribute::Drafts]
        } else {
            vec![]
        };
        self.inner
            .borrow_mut()
            .mailboxes
            .push(FakeMailbox::new(name, attributes));
    }

    /// Store a raw message directly, bypassing the call log. Panics on an unknown mailbox.
    pub fn insert(&self, mailbox: &str, raw: &[u8], flags: &[Flag]) -> Uid {
        let mut inner = self.inner.borrow_mut();
        let mbox = inner.mailbox(mailbox).expect("insert into unknown mailbox");
        mbox.add(raw.to_vec(), flags.to_vec())
    }

    /// The UID the next message stored in `mailbox` will get.
    pub fn set_next_uid(&self, mailbox: &str, uid: Uid) {
        let mut inner = self.inner.borrow_mut();
        inner.mailbox(mailbox).expect("unknown mailbox").next_uid = uid;
    }

    /// Make every `APPEND` fail with a `NO`, like a bridge that does not support it.
    pub fn fail_appends(&self) {
        self.inner.borrow_mut().fail_appends = true;
    }

    /// Make every `SEARCH` in `mailbox` fail.
    pub fn fail_searches_in(&self, mailbox: &str) {
        self.inner
            .borrow_mut()
            .failing_searches
            .push(mailbox.to_string());
    }

    pub fn uids(&self, mailbox: &str) -> Vec<Uid> {
        let mut inner = self.inner.borrow_mut();
        inner
            .mailbox(mailbox)
            .map(|m| m.messages.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The stored bytes of one message, lossily decoded.
    pub fn raw(&self, mailbox: &str, uid: Uid) -> Option<String> {
        let mut inner = self.inner.borrow_mut();
        let mbox = inner.mailbox(mailbox).ok()?;
        mbox.messages
            .get(&uid)
            .map(|m| String::from_utf8_lossy(&m.raw).into_owned())
    }

    pub fn flags(&self, mailbox: &str, uid: Uid) -> Vec<Flag> {
        let mut inner = self.inner.borrow_mut();
        inner
            .mailbox(mailbox)
            .ok()
            .and_then(|m| m.messages.get(&uid))
            .map(|m| m.flags.clone())
            .unwrap_or_default()
    }

    /// Every operation performed through the [`Mailstore`] interface, e.g. `"search INBOX ALL"`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.borrow().calls.clone()
    }

    /// How many logged operations start with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn logouts(&self) -> usize {
        self.inner.borrow().logouts
    }

    fn log(&self, call: String) {
        self.inner.borrow_mut().calls.push(call);
    }
}

fn decode_stored(mailbox: &str, uid: Uid, stored: &Stored) -> Result<Message> {
    let mut msg = codec::decode(&stored.raw)?;
    msg.uid = uid;
    msg.mailbox = mailbox.to_string();
    msg.flags = stored.flags.clone();
    Ok(msg)
}

fn tokenize(criteria: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = criteria.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => s.extend(chars.next()),
                    '"' => break,
                    c => s.push(c),
                }
            }
            tokens.push(s);
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(s);
        }
    }
    tokens
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn matches(criteria: &[String], msg: &Message, raw: &str) -> Result<bool> {
    let bad = |what: &str| Error::Bad(format!("A0000 BAD unsupported search criteria {}", what));
    let mut tokens = criteria.iter().map(String::as_str);
    let mut arg = |key: &str| tokens.next().map(str::to_string).ok_or_else(|| bad(key));
    let mut hit = true;
    loop {
        let key = match arg("") {
            Ok(key) => key,
            Err(_) => break,
        };
        hit &= match key.as_str() {
            "ALL" => true,
            "UNSEEN" => !msg.flags.contains(&Flag::Seen),
            "TEXT" => {
                let v = arg("TEXT")?;
                contains(&msg.subject, &v) || contains(&msg.body, &v)
            }
            "SUBJECT" => contains(&msg.subject, &arg("SUBJECT")?),
            "FROM" => contains(&msg.from, &arg("FROM")?),
            "TO" => {
                let v = arg("TO")?;
                msg.to.iter().any(|t| contains(t, &v))
            }
            "KEYWORD" => msg.flags.contains(&Flag::Keyword(arg("KEYWORD")?)),
            "HEADER" => {
                let name = arg("HEADER")?;
                let value = arg("HEADER")?;
                contains(raw, &format!("{}: {}", name, value))
            }
            "UID" => {
                let range = arg("UID")?;
                let low = range
                    .strip_suffix(":*")
                    .and_then(|n| n.parse::<Uid>().ok())
                    .ok_or_else(|| bad(&range))?;
                msg.uid >= low
            }
            "SINCE" | "BEFORE" => {
                let raw_date = arg(&key)?;
                let date = NaiveDate::parse_from_str(&raw_date, "%d-%b-%Y")
                    .map_err(|_| bad(&raw_date))?;
                match msg.date {
                    Some(d) if key == "SINCE" => d.date_naive() >= date,
                    Some(d) => d.date_naive() < date,
                    None => false,
                }
            }
            other => return Err(bad(other)),
        };
    }
    Ok(hit)
}

impl Mailstore for FakeMailstore {
    fn list_mailboxes(&mut self) -> Result<Vec<Name>> {
        self.log("list".to_string());
        let inner = self.inner.borrow();
        Ok(inner
            .mailboxes
            .iter()
            .map(|m| Name::new(m.name.clone(), Some("/".to_string()), m.attributes.clone()))
            .collect())
    }

    fn search(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<Uid>> {
        self.log(format!("search {} {}", mailbox, criteria));
        let mut inner = self.inner.borrow_mut();
        if inner.failing_searches.iter().any(|m| m == mailbox) {
            return Err(Error::No("A0000 NO SEARCH failed".to_string()));
        }
        let tokens = tokenize(criteria);
        let mbox = inner.mailbox(mailbox)?;
        let mut hits = Vec::new();
        for (&uid, stored) in &mbox.messages {
            let msg = match decode_stored(mailbox, uid, stored) {
                Ok(msg) => msg,
                Err(_) => continue,
            };
            if matches(&tokens, &msg, &String::from_utf8_lossy(&stored.raw))? {
                hits.push(uid);
            }
        }
        Ok(hits)
    }

    fn fetch(&mut self, mailbox: &str, uid: Uid) -> Result<Option<Message>> {
        self.log(format!("fetch {} {}", mailbox, uid));
        let mut inner = self.inner.borrow_mut();
        let mbox = inner.mailbox(mailbox)?;
        match mbox.messages.get(&uid) {
            Some(stored) => decode_stored(mailbox, uid, stored).map(Some),
            None => Ok(None),
        }
    }

    fn append_draft(&mut self, mailbox: &str, raw: &[u8]) -> Result<()> {
        self.log(format!("append {}", mailbox));
        let mut inner = self.inner.borrow_mut();
        if inner.fail_appends {
            return Err(Error::No("A0003 NO APPEND not supported".to_string()));
        }
        inner.mailbox(mailbox)?.add(raw.to_vec(), vec![Flag::Draft]);
        Ok(())
    }

    fn move_message(&mut self, from: &str, uid: Uid, to: &str) -> Result<()> {
        self.log(format!("move {} {} {}", from, uid, to));
        let mut inner = self.inner.borrow_mut();
        inner.mailbox(to)?;
        let stored = inner
            .mailbox(from)?
            .messages
            .remove(&uid)
            .ok_or_else(|| Error::No(format!("A0000 NO no message with uid {}", uid)))?;
        inner.mailbox(to)?.add(stored.raw, stored.flags);
        Ok(())
    }

    fn set_flags(&mut self, mailbox: &str, uid: Uid, flags: &[Flag], add: bool) -> Result<()> {
        self.log(format!(
            "store {} {} {}",
            mailbox,
            uid,
            if add { "+" } else { "-" }
        ));
        let mut inner = self.inner.borrow_mut();
        // UID STORE on a missing UID is a silent no-op on real servers too.
        if let Some(stored) = inner.mailbox(mailbox)?.messages.get_mut(&uid) {
            for flag in flags {
                if add && !stored.flags.contains(flag) {
                    stored.flags.push(flag.clone());
                } else if !add {
                    stored.flags.retain(|f| f != flag);
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, mailbox: &str, uid: Uid) -> Result<()> {
        self.log(format!("delete {} {}", mailbox, uid));
        let mut inner = self.inner.borrow_mut();
        inner.mailbox(mailbox)?.messages.remove(&uid);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.log("logout".to_string());
        self.inner.borrow_mut().logouts += 1;
        Ok(())
    }
}

/// Hands out clones of one [`FakeMailstore`], counting connections.
pub struct FakeConnector {
    store: FakeMailstore,
    connects: Cell<usize>,
    refuse: Option<String>,
}

impl FakeConnector {
    pub fn new(store: &FakeMailstore) -> Self {
        FakeConnector {
            store: store.clone(),
            connects: Cell::new(0),
            refuse: None,
        }
    }

    /// A connector whose every connection attempt is refused.
    pub fn refusing(reason: &str) -> Self {
        FakeConnector {
            refuse: Some(reason.to_string()),
            ..FakeConnector::new(&FakeMailstore::new())
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.get()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn Mailstore>> {
        self.connects.set(self.connects.get() + 1);
        if let Some(ref reason) = self.refuse {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                reason.clone(),
            )));
        }
        Ok(Box::new(self.store.clone()))
    }
}

/// One message handed to a [`RecordingSender`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub from: String,
    pub to: Vec<String>,
    pub raw: Vec<u8>,
}

/// An [`SmtpSender`] that records what it is given.
#[derive(Default)]
pub struct RecordingSender {
    sent: RefCell<Vec<SentMessage>>,
    deliver: Option<FakeMailstore>,
    fail: Option<String>,
}

impl RecordingSender {
    pub fn new() -> Self {
        RecordingSender::default()
    }

    /// Also drop messages the sender addresses to itself into `store`'s INBOX.
    pub fn delivering_to(mut self, store: &FakeMailstore) -> Self {
        self.deliver = Some(store.clone());
        self
    }

    /// Refuse every send with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.fail = Some(reason.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.borrow().clone()
    }
}

impl SmtpSender for RecordingSender {
    fn send(&self, from: &str, to: &[String], raw: &[u8]) -> Result<()> {
        if let Some(ref reason) = self.fail {
            return Err(Error::Smtp(reason.clone()));
        }
        self.sent.borrow_mut().push(SentMessage {
            from: from.to_string(),
            to: to.to_vec(),
            raw: raw.to_vec(),
        });
        if let Some(ref store) = self.deliver {
            if to.iter().any(|t| t.eq_ignore_ascii_case(from)) {
                store.insert("INBOX", raw, &[]);
            }
        }
        Ok(())
    }
}
