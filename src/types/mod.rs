//! This module contains types used throughout the crate.

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit value assigned to each message, which is unique only within the mailbox that holds
/// it. Unique identifiers are assigned in a strictly ascending fashion in the mailbox; as each
/// message is added to the mailbox it is assigned a higher UID than the message(s) which were
/// added previously. The same message moved to another mailbox gets a new UID there.
pub type Uid = u32;

mod flag;
pub use self::flag::Flag;

mod name;
pub use self::name::{classify_mailbox, MailboxKind, Name, NameAttribute};

mod message;
pub use self::message::{ImapId, Message};
