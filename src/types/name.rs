use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref NON_ID_CHARS: Regex = Regex::new("[^a-z0-9]+").unwrap();
}

/// A name that matches a `LIST` command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    attributes: Vec<NameAttribute>,
    delimiter: Option<String>,
    name: String,
}

/// An attribute set for an IMAP name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum NameAttribute {
    /// It is not possible for any child levels of hierarchy to exist
    /// under this name; no child levels exist now and none can be
    /// created in the future.
    NoInferiors,

    /// It is not possible to use this name as a selectable mailbox.
    NoSelect,

    /// The special-use mailbox holding draft messages
    /// ([RFC 6154](https://tools.ietf.org/html/rfc6154)).
    Drafts,

    /// The special-use mailbox holding sent messages.
    Sent,

    /// The special-use mailbox holding deleted messages.
    Trash,

    /// A non-standard user- or server-defined name attribute.
    Custom(String),
}

impl NameAttribute {
    fn system(s: &str) -> Option<Self> {
        // attribute names are case-insensitive
        match s.to_ascii_lowercase().as_str() {
            "\\noinferiors" => Some(NameAttribute::NoInferiors),
            "\\noselect" => Some(NameAttribute::NoSelect),
            "\\drafts" => Some(NameAttribute::Drafts),
            "\\sent" => Some(NameAttribute::Sent),
            "\\trash" => Some(NameAttribute::Trash),
            _ => None,
        }
    }
}

impl From<String> for NameAttribute {
    fn from(s: String) -> Self {
        NameAttribute::system(&s).unwrap_or(NameAttribute::Custom(s))
    }
}

impl<'a> From<&'a str> for NameAttribute {
    fn from(s: &'a str) -> Self {
        NameAttribute::system(s).unwrap_or_else(|| NameAttribute::Custom(s.to_string()))
    }
}

impl Name {
    pub(crate) fn new(
        name: String,
        delimiter: Option<String>,
        attributes: Vec<NameAttribute>,
    ) -> Self {
        Name {
            attributes,
            delimiter,
            name,
        }
    }

    /// Attributes of this name.
    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes[..]
    }

    /// The hierarchy delimiter is a character used to delimit levels of hierarchy in a mailbox
    /// name. `None` means that no hierarchy exists; the name is a "flat" name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// The mailbox name, valid as an argument for `SELECT` unless [`NameAttribute::NoSelect`]
    /// is indicated.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the server marked this mailbox as the drafts special-use mailbox.
    pub fn is_drafts(&self) -> bool {
        self.attributes.contains(&NameAttribute::Drafts)
    }
}

/// Whether a mailbox is one of the well-known provider folders or one the user made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxKind {
    System,
    Custom,
}

/// Map a mailbox name to a stable id and its kind.
///
/// Well-known folders get fixed ids (`inbox`, `drafts`, `sent`, `archive`, `spam`, `trash`,
/// `all_mail`); any other name is slugged to lowercase alphanumerics joined by `_`.
pub fn classify_mailbox(name: &str) -> (String, MailboxKind) {
    let lower = name.trim().to_lowercase();
    let id = match lower.as_str() {
        "inbox" => "inbox",
        "drafts" => "drafts",
        "sent" | "sent mail" | "sent messages" => "sent",
        "archive" => "archive",
        "spam" | "junk" => "spam",
        "trash" | "deleted items" => "trash",
        "all mail" | "allmail" => "all_mail",
        _ => {
            let slug = NON_ID_CHARS.replace_all(&lower, "_");
            let slug = slug.trim_matches('_');
            let id = if slug.is_empty() { "mailbox" } else { slug };
            return (id.to_string(), MailboxKind::Custom);
        }
    };
    (id.to_string(), MailboxKind::System)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_mailboxes() {
        assert_eq!(
            classify_mailbox("INBOX"),
            ("inbox".to_string(), MailboxKind::System)
        );
        assert_eq!(
            classify_mailbox("Sent Messages"),
            ("sent".to_string(), MailboxKind::System)
        );
        assert_eq!(
            classify_mailbox("Junk"),
            ("spam".to_string(), MailboxKind::System)
        );
        assert_eq!(
            classify_mailbox("All Mail"),
            ("all_mail".to_string(), MailboxKind::System)
        );
    }

    #[test]
    fn custom_mailboxes_are_slugged() {
        assert_eq!(
            classify_mailbox("Folders/Work Stuff"),
            ("folders_work_stuff".to_string(), MailboxKind::Custom)
        );
        assert_eq!(
            classify_mailbox("!!!"),
            ("mailbox".to_string(), MailboxKind::Custom)
        );
    }

    #[test]
    fn attributes_are_case_insensitive() {
        assert_eq!(NameAttribute::from("\\Drafts"), NameAttribute::Drafts);
        assert_eq!(NameAttribute::from("\\NoSelect"), NameAttribute::NoSelect);
        assert_eq!(
            NameAttribute::from("\\HasNoChildren"),
            NameAttribute::Custom("\\HasNoChildren".into())
        );
    }
}
