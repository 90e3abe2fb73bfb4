use std::fmt;

/// With the exception of [`Flag::Keyword`], these flags are system flags that are pre-defined in
/// [RFC 3501 section 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2). All system flags
/// begin with `\` in the IMAP protocol. Keywords are what the bridge exposes as message tags.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Flag {
    /// Message has been read
    Seen,

    /// Message has been answered
    Answered,

    /// Message is "flagged" for urgent/special attention
    Flagged,

    /// Message is "deleted" for removal by later EXPUNGE
    Deleted,

    /// Message has not completed composition (marked as a draft).
    Draft,

    /// Message is "recently" arrived in this mailbox. This flag can not be altered by the client.
    Recent,

    /// A user- or server-defined keyword, such as `$Label1` or `invoices`.
    Keyword(String),
}

impl Flag {
    fn system(s: &str) -> Option<Self> {
        match s {
            "\\Seen" => Some(Flag::Seen),
            "\\Answered" => Some(Flag::Answered),
            "\\Flagged" => Some(Flag::Flagged),
            "\\Deleted" => Some(Flag::Deleted),
            "\\Draft" => Some(Flag::Draft),
            "\\Recent" => Some(Flag::Recent),
            _ => None,
        }
    }

    /// Whether this is a `\`-prefixed flag rather than a keyword.
    ///
    /// Unknown backslash flags sent by the server are kept as keywords but still count as system
    /// flags here.
    pub fn is_system(&self) -> bool {
        match self {
            Flag::Keyword(k) => k.starts_with('\\'),
            _ => true,
        }
    }

    /// Build a keyword flag, rejecting names that are not a valid IMAP atom.
    pub fn keyword(name: &str) -> Option<Self> {
        let name = name.trim();
        let valid = !name.is_empty()
            && !name.starts_with('\\')
            && name.chars().all(|c| {
                c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | ']')
            });
        if valid {
            Some(Flag::Keyword(name.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::Keyword(ref s) => write!(f, "{}", s),
        }
    }
}

impl From<String> for Flag {
    fn from(s: String) -> Self {
        Flag::system(&s).unwrap_or(Flag::Keyword(s))
    }
}

impl<'a> From<&'a str> for Flag {
    fn from(s: &'a str) -> Self {
        Flag::system(s).unwrap_or_else(|| Flag::Keyword(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flags_round_trip_through_display() {
        for raw in ["\\Seen", "\\Draft", "\\Deleted"] {
            let flag = Flag::from(raw);
            assert!(flag.is_system());
            assert_eq!(flag.to_string(), raw);
        }
    }

    #[test]
    fn keywords() {
        assert_eq!(
            Flag::keyword(" invoices "),
            Some(Flag::Keyword("invoices".into()))
        );
        assert!(!Flag::from("$Label1").is_system());
        assert!(Flag::from("\\Important").is_system());
        assert_eq!(Flag::keyword("two words"), None);
        assert_eq!(Flag::keyword("\\Seen"), None);
        assert_eq!(Flag::keyword("a(b"), None);
        assert_eq!(Flag::keyword(""), None);
    }
}
