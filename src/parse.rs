//! Tokenizer for IMAP server output.
//!
//! Every line the server sends falls into one of four categories: the untagged greeting, untagged
//! data (`* ...`), a continuation prompt (`+ ...`) or a tagged completion (`A0001 OK ...`).
//! Untagged data may announce a literal (`{N}` at the end of a line); the client reads those
//! bytes verbatim and hands the assembled response to the parsers here as an [`Untagged`], whose
//! text keeps the `{N}` markers in place and whose literals are stored alongside in order.

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while, take_while1};
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{eof, map, map_res, opt, recognize, rest, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

use super::error::ParseError;
use super::types::{Name, NameAttribute, Uid};

/// Completion status carried by tagged and some untagged responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

/// One classified line of server output, without its trailing CRLF.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    /// The untagged status line the server opens the connection with.
    Greeting { status: Status, text: &'a str },
    /// Untagged data, with the leading `* ` removed.
    Untagged(&'a str),
    /// A `+` continuation prompt.
    Continuation(&'a str),
    /// The completion of the command tagged `tag`.
    Tagged {
        tag: &'a str,
        status: Status,
        text: &'a str,
    },
}

/// An untagged response reassembled across any literals it carried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Untagged {
    /// Response text with the `* ` prefix stripped; literals appear as their `{N}` markers.
    pub text: String,
    /// Literal payloads, in the order their markers appear in `text`.
    pub literals: Vec<Vec<u8>>,
}

/// The parts of a `FETCH` response this crate cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchData {
    pub seq: u32,
    pub uid: Option<Uid>,
    pub flags: Vec<String>,
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Nil,
    Atom(String),
    Quoted(String),
    Literal,
    List(Vec<Value>),
}

impl Value {
    fn literal_count(&self) -> usize {
        match self {
            Value::Literal => 1,
            Value::List(items) => items.iter().map(Value::literal_count).sum(),
            _ => 0,
        }
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | '+')
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '"')
}

fn status(i: &str) -> IResult<&str, Status> {
    alt((
        value(Status::Ok, tag_no_case("OK")),
        value(Status::No, tag_no_case("NO")),
        value(Status::Bad, tag_no_case("BAD")),
        value(Status::PreAuth, tag_no_case("PREAUTH")),
        value(Status::Bye, tag_no_case("BYE")),
    ))(i)
}

// Free text up to end of line, either empty or introduced by a single space.
fn text(i: &str) -> IResult<&str, &str> {
    alt((preceded(char(' '), rest), eof))(i)
}

fn tagged(i: &str) -> IResult<&str, ResponseLine<'_>> {
    map(
        tuple((take_while1(is_tag_char), char(' '), status, text)),
        |(tag, _, status, text)| ResponseLine::Tagged { tag, status, text },
    )(i)
}

fn untagged(i: &str) -> IResult<&str, ResponseLine<'_>> {
    map(preceded(char('*'), text), ResponseLine::Untagged)(i)
}

fn continuation(i: &str) -> IResult<&str, ResponseLine<'_>> {
    map(preceded(char('+'), text), ResponseLine::Continuation)(i)
}

/// Classify one line of server output. `line` must not include the trailing CRLF.
pub fn parse_line(line: &str) -> Result<ResponseLine<'_>, ParseError> {
    match alt((untagged, continuation, tagged))(line) {
        Ok(("", parsed)) => Ok(parsed),
        _ => Err(ParseError::Invalid(line.to_string())),
    }
}

/// Classify the first line of a session, which must be an untagged status response.
pub fn parse_greeting(line: &str) -> Result<ResponseLine<'_>, ParseError> {
    if let ResponseLine::Untagged(payload) = parse_line(line)? {
        if let Ok(("", (status, text))) = pair(status, text)(payload) {
            return Ok(ResponseLine::Greeting { status, text });
        }
    }
    Err(ParseError::Invalid(line.to_string()))
}

/// Strip a trailing CRLF (or bare LF) from a raw line.
pub fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// If `line` ends by announcing a literal (`{N}`), return `N`.
pub fn literal_len(line: &[u8]) -> Option<usize> {
    let body = trim_crlf(line).strip_suffix(b"}")?;
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn quoted(i: &str) -> IResult<&str, String> {
    let (mut i, _) = char('"')(i)?;
    let mut out = String::new();
    loop {
        let mut chars = i.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        i,
                        nom::error::ErrorKind::Escaped,
                    )))
                }
            },
            Some(c) => out.push(c),
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
        i = chars.as_str();
    }
}

fn literal_marker(i: &str) -> IResult<&str, Value> {
    value(Value::Literal, delimited(char('{'), digit1, char('}')))(i)
}

fn atom(i: &str) -> IResult<&str, Value> {
    map(take_while1(is_atom_char), |a: &str| {
        if a.eq_ignore_ascii_case("NIL") {
            Value::Nil
        } else {
            Value::Atom(a.to_string())
        }
    })(i)
}

fn list(i: &str) -> IResult<&str, Vec<Value>> {
    delimited(
        char('('),
        separated_list0(space1, item),
        preceded(space0, char(')')),
    )(i)
}

fn item(i: &str) -> IResult<&str, Value> {
    alt((
        map(list, Value::List),
        map(quoted, Value::Quoted),
        literal_marker,
        atom,
    ))(i)
}

fn number(i: &str) -> IResult<&str, u32> {
    map_res(digit1, |d: &str| d.parse::<u32>())(i)
}

// `BODY[HEADER.FIELDS (FROM TO)]<0>` is one name despite the spaces inside the brackets.
fn attr_name(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| is_atom_char(c) && c != '['),
        opt(pair(
            delimited(char('['), take_while(|c: char| c != ']'), char(']')),
            opt(delimited(char('<'), digit1, char('>'))),
        )),
    ))(i)
}

fn fetch_attrs(i: &str) -> IResult<&str, Vec<(&str, Value)>> {
    delimited(
        char('('),
        separated_list0(space1, pair(attr_name, preceded(space1, item))),
        preceded(space0, char(')')),
    )(i)
}

fn fetch_prefix(i: &str) -> IResult<&str, u32> {
    terminated(number, tuple((space1, tag_no_case("FETCH"), space1)))(i)
}

/// Parse a `<seq> FETCH (...)` response. Returns `Ok(None)` for any other response.
pub fn parse_fetch(resp: &Untagged) -> Result<Option<FetchData>, ParseError> {
    let (attrs_text, seq) = match fetch_prefix(&resp.text) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(None),
    };
    let attrs = match terminated(fetch_attrs, space0)(attrs_text) {
        Ok(("", attrs)) => attrs,
        _ => return Err(ParseError::Invalid(resp.text.clone())),
    };

    let mut fetch = FetchData {
        seq,
        ..FetchData::default()
    };
    let mut next_literal = 0;
    for (name, val) in attrs {
        match (name.to_ascii_uppercase().as_str(), &val) {
            ("UID", Value::Atom(n)) => {
                fetch.uid = Some(
                    n.parse()
                        .map_err(|_| ParseError::Uid(n.to_string()))?,
                );
            }
            ("FLAGS", Value::List(flags)) => {
                fetch.flags = flags
                    .iter()
                    .filter_map(|f| match f {
                        Value::Atom(a) => Some(a.clone()),
                        _ => None,
                    })
                    .collect();
            }
            ("RFC822", Value::Literal) | ("BODY[]", Value::Literal) => {
                fetch.body = resp.literals.get(next_literal).cloned();
            }
            ("RFC822", Value::Quoted(s)) | ("BODY[]", Value::Quoted(s)) => {
                fetch.body = Some(s.clone().into_bytes());
            }
            _ => {}
        }
        next_literal += val.literal_count();
    }
    Ok(Some(fetch))
}

/// Parse a `SEARCH n n n` response. Returns `None` for any other response.
pub fn parse_search(resp: &Untagged) -> Option<Vec<Uid>> {
    search_response(&resp.text).ok().map(|(_, uids)| uids)
}

fn search_response(i: &str) -> IResult<&str, Vec<Uid>> {
    preceded(
        tag_no_case("SEARCH"),
        terminated(many0(preceded(space1, number)), alt((space1, eof))),
    )(i)
}

/// Parse a `LIST (attrs) delimiter name` response. Returns `Ok(None)` for any other response.
pub fn parse_list(resp: &Untagged) -> Result<Option<Name>, ParseError> {
    let rest = match terminated(tag_no_case::<_, _, nom::error::Error<&str>>("LIST"), space1)(
        resp.text.as_str(),
    ) {
        Ok((rest, _)) => rest,
        Err(_) => return Ok(None),
    };
    let parsed = tuple((
        terminated(list, space1),
        terminated(alt((map(quoted, Some), value(None, tag_no_case("NIL")))), space1),
        alt((map(quoted, Value::Quoted), literal_marker, atom)),
    ))(rest);
    let (attrs, delimiter, name) = match parsed {
        Ok((tail, parsed)) if tail.trim().is_empty() => parsed,
        _ => return Err(ParseError::Invalid(resp.text.clone())),
    };

    let name = match name {
        Value::Quoted(s) | Value::Atom(s) => s,
        Value::Literal => resp
            .literals
            .first()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .unwrap_or_default(),
        _ => return Err(ParseError::Invalid(resp.text.clone())),
    };
    let attributes = attrs
        .into_iter()
        .filter_map(|a| match a {
            Value::Atom(a) => Some(NameAttribute::from(a)),
            _ => None,
        })
        .collect();
    Ok(Some(Name::new(name, delimiter, attributes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untagged(text: &str, literals: &[&[u8]]) -> Untagged {
        Untagged {
            text: text.to_string(),
            literals: literals.iter().map(|l| l.to_vec()).collect(),
        }
    }

    #[test]
    fn classify_lines() {
        assert_eq!(
            parse_line("* 3 EXISTS").unwrap(),
            ResponseLine::Untagged("3 EXISTS")
        );
        assert_eq!(
            parse_line("+ Ready for literal data").unwrap(),
            ResponseLine::Continuation("Ready for literal data")
        );
        assert_eq!(parse_line("+").unwrap(), ResponseLine::Continuation(""));
        assert_eq!(
            parse_line("A0002 NO [AUTHENTICATIONFAILED] Invalid credentials").unwrap(),
            ResponseLine::Tagged {
                tag: "A0002",
                status: Status::No,
                text: "[AUTHENTICATIONFAILED] Invalid credentials",
            }
        );
        assert_eq!(
            parse_line("A0007 OK").unwrap(),
            ResponseLine::Tagged {
                tag: "A0007",
                status: Status::Ok,
                text: "",
            }
        );
    }

    #[test]
    fn reject_garbage_lines() {
        assert!(parse_line("").is_err());
        assert!(parse_line("A0001 NOPE whatever").is_err());
        assert!(parse_line("A0001").is_err());
    }

    #[test]
    fn greeting_must_be_untagged_status() {
        assert_eq!(
            parse_greeting("* OK [CAPABILITY IMAP4rev1 STARTTLS] Bridge ready").unwrap(),
            ResponseLine::Greeting {
                status: Status::Ok,
                text: "[CAPABILITY IMAP4rev1 STARTTLS] Bridge ready",
            }
        );
        assert!(parse_greeting("A0001 OK hello").is_err());
        assert!(parse_greeting("+ hello").is_err());
    }

    #[test]
    fn literal_announcements() {
        assert_eq!(literal_len(b"* 1 FETCH (UID 4 RFC822 {310}\r\n"), Some(310));
        assert_eq!(literal_len(b"* 1 FETCH (UID 4 RFC822 {0}"), Some(0));
        assert_eq!(literal_len(b"* OK no literal here\r\n"), None);
        assert_eq!(literal_len(b"* OK {}\r\n"), None);
        assert_eq!(literal_len(b"* OK {12a}\r\n"), None);
    }

    #[test]
    fn fetch_with_literal_body() {
        let resp = untagged(
            "12 FETCH (UID 34 FLAGS (\\Seen $Label1) RFC822 {5})",
            &[b"hello"],
        );
        let fetch = parse_fetch(&resp).unwrap().unwrap();
        assert_eq!(fetch.seq, 12);
        assert_eq!(fetch.uid, Some(34));
        assert_eq!(fetch.flags, vec!["\\Seen", "$Label1"]);
        assert_eq!(fetch.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn fetch_attributes_after_literal() {
        let resp = untagged("1 FETCH (RFC822 {3} UID 9 FLAGS ())", &[b"abc"]);
        let fetch = parse_fetch(&resp).unwrap().unwrap();
        assert_eq!(fetch.uid, Some(9));
        assert!(fetch.flags.is_empty());
        assert_eq!(fetch.body.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn fetch_skips_unrelated_literals() {
        let resp = untagged(
            "2 FETCH (BODY[HEADER.FIELDS (FROM)] {7} UID 3 BODY[] {4})",
            &[b"From: x", b"body"],
        );
        let fetch = parse_fetch(&resp).unwrap().unwrap();
        assert_eq!(fetch.uid, Some(3));
        assert_eq!(fetch.body.as_deref(), Some(&b"body"[..]));
    }

    #[test]
    fn non_fetch_is_none() {
        assert_eq!(parse_fetch(&untagged("3 EXISTS", &[])).unwrap(), None);
        assert_eq!(parse_fetch(&untagged("SEARCH 1 2", &[])).unwrap(), None);
        assert!(parse_fetch(&untagged("3 FETCH (UID", &[])).is_err());
    }

    #[test]
    fn search_results() {
        assert_eq!(
            parse_search(&untagged("SEARCH 2 84 882", &[])),
            Some(vec![2, 84, 882])
        );
        assert_eq!(parse_search(&untagged("SEARCH", &[])), Some(vec![]));
        assert_eq!(parse_search(&untagged("SEARCH ", &[])), Some(vec![]));
        assert_eq!(parse_search(&untagged("SEARCHX 1", &[])), None);
        assert_eq!(parse_search(&untagged("3 EXISTS", &[])), None);
    }

    #[test]
    fn list_names() {
        let name = parse_list(&untagged(r#"LIST (\HasNoChildren \Drafts) "/" "Drafts""#, &[]))
            .unwrap()
            .unwrap();
        assert_eq!(name.name(), "Drafts");
        assert_eq!(name.delimiter(), Some("/"));
        assert!(name.attributes().contains(&NameAttribute::Drafts));

        let name = parse_list(&untagged(r#"LIST () NIL INBOX"#, &[]))
            .unwrap()
            .unwrap();
        assert_eq!(name.name(), "INBOX");
        assert_eq!(name.delimiter(), None);

        let name = parse_list(&untagged(r#"LIST () "/" {9}"#, &[b"Folders/A"]))
            .unwrap()
            .unwrap();
        assert_eq!(name.name(), "Folders/A");

        let name = parse_list(&untagged(r#"LIST () "/" "Say \"hi\"""#, &[]))
            .unwrap()
            .unwrap();
        assert_eq!(name.name(), "Say \"hi\"");
    }
}
