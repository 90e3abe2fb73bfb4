//! RFC 822 / MIME decoding of fetched messages and composition of outgoing ones.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};

use crate::error::{Error, Result};
use crate::types::Message;

/// Decode a raw message into a [`Message`].
///
/// Only the envelope headers and a single text body are extracted. For multipart messages the
/// first `text/plain` part wins, searching nested multiparts depth-first; failing that, the first
/// `text/html` part. Transfer encodings and charsets are undone. UID, mailbox and flags are left
/// for the caller to fill in.
pub fn decode(raw: &[u8]) -> Result<Message> {
    if raw.is_empty() {
        return Err(Error::Codec("empty message".to_string()));
    }
    let parsed = mailparse::parse_mail(raw).map_err(|e| Error::Codec(e.to_string()))?;
    let header = |name: &str| parsed.headers.get_first_value(name);

    let to = header("To")
        .and_then(|v| mailparse::addrparse(&v).ok())
        .map(|list| list.iter().flat_map(addresses).collect())
        .unwrap_or_default();
    let date = header("Date")
        .and_then(|v| mailparse::dateparse(&v).ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

    Ok(Message {
        from: header("From").unwrap_or_default(),
        to,
        subject: header("Subject").unwrap_or_default(),
        body: best_body(&parsed)?.trim().to_string(),
        date,
        message_id: header("Message-ID").map(|v| v.trim().to_string()),
        in_reply_to: header("In-Reply-To").map(|v| v.trim().to_string()),
        references: header("References").map(|v| v.trim().to_string()),
        ..Message::default()
    })
}

pub(crate) fn addresses(addr: &MailAddr) -> Vec<String> {
    match addr {
        MailAddr::Single(info) => vec![info.addr.clone()],
        MailAddr::Group(group) => group.addrs.iter().map(|a| a.addr.clone()).collect(),
    }
}

fn is_multipart(part: &ParsedMail<'_>) -> bool {
    part.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/")
}

fn best_body(parsed: &ParsedMail<'_>) -> Result<String> {
    if !is_multipart(parsed) {
        return parsed.get_body().map_err(|e| Error::Codec(e.to_string()));
    }
    let part = find_part(parsed, "text/plain").or_else(|| find_part(parsed, "text/html"));
    match part {
        Some(part) => part.get_body().map_err(|e| Error::Codec(e.to_string())),
        None => Ok(String::new()),
    }
}

fn find_part<'a, 'b>(part: &'b ParsedMail<'a>, mimetype: &str) -> Option<&'b ParsedMail<'a>> {
    part.subparts.iter().find_map(|sub| {
        if is_multipart(sub) {
            find_part(sub, mimetype)
        } else if sub.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            Some(sub)
        } else {
            None
        }
    })
}

/// A plain-text message ready to be appended as a draft or handed to SMTP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outgoing {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Additional headers, emitted after the fixed ones in key order.
    pub headers: BTreeMap<String, String>,
}

impl Outgoing {
    pub fn new(from: &str, to: &[String], subject: &str, body: &str) -> Self {
        Outgoing {
            from: from.to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Render the message with `date` as its `Date` header.
    ///
    /// Header values lose any CR or LF so a value cannot start a new header, and the body's line
    /// endings are normalized to CRLF.
    pub fn compose(&self, date: DateTime<Utc>) -> String {
        let mut out = String::new();
        let mut push = |name: &str, value: &str| {
            out.push_str(&single_line(name));
            out.push_str(": ");
            out.push_str(&single_line(value));
            out.push_str("\r\n");
        };
        push("From", &self.from);
        push("To", &self.to.join(", "));
        push("Subject", &self.subject);
        push("Date", &date.format("%a, %d %b %Y %H:%M:%S %z").to_string());
        push("MIME-Version", "1.0");
        push("Content-Type", "text/plain; charset=UTF-8");
        for (name, value) in &self.headers {
            push(name, value);
        }
        out.push_str("\r\n");
        out.push_str(&crlf(&self.body));
        out
    }
}

fn single_line(s: &str) -> String {
    s.chars().filter(|&c| c != '\r' && c != '\n').collect()
}

fn crlf(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn decode_plain() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    To: bob@example.com, \"Carol\" <carol@example.com>\r\n\
                    Subject: Invoice\r\n\
                    Date: Fri, 02 Jan 2026 03:04:05 +0000\r\n\
                    Message-ID: <abc@example.com>\r\n\
                    \r\n\
                    Please pay.\r\n";
        let msg = decode(raw).unwrap();
        assert_eq!(msg.from, "Alice <alice@example.com>");
        assert_eq!(msg.to, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(msg.subject, "Invoice");
        assert_eq!(msg.body, "Please pay.");
        assert_eq!(msg.date, Some(fixed_date()));
        assert_eq!(msg.message_id.as_deref(), Some("<abc@example.com>"));
        assert_eq!(msg.references, None);
    }

    #[test]
    fn alternative_prefers_plain() {
        let raw = b"Subject: alt\r\n\
                    Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
                    \r\n\
                    --b1\r\n\
                    Content-Type: text/html\r\n\
                    \r\n\
                    <p>html</p>\r\n\
                    --b1\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    plain\r\n\
                    --b1--\r\n";
        assert_eq!(decode(raw).unwrap().body, "plain");
    }

    #[test]
    fn html_only_falls_back() {
        let raw = b"Content-Type: multipart/alternative; boundary=b1\r\n\
                    \r\n\
                    --b1\r\n\
                    Content-Type: text/html; charset=utf-8\r\n\
                    \r\n\
                    <p>only html</p>\r\n\
                    --b1--\r\n";
        assert_eq!(decode(raw).unwrap().body, "<p>only html</p>");
    }

    #[test]
    fn nested_multipart() {
        let raw = b"Content-Type: multipart/mixed; boundary=outer\r\n\
                    \r\n\
                    --outer\r\n\
                    Content-Type: multipart/alternative; boundary=inner\r\n\
                    \r\n\
                    --inner\r\n\
                    Content-Type: text/html\r\n\
                    \r\n\
                    <b>nested</b>\r\n\
                    --inner\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    nested plain\r\n\
                    --inner--\r\n\
                    --outer\r\n\
                    Content-Type: application/pdf\r\n\
                    Content-Transfer-Encoding: base64\r\n\
                    \r\n\
                    JVBERi0=\r\n\
                    --outer--\r\n";
        assert_eq!(decode(raw).unwrap().body, "nested plain");
    }

    #[test]
    fn transfer_encodings() {
        let qp = b"Content-Type: text/plain; charset=utf-8\r\n\
                   Content-Transfer-Encoding: quoted-printable\r\n\
                   \r\n\
                   caf=C3=A9 au lait, soft=\r\n\
                   wrapped\r\n";
        assert_eq!(decode(qp).unwrap().body, "café au lait, softwrapped");

        let b64 = b"Content-Type: text/plain; charset=utf-8\r\n\
                    Content-Transfer-Encoding: base64\r\n\
                    \r\n\
                    aGVsbG8gd29ybGQ=\r\n";
        assert_eq!(decode(b64).unwrap().body, "hello world");
    }

    #[test]
    fn empty_is_error() {
        assert!(matches!(decode(b""), Err(Error::Codec(_))));
    }

    #[test]
    fn compose_fixed_order() {
        let msg = Outgoing::new(
            "me@example.com",
            &["a@x.com".to_string(), "b@x.com".to_string()],
            "hi",
            "line one\nline two",
        )
        .header("X-Draft-Token", "tok")
        .header("In-Reply-To", "<m1@x.com>");
        assert_eq!(
            msg.compose(fixed_date()),
            "From: me@example.com\r\n\
             To: a@x.com, b@x.com\r\n\
             Subject: hi\r\n\
             Date: Fri, 02 Jan 2026 03:04:05 +0000\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=UTF-8\r\n\
             In-Reply-To: <m1@x.com>\r\n\
             X-Draft-Token: tok\r\n\
             \r\n\
             line one\r\nline two"
        );
    }

    #[test]
    fn header_injection_is_flattened() {
        let msg = Outgoing::new("me@example.com", &[], "hi\r\nBcc: evil@x.com", "");
        let raw = msg.compose(fixed_date());
        assert!(raw.contains("Subject: hiBcc: evil@x.com\r\n"));
        assert!(!raw.contains("\r\nBcc:"));
    }

    #[test]
    fn compose_then_decode() {
        let msg = Outgoing::new("me@example.com", &["a@x.com".to_string()], "hi", "hello");
        let decoded = decode(msg.compose(fixed_date()).as_bytes()).unwrap();
        assert_eq!(decoded.to, vec!["a@x.com"]);
        assert_eq!(decoded.subject, "hi");
        assert_eq!(decoded.body, "hello");
    }
}
