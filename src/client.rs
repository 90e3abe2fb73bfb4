use std::io::{Read, Write};

use bufstream::BufStream;
use tracing::trace;

use super::error::{Error, ParseError, Result};
use super::parse::{
    literal_len, parse_fetch, parse_greeting, parse_line, parse_list, parse_search, trim_crlf,
    FetchData, ResponseLine, Status, Untagged,
};
use super::types::{Flag, Name, Uid};
use super::utils::validate_str;

const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// Stream to interface with the IMAP server. This interface is only for the command stream.
///
/// Every command gets a fresh tag of the form `A0001`, `A0002`, ... The counter belongs to the
/// session rather than the socket: it carries over when the plain stream is swapped for a TLS one
/// after `STARTTLS`.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    pub(crate) stream: BufStream<T>,
    tag: u32,
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// This method primarily exists for writing tests that mock the underlying transport, but can
    /// also be used to drive a session over a custom stream.
    pub fn new(stream: T) -> Client<T> {
        Client::resume(stream, INITIAL_TAG)
    }

    /// Continue a session on a new stream, keeping the tag counter where it was.
    pub(crate) fn resume(stream: T, tag: u32) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag,
        }
    }

    /// Flush any pending output and hand back the stream together with the last tag used.
    ///
    /// Bytes the server sent that were already buffered are lost, so this is only safe at a point
    /// where the server is waiting on us, such as right after `STARTTLS` completes.
    pub(crate) fn into_parts(self) -> Result<(T, u32)> {
        let tag = self.tag;
        let stream = self.stream.into_inner()?;
        Ok((stream, tag))
    }

    /// Read the untagged greeting that opens every session.
    ///
    /// A `BYE` greeting means the server refuses the connection.
    pub fn read_greeting(&mut self) -> Result<()> {
        let line = self.read_text_line()?;
        match parse_greeting(&line) {
            Ok(ResponseLine::Greeting {
                status: Status::Ok, ..
            })
            | Ok(ResponseLine::Greeting {
                status: Status::PreAuth,
                ..
            }) => Ok(()),
            _ => Err(Error::Greeting(line)),
        }
    }

    /// Log in to the IMAP server with a plaintext username and password.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let command = format!(
            "LOGIN {} {}",
            validate_str(username)?,
            validate_str(password)?
        );
        self.run_command_and_check_ok(&command)
    }

    /// Selects a mailbox so that later UID commands operate on it.
    pub fn select(&mut self, mailbox_name: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("SELECT {}", validate_str(mailbox_name)?))
    }

    /// Run `UID SEARCH` with already-rendered criteria against the selected mailbox.
    pub fn uid_search(&mut self, query: &str) -> Result<Vec<Uid>> {
        let responses = self.run_command_and_read_response(&format!("UID SEARCH {}", query))?;
        Ok(responses
            .iter()
            .filter_map(parse_search)
            .flatten()
            .collect())
    }

    /// Fetch the UID, flags and full RFC822 source of one message in the selected mailbox.
    ///
    /// Unsolicited `FETCH` responses for other messages are skipped. Returns `None` when the
    /// server has no such UID.
    pub fn uid_fetch(&mut self, uid: Uid) -> Result<Option<FetchData>> {
        let responses =
            self.run_command_and_read_response(&format!("UID FETCH {} (UID FLAGS RFC822)", uid))?;
        for resp in &responses {
            if let Some(fetch) = parse_fetch(resp)? {
                if fetch.uid == Some(uid) && fetch.body.is_some() {
                    return Ok(Some(fetch));
                }
            }
        }
        Ok(None)
    }

    /// The APPEND command adds a mail to a mailbox.
    ///
    /// The message is announced as a literal; its bytes are only sent once the server answers
    /// with a `+` continuation.
    pub fn append(&mut self, mailbox: &str, flags: &[Flag], content: &[u8]) -> Result<()> {
        let flags = if flags.is_empty() {
            String::new()
        } else {
            let flags: Vec<String> = flags.iter().map(ToString::to_string).collect();
            format!(" ({})", flags.join(" "))
        };
        self.run_command(&format!(
            "APPEND {}{} {{{}}}",
            validate_str(mailbox)?,
            flags,
            content.len()
        ))?;
        self.wait_for_continuation()?;
        trace!("C: <{} byte literal>", content.len());
        self.stream.write_all(content)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        self.read_response().map(|_| ())
    }

    /// Alter flags on messages in the selected mailbox, e.g. `+FLAGS.SILENT (\Deleted)`.
    pub fn uid_store(&mut self, uid_set: &str, query: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("UID STORE {} {}", uid_set, query))
    }

    /// Permanently remove every message in the selected mailbox flagged `\Deleted`.
    pub fn expunge(&mut self) -> Result<()> {
        self.run_command_and_check_ok("EXPUNGE")
    }

    /// Move messages from the selected mailbox to `mailbox_name`
    /// ([RFC 6851](https://tools.ietf.org/html/rfc6851)).
    pub fn uid_move(&mut self, uid_set: &str, mailbox_name: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!(
            "UID MOVE {} {}",
            uid_set,
            validate_str(mailbox_name)?
        ))
    }

    /// The `LIST` command returns the names matching `mailbox_pattern` relative to
    /// `reference_name`.
    pub fn list(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        let responses = self.run_command_and_read_response(&format!(
            "LIST {} {}",
            validate_str(reference_name)?,
            validate_str(mailbox_pattern)?
        ))?;
        let mut names = Vec::new();
        for resp in &responses {
            if let Some(name) = parse_list(resp)? {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Logout informs the server that the client is done with the connection.
    pub fn logout(&mut self) -> Result<()> {
        self.run_command_and_check_ok("LOGOUT")
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        self.run_command_and_read_response(command).map(|_| ())
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        match untagged_command.split_once(' ') {
            Some((verb, _)) if verb.eq_ignore_ascii_case("LOGIN") => {
                trace!("C: A{:04} LOGIN <redacted>", self.tag)
            }
            _ => trace!("C: {}", command),
        }
        self.write_line(command.as_bytes())
    }

    /// Runs a command and returns the untagged responses it produced.
    pub fn run_command_and_read_response(&mut self, untagged_command: &str) -> Result<Vec<Untagged>> {
        self.run_command(untagged_command)?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Vec<Untagged>> {
        let expected = format!("A{:04}", self.tag);
        let mut responses = Vec::new();
        loop {
            let line = self.read_text_line()?;
            let (status, matches) = match parse_line(&line)? {
                ResponseLine::Untagged(payload) => {
                    let mut resp = Untagged {
                        text: payload.to_string(),
                        literals: Vec::new(),
                    };
                    self.read_literals(&mut resp)?;
                    responses.push(resp);
                    continue;
                }
                ResponseLine::Tagged { tag, status, .. } => (status, tag == expected),
                _ => (Status::Bad, false),
            };
            return match (status, matches) {
                (Status::Ok, true) => Ok(responses),
                (Status::No, true) => Err(Error::No(line)),
                (Status::Bad, true) => Err(Error::Bad(line)),
                _ => Err(ParseError::Invalid(line).into()),
            };
        }
    }

    // An untagged response continues past each literal it announces until a line ends without
    // announcing another one.
    fn read_literals(&mut self, resp: &mut Untagged) -> Result<()> {
        let mut pending = literal_len(resp.text.as_bytes());
        while let Some(len) = pending {
            // The announced size is untrusted; grow the buffer only as bytes arrive.
            let mut literal = Vec::new();
            (&mut self.stream)
                .take(len as u64)
                .read_to_end(&mut literal)?;
            if literal.len() < len {
                return Err(Error::ConnectionLost);
            }
            trace!("S: <{} byte literal>", len);
            resp.literals.push(literal);

            let rest = self.read_text_line()?;
            pending = literal_len(rest.as_bytes());
            resp.text.push_str(&rest);
        }
        Ok(())
    }

    fn wait_for_continuation(&mut self) -> Result<()> {
        loop {
            let line = self.read_text_line()?;
            let refused = match parse_line(&line)? {
                ResponseLine::Continuation(_) => return Ok(()),
                ResponseLine::Untagged(_) => false,
                _ => true,
            };
            if refused {
                return Err(Error::Append(line));
            }
        }
    }

    fn read_text_line(&mut self) -> Result<String> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        Ok(String::from_utf8_lossy(trim_crlf(&v)).into_owned())
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        use std::io::BufRead;
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }
        trace!("S: {}", String::from_utf8_lossy(trim_crlf(into)));
        Ok(read)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("A{:04} {}", self.tag, command)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock_stream::MockStream;
    use super::*;
    use crate::utils::quote;

    fn written(client: &Client<MockStream>) -> String {
        String::from_utf8(client.stream.get_ref().written()).unwrap()
    }

    #[test]
    fn read_response() {
        let response = "A0001 OK Logged in.\r\n";
        let mock_stream = MockStream::new(response.as_bytes().to_vec());
        let mut client = Client::new(mock_stream);
        client.run_command("NOOP").unwrap();
        let actual_response = client.read_response().unwrap();
        assert!(actual_response.is_empty());
    }

    #[test]
    fn fetch_body_across_literal() {
        let response = "* 2 FETCH (UID 7 FLAGS (\\Seen) RFC822 {5}\r\nhello)\r\n\
                        A0001 OK FETCH completed\r\n";
        let mock_stream = MockStream::new(response.as_bytes().to_vec()).with_trickle();
        let mut client = Client::new(mock_stream);
        let fetch = client.uid_fetch(7).unwrap().unwrap();
        assert_eq!(fetch.uid, Some(7));
        assert_eq!(fetch.flags, vec!["\\Seen"]);
        assert_eq!(fetch.body.as_deref(), Some(&b"hello"[..]));
        assert_eq!(written(&client), "A0001 UID FETCH 7 (UID FLAGS RFC822)\r\n");
    }

    #[test]
    fn oversized_literal_is_an_error() {
        let response = b"* 1 FETCH (UID 1 RFC822 {18446744073709551615}\r\nhi)\r\nA0001 OK done\r\n";
        let mut client = Client::new(MockStream::new(response.to_vec()));
        let err = client.uid_fetch(1).unwrap_err();
        assert!(
            matches!(err, Error::ConnectionLost | Error::Io(_)),
            "{:?}",
            err
        );
    }

    #[test]
    fn truncated_literal_is_an_error() {
        let response = b"* 1 FETCH (UID 1 RFC822 {50}\r\nhi)\r\n";
        let mut client = Client::new(MockStream::new(response.to_vec()));
        assert!(client.uid_fetch(1).is_err());
    }

    #[test]
    fn literal_containing_crlf_and_tag_lookalike() {
        let body = "Subject: x\r\n\r\nA0001 OK not really\r\n";
        let response = format!(
            "* 1 FETCH (UID 3 RFC822 {{{}}}\r\n{})\r\nA0001 OK done\r\n",
            body.len(),
            body
        );
        let mut client = Client::new(MockStream::new(response.into_bytes()));
        let fetch = client.uid_fetch(3).unwrap().unwrap();
        assert_eq!(fetch.body.as_deref(), Some(body.as_bytes()));
    }

    #[test]
    fn fetch_skips_unsolicited_responses() {
        let response = "* 4 EXISTS\r\n\
                        * 1 FETCH (FLAGS (\\Seen))\r\n\
                        A0001 OK done\r\n";
        let mut client = Client::new(MockStream::new(response.as_bytes().to_vec()));
        assert_eq!(client.uid_fetch(9).unwrap(), None);
    }

    #[test]
    fn read_greeting() {
        let greeting = "* OK Bridge ready.\r\n";
        let mock_stream = MockStream::new(greeting.as_bytes().to_vec());
        let mut client = Client::new(mock_stream);
        client.read_greeting().unwrap();
    }

    #[test]
    fn bye_greeting_is_rejected() {
        let mock_stream = MockStream::new(b"* BYE too many connections\r\n".to_vec());
        let mut client = Client::new(mock_stream);
        match client.read_greeting() {
            Err(Error::Greeting(line)) => assert_eq!(line, "* BYE too many connections"),
            other => panic!("expected greeting error, got {:?}", other),
        }
    }

    #[test]
    fn tagged_greeting_is_rejected() {
        let mock_stream = MockStream::new(b"A0001 OK hello\r\n".to_vec());
        let mut client = Client::new(mock_stream);
        assert!(matches!(client.read_greeting(), Err(Error::Greeting(_))));
    }

    #[test]
    fn readline_delay_read() {
        let greeting = "* OK Bridge ready.\r\n";
        let mock_stream = MockStream::default()
            .with_buf(greeting.as_bytes().to_vec())
            .with_delay();
        let mut client = Client::new(mock_stream);
        let mut v = Vec::new();
        client.readline(&mut v).unwrap();
        assert_eq!(String::from_utf8(v).unwrap(), greeting);
    }

    #[test]
    fn readline_eof() {
        let mock_stream = MockStream::default().with_eof();
        let mut client = Client::new(mock_stream);
        let mut v = Vec::new();
        if let Err(Error::ConnectionLost) = client.readline(&mut v) {
        } else {
            unreachable!("EOF read did not return connection lost");
        }
    }

    #[test]
    fn readline_err() {
        let mock_stream = MockStream::default().with_err();
        let mut client = Client::new(mock_stream);
        let mut v = Vec::new();
        assert!(matches!(client.readline(&mut v), Err(Error::Io(_))));
    }

    #[test]
    fn create_command() {
        let mut client = Client::new(MockStream::default());
        assert_eq!(client.create_command("CHECK"), "A0001 CHECK");
        assert_eq!(client.create_command("CHECK"), "A0002 CHECK");
    }

    #[test]
    fn tag_survives_resume() {
        let mut client = Client::new(MockStream::new(b"A0001 OK Begin TLS\r\n".to_vec()));
        client.run_command_and_check_ok("STARTTLS").unwrap();
        let (_, tag) = client.into_parts().unwrap();
        let mut client = Client::resume(MockStream::default(), tag);
        assert_eq!(client.create_command("NOOP"), "A0002 NOOP");
    }

    #[test]
    fn login() {
        let response = b"A0001 OK Logged in\r\n".to_vec();
        let username = "username";
        let password = "pa\"ss";
        let command = format!("A0001 LOGIN {} {}\r\n", quote!(username), quote!(password));
        let mut client = Client::new(MockStream::new(response));
        client.login(username, password).unwrap();
        assert_eq!(written(&client), command);
        assert_eq!(command, "A0001 LOGIN \"username\" \"pa\\\"ss\"\r\n");
    }

    #[test]
    fn no_response_carries_raw_line() {
        let response = b"A0001 NO [AUTHENTICATIONFAILED] bad credentials\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        match client.login("u", "p") {
            Err(Error::No(line)) => {
                assert_eq!(line, "A0001 NO [AUTHENTICATIONFAILED] bad credentials")
            }
            other => panic!("expected NO, got {:?}", other),
        }
    }

    #[test]
    fn bad_response_carries_raw_line() {
        let response = b"* OK noise\r\nA0001 BAD unknown command\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        match client.expunge() {
            Err(Error::Bad(line)) => assert_eq!(line, "A0001 BAD unknown command"),
            other => panic!("expected BAD, got {:?}", other),
        }
    }

    #[test]
    fn mismatched_tag_is_a_parse_error() {
        let response = b"A0009 OK what\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        assert!(matches!(client.expunge(), Err(Error::Parse(_))));
    }

    #[test]
    fn select_quotes_mailbox() {
        let response = b"* 3 EXISTS\r\n* OK [UIDVALIDITY 1] UIDs valid\r\nA0001 OK [READ-WRITE] SELECT completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        client.select("My \"Drafts\"").unwrap();
        assert_eq!(written(&client), "A0001 SELECT \"My \\\"Drafts\\\"\"\r\n");
    }

    #[test]
    fn select_rejects_newline() {
        let mut client = Client::new(MockStream::default());
        assert!(matches!(client.select("a\r\nA0002 LOGOUT"), Err(Error::Validate(_))));
        assert!(client.stream.get_ref().written().is_empty());
    }

    #[test]
    fn uid_search() {
        let response = b"* SEARCH 2 84 882\r\nA0001 OK SEARCH completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        let uids = client.uid_search("HEADER X-Draft-Token \"t\"").unwrap();
        assert_eq!(uids, vec![2, 84, 882]);
        assert_eq!(written(&client), "A0001 UID SEARCH HEADER X-Draft-Token \"t\"\r\n");
    }

    #[test]
    fn append_waits_for_continuation() {
        let response = b"+ Ready for literal data\r\nA0001 OK [APPENDUID 1 5] APPEND completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        client.append("Drafts", &[Flag::Draft], b"Subject: hi\r\n\r\nbody").unwrap();
        assert_eq!(
            written(&client),
            "A0001 APPEND \"Drafts\" (\\Draft) {19}\r\nSubject: hi\r\n\r\nbody\r\n"
        );
    }

    #[test]
    fn append_refused_before_literal() {
        let response = b"A0001 NO [TRYCREATE] no such mailbox\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        match client.append("Nope", &[], b"x") {
            Err(Error::Append(line)) => assert_eq!(line, "A0001 NO [TRYCREATE] no such mailbox"),
            other => panic!("expected append refusal, got {:?}", other),
        }
        assert_eq!(written(&client), "A0001 APPEND \"Nope\" {1}\r\n");
    }

    #[test]
    fn uid_store() {
        let response = b"A0001 OK STORE completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        client.uid_store("12", "+FLAGS.SILENT (\\Deleted)").unwrap();
        assert_eq!(written(&client), "A0001 UID STORE 12 +FLAGS.SILENT (\\Deleted)\r\n");
    }

    #[test]
    fn uid_move() {
        let response = b"* OK [COPYUID 1 4 9] moved\r\n* 1 EXPUNGE\r\nA0001 OK MOVE completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        client.uid_move("4", "Drafts").unwrap();
        assert_eq!(written(&client), "A0001 UID MOVE 4 \"Drafts\"\r\n");
    }

    #[test]
    fn list() {
        let response = b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
                         * LIST (\\HasNoChildren \\Drafts) \"/\" \"Brouillons\"\r\n\
                         A0001 OK LIST completed\r\n"
            .to_vec();
        let mut client = Client::new(MockStream::new(response));
        let names = client.list("", "*").unwrap();
        assert_eq!(names.len(), 2);
        assert!(names[1].is_drafts());
        assert_eq!(written(&client), "A0001 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn logout() {
        let response = b"* BYE Logging out\r\nA0001 OK Logout completed\r\n".to_vec();
        let mut client = Client::new(MockStream::new(response));
        client.logout().unwrap();
        assert_eq!(written(&client), "A0001 LOGOUT\r\n");
    }
}
