use std::io::{Read, Write};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::{Config, Credentials, TlsVerification};
use crate::conn::Deadline;
use crate::error::{Error, Result};
use crate::mailstore::{Connector, Mailstore};

/// Opens logged-in sessions to the bridge's IMAP listener.
///
/// The bridge speaks plain IMAP and expects `STARTTLS` before `LOGIN`, so every connection goes
/// greeting, `STARTTLS`, TLS handshake, `LOGIN`. One deadline covers the whole session from the
/// moment the socket is dialed.
///
/// ```no_run
/// # use draftbridge::{ClientBuilder, Credentials};
/// # fn main() -> Result<(), draftbridge::Error> {
/// let creds = Credentials::new("me@example.com", "bridge-password");
/// let mut client = ClientBuilder::new("127.0.0.1", 1143).connect(&creds)?;
/// client.select("INBOX")?;
/// client.logout()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    timeout: Duration,
    tls: TlsVerification,
}

impl ClientBuilder {
    /// Make a new `ClientBuilder` using the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientBuilder {
            host: host.into(),
            port,
            timeout: Duration::from_secs(30),
            tls: TlsVerification::default(),
        }
    }

    /// A builder for the IMAP side of the configured bridge.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = ClientBuilder::new(config.bridge.host.clone(), config.bridge.imap_port);
        builder
            .timeout(config.timeout())
            .tls_verification(config.bridge.tls);
        builder
    }

    /// Total time allowed for the session, connect included.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn tls_verification(&mut self, tls: TlsVerification) -> &mut Self {
        self.tls = tls;
        self
    }

    /// Connect, upgrade to TLS and log in.
    pub fn connect(&self, credentials: &Credentials) -> Result<Client<TlsStream<Deadline>>> {
        debug!(host = %self.host, port = self.port, "connecting to imap");
        let tcp = Deadline::connect(&self.host, self.port, self.timeout)?;
        let tls = self.tls;
        establish(
            tcp,
            &self.host,
            |domain, tcp| {
                let mut builder = TlsConnector::builder();
                if tls == TlsVerification::Skip {
                    warn!(host = domain, "imap certificate verification disabled");
                    builder
                        .danger_accept_invalid_certs(true)
                        .danger_accept_invalid_hostnames(true);
                }
                let connector = builder.build()?;
                connector
                    .connect(domain, tcp)
                    .map_err(|e| Error::TlsHandshake(e.to_string()))
            },
            credentials,
        )
    }
}

impl Connector for ClientBuilder {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Mailstore>> {
        Ok(Box::new(ClientBuilder::connect(self, credentials)?))
    }
}

/// Drive a fresh connection from greeting to logged-in session.
///
/// `handshake` wraps the raw stream in TLS once the server has agreed to `STARTTLS`. If any step
/// fails the stream is dropped on the spot and nothing further is sent, not even `LOGOUT`.
pub(crate) fn establish<S, C, F>(
    stream: S,
    domain: &str,
    handshake: F,
    credentials: &Credentials,
) -> Result<Client<C>>
where
    S: Read + Write,
    C: Read + Write,
    F: FnOnce(&str, S) -> Result<C>,
{
    let mut client = Client::new(stream);
    client.read_greeting()?;
    client.run_command_and_check_ok("STARTTLS")?;
    let (raw, tag) = client.into_parts()?;

    let tls = handshake(domain, raw)?;
    let mut client = Client::resume(tls, tag);
    client.login(&credentials.username, &credentials.password)?;
    debug!(user = %credentials.username, "logged in");
    Ok(client)
}
