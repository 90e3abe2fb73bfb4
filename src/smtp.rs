//! Outgoing mail through the bridge's SMTP listener.

use std::time::Duration;

use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials as SmtpCredentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{SmtpTransport, Transport};
use tracing::{debug, warn};

use crate::config::{Config, Credentials, TlsVerification};
use crate::error::{Error, Result};

/// Hands a fully composed message to an SMTP server.
///
/// Implemented by [`LettreSender`] for the real bridge; tests substitute a recorder.
pub trait SmtpSender {
    /// Send `raw` from `from` to every address in `to`. Recipients may be bare addresses or
    /// `Name <addr>` forms.
    fn send(&self, from: &str, to: &[String], raw: &[u8]) -> Result<()>;
}

/// An [`SmtpSender`] backed by `lettre`'s blocking transport.
#[derive(Clone, Debug)]
pub struct LettreSender {
    host: String,
    port: u16,
    timeout: Duration,
    tls: TlsVerification,
    credentials: Option<Credentials>,
}

impl LettreSender {
    pub fn new(config: &Config, credentials: Option<Credentials>) -> Self {
        LettreSender {
            host: config.bridge.host.clone(),
            port: config.bridge.smtp_port,
            timeout: config.timeout(),
            tls: config.bridge.tls,
            credentials,
        }
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let skip = self.tls == TlsVerification::Skip;
        if skip {
            warn!(host = %self.host, "smtp certificate verification disabled");
        }
        let tls = TlsParameters::builder(self.host.clone())
            .dangerous_accept_invalid_certs(skip)
            .dangerous_accept_invalid_hostnames(skip)
            .build()
            .map_err(|e| Error::Smtp(e.to_string()))?;
        let mut builder = SmtpTransport::builder_dangerous(self.host.as_str())
            .port(self.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(self.timeout));
        if let Some(ref creds) = self.credentials {
            if !creds.username.is_empty() && !creds.password.is_empty() {
                builder = builder
                    .credentials(SmtpCredentials::new(
                        creds.username.clone(),
                        creds.password.clone(),
                    ))
                    .authentication(vec![Mechanism::Plain]);
            }
        }
        Ok(builder.build())
    }
}

impl SmtpSender for LettreSender {
    fn send(&self, from: &str, to: &[String], raw: &[u8]) -> Result<()> {
        let envelope = envelope(from, to)?;
        debug!(host = %self.host, port = self.port, recipients = to.len(), "smtp send");
        self.transport()?
            .send_raw(&envelope, raw)
            .map_err(|e| Error::Smtp(e.to_string()))?;
        Ok(())
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    let addr = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    addr.trim()
        .parse()
        .map_err(|e| Error::Smtp(format!("invalid address {:?}: {}", raw, e)))
}

fn envelope(from: &str, to: &[String]) -> Result<Envelope> {
    let to = to
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>>>()?;
    Envelope::new(Some(parse_address(from)?), to).map_err(|e| Error::Smtp(e.to_string()))
}
