use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::conn::Deadline;
use crate::error::{CommandError, ErrorCode};

use super::responses::{DoctorReport, HealthCheck};
use super::{CommandResult, Outcome};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

fn probe(name: &str, host: &str, port: u16) -> HealthCheck {
    let addr = format!("{}:{}", host, port);
    match Deadline::connect(host, port, PROBE_TIMEOUT) {
        Ok(_) => {
            debug!(%addr, "{} reachable", name);
            HealthCheck {
                name: name.to_string(),
                addr,
                ok: true,
                detail: None,
            }
        }
        Err(e) => {
            warn!(%addr, "{} unreachable: {}", name, e);
            HealthCheck {
                name: name.to_string(),
                addr,
                ok: false,
                detail: Some(e.to_string()),
            }
        }
    }
}

/// Check that the bridge's SMTP and IMAP listeners accept TCP connections. No login is attempted.
pub fn doctor(config: &Config) -> CommandResult<DoctorReport> {
    let bridge = &config.bridge;
    let checks = vec![
        probe("smtp", &bridge.host, bridge.smtp_port),
        probe("imap", &bridge.host, bridge.imap_port),
    ];
    if let Some(failed) = checks.iter().find(|c| !c.ok) {
        return Err(CommandError::new(
            ErrorCode::BridgeUnreachable,
            format!(
                "{} at {} is unreachable: {}",
                failed.name,
                failed.addr,
                failed.detail.as_deref().unwrap_or("connection failed")
            ),
        )
        .with_hint("Check the bridge is running and ports match the configuration"));
    }
    Ok(Outcome::unchanged(DoctorReport { ok: true, checks }))
}
