//! Runtime settings and bridge credentials.
//!
//! How these values get loaded from disk is up to the caller; everything here derives serde so any
//! format works, and every field has a default matching a stock local bridge.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ErrorCode};
use crate::safety::SafetyPolicy;
use crate::state::State;

/// Environment variable holding the bridge password. Takes precedence over any password file.
pub const PASSWORD_ENV: &str = "DRAFTBRIDGE_PASSWORD";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds allowed for a whole session, connect included.
    pub timeout_secs: u64,
    pub bridge: BridgeConfig,
    pub safety: SafetyPolicy,
    pub fallback: FallbackPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout_secs: 30,
            bridge: BridgeConfig::default(),
            safety: SafetyPolicy::default(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(30),
            secs => Duration::from_secs(secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub imap_port: u16,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password_file: Option<PathBuf>,
    pub tls: TlsVerification,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            imap_port: 1143,
            smtp_port: 1025,
            username: None,
            password_file: None,
            tls: TlsVerification::default(),
        }
    }
}

/// Certificate checking for the `STARTTLS` upgrades on both the IMAP and SMTP legs.
///
/// The bridge listens on localhost with a self-signed certificate, so verification is skipped
/// unless configured otherwise. Every connection made with `Skip` logs a warning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerification {
    #[default]
    Skip,
    Verify,
}

/// Bounds on the INBOX polling done by the SMTP draft fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy {
            attempts: 10,
            interval_ms: 1000,
        }
    }
}

impl FallbackPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A bridge login. The same pair authenticates IMAP and SMTP.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Work out the login to use.
    ///
    /// The username comes from the durable state, then the config. The password comes from
    /// [`PASSWORD_ENV`], then the first password file named by `password_file`, the state or the
    /// config, in that order.
    pub fn resolve(
        config: &Config,
        state: &State,
        password_file: Option<&Path>,
    ) -> Result<Credentials, CommandError> {
        let env = std::env::var(PASSWORD_ENV).ok();
        Credentials::resolve_with(config, state, password_file, env)
    }

    fn resolve_with(
        config: &Config,
        state: &State,
        password_file: Option<&Path>,
        env_password: Option<String>,
    ) -> Result<Credentials, CommandError> {
        let username = [state.auth.username.as_deref(), config.bridge.username.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|u| !u.is_empty())
            .ok_or_else(|| {
                CommandError::new(ErrorCode::Config, "bridge username is missing")
                    .with_hint("Configure bridge.username or log in first")
            })?
            .to_string();

        let mut password = env_password
            .map(|p| p.trim().to_string())
            .unwrap_or_default();
        if password.is_empty() {
            let file = password_file
                .or(state.auth.password_file.as_deref())
                .or(config.bridge.password_file.as_deref());
            if let Some(file) = file {
                let contents = fs::read_to_string(expand_home(file)).map_err(|_| {
                    CommandError::validation(format!(
                        "cannot read password file {}",
                        file.display()
                    ))
                })?;
                password = contents.trim().to_string();
            }
        }
        if password.is_empty() {
            return Err(
                CommandError::new(ErrorCode::AuthMissing, "bridge password is missing").with_hint(
                    format!("Set {} or configure a password file", PASSWORD_ENV),
                ),
            );
        }
        Ok(Credentials { username, password })
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => Path::new(&home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_user(user: &str) -> Config {
        let mut config = Config::default();
        config.bridge.username = Some(user.to_string());
        config
    }

    #[test]
    fn defaults_match_local_bridge() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bridge.host, "127.0.0.1");
        assert_eq!(config.bridge.imap_port, 1143);
        assert_eq!(config.bridge.smtp_port, 1025);
        assert_eq!(config.bridge.tls, TlsVerification::Skip);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.fallback.attempts, 10);
        assert!(config.safety.require_confirm_non_interactive);
    }

    #[test]
    fn env_password_wins() {
        let creds = Credentials::resolve_with(
            &config_with_user("me@example.com"),
            &State::default(),
            None,
            Some(" secret \n".to_string()),
        )
        .unwrap();
        assert_eq!(creds.username, "me@example.com");
        assert_eq!(creds.password, "secret");
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn state_username_before_config() {
        let mut state = State::default();
        state.auth.username = Some("state@example.com".to_string());
        let creds = Credentials::resolve_with(
            &config_with_user("config@example.com"),
            &state,
            None,
            Some("pw".to_string()),
        )
        .unwrap();
        assert_eq!(creds.username, "state@example.com");
    }

    #[test]
    fn password_file_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let mut config = config_with_user("me@example.com");
        config.bridge.password_file = Some("/nonexistent/password".into());
        let creds =
            Credentials::resolve_with(&config, &State::default(), Some(file.path()), None).unwrap();
        assert_eq!(creds.password, "from-file");
    }

    #[test]
    fn missing_pieces() {
        let err = Credentials::resolve_with(
            &Config::default(),
            &State::default(),
            None,
            Some("pw".into()),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Config);

        let err =
            Credentials::resolve_with(&config_with_user("me"), &State::default(), None, None)
                .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthMissing);

        let err = Credentials::resolve_with(
            &config_with_user("me"),
            &State::default(),
            Some(Path::new("/nonexistent/password")),
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }
}
