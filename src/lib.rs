//! Draft and message management for a mail account exposed by a local IMAP/SMTP bridge.
//!
//! The crate speaks IMAP itself (STARTTLS, `LOGIN`, `LIST`, `UID SEARCH`/`FETCH`/`STORE`/`MOVE`,
//! `APPEND`) and hands outgoing mail to the bridge's SMTP listener through `lettre`. On top of
//! that sit the command handlers in [`commands`]: listing and resolving mailboxes, searching,
//! tagging, creating and editing drafts, replying, and sending drafts behind a confirmation
//! gate. Mutating handlers accept idempotency keys whose records live in the persisted
//! [`state::State`].
//!
//! Bridges that refuse `APPEND` into the drafts mailbox are handled transparently: the draft is
//! mailed to the account itself with a unique marker header, found again in INBOX, and moved
//! into drafts. See [`draft::create_draft`].
//!
//! # Usage
//!
//! ```no_run
//! # use draftbridge::commands::{self, Context, DraftCreateParams};
//! # use draftbridge::config::{Config, Credentials};
//! # use draftbridge::smtp::LettreSender;
//! # use draftbridge::state::State;
//! # use draftbridge::ClientBuilder;
//! # use std::path::Path;
//! let config: Config =
//!     serde_json::from_str(&std::fs::read_to_string("config.json").unwrap()).unwrap();
//! let mut state = State::load(Path::new("state.json")).unwrap();
//! let creds = Credentials::resolve(&config, &state, None).unwrap();
//!
//! let connector = ClientBuilder::from_config(&config);
//! let smtp = LettreSender::new(&config, Some(creds.clone()));
//! let ctx = Context::new(&config, &creds, &connector, &smtp);
//!
//! let params = DraftCreateParams {
//!     to: vec!["someone@example.com".to_string()],
//!     subject: "Hello".to_string(),
//!     body: "Hi there".to_string(),
//!     idempotency_key: Some("hello-1".to_string()),
//! };
//! let out = commands::draft_create(&ctx, &mut state, &params).unwrap();
//! if out.changed {
//!     state.save(Path::new("state.json")).unwrap();
//! }
//! ```

mod conn;
mod parse;
mod types;
mod utils;

pub mod batch;
pub mod client;
pub mod client_builder;
pub mod codec;
pub mod commands;
pub mod config;
pub mod draft;
pub mod error;
pub mod idempotency;
pub mod mailstore;
pub mod safety;
pub mod search;
pub mod smtp;
pub mod state;

pub use crate::client::Client;
pub use crate::client_builder::ClientBuilder;
pub use crate::config::{Config, Credentials};
pub use crate::error::{CommandError, Error, ErrorCode, Result};
pub use crate::types::*;

#[cfg(test)]
mod mock_stream;

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;
