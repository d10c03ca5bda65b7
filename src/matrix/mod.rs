//! Matrix protocol integration for the bot.
//!
//! This module implements the client-server API surface the bot needs:
//! - Login with the password grant and token caching
//! - Sending room messages with a retry on expired auth
//! - Long-poll synchronization with a persisted resumption cursor
//! - Dispatch of incoming message events to registered handlers
//!
//! # Architecture
//!
//! The module is structured around the [`client::MatrixClient`], which owns
//! the homeserver URL and credentials and performs all HTTP calls, the
//! [`dispatcher::Dispatcher`], which fans one incoming event out to every
//! matching handler, and the [`sync::MatrixSync`] loop orchestrating both.

mod client;
mod dispatcher;
mod response_structs;
mod sync;

pub use crate::matrix::client::MatrixClient;
pub use crate::matrix::dispatcher::{Callback, Dispatcher, Handler};
pub use crate::matrix::response_structs::{Content, Event, SyncResponse};
pub use crate::matrix::sync::{MatrixSync, SYNC_CURSOR_KEY};

use thiserror::Error;

/// Credentials and connection settings for the bot account.
#[derive(Debug, Clone, Default)]
pub struct UserCredentials {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    pub homeserver_url: Option<String>,
    /// Fully qualified user id of the bot account, e.g. `@bot:example.org`.
    pub username: Option<String>,
    /// Password of the bot account.
    pub password: Option<String>,
    /// Static access token. When set, login and the token cache are bypassed.
    pub access_token: Option<String>,
    /// Lifetime of a cached access token, in hours.
    pub token_ttl_hours: u64,
}

/// Errors that can occur while talking to the homeserver.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required credential or the homeserver URL is missing from the
    /// configuration. Fatal to login; the sync loop reports and backs off.
    #[error("matrix client config missing: {0}")]
    Config(&'static str),

    /// The homeserver rejected the login request.
    #[error("login rejected by homeserver: status {status}")]
    Auth { status: u16, body: String },

    /// Network failure or a non-2xx response on sync. Retried with a fixed
    /// backoff, never fatal to the loop.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the JSON we expected.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}
