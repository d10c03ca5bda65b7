//! Bot facade wiring the Matrix client, the dispatcher and the sync loop.
//!
//! # Overview
//!
//! The [`Bot`] owns all collaborators and exposes the public surface of the
//! crate: handler registration, message sending, and the blocking
//! [`Bot::start`] entry point that runs the sync loop until the process is
//! terminated (or for exactly one iteration in diagnostic mode).
//!
//! A default handler is registered at construction time. It acknowledges
//! every plaintext room message by replying with the original body plus
//! `" devamina alindi"`, with at-most-once semantics per event id within a
//! one-day window.
//!
//! # Message Processing Flow
//!
//! ```text
//! Sync Response → Dispatcher → handler → Matrix Client → homeserver
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{error, info};
use regex::Regex;
use serde_json::Value;

use crate::config::Config;
use crate::matrix::{Dispatcher, Event, Handler, MatrixClient, MatrixSync};
use crate::store::Store;

/// Suffix appended to every acknowledged message body.
const REPLY_SUFFIX: &str = " devamina alindi";
/// Store-key prefix recording already handled event ids.
const EVENT_KEY_PREFIX: &str = "matrix_event_";
/// How long a handled event id stays recorded.
const EVENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Main bot structure integrating the Matrix client with event handling.
///
/// Constructed from the loaded [`Config`] and a shared [`Store`]; the store
/// backs the token cache, the sync cursor and the processed-event records,
/// so a restarted bot resumes where it left off and does not reply twice.
pub struct Bot<S: Store> {
    /// Client for login, sync and sending messages.
    client: Arc<MatrixClient<S>>,
    /// Handlers receiving incoming message events.
    dispatcher: Dispatcher,
    /// Shared persistent store.
    store: Arc<S>,
    /// Long-poll timeout in seconds.
    timeout_secs: u64,
    /// Run a single sync iteration instead of looping forever.
    once: bool,
}

impl<S: Store + 'static> Bot<S> {
    /// Creates a new Bot with the default acknowledgement handler
    /// registered.
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration with the account credentials.
    /// * `store` - Store for the token cache, cursor and dedup records.
    /// * `timeout_secs` - Server-side long-poll timeout in seconds.
    /// * `once` - Diagnostic mode: run exactly one sync iteration.
    pub fn new(config: &Config, store: Arc<S>, timeout_secs: u64, once: bool) -> Self {
        let client = Arc::new(MatrixClient::new(
            config.matrix.credentials(),
            Arc::clone(&store),
        ));

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(acknowledge_handler(
            Arc::clone(&client),
            Arc::clone(&store),
            config.matrix.bot_username.clone().unwrap_or_default(),
        ));

        Bot {
            client,
            dispatcher,
            store,
            timeout_secs,
            once,
        }
    }

    /// Registers a handler invoked for every message event.
    ///
    /// Handlers run in registration order, after the default
    /// acknowledgement handler.
    pub fn on<F>(&mut self, callback: F)
    where
        F: Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.dispatcher
            .register(Handler::Generic(Box::new(move |event, _captures| {
                callback(event)
            })));
    }

    /// Registers a handler invoked when `pattern` matches the message body.
    ///
    /// The callback receives the event and the regex captures (index 0 is
    /// the full match).
    pub fn on_pattern<F>(&mut self, pattern: Regex, callback: F)
    where
        F: Fn(Event, Vec<String>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.dispatcher
            .register(Handler::Patterned(pattern, Box::new(callback)));
    }

    /// Sends a plain text message to a room.
    pub async fn send(&self, room_id: &str, message: &str) -> bool {
        self.client.send_message(room_id, message).await
    }

    /// Starts the bot.
    ///
    /// Consumes `self` and runs the sync loop until the process is
    /// terminated, or for exactly one iteration in diagnostic mode.
    pub async fn start(self) {
        let sync = MatrixSync::new(self.client, self.dispatcher, self.store, self.timeout_secs);

        if self.once {
            info!("single iteration mode, exiting after one sync");
            sync.run_once().await;
        } else {
            sync.run().await;
        }
    }
}

/// Builds the default handler replying to plaintext messages.
///
/// For every `m.room.message` event with a non-empty body the handler:
/// - skips events whose id was already recorded (at-most-once per id);
/// - skips and records messages sent by the bot itself (loop prevention);
/// - skips and records bodies that are bare JSON documents, which are
///   machine payloads rather than chat;
/// - otherwise replies with the body plus the acknowledgement suffix and
///   records the event id with a one-day TTL regardless of the send
///   outcome, so a failed send is not retried on redelivery.
pub fn acknowledge_handler<S: Store + 'static>(
    client: Arc<MatrixClient<S>>,
    store: Arc<S>,
    bot_username: String,
) -> Handler {
    Handler::Generic(Box::new(move |event, _captures| {
        let client = Arc::clone(&client);
        let store = Arc::clone(&store);
        let bot_username = bot_username.clone();

        async move {
            let body = event.body().to_string();
            if body.trim().is_empty() {
                return Ok(());
            }

            let Some(event_id) = event.dedup_id().map(str::to_string) else {
                return Ok(());
            };

            let key = format!("{EVENT_KEY_PREFIX}{event_id}");
            if store.get(&key).await.is_some() {
                info!("skipping already processed event {event_id}");
                return Ok(());
            }

            // Never reply to our own messages
            if let Some(sender) = event.sender.as_deref()
                && !bot_username.is_empty()
                && sender == bot_username
            {
                store.put(&key, "1", Some(EVENT_TTL)).await;
                info!("skipping own message {event_id}");
                return Ok(());
            }

            // Bodies that are bare JSON documents (eg. {"ok":true}) are
            // machine payloads, not chat
            if let Ok(value) = serde_json::from_str::<Value>(&body)
                && (value.is_object() || value.is_array())
            {
                store.put(&key, "1", Some(EVENT_TTL)).await;
                info!("skipping structured payload {event_id}");
                return Ok(());
            }

            let Some(room_id) = event.room_id.clone() else {
                return Ok(());
            };

            let reply = format!("{body}{REPLY_SUFFIX}");
            if client.send_message(&room_id, &reply).await {
                info!("replied to event {event_id} in {room_id}");
            } else {
                error!("failed to reply to event {event_id} in {room_id}");
            }

            // Record regardless of the send outcome to avoid retry storms
            store.put(&key, "1", Some(EVENT_TTL)).await;
            Ok(())
        }
        .boxed()
    }))
}
