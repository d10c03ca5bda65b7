//! Tekir - a Matrix bot that acknowledges room messages.
//!
//! Tekir logs into a Matrix homeserver with the password grant, long-polls
//! the sync endpoint and dispatches incoming `m.room.message` events to
//! registered handlers. The default handler replies to every plaintext
//! message by appending ` devamina alindi`, at most once per event within a
//! one-day window, and never replies to the bot's own messages.
//!
//! # Architecture
//!
//! The crate consists of four modules:
//!
//! - [`bot`] - Bot facade wiring the collaborators and the default handler
//! - [`config`] - YAML configuration loading with environment overrides
//! - [`matrix`] - Matrix client, event dispatch and the sync loop
//! - [`store`] - Expiring key-value store backing the token cache, the
//!   sync cursor and the processed-event records
//!
//! # Runtime Behavior
//!
//! Once started, the bot runs a single sequential sync loop: acquire a
//! token, long-poll `/sync` with the persisted resumption cursor, hand
//! every timeline event to the dispatcher, repeat. Errors never terminate
//! the loop; they are logged and followed by a short backoff. The loop
//! runs until the process is terminated, or for exactly one iteration in
//! diagnostic mode.
//!
//! The cursor and the dedup records are shared mutable state in the
//! injected store, so at most one bot instance may run per bot identity.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tekir::{bot::Bot, config::Config, store::FileStore};
//!
//! # async fn run() -> Result<(), anyhow::Error> {
//! let config = Config::load("config.yaml")?;
//! let store = Arc::new(FileStore::new("./data/store"));
//!
//! let bot = Bot::new(&config, store, 30, false);
//! bot.start().await; // Runs until process termination
//! # Ok(())
//! # }
//! ```

pub mod bot;
pub mod config;
pub mod matrix;
pub mod store;
