//! Long-poll synchronization loop.
//!
//! This module provides the [`MatrixSync`] struct that drives the bot: it
//! acquires a token, long-polls the sync endpoint with a persisted
//! resumption cursor, and hands every timeline event to the
//! [`Dispatcher`].
//!
//! The loop is strictly sequential: the long-poll is the sole suspension
//! point and each iteration completes before the next begins. Errors never
//! terminate the loop, they are logged and followed by a fixed backoff
//! keyed by the error kind. Running two loops for the same bot identity
//! would race on the shared cursor and dedup records, so deployments must
//! keep a single active instance.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::time::sleep;

use crate::matrix::{ClientError, Dispatcher, MatrixClient};
use crate::store::Store;

/// Store key holding the sync resumption cursor.
pub const SYNC_CURSOR_KEY: &str = "matrix_sync_since";

/// Drives the sync loop for one bot account.
pub struct MatrixSync<S: Store> {
    /// Client used for token acquisition and the sync call.
    client: Arc<MatrixClient<S>>,
    /// Handlers receiving the incoming events.
    dispatcher: Dispatcher,
    /// Store persisting the cursor across iterations and restarts.
    store: Arc<S>,
    /// Server-side long-poll timeout in seconds.
    timeout_secs: u64,
}

impl<S: Store> MatrixSync<S> {
    /// Create a new [MatrixSync].
    ///
    /// This does not start polling; call [`MatrixSync::run`] or
    /// [`MatrixSync::run_once`].
    pub fn new(
        client: Arc<MatrixClient<S>>,
        dispatcher: Dispatcher,
        store: Arc<S>,
        timeout_secs: u64,
    ) -> Self {
        MatrixSync {
            client,
            dispatcher,
            store,
            timeout_secs,
        }
    }

    /// Runs the sync loop until the process is terminated.
    ///
    /// The persisted cursor is loaded once at startup; an absent cursor
    /// means the loop starts from the current server state without
    /// catch-up. Every error is converted into a log line plus a backoff
    /// sleep, then the iteration is retried.
    pub async fn run(&self) {
        info!(
            "starting sync loop, long-poll timeout {}s",
            self.timeout_secs
        );
        let mut since = self.store.get(SYNC_CURSOR_KEY).await;

        loop {
            if let Err(e) = self.step(&mut since).await {
                let backoff = backoff_for(&e);
                error!("sync iteration failed: {e}, retrying in {}s", backoff.as_secs());
                sleep(backoff).await;
            }
        }
    }

    /// Runs exactly one sync iteration, for diagnostics.
    ///
    /// Errors are logged but not retried and no backoff is slept.
    pub async fn run_once(&self) {
        let mut since = self.store.get(SYNC_CURSOR_KEY).await;
        if let Err(e) = self.step(&mut since).await {
            error!("sync iteration failed: {e}");
        }
    }

    /// One iteration: token, long-poll, cursor advance, event fan-out.
    async fn step(&self, since: &mut Option<String>) -> Result<(), ClientError> {
        let token = self.client.access_token().await?;
        let response = self
            .client
            .sync(&token, since.as_deref(), self.timeout_secs)
            .await?;

        // Advance the cursor only when the server provided a new position;
        // it never regresses within a run.
        if let Some(next_batch) = response.next_batch {
            self.store.put(SYNC_CURSOR_KEY, &next_batch, None).await;
            *since = Some(next_batch);
        }

        for (room_id, room) in response.rooms.join {
            for mut event in room.timeline.events {
                // Events arrive nested under their room key, carry it along
                event.room_id = Some(room_id.clone());
                self.dispatcher.dispatch(&event).await;
            }
        }

        Ok(())
    }
}

/// Backoff slept after a failed iteration, keyed by the error kind.
fn backoff_for(error: &ClientError) -> Duration {
    match error {
        ClientError::Config(_) | ClientError::Auth { .. } => Duration::from_secs(5),
        ClientError::Transport(_) => Duration::from_secs(2),
        ClientError::Decode(_) => Duration::from_secs(1),
    }
}
