//! Event dispatch to registered handlers.
//!
//! The [`Dispatcher`] holds an ordered list of [`Handler`]s and routes one
//! incoming message event to every matching handler. A handler is either
//! generic (invoked for every message event) or patterned (invoked only
//! when its regex matches the message body, with the captures passed
//! through).

use futures::future::BoxFuture;
use log::{debug, error};
use regex::Regex;

use crate::matrix::response_structs::Event;

/// Handler callback.
///
/// Receives the event and, for pattern handlers, the regex captures as
/// strings: index 0 is the full match, groups that did not participate in
/// the match are empty. Generic handlers receive an empty vector.
pub type Callback =
    Box<dyn Fn(Event, Vec<String>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A registered event handler.
pub enum Handler {
    /// Invoked for every message event.
    Generic(Callback),
    /// Invoked only when the pattern matches the message body.
    Patterned(Regex, Callback),
}

/// Routes incoming events to registered handlers.
///
/// Handlers run sequentially in registration order. A failing handler is
/// logged and does not stop dispatch to the remaining handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Appends a handler, preserving registration order.
    pub fn register(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    /// Dispatches one event to every matching handler.
    ///
    /// Events other than `m.room.message` are ignored. Pattern handlers
    /// match against the message body, with an absent body treated as the
    /// empty string.
    pub async fn dispatch(&self, event: &Event) {
        if event.event_type != "m.room.message" {
            return;
        }

        debug!(
            "dispatching event {:?} to {} handlers",
            event.event_id,
            self.handlers.len()
        );

        let body = event.body();
        for handler in &self.handlers {
            let result = match handler {
                Handler::Generic(callback) => callback(event.clone(), Vec::new()).await,
                Handler::Patterned(pattern, callback) => {
                    let Some(captures) = pattern.captures(body) else {
                        continue;
                    };
                    let captures = captures
                        .iter()
                        .map(|group| {
                            group.map(|m| m.as_str().to_string()).unwrap_or_default()
                        })
                        .collect();
                    callback(event.clone(), captures).await
                }
            };

            // One failing handler must not starve the others
            if let Err(e) = result {
                error!("handler failed for event {:?}: {e}", event.event_id);
            }
        }
    }
}
