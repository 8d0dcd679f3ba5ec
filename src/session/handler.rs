//! Application callbacks
//!
//! Handlers run on whichever thread called `sync()` (usually the pump), after
//! the session lock has been released, so they may call back into the client.

use super::state::{ReceivedMessage, SessionEvent};

/// Receives PUBLISH packets that match a subscription
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &ReceivedMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ReceivedMessage) + Send + Sync,
{
    fn on_message(&self, message: &ReceivedMessage) {
        self(message)
    }
}

/// Receives lifecycle and delivery events
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}
