//! # Reply Path
//!
//! A [`ReplyTo`] is the completion channel of a non-blocking exchange. The
//! executor that suspends a chain hands the reply path downstream instead of
//! returning a value; whoever finishes the work completes it.
//!
//! Completion is one-shot. Every clone shares the same slot, the first
//! `complete`/`fail`/`reply` call wins and later calls are ignored.
//!
//! Suspended work is not cancellable. If every clone is dropped before
//! completion the reply path is orphaned: this is logged, and a receiver
//! created by [`ReplyTo::channel`] observes `Canceled`.

use crate::{error::MessagingError, event::Event};
use futures::channel::oneshot;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

/// What travels back along a reply path: the final event, no result, or the failure.
pub type Reply = Result<Option<Event>, MessagingError>;

type Callback = Box<dyn FnOnce(Reply) + Send + 'static>;

struct Slot {
    callback: Mutex<Option<Callback>>,
}

impl Slot {
    fn take(&self) -> Option<Callback> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let armed = self
            .callback
            .get_mut()
            .map(|callback| callback.is_some())
            .unwrap_or(false);
        if armed {
            tracing::warn!("reply path dropped without completion");
        }
    }
}

/// A one-shot completion handle for asynchronous results.
#[derive(Clone)]
pub struct ReplyTo {
    slot: Arc<Slot>,
}

impl ReplyTo {
    /// Create a reply path that invokes `callback` on completion.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        Self {
            slot: Arc::new(Slot {
                callback: Mutex::new(Some(Box::new(callback))),
            }),
        }
    }

    /// Create a reply path whose completion is observed through a oneshot receiver.
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let reply_to = Self::new(move |reply| {
            // The receiver may have given up waiting.
            let _ = tx.send(reply);
        });
        (reply_to, rx)
    }

    /// Deliver a reply. Returns `false` if the path was already completed.
    pub fn reply(&self, reply: Reply) -> bool {
        match self.slot.take() {
            Some(callback) => {
                callback(reply);
                true
            }
            None => {
                tracing::warn!("reply path completed more than once; ignoring");
                false
            }
        }
    }

    /// Deliver a resulting event.
    pub fn complete(&self, event: Event) -> bool {
        self.reply(Ok(Some(event)))
    }

    /// Deliver "no result".
    pub fn complete_empty(&self) -> bool {
        self.reply(Ok(None))
    }

    /// Deliver a failure.
    pub fn fail(&self, error: MessagingError) -> bool {
        self.reply(Err(error))
    }

    /// Drop the callback without invoking it.
    ///
    /// Returns `true` if the path was still armed. Used when a step that was
    /// offered the reply path finished synchronously instead.
    pub fn disarm(&self) -> bool {
        self.slot.take().is_some()
    }

    /// Whether the path has been completed or disarmed.
    pub fn is_completed(&self) -> bool {
        self.slot
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether two handles share the same slot.
    pub fn ptr_eq(&self, other: &ReplyTo) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyTo")
            .field("completed", &self.is_completed())
            .finish()
    }
}
