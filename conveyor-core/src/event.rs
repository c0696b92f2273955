//! # Event Model
//!
//! An [`Event`] is one message in flight: a [`Message`] (payload plus
//! attributes) together with the routing metadata processors need to decide
//! how the event travels through a chain.
//!
//! Events are values. Processors take them by value and hand back either the
//! same event or a derived one (see [`Event::with_payload`]). Crossing a
//! thread boundary always happens on a [`copy`](Event::copy), so concurrent
//! continuations never share mutable state.

use crate::reply::ReplyTo;
use bitflags::bitflags;
use serde::{Serialize, Serializer, ser::Error as _};
use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use uuid::Uuid;

/// Unique identity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the sender of an event expects to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangePattern {
    /// Fire and forget: the sender does not wait for a response.
    OneWay,
    /// The sender expects the processed event back.
    #[default]
    RequestResponse,
}

impl ExchangePattern {
    /// Whether this is a one-way exchange.
    pub const fn is_one_way(self) -> bool {
        matches!(self, ExchangePattern::OneWay)
    }
}

bitflags! {
    /// Processing switches carried by an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u8 {
        /// The event must be processed on the caller's thread, start to finish.
        const SYNCHRONOUS = 0b0000_0001;
        /// No further step should process this event.
        const STOP_PROCESSING = 0b0000_0010;
    }
}

/// The content of a message.
#[derive(Clone, Default)]
pub enum Payload {
    /// No content.
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON content.
    Json(serde_json::Value),
    /// An arbitrary in-process object. Opaque payloads cannot be serialized.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    /// Wrap an arbitrary value as an opaque payload.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Opaque(Arc::new(value))
    }

    /// The payload as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Downcast an opaque payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Opaque(value) => value.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Payload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Payload::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Empty, Payload::Empty) => true,
            (Payload::Text(a), Payload::Text(b)) => a == b,
            (Payload::Bytes(a), Payload::Bytes(b)) => a == b,
            (Payload::Json(a), Payload::Json(b)) => a == b,
            (Payload::Opaque(a), Payload::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Empty => serializer.serialize_unit_variant("Payload", 0, "empty"),
            Payload::Text(text) => serializer.serialize_newtype_variant("Payload", 1, "text", text),
            Payload::Bytes(bytes) => {
                serializer.serialize_newtype_variant("Payload", 2, "bytes", bytes)
            }
            Payload::Json(value) => serializer.serialize_newtype_variant("Payload", 3, "json", value),
            Payload::Opaque(_) => Err(S::Error::custom("opaque payloads cannot be serialized")),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// A payload together with its attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    payload: Payload,
    attributes: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with no attributes.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The message payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// All attributes, ordered by key.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Look up one attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Set an attribute, returning the updated message.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace the payload, keeping the attributes.
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// An explicit transaction binding.
///
/// Transactions travel on the event rather than on the current thread.
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: Uuid,
    active: Arc<AtomicBool>,
}

impl Transaction {
    /// Begin a new active transaction.
    pub fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The transaction identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the transaction is still open.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Commit. Returns `false` if the transaction was already finished.
    pub fn commit(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Roll back. Returns `false` if the transaction was already finished.
    pub fn rollback(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// One message in flight through a pipeline.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    correlation_id: Arc<str>,
    message: Message,
    exchange_pattern: ExchangePattern,
    flags: EventFlags,
    reply_to: Option<ReplyTo>,
    transaction: Option<Transaction>,
}

impl Event {
    /// Create a request-response event around a payload.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self::from_message(Message::new(payload))
    }

    /// Create a request-response event around a message.
    pub fn from_message(message: Message) -> Self {
        let id = EventId::new();
        Self {
            id,
            correlation_id: id.to_string().into(),
            message,
            exchange_pattern: ExchangePattern::default(),
            flags: EventFlags::empty(),
            reply_to: None,
            transaction: None,
        }
    }

    /// The unique identity of this event.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// The correlation identity shared by copies and derived events.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The message carried by this event.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The message payload.
    pub fn payload(&self) -> &Payload {
        self.message.payload()
    }

    /// The payload as text, if it is text.
    pub fn payload_str(&self) -> Option<&str> {
        self.message.payload().as_str()
    }

    /// Look up a message attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.message.attribute(key)
    }

    /// The exchange pattern.
    pub fn exchange_pattern(&self) -> ExchangePattern {
        self.exchange_pattern
    }

    /// The processing flags.
    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// Whether the event must be processed synchronously.
    pub fn is_synchronous(&self) -> bool {
        self.flags.contains(EventFlags::SYNCHRONOUS)
    }

    /// Whether further processing has been stopped.
    pub fn is_stop_processing(&self) -> bool {
        self.flags.contains(EventFlags::STOP_PROCESSING)
    }

    /// The reply path, if the sender expects an asynchronous completion.
    pub fn reply_to(&self) -> Option<&ReplyTo> {
        self.reply_to.as_ref()
    }

    /// The bound transaction, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Whether the event is bound to an active transaction.
    pub fn is_transacted(&self) -> bool {
        self.transaction.as_ref().is_some_and(Transaction::is_active)
    }

    /// Whether processing may suspend and complete through the reply path.
    pub fn allows_non_blocking(&self) -> bool {
        !self.is_synchronous() && !self.is_transacted()
    }

    /// Derive an event carrying a new payload. Identity and metadata are kept.
    pub fn with_payload(&self, payload: impl Into<Payload>) -> Self {
        let mut event = self.clone();
        event.message = event.message.with_payload(payload);
        event
    }

    /// Derive an event carrying a new message. Identity and metadata are kept.
    pub fn with_message(&self, message: Message) -> Self {
        let mut event = self.clone();
        event.message = message;
        event
    }

    /// An independent copy for handing to another thread.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Set a message attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message = self.message.with_attribute(key, value);
        self
    }

    /// Set the correlation identity.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into().into();
        self
    }

    /// Set the exchange pattern.
    pub fn with_exchange_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.exchange_pattern = pattern;
        self
    }

    /// Shorthand for a one-way exchange.
    pub fn one_way(self) -> Self {
        self.with_exchange_pattern(ExchangePattern::OneWay)
    }

    /// Mark the event as synchronous (or not).
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.flags.set(EventFlags::SYNCHRONOUS, synchronous);
        self
    }

    /// Attach a reply path.
    pub fn with_reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Strip the reply path.
    pub fn without_reply_to(mut self) -> Self {
        self.reply_to = None;
        self
    }

    /// Take the reply path out of the event.
    pub fn take_reply_to(&mut self) -> Option<ReplyTo> {
        self.reply_to.take()
    }

    /// Bind a transaction.
    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Set or clear the stop-processing flag.
    pub fn set_stop_processing(&mut self, stop: bool) {
        self.flags.set(EventFlags::STOP_PROCESSING, stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_payload_keeps_identity() {
        let event = Event::new("a")
            .with_attribute("k", "v")
            .with_correlation_id("corr");
        let derived = event.with_payload("b");

        assert_eq!(derived.id(), event.id());
        assert_eq!(derived.correlation_id(), "corr");
        assert_eq!(derived.attribute("k"), Some("v"));
        assert_eq!(derived.payload_str(), Some("b"));
        assert_eq!(event.payload_str(), Some("a"));
    }

    #[test]
    fn test_non_blocking_allowance() {
        let event = Event::new("a");
        assert!(event.allows_non_blocking());
        assert!(!event.clone().synchronous(true).allows_non_blocking());

        let tx = Transaction::begin();
        let transacted = event.with_transaction(tx.clone());
        assert!(transacted.is_transacted());
        assert!(!transacted.allows_non_blocking());

        assert!(tx.commit());
        assert!(!tx.rollback());
        assert!(!transacted.is_transacted());
    }

    #[test]
    fn test_stop_processing_flag() {
        let mut event = Event::new("a");
        assert!(!event.is_stop_processing());
        event.set_stop_processing(true);
        assert!(event.is_stop_processing());
        assert!(event.flags().contains(EventFlags::STOP_PROCESSING));
    }

    #[test]
    fn test_opaque_payload_is_not_serializable() {
        struct NotSerde;

        let message = Message::new(Payload::opaque(NotSerde));
        assert!(serde_json::to_vec(&message).is_err());

        let message = Message::new("text").with_attribute("k", "v");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"payload":{"text":"text"},"attributes":{"k":"v"}}"#);
    }
}
