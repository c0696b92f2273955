//! # Idempotent redelivery
//!
//! [`IdempotentRedeliveryPolicy`] counts failed deliveries of the same
//! message. A message is recognised by its digest (see [`DigestStrategy`]),
//! so a redelivered copy maps to the same counter as the original.
//!
//! Counters and locks are both keyed `<policy id>-<digest>`. Each delivery
//! holds the lock for its key from the first counter read until the counter
//! is updated. Deliveries of the same message are therefore serialized while
//! different messages never wait on each other. The lock is reentrant, so a
//! policy nested behind itself does not deadlock.
//!
//! Once a message has failed more than `max_redelivery_count` times it is
//! no longer passed downstream. It goes to the dead-letter processor if one
//! is configured and fails with
//! [`MessagingErrorKind::RedeliveryExhausted`] otherwise. The counter stays
//! where it is from then on.

use crate::{lock::InMemoryLockFactory, store::InMemoryObjectStore};
use conveyor_core::{
    BoxProcessor, DigestError, Event, FlowContext, Interceptor, Lifecycle, LifecycleError,
    LockFactory, MessagingError, MessagingErrorKind, Next, ObjectStore, Outcome, ProcessResult,
    Processor, StoreError,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// How a message is turned into the key its counter is stored under.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DigestStrategy {
    /// SHA-256 of the JSON form of the message, hex encoded.
    #[default]
    SecureHash,
    /// The value of the named attribute.
    Attribute(String),
    /// The event's correlation id.
    CorrelationId,
}

impl DigestStrategy {
    /// Compute the digest of `event`.
    pub fn digest(&self, event: &Event) -> Result<String, DigestError> {
        match self {
            DigestStrategy::SecureHash => {
                let bytes =
                    serde_json::to_vec(event.message()).map_err(DigestError::NotSerializable)?;
                Ok(hex::encode(Sha256::digest(&bytes)))
            }
            DigestStrategy::Attribute(name) => event
                .attribute(name)
                .map(str::to_owned)
                .ok_or_else(|| DigestError::MissingAttribute(name.clone())),
            DigestStrategy::CorrelationId => Ok(event.correlation_id().to_owned()),
        }
    }
}

/// Redelivery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedeliveryConfig {
    /// Failed deliveries tolerated before a message is diverted.
    pub max_redelivery_count: u32,
    /// How messages are recognised.
    pub digest: DigestStrategy,
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            max_redelivery_count: 5,
            digest: DigestStrategy::default(),
        }
    }
}

/// Counts failed deliveries per message and diverts messages that keep
/// failing.
pub struct IdempotentRedeliveryPolicy {
    id: String,
    config: RedeliveryConfig,
    store: Arc<dyn ObjectStore<u32>>,
    locks: Arc<dyn LockFactory>,
    dead_letter: Option<BoxProcessor>,
}

impl IdempotentRedeliveryPolicy {
    /// Start configuring a policy.
    pub fn builder() -> RedeliveryPolicyBuilder {
        RedeliveryPolicyBuilder::default()
    }

    /// A policy with default settings and in-memory state.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The id that prefixes this policy's lock names and counter keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The settings in use.
    pub fn config(&self) -> &RedeliveryConfig {
        &self.config
    }

    fn exhausted(&self, digest: String, event: Event) -> MessagingError {
        MessagingError::new(MessagingErrorKind::RedeliveryExhausted {
            digest,
            max: self.config.max_redelivery_count,
        })
        .with_event(event)
    }

    async fn deliver(
        &self,
        key: &str,
        digest: String,
        event: Event,
        next: &Next,
    ) -> ProcessResult {
        let failures = self
            .failures(key)
            .await
            .map_err(|err| MessagingError::from(err).with_event(event.clone()))?;

        if failures > self.config.max_redelivery_count {
            tracing::warn!(
                policy = %self.id,
                digest = %digest,
                failures,
                "redelivery exhausted"
            );
            return match &self.dead_letter {
                Some(dead_letter) => dead_letter
                    .process(event.without_reply_to())
                    .await
                    .map(|_| Outcome::Absent),
                None => Err(self.exhausted(digest, event)),
            };
        }

        let event = event.without_reply_to();
        let previous = event.clone();
        match next.process(event).await {
            Ok(outcome) => {
                self.clear(key)
                    .await
                    .map_err(|err| MessagingError::from(err).with_event(previous))?;
                Ok(outcome)
            }
            Err(err) => {
                tracing::debug!(
                    policy = %self.id,
                    digest = %digest,
                    failures = failures + 1,
                    "delivery failed"
                );
                let recorded = async {
                    self.clear(key).await?;
                    self.store.store(key, failures + 1).await
                };
                if let Err(store_err) = recorded.await {
                    tracing::error!(
                        policy = %self.id,
                        digest = %digest,
                        error = %store_err,
                        "cannot record failed delivery"
                    );
                }
                Err(err.or_event(previous))
            }
        }
    }

    async fn failures(&self, key: &str) -> Result<u32, StoreError> {
        match self.store.retrieve(key).await {
            Ok(count) => Ok(count),
            Err(StoreError::NotFound(_)) => {
                self.store.store(key, 0).await?;
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        match self.store.remove(key).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Default for IdempotentRedeliveryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`IdempotentRedeliveryPolicy`].
#[derive(Default)]
pub struct RedeliveryPolicyBuilder {
    id: Option<String>,
    config: RedeliveryConfig,
    store: Option<Arc<dyn ObjectStore<u32>>>,
    locks: Option<Arc<dyn LockFactory>>,
    dead_letter: Option<BoxProcessor>,
}

impl RedeliveryPolicyBuilder {
    /// Set the policy id. Defaults to a random one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replace all settings.
    pub fn config(mut self, config: RedeliveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of failed deliveries tolerated.
    pub fn max_redelivery_count(mut self, max: u32) -> Self {
        self.config.max_redelivery_count = max;
        self
    }

    /// Set how messages are recognised.
    pub fn digest(mut self, digest: DigestStrategy) -> Self {
        self.config.digest = digest;
        self
    }

    /// Keep counters in `store`. Defaults to an [`InMemoryObjectStore`].
    pub fn store(mut self, store: Arc<dyn ObjectStore<u32>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Take locks from `locks`. Defaults to an [`InMemoryLockFactory`].
    pub fn lock_factory(mut self, locks: Arc<dyn LockFactory>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Send exhausted messages to `processor` instead of failing them.
    pub fn dead_letter(mut self, processor: impl Processor) -> Self {
        self.dead_letter = Some(processor.boxed());
        self
    }

    /// Finish building.
    pub fn build(self) -> IdempotentRedeliveryPolicy {
        IdempotentRedeliveryPolicy {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            config: self.config,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryObjectStore::new())),
            locks: self
                .locks
                .unwrap_or_else(|| Arc::new(InMemoryLockFactory::new())),
            dead_letter: self.dead_letter,
        }
    }
}

impl Lifecycle for IdempotentRedeliveryPolicy {
    fn set_flow(&self, flow: &FlowContext) {
        if let Some(dead_letter) = &self.dead_letter {
            dead_letter.set_flow(flow);
        }
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.dead_letter
            .as_ref()
            .map_or(Ok(()), Lifecycle::initialise)
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.dead_letter.as_ref().map_or(Ok(()), Lifecycle::start)
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.dead_letter.as_ref().map_or(Ok(()), Lifecycle::stop)
    }

    fn dispose(&self) {
        if let Some(dead_letter) = &self.dead_letter {
            dead_letter.dispose();
        }
    }
}

impl Interceptor for IdempotentRedeliveryPolicy {
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        let digest = match self.config.digest.digest(&event) {
            Ok(digest) => digest,
            Err(err) => {
                tracing::warn!(
                    policy = %self.id,
                    event_id = %event.id(),
                    error = %err,
                    "cannot digest message"
                );
                return Ok(Outcome::Absent);
            }
        };

        // The counter must not change under us until this delivery is accounted for.
        let key = format!("{}-{}", self.id, digest);
        let lock = self.locks.create_lock(&key);
        lock.hold(self.deliver(&key, digest, event, next)).await
    }

    fn name(&self) -> &str {
        "redelivery"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::SerializingObjectStore,
        testing::{AppendingProcessor, FailingProcessor},
    };
    use conveyor_core::Payload;

    async fn deliver(
        policy: &IdempotentRedeliveryPolicy,
        next: &Next,
        payload: &str,
    ) -> ProcessResult {
        policy.intercept(Event::new(payload), next).await
    }

    #[test]
    fn test_secure_hash_is_stable_per_content() {
        let strategy = DigestStrategy::SecureHash;
        let a = strategy.digest(&Event::new("order-1")).unwrap();
        let b = strategy.digest(&Event::new("order-1")).unwrap();
        let c = strategy.digest(&Event::new("order-2")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_attribute_and_correlation_digests() {
        let event = Event::new("x")
            .with_attribute("message-id", "m-7")
            .with_correlation_id("corr-1");
        let by_attribute = DigestStrategy::Attribute("message-id".to_string());
        assert_eq!(by_attribute.digest(&event).unwrap(), "m-7");
        assert_eq!(DigestStrategy::CorrelationId.digest(&event).unwrap(), "corr-1");

        let missing = DigestStrategy::Attribute("other".to_string());
        assert!(matches!(
            missing.digest(&event),
            Err(DigestError::MissingAttribute(name)) if name == "other"
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config: RedeliveryConfig =
            serde_json::from_str(r#"{"digest": {"attribute": "message-id"}}"#).unwrap();
        assert_eq!(config.max_redelivery_count, 5);
        assert_eq!(config.digest, DigestStrategy::Attribute("message-id".to_string()));
    }

    #[tokio::test]
    async fn test_stops_after_max_redeliveries() {
        let failing = FailingProcessor::new("down");
        let next = Next::new(failing.clone());
        let policy = IdempotentRedeliveryPolicy::builder()
            .max_redelivery_count(5)
            .build();

        for _ in 0..10 {
            assert!(deliver(&policy, &next, "payload").await.is_err());
        }
        assert_eq!(failing.invocations(), 6);

        let err = deliver(&policy, &next, "payload").await.unwrap_err();
        assert!(matches!(
            err.kind(),
            MessagingErrorKind::RedeliveryExhausted { max: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_exhausted_message_goes_to_dead_letter() {
        let failing = FailingProcessor::new("down");
        let dead_letter = AppendingProcessor::new("dlq");
        let next = Next::new(failing.clone());
        let policy = IdempotentRedeliveryPolicy::builder()
            .max_redelivery_count(1)
            .dead_letter(dead_letter.clone())
            .build();

        assert!(deliver(&policy, &next, "m").await.is_err());
        assert!(deliver(&policy, &next, "m").await.is_err());
        let out = deliver(&policy, &next, "m").await.unwrap();
        assert!(out.is_absent());
        assert_eq!(failing.invocations(), 2);
        assert_eq!(dead_letter.result().unwrap().payload_str(), Some("mdlq"));

        // The dead letter's own result never reaches the caller.
        assert!(deliver(&policy, &next, "m").await.unwrap().is_absent());
        assert_eq!(dead_letter.invocations(), 2);
    }

    #[tokio::test]
    async fn test_other_messages_are_unaffected() {
        let failing = FailingProcessor::new("down");
        let next = Next::new(failing.clone());
        let policy = IdempotentRedeliveryPolicy::builder()
            .max_redelivery_count(0)
            .build();

        assert!(deliver(&policy, &next, "a").await.is_err());
        assert!(deliver(&policy, &next, "a").await.is_err());
        assert!(deliver(&policy, &next, "b").await.is_err());
        assert_eq!(failing.invocations(), 2);
    }

    #[tokio::test]
    async fn test_success_clears_the_record() {
        let store = Arc::new(InMemoryObjectStore::<u32>::new());
        let policy = IdempotentRedeliveryPolicy::builder()
            .store(store.clone())
            .build();

        let failing = Next::new(FailingProcessor::new("down"));
        assert!(deliver(&policy, &failing, "m").await.is_err());
        assert_eq!(store.len(), 1);
        let digest = DigestStrategy::SecureHash.digest(&Event::new("m")).unwrap();
        let key = format!("{}-{digest}", policy.id());
        assert_eq!(store.retrieve(&key).await.unwrap(), 1);

        let out = deliver(&policy, &Next::new(AppendingProcessor::new("1")), "m")
            .await
            .unwrap();
        assert_eq!(out.event().and_then(Event::payload_str), Some("m1"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_undigestible_message_yields_absent() {
        let downstream = AppendingProcessor::new("1");
        let policy = IdempotentRedeliveryPolicy::new();
        let event = Event::new(Payload::opaque(42_u8));

        let out = policy
            .intercept(event, &Next::new(downstream.clone()))
            .await
            .unwrap();
        assert!(out.is_absent());
        assert_eq!(downstream.invocations(), 0);
    }

    #[tokio::test]
    async fn test_serializing_store() {
        let failing = FailingProcessor::new("down");
        let next = Next::new(failing.clone());
        let policy = IdempotentRedeliveryPolicy::builder()
            .max_redelivery_count(2)
            .store(Arc::new(SerializingObjectStore::<u32>::new()))
            .build();

        for _ in 0..5 {
            assert!(deliver(&policy, &next, "m").await.is_err());
        }
        assert_eq!(failing.invocations(), 3);
    }
}
