//! Inbound config requests and their one-shot reply capability.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::protocol::key::ConfigKey;
use crate::protocol::raw_config::RawConfig;
use crate::protocol::reply::ConfigReply;

/// Unique identifier for a config request, used for tracing and for claiming
/// a parked request back out of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability to send exactly one reply.
///
/// The sender is taken out on first use, so any later attempt is refused.
pub struct Responder {
    tx: Mutex<Option<oneshot::Sender<ConfigReply>>>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<ConfigReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }

    /// Send the reply. Returns false if a reply was already sent.
    ///
    /// A receiver that went away (client disconnected) still counts as answered.
    pub fn send(&self, reply: ConfigReply) -> bool {
        let tx = self.tx.lock().expect("responder mutex poisoned").take();
        match tx {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.tx.lock().expect("responder mutex poisoned").is_none()
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("sent", &self.is_sent())
            .finish()
    }
}

/// A request for the config of one key, carrying what the client already holds.
///
/// Clones share the same [`Responder`], so a request parked in the registry and
/// the transport's handle can never both reply.
#[derive(Debug, Clone)]
pub struct ConfigRequest {
    id: RequestId,
    key: ConfigKey,
    generation: u64,
    checksum: String,
    timeout: Duration,
    responder: Arc<Responder>,
}

impl ConfigRequest {
    /// Create a request and the receiver its single reply will arrive on.
    pub fn new(
        key: ConfigKey,
        generation: u64,
        checksum: impl Into<String>,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<ConfigReply>) {
        let (responder, rx) = Responder::channel();
        let request = Self {
            id: RequestId::new(),
            key,
            generation,
            checksum: checksum.into(),
            timeout,
            responder: Arc::new(responder),
        };
        (request, rx)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Generation the client currently holds (0 if none).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Checksum of the config the client currently holds (empty if none).
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The config the client already holds, without payload.
    ///
    /// Replying with it yields an "unchanged" answer. `None` when the client
    /// has never been configured for this key.
    pub fn held_config(&self) -> Option<RawConfig> {
        if self.generation == 0 && self.checksum.is_empty() {
            return None;
        }
        Some(RawConfig::new(
            self.key.clone(),
            self.generation,
            self.checksum.clone(),
            String::new(),
        ))
    }

    /// Reply with `answer`. Returns false if this request was already answered.
    pub fn respond(&self, answer: &RawConfig) -> bool {
        let reply = ConfigReply::for_request(answer, self);
        if self.responder.send(reply) {
            tracing::debug!(
                request_id = %self.id,
                key = %self.key,
                generation = answer.generation,
                "Replied to config request"
            );
            true
        } else {
            tracing::error!(
                request_id = %self.id,
                key = %self.key,
                "Config request already answered, dropping second reply"
            );
            false
        }
    }

    pub fn is_answered(&self) -> bool {
        self.responder.is_sent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::raw_config::ErrorCode;

    fn key() -> ConfigKey {
        ConfigKey::new("sentinel", "cloud.config", "", "hosts/foo")
    }

    #[tokio::test]
    async fn test_single_reply() {
        let (request, rx) = ConfigRequest::new(key(), 3, "aaa", Duration::from_secs(1));
        let clone = request.clone();

        assert!(request.respond(&RawConfig::new(key(), 4, "bbb", "payload")));
        assert!(!clone.respond(&RawConfig::new(key(), 5, "ccc", "payload")));
        assert!(clone.is_answered());

        match rx.await.unwrap() {
            ConfigReply::Changed { generation, .. } => assert_eq!(generation, 4),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_held_config() {
        let (fresh, _rx) = ConfigRequest::new(key(), 0, "", Duration::from_secs(1));
        assert!(fresh.held_config().is_none());

        let (held, _rx) = ConfigRequest::new(key(), 3, "aaa", Duration::from_secs(1));
        let config = held.held_config().unwrap();
        assert_eq!(config.generation, 3);
        assert_eq!(config.checksum, "aaa");
        assert!(!config.differs_from(3, "aaa"));
    }

    #[tokio::test]
    async fn test_reply_to_departed_client() {
        let (request, rx) = ConfigRequest::new(key(), 0, "", Duration::from_secs(1));
        drop(rx);
        assert!(request.respond(&RawConfig::error(key(), ErrorCode::Timeout, "gone")));
        assert!(request.is_answered());
    }
}
