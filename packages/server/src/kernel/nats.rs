//! Message broker abstraction for production and testing.
//!
//! [`MessageBroker`] is the publish/subscribe + request/reply port every
//! other component talks through. [`NatsBroker`] is backed by a real NATS
//! connection; [`TestBroker`] records traffic in memory, delivers to
//! in-process subscribers and lets tests script agent replies.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::topics::subject_matches;

/// A message received from (or published to) the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub subject: String,
    pub payload: Bytes,
}

impl BrokerMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text (lossy for invalid UTF-8).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// An active subscription. Dropping it unsubscribes.
pub struct Subscription {
    subject: String,
    stream: BoxStream<'static, BrokerMessage>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, stream: BoxStream<'static, BrokerMessage>) -> Self {
        Self {
            subject: subject.into(),
            stream,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the next message. `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<BrokerMessage> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Trait for broker operations.
///
/// Subjects are dot-separated; `*` matches one token and `>` the remainder.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message to a subject (fire-and-forget).
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;

    /// Subscribe to a subject or wildcard pattern.
    async fn subscribe(&self, subject: String) -> Result<Subscription>;

    /// Send a request and wait for a single reply.
    async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes>;
}

// =============================================================================
// NATS
// =============================================================================

/// Real NATS client broker.
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<Subscription> {
        let subscriber = self.client.subscribe(subject.clone()).await?;
        let stream = subscriber
            .map(|message| BrokerMessage {
                subject: message.subject.to_string(),
                payload: message.payload,
            })
            .boxed();
        Ok(Subscription::new(subject, stream))
    }

    async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes> {
        let reply = self.client.request(subject, payload).await?;
        Ok(reply.payload)
    }
}

// =============================================================================
// TestBroker
// =============================================================================

type PublishResponder = dyn Fn(&BrokerMessage) -> Option<BrokerMessage> + Send + Sync;
type RequestResponder = dyn Fn(&BrokerMessage) -> Option<Bytes> + Send + Sync;

/// In-memory broker that tracks traffic for testing.
///
/// Publishes are recorded and delivered to every matching in-process
/// subscriber. Responders registered with [`TestBroker::on_publish`] act as
/// remote agents: when a matching message is published they may answer with
/// a message of their own, which is delivered the same way (responders are
/// not re-run on replies).
#[derive(Default)]
pub struct TestBroker {
    published: RwLock<Vec<BrokerMessage>>,
    subscriptions: RwLock<Vec<String>>,
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<BrokerMessage>)>>,
    publish_responders: RwLock<Vec<(String, Arc<PublishResponder>)>>,
    request_responders: RwLock<Vec<(String, Arc<RequestResponder>)>>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer publishes matching `pattern`.
    pub fn on_publish<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&BrokerMessage) -> Option<BrokerMessage> + Send + Sync + 'static,
    {
        self.publish_responders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_string(), Arc::new(responder)));
    }

    /// Answer requests matching `pattern`.
    pub fn on_request<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&BrokerMessage) -> Option<Bytes> + Send + Sync + 'static,
    {
        self.request_responders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_string(), Arc::new(responder)));
    }

    /// Record a message and hand it to matching subscribers.
    fn deliver(&self, message: BrokerMessage) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(pattern, sender)| {
            if sender.is_closed() {
                return false;
            }
            if subject_matches(pattern, &message.subject) {
                return sender.send(message.clone()).is_ok();
            }
            true
        });
    }

    /// Get all published messages.
    pub fn published_messages(&self) -> Vec<BrokerMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get published messages for a subject pattern.
    pub fn messages_matching(&self, pattern: &str) -> Vec<BrokerMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| subject_matches(pattern, &m.subject))
            .cloned()
            .collect()
    }

    /// Check if any message was published matching a subject pattern.
    pub fn was_published(&self, pattern: &str) -> bool {
        !self.messages_matching(pattern).is_empty()
    }

    /// Get every subject ever subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of still-open subscriptions whose pattern starts with `prefix`.
    pub fn active_subscriptions(&self, prefix: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(pattern, sender)| !sender.is_closed() && pattern.starts_with(prefix))
            .count()
    }

    /// Get the count of published messages.
    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deserialize a published message payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &BrokerMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }
}

#[async_trait]
impl MessageBroker for TestBroker {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let message = BrokerMessage { subject, payload };
        self.deliver(message.clone());

        let responders: Vec<Arc<PublishResponder>> = self
            .publish_responders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(pattern, _)| subject_matches(pattern, &message.subject))
            .map(|(_, responder)| Arc::clone(responder))
            .collect();

        for responder in responders {
            if let Some(reply) = responder(&message) {
                debug!(subject = %message.subject, reply = %reply.subject, "test broker reply");
                self.deliver(reply);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subject.clone());
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.clone(), sender));
        Ok(Subscription::new(
            subject,
            UnboundedReceiverStream::new(receiver).boxed(),
        ))
    }

    async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes> {
        let message = BrokerMessage { subject, payload };
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());

        let responder = self
            .request_responders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(pattern, _)| subject_matches(pattern, &message.subject))
            .map(|(_, responder)| Arc::clone(responder));

        responder
            .and_then(|responder| responder(&message))
            .ok_or_else(|| anyhow!("no responders for {}", message.subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_matching_messages_only() {
        let broker = TestBroker::new();
        let mut sub = broker.subscribe("arena.contest.*.flow.>".into()).await.unwrap();

        broker
            .publish("arena.contest.c1.flow.role_call".into(), Bytes::from("a"))
            .await
            .unwrap();
        broker
            .publish("arena.round.r1.create".into(), Bytes::from("b"))
            .await
            .unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "arena.contest.c1.flow.role_call");
        assert_eq!(broker.publish_count(), 2);
        assert!(broker.was_published("arena.round.*.create"));
    }

    #[tokio::test]
    async fn publish_responders_reply_to_subscribers() {
        let broker = TestBroker::new();
        broker.on_publish("agent.*.ping.request.*", |msg| {
            let reply = msg.subject.replace(".request.", ".response.");
            Some(BrokerMessage::new(reply, "pong"))
        });
        let mut sub = broker.subscribe("agent.p1.ping.response.j1".into()).await.unwrap();

        broker
            .publish("agent.p1.ping.request.j1".into(), Bytes::from("ping"))
            .await
            .unwrap();

        assert_eq!(sub.next().await.unwrap().text(), "pong");
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let broker = TestBroker::new();
        let sub = broker.subscribe("a.b".into()).await.unwrap();
        assert_eq!(broker.active_subscriptions("a."), 1);
        drop(sub);
        assert_eq!(broker.active_subscriptions("a."), 0);
        broker.publish("a.b".into(), Bytes::new()).await.unwrap();
        assert_eq!(broker.subscriptions(), vec!["a.b".to_string()]);
    }

    #[tokio::test]
    async fn request_without_responder_fails() {
        let broker = TestBroker::new();
        assert!(broker.request("nobody.home".into(), Bytes::new()).await.is_err());

        broker.on_request("echo.*", |msg| Some(msg.payload.clone()));
        let reply = broker.request("echo.x".into(), Bytes::from("hi")).await.unwrap();
        assert_eq!(reply, Bytes::from("hi"));
    }
}
