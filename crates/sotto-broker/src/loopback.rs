//! In-process broker used by tests and single-node development runs.
//!
//! Channels are fan-out broadcast topics; every connection attached to a
//! channel receives every message published on it, including its own. That
//! matches the delivery model the transcription engine is written against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::broker::{Attachment, Broker, BrokerConnection, BrokerMessage};
use crate::error::Result;

const CHANNEL_DEPTH: usize = 256;

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<BrokerMessage>>>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, channel: &str) -> broadcast::Sender<BrokerMessage> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_DEPTH).0)
            .clone()
    }

    /// Publish without a connection — handy for driving tests.
    pub fn publish_raw(&self, channel: &str, name: &str, data: &str) {
        let message = BrokerMessage {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            data: data.to_string(),
        };
        let _ = self.topic(channel).send(message);
    }

    /// Publish with a fixed message id — for exercising overlap de-dup.
    pub fn publish_with_id(&self, channel: &str, id: &str, name: &str, data: &str) {
        let message = BrokerMessage {
            id: id.to_string(),
            name: name.to_string(),
            data: data.to_string(),
        };
        let _ = self.topic(channel).send(message);
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn connect(&self, _client_id: &str) -> Result<Box<dyn BrokerConnection>> {
        Ok(Box::new(LoopbackConnection {
            broker: self.clone(),
            forwarders: Vec::new(),
        }))
    }
}

pub struct LoopbackConnection {
    broker: LoopbackBroker,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl BrokerConnection for LoopbackConnection {
    async fn attach(&mut self, channel: &str) -> Result<Attachment> {
        let mut topic_rx = self.broker.topic(channel).subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let handle = tokio::spawn(async move {
            loop {
                match topic_rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break; // attachment dropped
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.forwarders.push(handle);
        Ok(Attachment {
            channel: channel.to_string(),
            rx,
        })
    }

    async fn publish(&mut self, channel: &str, name: &str, data: &str) -> Result<()> {
        self.broker.publish_raw(channel, name, data);
        Ok(())
    }

    async fn close(&mut self) {
        for handle in self.forwarders.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attached_connection_receives_publishes() {
        let broker = LoopbackBroker::new();
        let mut conn = broker.connect("tester").await.unwrap();
        let mut attachment = conn.attach("conv:feed").await.unwrap();

        broker.publish_raw("conv:feed", "chunk", "0|Hello");
        let message = attachment.next().await.unwrap();
        assert_eq!(message.name, "chunk");
        assert_eq!(message.data, "0|Hello");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let broker = LoopbackBroker::new();
        let mut conn = broker.connect("tester").await.unwrap();
        let mut feed = conn.attach("conv:feed").await.unwrap();

        broker.publish_raw("conv:control", "chunk", "-25|a|b|c|d|e|f");
        broker.publish_raw("conv:feed", "chunk", "0|Hi");
        assert_eq!(feed.next().await.unwrap().data, "0|Hi");
    }

    #[tokio::test]
    async fn close_ends_attachments() {
        let broker = LoopbackBroker::new();
        let mut conn = broker.connect("tester").await.unwrap();
        let mut attachment = conn.attach("conv:feed").await.unwrap();
        conn.close().await;
        assert_eq!(attachment.next().await, None);
    }
}
