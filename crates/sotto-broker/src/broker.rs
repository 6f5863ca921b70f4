use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One message delivered on an attached channel. `id` is the broker-assigned
/// message id — the handoff de-duplication key during overlap windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub id: String,
    pub name: String,
    pub data: String,
}

/// A live subscription to a single channel. Dropping it detaches.
pub struct Attachment {
    pub channel: String,
    pub(crate) rx: mpsc::Receiver<BrokerMessage>,
}

impl Attachment {
    /// Next message, or `None` once the connection or channel is gone.
    pub async fn next(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }
}

/// Factory for broker connections. Each transcription worker owns exactly
/// one connection for the lifetime of its transcript.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BrokerConnection>>;
}

/// A single realtime connection: attach/publish/close.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Subscribe to every message name on `channel`.
    async fn attach(&mut self, channel: &str) -> Result<Attachment>;

    /// Publish one message.
    async fn publish(&mut self, channel: &str, name: &str, data: &str) -> Result<()>;

    /// Tear the connection down. Attachments drain and then yield `None`.
    async fn close(&mut self);
}
