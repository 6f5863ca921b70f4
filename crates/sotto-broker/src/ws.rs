//! WebSocket client for the realtime broker.
//!
//! The coordinator attaches to conversation channels the same way mobile
//! clients do, but authenticates with the broker key directly instead of a
//! minted token request. Wire frames are single JSON objects discriminated
//! by `action`; the only inbound action the engine cares about is `message`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::broker::{Attachment, Broker, BrokerConnection, BrokerMessage};
use crate::error::{BrokerError, Result};

const CHANNEL_DEPTH: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Routes = Arc<Mutex<HashMap<String, mpsc::Sender<BrokerMessage>>>>;

pub struct WsBroker {
    endpoint: String,
    key: String,
}

impl WsBroker {
    pub fn new(endpoint: &str, key: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl Broker for WsBroker {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BrokerConnection>> {
        let (stream, _) = connect_async(&self.endpoint)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        let (mut write, read) = stream.split();

        let hello = json!({
            "action": "hello",
            "key": self.key,
            "clientId": client_id,
        });
        write
            .send(Message::Text(hello.to_string().into()))
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(route_inbound(read, Arc::clone(&routes)));

        Ok(Box::new(WsConnection {
            write,
            routes,
            reader,
        }))
    }
}

/// Inbound frame shapes we route. Unknown actions are logged and dropped.
#[derive(Deserialize)]
struct InboundFrame {
    action: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: String,
}

async fn route_inbound(mut read: SplitStream<WsStream>, routes: Routes) {
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "malformed broker frame, dropping");
                continue;
            }
        };
        if frame.action != "message" {
            debug!(action = %frame.action, "ignoring broker frame");
            continue;
        }
        let sender = routes.lock().unwrap().get(&frame.channel).cloned();
        if let Some(sender) = sender {
            let delivered = sender
                .send(BrokerMessage {
                    id: frame.id,
                    name: frame.name,
                    data: frame.data,
                })
                .await;
            if delivered.is_err() {
                routes.lock().unwrap().remove(&frame.channel);
            }
        }
    }
    // connection gone — dropping the senders ends every attachment
    routes.lock().unwrap().clear();
}

pub struct WsConnection {
    write: SplitSink<WsStream, Message>,
    routes: Routes,
    reader: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    async fn send_frame(&mut self, frame: serde_json::Value) -> Result<()> {
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl BrokerConnection for WsConnection {
    async fn attach(&mut self, channel: &str) -> Result<Attachment> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.routes
            .lock()
            .unwrap()
            .insert(channel.to_string(), tx);
        self.send_frame(json!({ "action": "attach", "channel": channel }))
            .await?;
        Ok(Attachment {
            channel: channel.to_string(),
            rx,
        })
    }

    async fn publish(&mut self, channel: &str, name: &str, data: &str) -> Result<()> {
        self.send_frame(json!({
            "action": "publish",
            "channel": channel,
            "name": name,
            "data": data,
        }))
        .await
    }

    async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
        self.reader.abort();
        self.routes.lock().unwrap().clear();
    }
}
