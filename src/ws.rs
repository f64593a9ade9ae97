//! Dual public/private websocket transport (§4.1, §5). Each channel runs as
//! a background task that deserializes the topic envelope and pushes the
//! raw JSON payload into the shared [`TopicCache`]; the main loop never
//! blocks on socket I/O.
use crate::api::WebsocketAPI;
use crate::errors::BybitError;
use crate::util::{epoch_millis, generate_random_uid};
use futures::{SinkExt, StreamExt};
use hex::encode as hex_encode;
use hmac::{Hmac, Mac};
use log::{trace, warn};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use crate::topic_cache::TopicCache;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ping cadence for both channels (§4.1 "configured ping interval").
pub const PING_INTERVAL_SECS: u64 = 20;

pub struct WsChannel {
    cache: Arc<TopicCache<Value>>,
}

impl WsChannel {
    pub fn new(cache: Arc<TopicCache<Value>>) -> Self {
        WsChannel { cache }
    }

    /// Connects to the public channel, subscribes to `topics`, and spawns a
    /// background task pushing every message into the topic cache.
    pub async fn spawn_public(
        &self,
        testnet: bool,
        topics: Vec<String>,
    ) -> Result<tokio::task::JoinHandle<()>, BybitError> {
        let url = WebsocketAPI::PublicLinear.endpoint(testnet);
        let mut socket = connect(url).await?;
        subscribe(&mut socket, &topics).await?;
        let cache = self.cache.clone();
        Ok(tokio::spawn(pump(socket, cache)))
    }

    /// Connects to the private channel, authenticates, subscribes to
    /// `topics`, and spawns the background pump.
    pub async fn spawn_private(
        &self,
        testnet: bool,
        api_key: &str,
        api_secret: &str,
        topics: Vec<String>,
    ) -> Result<tokio::task::JoinHandle<()>, BybitError> {
        let url = WebsocketAPI::Private.endpoint(testnet);
        let mut socket = connect(url).await?;
        authenticate(&mut socket, api_key, api_secret).await?;
        subscribe(&mut socket, &topics).await?;
        let cache = self.cache.clone();
        Ok(tokio::spawn(pump(socket, cache)))
    }
}

async fn connect(url: &str) -> Result<WsStream, BybitError> {
    let (socket, _) = connect_async(url).await?;
    Ok(socket)
}

async fn authenticate(socket: &mut WsStream, api_key: &str, api_secret: &str) -> Result<(), BybitError> {
    let expires = epoch_millis() + 10_000;
    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("GET/realtime{expires}").as_bytes());
    let signature = hex_encode(mac.finalize().into_bytes());
    let auth = json!({
        "op": "auth",
        "args": [api_key, expires, signature],
    });
    socket.send(WsMessage::Text(auth.to_string())).await?;
    Ok(())
}

async fn subscribe(socket: &mut WsStream, topics: &[String]) -> Result<(), BybitError> {
    if topics.is_empty() {
        return Ok(());
    }
    let request = json!({
        "req_id": generate_random_uid(8),
        "op": "subscribe",
        "args": topics,
    });
    socket.send(WsMessage::Text(request.to_string())).await?;
    Ok(())
}

/// Background I/O worker (§5): reads frames, extracts the `topic` field,
/// and pushes the payload into the cache under the topic key. Runs a ping
/// on an interval so the venue does not close the connection as idle.
async fn pump(mut socket: WsStream, cache: Arc<TopicCache<Value>>) {
    let mut ping_timer = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                let ping = json!({"op": "ping", "req_id": generate_random_uid(8)});
                if let Err(err) = socket.send(WsMessage::Text(ping.to_string())).await {
                    warn!("ws ping failed: {err}");
                    return;
                }
            }
            frame = socket.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            trace!("non-json ws frame: {text}");
                            continue;
                        };
                        if let Some(topic) = value.get("topic").and_then(Value::as_str) {
                            cache.push(topic, value.clone());
                        } else if let Some(op) = value.get("op").and_then(Value::as_str) {
                            trace!("ws control frame op={op}");
                        }
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        warn!("ws closed: {frame:?}");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("ws error: {err}");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}
