use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::{ChangeFeed, ChangeStream, topic_for};
use crate::config::Config;
use crate::error::SubscriptionError;
use crate::model::{Bookmark, BookmarkId, Session};
use crate::sync::ChangeEvent;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const JOIN_REF: &str = "1";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 64;

/// Phoenix channel envelope used by the realtime endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PhxMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhxMessage {
    fn new(topic: &str, event: &str, payload: Value, reference: u64) -> Self {
        PhxMessage {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    fn into_frame(self) -> Result<Message, SubscriptionError> {
        Ok(Message::Text(serde_json::to_string(&self)?))
    }
}

/// Per-user `postgres_changes` subscription over the realtime websocket.
pub struct RealtimeFeed {
    socket_url: String,
    schema: String,
    table: String,
    heartbeat: Duration,
}

impl RealtimeFeed {
    pub fn new(cfg: &Config) -> Self {
        let base = cfg.backend.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        RealtimeFeed {
            socket_url: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                ws_base,
                urlencoding::encode(&cfg.backend.anon_key)
            ),
            schema: cfg.backend.schema.clone(),
            table: cfg.backend.table.clone(),
            heartbeat: Duration::from_secs(cfg.realtime.heartbeat_seconds.max(1)),
        }
    }

    fn join_message(&self, session: &Session, topic: &str) -> PhxMessage {
        let mut msg = PhxMessage::new(
            topic,
            "phx_join",
            json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": self.schema,
                        "table": self.table,
                        "filter": format!("user_id=eq.{}", session.user_id()),
                    }],
                },
                "access_token": session.access_token,
            }),
            0,
        );
        msg.reference = Some(JOIN_REF.to_string());
        msg
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn open(&self, session: &Session) -> Result<ChangeStream, SubscriptionError> {
        let topic = topic_for(&session.user);
        let (mut socket, _) = connect_async(self.socket_url.as_str()).await?;

        socket.send(self.join_message(session, &topic).into_frame()?).await?;
        tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut socket, &topic))
            .await
            .map_err(|_| SubscriptionError::JoinRejected("join timed out".to_string()))??;
        tracing::info!(topic = %topic, "realtime channel joined");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        tokio::spawn(pump(socket, topic, self.heartbeat, tx, token.clone()));

        Ok(ChangeStream::new(rx, token))
    }
}

async fn await_join(socket: &mut Socket, topic: &str) -> Result<(), SubscriptionError> {
    while let Some(frame) = socket.next().await {
        let Message::Text(text) = frame? else {
            continue;
        };
        let msg: PhxMessage = serde_json::from_str(&text)?;
        if msg.event == "phx_reply" && msg.topic == topic && msg.reference.as_deref() == Some(JOIN_REF) {
            return match msg.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Ok(()),
                _ => Err(SubscriptionError::JoinRejected(msg.payload.to_string())),
            };
        }
    }
    Err(SubscriptionError::Closed("socket ended before join reply".to_string()))
}

/// Owns the socket until cancelled or until the channel fails. Failures are
/// forwarded to the stream reader as the last item.
async fn pump(
    socket: Socket,
    topic: String,
    period: Duration,
    tx: mpsc::Sender<Result<ChangeEvent, SubscriptionError>>,
    token: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    let failure = loop {
        tokio::select! {
            _ = token.cancelled() => {
                let leave = PhxMessage::new(&topic, "phx_leave", json!({}), next_ref);
                if let Ok(frame) = leave.into_frame() {
                    let _ = sink.send(frame).await;
                }
                let _ = sink.close().await;
                tracing::info!(topic = %topic, "realtime channel left");
                return;
            }
            _ = heartbeat.tick() => {
                let beat = PhxMessage::new("phoenix", "heartbeat", json!({}), next_ref);
                next_ref += 1;
                let sent = match beat.into_frame() {
                    Ok(frame) => sink.send(frame).await.map_err(SubscriptionError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    break e;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let inbound = serde_json::from_str::<PhxMessage>(&text)
                        .map_err(SubscriptionError::from)
                        .and_then(|msg| classify(&msg, &topic));
                    match inbound {
                        Ok(Some(event)) => {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => break e,
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break SubscriptionError::Closed(
                        frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "close frame".to_string()),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break SubscriptionError::from(e),
                None => break SubscriptionError::Closed("socket ended".to_string()),
            }
        }
    };

    tracing::warn!(topic = %topic, error = %failure, "realtime channel failed");
    let _ = tx.send(Err(failure)).await;
}

/// Sorts an inbound channel message into a change, a channel failure, or
/// something to ignore (heartbeat replies, presence, other topics).
pub fn classify(msg: &PhxMessage, topic: &str) -> Result<Option<ChangeEvent>, SubscriptionError> {
    if msg.topic != topic {
        return Ok(None);
    }

    match msg.event.as_str() {
        "postgres_changes" => parse_change(&msg.payload),
        "phx_error" => Err(SubscriptionError::Closed(format!("channel error: {}", msg.payload))),
        "phx_close" => Err(SubscriptionError::Closed("channel closed by server".to_string())),
        "phx_reply" | "system" if msg.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Err(SubscriptionError::Protocol(msg.payload.to_string()))
        }
        _ => Ok(None),
    }
}

/// Decodes the `data` block of a `postgres_changes` payload.
pub fn parse_change(payload: &Value) -> Result<Option<ChangeEvent>, SubscriptionError> {
    let data = payload
        .get("data")
        .ok_or_else(|| SubscriptionError::Protocol("postgres_changes without data".to_string()))?;
    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();

    let event = match kind {
        "INSERT" => ChangeEvent::Insert(record(data, "record")?),
        "UPDATE" => ChangeEvent::Update(record(data, "record")?),
        "DELETE" => {
            let id = data
                .get("old_record")
                .and_then(|old| old.get("id"))
                .ok_or_else(|| SubscriptionError::Protocol("delete without old_record.id".to_string()))?;
            ChangeEvent::Delete(serde_json::from_value::<BookmarkId>(id.clone())?)
        }
        other => {
            tracing::debug!(kind = other, "ignoring change type");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn record(data: &Value, field: &str) -> Result<Bookmark, SubscriptionError> {
    let raw = data
        .get(field)
        .ok_or_else(|| SubscriptionError::Protocol(format!("change without {}", field)))?;
    Ok(serde_json::from_value(raw.clone())?)
}
