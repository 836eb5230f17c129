// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime subscription to `groups` row changes.
//!
//! Speaks the Phoenix channel protocol (v1 JSON frames) used by the
//! realtime service: one `phx_join` with a `postgres_changes` config, a
//! heartbeat every 30 seconds, and `postgres_changes` frames decoded into
//! [`GroupChange`] values.

use super::{tables, RealtimeApi, RealtimeEvent, SupabaseClient};
use crate::error::{AppError, Result};
use crate::models::{GroupChange, GroupRow};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;
const JOIN_REF: &str = "1";

/// Realtime client bound to the same project and session as the REST client.
#[derive(Clone)]
pub struct SupabaseRealtime {
    client: SupabaseClient,
}

impl SupabaseRealtime {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn socket_url(&self) -> String {
        let base = self.client.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.client.anon_key()
        )
    }
}

fn channel_topic() -> String {
    format!("realtime:public:{}", tables::GROUPS)
}

fn join_message(access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "topic": channel_topic(),
        "event": "phx_join",
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": tables::GROUPS }
                ]
            },
            "access_token": access_token
        }
    })
}

fn heartbeat_message(seq: u64) -> serde_json::Value {
    serde_json::json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": format!("hb-{seq}")
    })
}

/// One Phoenix frame.
#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// What a decoded frame means for the subscriber.
#[derive(Debug, PartialEq)]
enum Decoded {
    JoinReply { ok: bool, detail: String },
    Event(RealtimeEvent),
    Ignore,
}

fn decode_frame(text: &str) -> Decoded {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable realtime frame");
            return Decoded::Ignore;
        }
    };

    if frame.topic != channel_topic() {
        return Decoded::Ignore;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            Decoded::JoinReply {
                ok: status == Some("ok"),
                detail: frame
                    .payload
                    .get("response")
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
            }
        }
        "phx_error" => Decoded::Event(RealtimeEvent::Closed("channel error".to_string())),
        "phx_close" => Decoded::Event(RealtimeEvent::Closed("channel closed".to_string())),
        "system" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("error") {
                let message = frame
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("system error");
                Decoded::Event(RealtimeEvent::Closed(message.to_string()))
            } else {
                Decoded::Ignore
            }
        }
        "postgres_changes" => frame
            .payload
            .get("data")
            .and_then(decode_change)
            .map(|change| Decoded::Event(RealtimeEvent::Change(change)))
            .unwrap_or(Decoded::Ignore),
        // Older servers send the change type as the event name.
        "INSERT" | "UPDATE" | "DELETE" => decode_change(&frame.payload)
            .map(|change| Decoded::Event(RealtimeEvent::Change(change)))
            .unwrap_or(Decoded::Ignore),
        _ => Decoded::Ignore,
    }
}

fn decode_change(data: &serde_json::Value) -> Option<GroupChange> {
    let row = |key: &str| -> GroupRow {
        data.get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    };

    match data.get("type").and_then(|t| t.as_str())? {
        "INSERT" => Some(GroupChange::Insert(row("record"))),
        "UPDATE" => Some(GroupChange::Update {
            old: row("old_record"),
            new: row("record"),
        }),
        "DELETE" => Some(GroupChange::Delete {
            old: row("old_record"),
        }),
        other => {
            tracing::debug!(change_type = other, "Unknown realtime change type");
            None
        }
    }
}

#[async_trait]
impl RealtimeApi for SupabaseRealtime {
    async fn subscribe_groups(&self) -> Result<mpsc::Receiver<RealtimeEvent>> {
        let url = self.socket_url();
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| AppError::Realtime(format!("connect failed: {e}")))?;
        let (mut write, mut read) = stream.split();

        let token = self
            .client
            .access_token()
            .unwrap_or_else(|| self.client.anon_key().to_string());
        write
            .send(Message::Text(join_message(&token).to_string().into()))
            .await
            .map_err(|e| AppError::Realtime(format!("join send failed: {e}")))?;

        // Wait for the join acknowledgement before handing out the receiver.
        let joined = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(message) = read.next().await {
                let message =
                    message.map_err(|e| AppError::Realtime(format!("read failed: {e}")))?;
                if let Message::Text(text) = message {
                    if let Decoded::JoinReply { ok, detail } = decode_frame(text.as_str()) {
                        return if ok {
                            Ok(())
                        } else {
                            Err(AppError::Realtime(format!("join rejected: {detail}")))
                        };
                    }
                }
            }
            Err(AppError::Realtime("socket closed before join reply".to_string()))
        })
        .await
        .map_err(|_| AppError::Timeout)?;
        joined?;

        tracing::info!(topic = %channel_topic(), "Realtime channel joined");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut seq = 0u64;

            let reason = loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        seq += 1;
                        let frame = heartbeat_message(seq).to_string();
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            break format!("heartbeat failed: {e}");
                        }
                    }
                    _ = tx.closed() => {
                        // Subscriber went away; close politely.
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => match decode_frame(text.as_str()) {
                            Decoded::Event(RealtimeEvent::Closed(reason)) => break reason,
                            Decoded::Event(event) => {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Decoded::JoinReply { .. } | Decoded::Ignore => {}
                        },
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.as_str().to_string())
                                .unwrap_or_else(|| "socket closed".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("read failed: {e}"),
                        None => break "socket closed".to_string(),
                    },
                }
            };

            tracing::warn!(reason = %reason, "Realtime channel ended");
            let _ = tx.send(RealtimeEvent::Closed(reason)).await;
        });

        Ok(rx)
    }
}
