//! ClientEndpoint (spec.md §4.2): one read loop and one write loop per
//! WebSocket connection, talking to the owning `Session` only through
//! `tmi_collab::ParticipantSink` and `SessionHandle::dispatch`/`leave`.
//! Ownership: the `Session` holds the sink for the duration of membership
//! (spec.md §9); this module never retains a reference back to it beyond
//! what it needs to call `leave` when the socket closes.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use tmi_collab::DisconnectReason;
use tmi_collab::Error as CollabError;
use tmi_collab::ParticipantSink;
use tmi_collab::SendError;
use tmi_collab::SessionHandle;
use tmi_protocol::SessionLimits;
use tmi_protocol::UserId;
use tmi_wire::ErrorPayload;
use tmi_wire::InboundMessage;
use tmi_wire::OutboundMessage;
use tmi_wire::Severity;

type Outbound = (Option<UserId>, OutboundMessage);
type ControlMsg = (DisconnectReason, Option<OutboundMessage>);

/// The `ParticipantSink` implementation a live WebSocket hands to its
/// `Session`. Non-blocking by construction (spec.md §5): `try_send` never
/// awaits, it just pushes onto the bounded channel the write loop drains.
pub struct WsParticipantSink {
    messages_tx: mpsc::Sender<Outbound>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl ParticipantSink for WsParticipantSink {
    fn try_send(&self, user_for_envelope: Option<UserId>, message: OutboundMessage) -> Result<(), SendError> {
        match self.messages_tx.try_send((user_for_envelope, message)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    fn disconnect(&self, reason: DisconnectReason, final_message: Option<OutboundMessage>) {
        let _ = self.control_tx.send((reason, final_message));
    }
}

/// Spawn the read loop, write loop, and heartbeat for one connection, and
/// drive the whole endpoint to completion. Returns once both loops have
/// wound down and the participant has left the session.
pub async fn run(socket: WebSocket, session: SessionHandle, user: UserId, limits: SessionLimits) {
    let (ws_sender, ws_receiver) = socket.split();
    let (messages_tx, messages_rx) = mpsc::channel::<Outbound>(limits.outbound_queue_capacity);
    let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlMsg>();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();

    let sink: Arc<dyn ParticipantSink> = Arc::new(WsParticipantSink {
        messages_tx: messages_tx.clone(),
        control_tx,
    });

    if let Err(err) = session.join(user.clone(), sink).await {
        info!(%user, error = %err, "websocket join rejected at the session");
        return;
    }

    let mut write_handle = tokio::spawn(write_loop(ws_sender, messages_rx, control_rx, pong_rx, limits));
    let mut read_handle = tokio::spawn(read_loop(
        ws_receiver,
        session.clone(),
        user.clone(),
        messages_tx,
        pong_tx,
        limits,
    ));

    tokio::select! {
        _ = &mut read_handle => write_handle.abort(),
        _ = &mut write_handle => read_handle.abort(),
    }

    session.leave(user).await;
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    session: SessionHandle,
    user: UserId,
    messages_tx: mpsc::Sender<Outbound>,
    pong_tx: mpsc::UnboundedSender<()>,
    limits: SessionLimits,
) {
    let mut violations: VecDeque<chrono::DateTime<Utc>> = VecDeque::new();

    while let Some(next) = receiver.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%user, error = %err, "websocket read error, closing endpoint");
                break;
            }
        };

        let bytes = match frame {
            Message::Close(_) => break,
            Message::Pong(_) => {
                let _ = pong_tx.send(());
                continue;
            }
            // axum's underlying transport answers Pings transparently; the
            // application never needs to reply by hand.
            Message::Ping(_) => continue,
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
        };

        match InboundMessage::decode(&bytes, limits.message_byte_budget) {
            Ok(message) => {
                match tokio::time::timeout(limits.inbox_send_grace_period, session.dispatch(user.clone(), message))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(CollabError::SessionGone)) => break,
                    Ok(Err(err)) => warn!(%user, error = %err, "session rejected dispatched message"),
                    Err(_) => {
                        warn!(%user, "session inbox stayed full past the grace period, closing endpoint");
                        break;
                    }
                }
            }
            Err(codec_err) => {
                let fatal = codec_err.severity() == Severity::ImmediatelyFatal;
                let _ = messages_tx.try_send((
                    None,
                    OutboundMessage::Error(ErrorPayload {
                        code: codec_err.code().to_string(),
                        message: codec_err.to_string(),
                        fatal,
                    }),
                ));
                if fatal || protocol_violation_exceeded(&mut violations, limits) {
                    warn!(%user, error = %codec_err, "closing endpoint after a fatal protocol violation");
                    break;
                }
            }
        }
    }

    debug!(%user, "read loop finished");
}

/// Tracks `error.kind == protocol` rejections against spec.md §7's "three
/// within 10s is fatal" rule. `limits.protocol_violation_limit` within
/// `limits.protocol_violation_window`.
fn protocol_violation_exceeded(violations: &mut VecDeque<chrono::DateTime<Utc>>, limits: SessionLimits) -> bool {
    let now = Utc::now();
    violations.push_back(now);
    while let Some(front) = violations.front() {
        let age = now.signed_duration_since(*front).to_std().unwrap_or_default();
        if age > limits.protocol_violation_window {
            violations.pop_front();
        } else {
            break;
        }
    }
    violations.len() as u32 >= limits.protocol_violation_limit
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut messages_rx: mpsc::Receiver<Outbound>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    limits: SessionLimits,
) {
    let mut heartbeat = tokio::time::interval(limits.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;
    let mut missed_pongs = 0u32;

    loop {
        tokio::select! {
            biased;

            Some((reason, final_message)) = control_rx.recv() => {
                debug!(?reason, "flushing and closing client endpoint");
                if let Some(message) = final_message {
                    let _ = send_one(&mut sender, None, message, limits).await;
                }
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            Some(()) = pong_rx.recv() => {
                awaiting_pong = false;
                missed_pongs = 0;
            }

            maybe = messages_rx.recv() => {
                match maybe {
                    Some((envelope_user, message)) => {
                        if send_one(&mut sender, envelope_user, message, limits).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    missed_pongs += 1;
                    if missed_pongs >= limits.missed_pongs_limit {
                        warn!(missed_pongs, "heartbeat missed too many times, closing endpoint");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
                awaiting_pong = true;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("write loop finished");
}

async fn send_one(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope_user: Option<UserId>,
    message: OutboundMessage,
    limits: SessionLimits,
) -> Result<(), ()> {
    let bytes = match message.encode(envelope_user) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to encode outbound message, dropping");
            return Ok(());
        }
    };
    let text = String::from_utf8(bytes).map_err(|_| ())?;
    tokio::time::timeout(limits.socket_write_timeout, sender.send(Message::Text(text)))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}
