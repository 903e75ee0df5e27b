//! Cloud WebSocket client with reconnect.
//!
//! Dials `/ws/device/{hub_id}` on the cloud edge, pumps inbound frames
//! into [`LocalHub::handle_message`], and sends application-level pings
//! on an interval. Any failure tears the connection down and the outer
//! loop redials after the configured delay until cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::constants::{WS_IDLE_READ_TIMEOUT_SECS, WS_WRITE_DEADLINE_SECS};
use crate::hub::LocalHub;
use crate::protocol::WsMessage;
use crate::utils::now_epoch_secs;

/// Runs the cloud connection until the hub's cancellation token fires.
pub async fn run(hub: Arc<LocalHub>) {
    let cancel = hub.cancel_token();
    let endpoint = hub.config().device_endpoint();
    let reconnect_delay = hub.config().ws_reconnect_delay;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        log::info!("[Cloud] dialing {}", endpoint);
        match connect_async(&endpoint).await {
            Ok((stream, _)) => {
                log::info!("[Cloud] connected");
                run_connection(&hub, stream).await;
                // Dropping the connection mid-playback must not leave
                // actuators running on a stale timeline
                hub.stop_all();
                log::warn!("[Cloud] connection lost");
            }
            Err(e) => {
                log::warn!("[Cloud] dial failed: {}", e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    log::info!("[Cloud] client stopped");
}

async fn run_connection<S>(hub: &Arc<LocalHub>, stream: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let cancel = hub.cancel_token();
    let (mut sender, mut receiver) = stream.split();
    let write_deadline = Duration::from_secs(WS_WRITE_DEADLINE_SECS);
    let idle_timeout = Duration::from_secs(WS_IDLE_READ_TIMEOUT_SECS);
    let mut last_read = Instant::now();

    let mut ping_interval = tokio::time::interval(hub.config().ws_ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick would ping before the server finishes
    // the connection_established exchange
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            inbound = receiver.next() => {
                last_read = Instant::now();
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match WsMessage::parse(&text) {
                            Ok(message) => {
                                if let Some(reply) = hub.handle_message(&message) {
                                    if !send_frame(&mut sender, &reply, write_deadline).await {
                                        break;
                                    }
                                }
                            }
                            Err(e) => log::warn!("[Cloud] unparseable frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }

            _ = ping_interval.tick() => {
                if last_read.elapsed() > idle_timeout {
                    log::warn!("[Cloud] idle read timeout, reconnecting");
                    break;
                }
                let ping = WsMessage::Ping {
                    timestamp: Some(now_epoch_secs()),
                    device_id: Some(hub.config().device_hub_id.clone()),
                };
                if !send_frame(&mut sender, &ping, write_deadline).await {
                    break;
                }
            }
        }
    }
}

/// Sends one frame under the write deadline. False means the
/// connection is done.
async fn send_frame<S>(
    sender: &mut futures::stream::SplitSink<tokio_tungstenite::WebSocketStream<S>, Message>,
    message: &WsMessage,
    deadline: Duration,
) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let frame = Message::Text(message.to_json().into());
    match tokio::time::timeout(deadline, sender.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::warn!("[Cloud] write failed: {}", e);
            false
        }
        Err(_) => {
            log::warn!("[Cloud] write deadline hit");
            false
        }
    }
}
