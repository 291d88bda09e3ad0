use std::{sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use tokio::sync::{mpsc, watch};

use crate::server::core::{ping_period, ConnectionControl, RuntimeConfig};

/// Drains one connection's outbox to the wire. The single writer for its
/// socket half: messages already queued behind the first one are folded
/// into the same text frame (newline-separated) so a burst of replies
/// collapses into one transport write. A keepalive ping goes out when
/// the outbox stays idle, and the registry's close signal or any write
/// failure terminates the pump.
pub(crate) async fn run(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<String>,
    mut control: watch::Receiver<ConnectionControl>,
    runtime: Arc<RuntimeConfig>,
) {
    let mut ping = tokio::time::interval(ping_period(runtime.read_deadline));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Cleared once the registry drops its control sender; the branch is
    // disabled so the select does not spin on a dead channel.
    let mut control_open = true;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if write_with_deadline(
                    &mut sink,
                    Message::Ping(Vec::new().into()),
                    runtime.write_deadline,
                )
                .await
                .is_err()
                {
                    break;
                }
            }
            control_change = control.changed(), if control_open => {
                match control_change {
                    Ok(()) if *control.borrow() == ConnectionControl::Close => {
                        let _ = write_with_deadline(
                            &mut sink,
                            Message::Close(Some(CloseFrame {
                                code: 1008,
                                reason: "slow_consumer".into(),
                            })),
                            runtime.write_deadline,
                        )
                        .await;
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => control_open = false,
                }
            }
            maybe_payload = outbox.recv() => {
                match maybe_payload {
                    Some(payload) => {
                        let mut frame = payload;
                        while let Ok(next) = outbox.try_recv() {
                            frame.push('\n');
                            frame.push_str(&next);
                        }
                        if write_with_deadline(
                            &mut sink,
                            Message::Text(frame.into()),
                            runtime.write_deadline,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    None => {
                        // Outbox closed by the read side; complete the
                        // close handshake.
                        let _ = write_with_deadline(
                            &mut sink,
                            Message::Close(None),
                            runtime.write_deadline,
                        )
                        .await;
                        break;
                    }
                }
            }
        }
    }
}

async fn write_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}
