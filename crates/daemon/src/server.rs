// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::sync::Arc;
use std::time::Instant;

use tm_core::{CloseReason, ErrorKind, SessionId};
use tm_engine::{RuntimeError, SessionHandle, SlotStatus};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::lifecycle::DaemonRuntime;
use crate::protocol::{self, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Client frames buffered per subscription before the reader waits
const ACK_QUEUE: usize = 64;

/// State shared by every connection
pub struct ServerContext {
    pub runtime: DaemonRuntime,
    pub start_time: Instant,
    shutdown: watch::Sender<bool>,
}

impl ServerContext {
    pub fn new(runtime: DaemonRuntime) -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        let ctx = Self {
            runtime,
            start_time: Instant::now(),
            shutdown,
        };
        (ctx, rx)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Handle a single client connection
pub async fn handle_connection(
    ctx: Arc<ServerContext>,
    stream: UnixStream,
) -> Result<(), ServerError> {
    // Split stream for reading/writing
    let (mut reader, mut writer) = stream.into_split();

    // Read request with timeout
    let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("Request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before sending request");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to read request: {}", e);
            let response = Response::error(e.kind(), e.to_string());
            let _ = protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await;
            return Err(ServerError::Protocol(e));
        }
    };

    debug!("Received request: {:?}", request);

    if let Request::Subscribe { slot, publication } = request {
        return stream_changes(&ctx, reader, writer, &slot, &publication).await;
    }

    // Handle request
    let response = handle_request(&ctx, request).await;

    debug!("Sending response: {:?}", response);

    // Write response with timeout
    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
        .await
        .map_err(ServerError::Protocol)?;

    Ok(())
}

/// Handle a single request and return a response
pub async fn handle_request(ctx: &ServerContext, request: Request) -> Response {
    let runtime = &ctx.runtime;
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version } => {
            if version == PROTOCOL_VERSION {
                Response::Hello {
                    version: PROTOCOL_VERSION.to_string(),
                }
            } else {
                Response::error(
                    ErrorKind::InvalidArgument,
                    format!(
                        "protocol version {} is not supported (daemon speaks {})",
                        version, PROTOCOL_VERSION
                    ),
                )
            }
        }

        Request::Status => Response::Status {
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            snapshot: Box::new(runtime.snapshot()),
        },

        Request::CreateSlot { name, kind } => {
            respond(runtime.create_slot(&name, kind), |slot| Response::Slot { slot })
        }
        Request::DropSlot { name } => {
            respond(runtime.drop_slot(&name), |slot| Response::Slot { slot })
        }
        Request::ListSlots => {
            let last_seq = runtime.store().last_seq();
            let slots = runtime
                .list_slots()
                .iter()
                .map(|slot| SlotStatus::from_slot(slot, last_seq))
                .collect();
            Response::Slots { slots }
        }

        Request::CreatePublication { publication } => {
            respond(runtime.create_publication(publication), |p| {
                Response::Publication {
                    publication: (*p).clone(),
                }
            })
        }
        Request::AlterPublication { publication } => {
            respond(runtime.alter_publication(publication), |p| {
                Response::Publication {
                    publication: (*p).clone(),
                }
            })
        }
        Request::DropPublication { name } => {
            respond(runtime.drop_publication(&name), |()| Response::Ok)
        }
        Request::ListPublications => Response::Publications {
            publications: runtime
                .list_publications()
                .iter()
                .map(|p| (**p).clone())
                .collect(),
        },

        Request::Append {
            xid,
            changes,
            commit: true,
        } => respond(runtime.append_transaction(xid, changes), |(xid, seq)| {
            Response::Appended {
                xid,
                seq,
                committed: true,
            }
        }),
        Request::Append {
            xid,
            changes,
            commit: false,
        } => {
            let xid = xid.unwrap_or_else(|| runtime.allocate_xid());
            respond(runtime.append_open(xid, changes), |seq| Response::Appended {
                xid,
                seq,
                committed: false,
            })
        }
        Request::Abort { xid } => respond(runtime.abort_transaction(xid), |seq| {
            Response::Aborted { xid, seq }
        }),

        Request::Subscribe { .. } => Response::error(
            ErrorKind::InvalidArgument,
            "subscribe must be the first frame on its own connection",
        ),
        Request::Ack { .. } => Response::error(
            ErrorKind::InvalidArgument,
            "ack is only valid on a subscription",
        ),

        Request::Shutdown => {
            ctx.request_shutdown();
            Response::ShuttingDown
        }
    }
}

fn respond<T>(result: Result<T, RuntimeError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => Response::error(e.kind(), e.to_string()),
    }
}

/// Serve a subscription: push `Changes` frames, apply `Ack` frames, and
/// finish with `Closed` once the session ends. The session is stopped
/// when the client goes away.
async fn stream_changes(
    ctx: &ServerContext,
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    slot: &str,
    publication: &str,
) -> Result<(), ServerError> {
    let (handle, mut batches) = match ctx.runtime.subscribe(slot, publication) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(slot, publication, error = %e, "subscription refused");
            let response = Response::error(e.kind(), e.to_string());
            protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
            return Ok(());
        }
    };
    let session = handle.id().clone();
    info!(%session, slot, publication, "subscription opened");

    let (frames_tx, mut frames) = mpsc::channel(ACK_QUEUE);
    let reader_task = tokio::spawn(read_frames(reader, frames_tx));

    let subscribed = Response::Subscribed {
        session: session.clone(),
    };
    let result = match protocol::write_response(&mut writer, &subscribed, DEFAULT_TIMEOUT).await {
        Ok(()) => pump(&handle, &mut batches, &mut frames, &mut writer).await,
        Err(e) => Err(e.into()),
    };

    reader_task.abort();
    end_subscription(ctx, &session).await;
    result
}

/// Stop the subscription's session and wait for its slot. A session that
/// already closed on its own may have been pruned; that is not an error.
async fn end_subscription(ctx: &ServerContext, session: &SessionId) -> Option<CloseReason> {
    match ctx.runtime.stop_session(session).await {
        Ok(reason) => {
            info!(%session, ?reason, "subscription closed");
            Some(reason)
        }
        Err(e) if e.kind() == ErrorKind::SessionNotFound => {
            debug!(%session, "subscription session already gone");
            None
        }
        Err(e) => {
            warn!(%session, error = %e, "failed to stop subscription session");
            None
        }
    }
}

async fn pump(
    handle: &SessionHandle,
    batches: &mut mpsc::Receiver<tm_core::ChangeBatch>,
    frames: &mut mpsc::Receiver<Request>,
    writer: &mut OwnedWriteHalf,
) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            batch = batches.recv() => match batch {
                Some(batch) => {
                    let commit = batch.commit_seq;
                    let response = Response::Changes { batch };
                    match protocol::write_response(writer, &response, DEFAULT_TIMEOUT).await {
                        Ok(()) => {}
                        Err(protocol::ProtocolError::FrameTooLarge(len)) => {
                            warn!(session = %handle.id(), %commit, len, "batch exceeds frame limit");
                            let reason = CloseReason::Failed {
                                kind: ErrorKind::DecodeCorruption,
                                message: format!(
                                    "batch at seq {} encodes to {} bytes, over the frame limit",
                                    commit, len
                                ),
                            };
                            let response = Response::Closed { reason };
                            protocol::write_response(writer, &response, DEFAULT_TIMEOUT).await?;
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                None => {
                    let reason = handle.closed().await;
                    let response = Response::Closed { reason };
                    protocol::write_response(writer, &response, DEFAULT_TIMEOUT).await?;
                    return Ok(());
                }
            },
            frame = frames.recv() => {
                let response = match frame {
                    Some(Request::Ack { seq }) => match handle.ack(seq) {
                        Ok(_) => continue,
                        Err(e) => Response::error(e.kind(), e.to_string()),
                    },
                    Some(other) => Response::error(
                        ErrorKind::InvalidArgument,
                        format!("only Ack frames are accepted on a subscription, got {:?}", other),
                    ),
                    None => {
                        debug!(session = %handle.id(), "subscriber disconnected");
                        return Ok(());
                    }
                };
                protocol::write_response(writer, &response, DEFAULT_TIMEOUT).await?;
            }
        }
    }
}

/// Forward client frames until the connection closes or sends garbage
async fn read_frames(mut reader: OwnedReadHalf, tx: mpsc::Sender<Request>) {
    loop {
        let frame = match protocol::read_message(&mut reader).await {
            Ok(bytes) => protocol::decode::<Request>(&bytes),
            Err(e) => Err(e),
        };
        match frame {
            Ok(request) => {
                if tx.send(request).await.is_err() {
                    return;
                }
            }
            Err(protocol::ProtocolError::ConnectionClosed) => return,
            Err(e) => {
                warn!(error = %e, "dropping subscription after unreadable frame");
                return;
            }
        }
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
