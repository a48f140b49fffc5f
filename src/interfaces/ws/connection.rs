//! Per-connection gateway loop
//!
//! Owns one charger socket from handshake to teardown: path and
//! subprotocol checks in the upgrade callback, asynchronous admission
//! (identity + cluster claim) with a bounded pre-admission frame queue,
//! then the serialized receive loop feeding the message engine.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::negotiator;
use super::path::{self, PathError};
use crate::application::commands::RequestTracker;
use crate::application::{EventPublisher, MessageEngine};
use crate::auth::{Authenticator, ClientHello, FloodControl, PeerCertificate};
use crate::domain::{ChargerIdentity, ConnectionMeta, OcppVersion};
use crate::session::directory::ClaimRequest;
use crate::session::{
    ClaimStatus, ForceDisconnect, Outbound, SessionControl, SessionDirectory,
    SharedSessionRegistry,
};
use crate::support::{AdmissionReject, Shutdown};

/// Inbound frame limits for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    pub max_payload_bytes: usize,
    pub pending_message_limit: usize,
}

/// Everything a connection task needs, shared across all connections.
pub struct ConnectionDeps {
    pub engine: Arc<MessageEngine>,
    pub registry: SharedSessionRegistry,
    pub directory: Arc<SessionDirectory>,
    pub control: Arc<SessionControl>,
    pub authenticator: Arc<Authenticator>,
    pub flood: Arc<FloodControl>,
    pub tracker: Arc<RequestTracker>,
    pub events: EventPublisher,
    pub limits: ConnectionLimits,
    pub shutdown: Shutdown,
}

// Values captured inside the synchronous handshake callback.
struct HandshakeOutcome {
    version: OcppVersion,
    charge_point_id: String,
    hello: ClientHello,
}

enum HandshakeReject {
    Path(PathError),
    Subprotocol,
}

/// Handle one accepted TCP connection end to end.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, deps: Arc<ConnectionDeps>) {
    let mut outcome: Option<HandshakeOutcome> = None;
    let mut reject: Option<HandshakeReject> = None;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let request_path = request.uri().path().to_string();

        let (version, charge_point_id) = match path::parse_path(&request_path) {
            Ok(parsed) => parsed,
            Err(err) => {
                reject = Some(HandshakeReject::Path(err));
                return Err(http_reject(400, "invalid path"));
            }
        };

        let offered = header_str(request, "Sec-WebSocket-Protocol");
        let Some(accepted) = negotiator::negotiate(version, offered.as_deref()) else {
            reject = Some(HandshakeReject::Subprotocol);
            return Err(http_reject(400, "unsupported subprotocol"));
        };
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            accepted.parse().expect("static subprotocol value"),
        );

        outcome = Some(HandshakeOutcome {
            version,
            charge_point_id,
            hello: ClientHello {
                forwarded_for: header_str(request, "X-Forwarded-For"),
                forwarded: header_str(request, "Forwarded"),
                authorization: header_str(request, "Authorization"),
                x_api_key: header_str(request, "X-Api-Key"),
                peer_certificate: peer_certificate_from_headers(request),
            },
        });
        Ok(response)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            match reject {
                Some(HandshakeReject::Path(PathError::Suspicious)) => {
                    metrics::counter!("ocpp_rejected_connections_total", "reason" => "suspicious")
                        .increment(1);
                    if deps.flood.should_log("suspicious", &addr.ip().to_string()).await {
                        warn!(%addr, "Rejected suspicious connection path");
                    }
                }
                Some(HandshakeReject::Path(PathError::Invalid)) => {
                    metrics::counter!("ocpp_rejected_connections_total", "reason" => "path")
                        .increment(1);
                    if deps.flood.should_log("suspicious", &addr.ip().to_string()).await {
                        warn!(%addr, "Rejected invalid connection path");
                    }
                }
                Some(HandshakeReject::Subprotocol) => {
                    metrics::counter!("ocpp_rejected_connections_total", "reason" => "subprotocol")
                        .increment(1);
                    debug!(%addr, "Rejected handshake without acceptable subprotocol");
                }
                None => debug!(%addr, %err, "WebSocket handshake failed"),
            }
            return;
        }
    };

    let Some(HandshakeOutcome {
        version,
        charge_point_id,
        hello,
    }) = outcome
    else {
        // The handshake succeeded without capturing context; nothing safe to do.
        error!(%addr, "Handshake state missing after upgrade");
        return;
    };

    info!(
        %addr,
        charge_point_id = charge_point_id.as_str(),
        %version,
        "WebSocket connection upgraded"
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Writer task: drains the outbound channel; a Close request ends it.
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    // ── Admission with bounded pre-admission queue ─────────
    let admission = admit(
        deps.clone(),
        &charge_point_id,
        version,
        addr,
        &hello,
    );
    tokio::pin!(admission);

    let mut queued: Vec<String> = Vec::new();
    let admitted = loop {
        tokio::select! {
            result = &mut admission => break Some(result),
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > deps.limits.max_payload_bytes {
                            let _ = tx.send(Outbound::Close {
                                code: 1009,
                                reason: "payload too large".into(),
                            });
                            break None;
                        }
                        if queued.len() >= deps.limits.pending_message_limit {
                            warn!(
                                charge_point_id = charge_point_id.as_str(),
                                "Pre-admission queue overflow"
                            );
                            let _ = tx.send(Outbound::Close {
                                code: AdmissionReject::QueueOverflow.close_code(),
                                reason: "back-pressure".into(),
                            });
                            break None;
                        }
                        queued.push(text);
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(charge_point_id = charge_point_id.as_str(), %err, "Socket error during admission");
                        break None;
                    }
                }
            }
        }
    };

    let meta = match admitted {
        Some(Ok(meta)) => meta,
        Some(Err(rejection)) => {
            let _ = tx.send(Outbound::Close {
                code: rejection.close_code(),
                reason: rejection.to_string(),
            });
            drop(tx);
            let _ = writer.await;
            return;
        }
        // Socket went away (or overflowed) before admission finished.
        None => {
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    deps.registry.register(meta.clone(), tx.clone());
    let session_started = deps
        .events
        .envelope(
            "SessionStarted",
            serde_json::json!({
                "nodeId": deps.events.node_id(),
                "epoch": meta.session_epoch,
                "remoteAddr": addr.to_string(),
            }),
        )
        .with_charge_point(meta.charge_point_id.clone())
        .with_station(meta.station_id.clone())
        .with_tenant(meta.tenant_id.clone())
        .with_version(meta.ocpp_version);
    deps.events.session_event(session_started).await;

    // Frames that raced the admission are replayed in arrival order.
    let mut open = true;
    for text in queued.drain(..) {
        if !process_frame(&deps, &meta, &tx, text).await {
            open = false;
            break;
        }
    }

    // ── Main receive loop: strictly serialized per charger ──
    let shutdown_wait = deps.shutdown.triggered();
    tokio::pin!(shutdown_wait);

    while open {
        tokio::select! {
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if !process_frame(&deps, &meta, &tx, text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(data))) => {
                        debug!(
                            charge_point_id = meta.charge_point_id.as_str(),
                            bytes = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(charge_point_id = meta.charge_point_id.as_str(), ?frame, "Close frame received");
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(err)) => {
                        debug!(charge_point_id = meta.charge_point_id.as_str(), %err, "Socket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown_wait => {
                info!(charge_point_id = meta.charge_point_id.as_str(), "Closing connection for shutdown");
                let _ = tx.send(Outbound::Close { code: 1001, reason: "server shutting down".into() });
                break;
            }
        }
    }

    // ── Teardown ───────────────────────────────────────────
    // Only the connection that still owns the registry entry cleans up;
    // a replaced socket must not tear down its successor's state.
    if deps
        .registry
        .unregister(&meta.charge_point_id, &meta.connection_id)
    {
        deps.tracker.drop_pending_for(&meta.charge_point_id);
        if let Err(err) = deps.directory.unregister(&meta.charge_point_id).await {
            debug!(charge_point_id = meta.charge_point_id.as_str(), %err, "Session unregister failed");
        }
        let session_ended = deps
            .events
            .envelope(
                "SessionEnded",
                serde_json::json!({
                    "nodeId": deps.events.node_id(),
                    "epoch": meta.session_epoch,
                }),
            )
            .with_charge_point(meta.charge_point_id.clone())
            .with_station(meta.station_id.clone())
            .with_tenant(meta.tenant_id.clone())
            .with_version(meta.ocpp_version);
        deps.events.session_event(session_ended).await;
    }

    // The writer drains once every sender clone is gone.
    drop(tx);
    let _ = writer.await;
    info!(charge_point_id = meta.charge_point_id.as_str(), "Disconnected");
}

/// One inbound text frame. Returns `false` when the connection must close.
async fn process_frame(
    deps: &Arc<ConnectionDeps>,
    meta: &ConnectionMeta,
    tx: &mpsc::UnboundedSender<Outbound>,
    text: String,
) -> bool {
    if text.len() > deps.limits.max_payload_bytes {
        warn!(
            charge_point_id = meta.charge_point_id.as_str(),
            bytes = text.len(),
            "Frame exceeds payload limit"
        );
        let _ = tx.send(Outbound::Close {
            code: 1009,
            reason: "payload too large".into(),
        });
        return false;
    }

    deps.registry.touch(&meta.charge_point_id);
    if let Err(err) = deps.directory.touch(&meta.charge_point_id).await {
        debug!(charge_point_id = meta.charge_point_id.as_str(), %err, "Session touch failed");
    }

    if let Some(reply) = deps.engine.handle_text(meta, &text).await {
        if tx.send(Outbound::Text(reply)).is_err() {
            return false;
        }
    }
    true
}

/// Identity check plus cluster claim; a takeover notifies the loser.
async fn admit(
    deps: Arc<ConnectionDeps>,
    charge_point_id: &str,
    version: OcppVersion,
    addr: SocketAddr,
    hello: &ClientHello,
) -> Result<ConnectionMeta, AdmissionReject> {
    let identity: ChargerIdentity = deps
        .authenticator
        .authenticate(charge_point_id, version, addr, hello)
        .await
        .map_err(|_| AdmissionReject::Unauthenticated)?;

    let claim = deps
        .directory
        .claim(ClaimRequest {
            charge_point_id: charge_point_id.to_string(),
            ocpp_version: version,
            station_id: identity.station_id.clone(),
            tenant_id: identity.tenant_id.clone(),
        })
        .await
        .map_err(|err| {
            warn!(charge_point_id, %err, "Session claim failed");
            AdmissionReject::DirectoryUnavailable
        })?;

    match claim.status {
        ClaimStatus::Denied => return Err(AdmissionReject::AlreadyConnected),
        ClaimStatus::Takeover => {
            if let Some(previous_owner) = claim.previous_owner_node_id.as_deref() {
                let message = ForceDisconnect {
                    charge_point_id: charge_point_id.to_string(),
                    new_epoch: claim.epoch,
                    new_owner_node_id: deps.events.node_id().to_string(),
                    reason: "stale session taken over".to_string(),
                };
                if let Err(err) = deps
                    .control
                    .publish_force_disconnect(previous_owner, message)
                    .await
                {
                    warn!(charge_point_id, previous_owner, %err, "Force-disconnect publish failed");
                }
            }
        }
        ClaimStatus::Fresh | ClaimStatus::Refreshed => {}
    }

    Ok(ConnectionMeta {
        connection_id: Uuid::new_v4().to_string(),
        charge_point_id: charge_point_id.to_string(),
        ocpp_version: version,
        station_id: identity.station_id,
        tenant_id: identity.tenant_id,
        session_epoch: claim.epoch,
        ip: addr.ip(),
    })
}

fn http_reject(status: u16, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() =
        tokio_tungstenite::tungstenite::http::StatusCode::from_u16(status)
            .unwrap_or(tokio_tungstenite::tungstenite::http::StatusCode::BAD_REQUEST);
    response
}

fn header_str(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// TLS terminates ahead of the gateway; the terminator forwards the verified
// peer certificate's identity material in headers.
fn peer_certificate_from_headers(request: &Request) -> Option<PeerCertificate> {
    let fingerprint = header_str(request, "X-Client-Cert-Fingerprint")?;
    let not_before = parse_header_time(request, "X-Client-Cert-Not-Before")?;
    let not_after = parse_header_time(request, "X-Client-Cert-Not-After")?;

    Some(PeerCertificate {
        fingerprint,
        subject_common_name: header_str(request, "X-Client-Cert-Subject-CN"),
        subject_alt_names: header_str(request, "X-Client-Cert-SAN")
            .map(|sans| sans.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
        serial_number: header_str(request, "X-Client-Cert-Serial"),
        not_before,
        not_after,
    })
}

fn parse_header_time(request: &Request, name: &str) -> Option<DateTime<Utc>> {
    header_str(request, name)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}
