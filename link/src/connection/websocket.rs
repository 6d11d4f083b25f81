//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Frames are JSON text messages. One pump task per connection moves frames
//! between the socket and the [`TransportLink`] channels, sends keepalive
//! pings and declares the connection dead when the server stops answering.

use crate::{
    connection::{CloseReason, Transport, TransportEvent, TransportLink},
    error::{LinkError, Result},
    models::{ClientFrame, ServerFrame},
    timeouts::HubTimeouts,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    error::Error as WsError,
    http::{header::AUTHORIZATION, HeaderValue, Request},
    protocol::Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Maximum text message size (64 MiB).
const MAX_WS_TEXT_MESSAGE_BYTES: usize = 64 << 20;

/// Capacity of the per-connection frame channels.
const LINK_CHANNEL_CAPACITY: usize = 256;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Default [`Transport`]: JSON frames over WebSocket with a bearer token.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    timeouts: HubTimeouts,
    debug: bool,
}

impl WsTransport {
    pub fn new(timeouts: HubTimeouts) -> Self {
        Self {
            timeouts,
            debug: false,
        }
    }

    /// Log every frame sent and received.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str, token: &str) -> Result<TransportLink> {
        let url = resolve_ws_url(endpoint)?;
        log::debug!("[pulse-link] Establishing WebSocket connection to {}", url);

        let mut request = url.as_str().into_client_request().map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to build WebSocket request: {}", e))
        })?;
        apply_bearer_header(&mut request, token)?;

        let ws_stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                let body_text = response
                    .into_body()
                    .as_ref()
                    .and_then(|b| {
                        if b.is_empty() {
                            None
                        } else {
                            Some(String::from_utf8_lossy(b).into_owned())
                        }
                    })
                    .unwrap_or_default();
                return Err(handshake_status_error(status, &body_text));
            },
            Err(e) => {
                return Err(LinkError::NetworkError(format!("Connection failed: {}", e)));
            },
        };
        log::info!("[pulse-link] WebSocket connected to {}", url);

        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let config = PumpConfig {
            keepalive: jitter_keepalive_interval(self.timeouts.keepalive_interval, endpoint),
            pong_timeout: self.timeouts.pong_timeout,
            debug: self.debug,
        };
        tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx, config));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Normalize a hub endpoint into a WebSocket URL.
///
/// `http(s)` maps to `ws(s)`; the path and query are kept as given.
pub fn resolve_ws_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint.trim()).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid endpoint '{}': {}", endpoint, e))
    })?;

    if url.host_str().is_none() {
        return Err(LinkError::ConfigurationError(
            "endpoint must include a host".to_string(),
        ));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(LinkError::ConfigurationError(
            "endpoint must not include username/password credentials".to_string(),
        ));
    }

    if url.fragment().is_some() {
        return Err(LinkError::ConfigurationError(
            "endpoint must not include a fragment".to_string(),
        ));
    }

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported endpoint scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    url.set_scheme(ws_scheme).map_err(|_| {
        LinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;

    Ok(url)
}

fn apply_bearer_header(request: &mut Request<()>, token: &str) -> Result<()> {
    let value = format!("Bearer {}", token);
    let header_value = HeaderValue::from_str(&value).map_err(|e| {
        LinkError::AuthenticationError(format!(
            "Invalid access token for Authorization header: {}",
            e
        ))
    })?;
    request.headers_mut().insert(AUTHORIZATION, header_value);
    Ok(())
}

fn handshake_status_error(status: u16, body_text: &str) -> LinkError {
    match status {
        401 => LinkError::AuthenticationError(
            "Unauthorized: push endpoint requires valid credentials".to_string(),
        ),
        403 => LinkError::AuthenticationError(
            "Forbidden: access to push endpoint denied".to_string(),
        ),
        code => {
            if body_text.is_empty() {
                LinkError::NetworkError(format!("WebSocket HTTP error: {}", code))
            } else {
                LinkError::NetworkError(format!("WebSocket HTTP error {}: {}", code, body_text))
            }
        },
    }
}

/// Spread keepalive pings across connections to avoid synchronized bursts.
///
/// The jitter is derived from `key`, so reconnecting to the same endpoint
/// keeps the same phase.
fn jitter_keepalive_interval(base: Duration, key: &str) -> Duration {
    if base.is_zero() {
        return base;
    }

    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    // +/-20% jitter window.
    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };
    Duration::from_millis(jittered_ms)
}

struct PumpConfig {
    keepalive: Duration,
    pong_timeout: Duration,
    debug: bool,
}

async fn pump(
    mut ws: WsStream,
    mut outbound: mpsc::Receiver<ClientFrame>,
    inbound: mpsc::Sender<TransportEvent>,
    config: PumpConfig,
) {
    let has_keepalive = !config.keepalive.is_zero();
    let keepalive_dur = if has_keepalive {
        config.keepalive
    } else {
        FAR_FUTURE
    };
    let has_pong_timeout = has_keepalive && !config.pong_timeout.is_zero();

    let mut idle_deadline = TokioInstant::now() + keepalive_dur;
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    let reason = loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);

        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                log::warn!(
                    "[pulse-link] Pong timeout ({:?}), server unresponsive",
                    config.pong_timeout,
                );
                break CloseReason::new(format!(
                    "Pong timeout ({:?}), server unresponsive",
                    config.pong_timeout,
                ));
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let payload = match serde_json::to_string(&frame) {
                            Ok(payload) => payload,
                            Err(e) => {
                                log::warn!("[pulse-link] Failed to serialize frame: {}", e);
                                continue;
                            },
                        };
                        if config.debug {
                            log::debug!("[pulse-link] -> {}", payload);
                        }
                        if let Err(e) = ws.send(Message::Text(payload.into())).await {
                            break CloseReason::new(format!("Failed to send frame: {}", e));
                        }
                    },
                    None => {
                        // Hub dropped the link.
                        let _ = ws.close(None).await;
                        return;
                    },
                }
            }

            _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    log::warn!("[pulse-link] Keepalive ping failed: {}", e);
                    break CloseReason::new(format!("Keepalive ping failed: {}", e));
                }
                if has_pong_timeout {
                    awaiting_pong = true;
                    pong_deadline = TokioInstant::now() + config.pong_timeout;
                }
                idle_deadline = TokioInstant::now() + keepalive_dur;
            }

            msg = ws.next() => {
                idle_deadline = TokioInstant::now() + keepalive_dur;
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                }

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str();
                        if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                            log::warn!("[pulse-link] Text message too large ({} bytes)", text.len());
                            continue;
                        }
                        if config.debug {
                            log::debug!("[pulse-link] <- {}", text);
                        }
                        match serde_json::from_str::<ServerFrame>(text) {
                            Ok(frame) => {
                                if inbound.send(TransportEvent::Frame(frame)).await.is_err() {
                                    let _ = ws.close(None).await;
                                    return;
                                }
                            },
                            Err(e) => log::warn!("[pulse-link] Failed to parse server frame: {}", e),
                        }
                    },
                    Some(Ok(Message::Binary(data))) => {
                        log::debug!("[pulse-link] Ignoring binary message ({} bytes)", data.len());
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => CloseReason::with_code(f.reason.to_string(), f.code.into()),
                            None => CloseReason::new("Server closed connection"),
                        };
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Pong(_))) => {
                        log::debug!("[pulse-link] Keepalive: received Pong");
                    },
                    Some(Ok(Message::Frame(_))) => {},
                    Some(Err(e)) => break CloseReason::new(format!("WebSocket error: {}", e)),
                    None => break CloseReason::new("WebSocket stream ended"),
                }
            }
        }
    };

    log::info!("[pulse-link] WebSocket closed: {}", reason);
    let _ = inbound.send(TransportEvent::Closed(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── resolve_ws_url ──────────────────────────────────────────────────

    #[test]
    fn test_http_schemes_map_to_ws() {
        assert_eq!(
            resolve_ws_url("http://localhost:5000/hubs/reasoning").unwrap().as_str(),
            "ws://localhost:5000/hubs/reasoning"
        );
        assert_eq!(
            resolve_ws_url("https://api.example.com/hubs/reasoning").unwrap().as_str(),
            "wss://api.example.com/hubs/reasoning"
        );
        assert_eq!(
            resolve_ws_url("  wss://api.example.com/hub?tenant=a ").unwrap().as_str(),
            "wss://api.example.com/hub?tenant=a"
        );
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!(resolve_ws_url("not a url").is_err());
        assert!(resolve_ws_url("ftp://example.com/hub").is_err());
        assert!(resolve_ws_url("https://user:pw@example.com/hub").is_err());
        assert!(resolve_ws_url("https://example.com/hub#frag").is_err());
    }

    // ── auth header ─────────────────────────────────────────────────────

    #[test]
    fn test_bearer_header_applied() {
        let mut request = "ws://localhost/hub".into_client_request().unwrap();
        apply_bearer_header(&mut request, "abc.def.ghi").unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc.def.ghi"
        );
    }

    #[test]
    fn test_bearer_header_rejects_control_characters() {
        let mut request = "ws://localhost/hub".into_client_request().unwrap();
        let err = apply_bearer_header(&mut request, "bad\ntoken").unwrap_err();
        assert!(err.is_auth_failure());
    }

    // ── handshake errors ────────────────────────────────────────────────

    #[test]
    fn test_handshake_status_classification() {
        assert!(handshake_status_error(401, "").is_auth_failure());
        assert!(handshake_status_error(403, "nope").is_auth_failure());

        let err = handshake_status_error(502, "bad gateway");
        assert!(!err.is_auth_failure());
        assert_eq!(
            err,
            LinkError::NetworkError("WebSocket HTTP error 502: bad gateway".to_string())
        );
    }

    // ── keepalive jitter ────────────────────────────────────────────────

    #[test]
    fn test_jitter_stays_within_window() {
        let base = Duration::from_secs(15);
        for key in ["ws://a/hub", "ws://b/hub", "wss://c/hub"] {
            let jittered = jitter_keepalive_interval(base, key);
            assert!(jittered >= Duration::from_secs(12), "{:?}", jittered);
            assert!(jittered <= Duration::from_secs(18), "{:?}", jittered);
            assert_eq!(jittered, jitter_keepalive_interval(base, key));
        }
        assert!(jitter_keepalive_interval(Duration::ZERO, "x").is_zero());
    }
}
