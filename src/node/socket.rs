//! Cliente del protocolo de socket persistente de un nodo.
//!
//! Un task por nodo mantiene la conexión viva: intenta resume dentro de la
//! ventana de gracia cuando hay token de sesión previo, y ante un cierre
//! inesperado reconecta con backoff exponencial (techo configurable,
//! reintentos ilimitados) hasta que el token de cancelación lo detenga.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::config::LinkOptions;
use crate::error::Result;
use crate::events::EndReason;
use crate::node::{Node, NodeState};
use crate::track::Track;

/// Heartbeat de posición/conexión que el nodo publica por player.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PlayerUpdateState {
    #[allow(dead_code)]
    pub time: i64,
    pub position: i64,
    pub connected: bool,
    pub ping: i64,
}

/// Evento de reproducción dirigido a un player concreto.
#[derive(Debug, Clone)]
pub(crate) enum NodeEvent {
    TrackStart { track: Track },
    TrackEnd { track: Track, reason: EndReason },
    TrackException { track: Option<Track>, message: String, severity: String, cause: String },
    TrackStuck { track: Option<Track>, threshold_ms: u64 },
    WebSocketClosed { code: u16, reason: String, by_remote: bool },
}

/// Tráfico entrante ya clasificado, rumbo al despachador del manager.
#[derive(Debug)]
pub(crate) enum NodeSignal {
    Ready { node: String, resumed: bool, session_reset: bool },
    Disconnected { node: String, code: Option<u16>, reason: String },
    PlayerUpdate { guild_id: u64, state: PlayerUpdateState },
    Event { guild_id: u64, event: NodeEvent },
}

/// Resultado de una sesión de socket; le dice al loop exterior qué hacer.
enum SessionOutcome {
    /// Cierre ordenado por cancelación
    Shutdown,
    /// Cierre inesperado; `established` indica si llegó a ver `ready`
    Reconnect { established: bool },
}

/// Lanza el loop de conexión del nodo. El task es dueño único de las
/// escrituras a estado/stats/sesión del nodo.
pub(crate) fn spawn(
    node: Arc<Node>,
    user_id: u64,
    options: Arc<LinkOptions>,
    signals: UnboundedSender<NodeSignal>,
) -> JoinHandle<()> {
    tokio::spawn(run(node, user_id, options, signals))
}

async fn run(
    node: Arc<Node>,
    user_id: u64,
    options: Arc<LinkOptions>,
    signals: UnboundedSender<NodeSignal>,
) {
    let mut attempt = 0u32;
    let ceiling = Duration::from_secs(options.reconnect_backoff_ceiling_secs);

    loop {
        match run_session(&node, user_id, &options, &signals).await {
            Ok(SessionOutcome::Shutdown) => {
                debug!("Socket del nodo '{}' detenido limpiamente", node.identifier());
                node.set_state(NodeState::Disconnected);
                return;
            }
            Ok(SessionOutcome::Reconnect { established }) => {
                node.set_state(NodeState::Closed);
                if established {
                    attempt = 0;
                }
            }
            Err(e) => {
                // Error de conexión (DNS, TLS, rechazo): también se reintenta
                node.set_state(NodeState::Closed);
                warn!("⚠️ Conexión al nodo '{}' falló: {}", node.identifier(), e);
                // Solo la primera falla tras un período sano se señaliza;
                // los reintentos siguientes no repiten la notificación
                if attempt == 0 {
                    let _ = signals.send(NodeSignal::Disconnected {
                        node: node.identifier().to_string(),
                        code: None,
                        reason: e.to_string(),
                    });
                }
            }
        }

        attempt += 1;
        let backoff = Duration::from_secs(1u64 << attempt.min(6).saturating_sub(1)).min(ceiling);
        debug!(
            "Reconectando al nodo '{}' en {:?} (intento {})",
            node.identifier(),
            backoff,
            attempt
        );
        tokio::select! {
            _ = node.cancel_token().cancelled() => {
                node.set_state(NodeState::Disconnected);
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Corre una sesión de socket completa hasta su cierre.
async fn run_session(
    node: &Arc<Node>,
    user_id: u64,
    options: &Arc<LinkOptions>,
    signals: &UnboundedSender<NodeSignal>,
) -> Result<SessionOutcome> {
    let resuming = options.auto_resume && node.config().resume && node.session_id().is_some();
    node.set_state(if resuming { NodeState::Resuming } else { NodeState::Connecting });

    let mut request = node.config().socket_url().into_client_request()?;
    {
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&node.config().password)
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "User-Id",
            HeaderValue::from_str(&user_id.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert(
            "Client-Name",
            HeaderValue::from_str(&options.client_name)
                .unwrap_or_else(|_| HeaderValue::from_static("open-link")),
        );
        if resuming {
            if let Some(session_id) = node.session_id() {
                if let Ok(value) = HeaderValue::from_str(&session_id) {
                    headers.insert("Session-Id", value);
                }
            }
        }
    }

    debug!("Conectando al socket del nodo '{}'", node.identifier());
    let (stream, _response) = connect_async(request).await?;
    let (_write, mut read) = stream.split();

    let mut established = false;

    loop {
        let msg = tokio::select! {
            _ = node.cancel_token().cancelled() => {
                return Ok(SessionOutcome::Shutdown);
            }
            msg = read.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_text(node, &text, resuming, options, signals, &mut established);
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(cf) => (Some(u16::from(cf.code)), cf.reason.to_string()),
                    None => (None, "sin motivo".to_string()),
                };
                info!(
                    "🔌 Socket del nodo '{}' cerrado: code={:?} reason='{}'",
                    node.identifier(),
                    code,
                    reason
                );
                let _ = signals.send(NodeSignal::Disconnected {
                    node: node.identifier().to_string(),
                    code,
                    reason,
                });
                return Ok(SessionOutcome::Reconnect { established });
            }
            Some(Ok(_)) => {} // ping/pong/binario: el transporte los maneja
            Some(Err(e)) => {
                warn!("⚠️ Error de lectura en el socket de '{}': {}", node.identifier(), e);
                let _ = signals.send(NodeSignal::Disconnected {
                    node: node.identifier().to_string(),
                    code: None,
                    reason: e.to_string(),
                });
                return Ok(SessionOutcome::Reconnect { established });
            }
            None => {
                debug!("Stream del nodo '{}' terminó sin frame de cierre", node.identifier());
                let _ = signals.send(NodeSignal::Disconnected {
                    node: node.identifier().to_string(),
                    code: None,
                    reason: "stream terminado".to_string(),
                });
                return Ok(SessionOutcome::Reconnect { established });
            }
        }
    }
}

fn handle_text(
    node: &Arc<Node>,
    text: &str,
    resuming: bool,
    options: &Arc<LinkOptions>,
    signals: &UnboundedSender<NodeSignal>,
    established: &mut bool,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Mensaje ilegible del nodo '{}': {}", node.identifier(), e);
            return;
        }
    };

    match value["op"].as_str() {
        Some("ready") => {
            let resumed = value["resumed"].as_bool().unwrap_or(false);
            let session_id = value["sessionId"].as_str().unwrap_or_default().to_string();
            node.set_session_id(Some(session_id.clone()));
            node.set_state(NodeState::Open);
            *established = true;

            if resumed {
                info!("✅ Nodo '{}' retomó su sesión previa", node.identifier());
            } else {
                info!("✅ Nodo '{}' conectado (sesión nueva)", node.identifier());
            }

            // Configurar el resume del lado del servidor y registrar la
            // versión del nodo, sin bloquear el loop de recepción
            let rest = node.rest().clone();
            let resume = options.auto_resume && node.config().resume;
            let timeout = options.resume_timeout_secs;
            let id = node.identifier().to_string();
            tokio::spawn(async move {
                if resume {
                    if let Err(e) = rest.update_session(&session_id, true, timeout).await {
                        warn!("No se pudo configurar el resume en '{}': {}", id, e);
                    }
                }
                match rest.fetch_version().await {
                    Ok(version) => debug!("Nodo '{}' versión {}", id, version),
                    Err(e) => debug!("No se pudo leer la versión de '{}': {}", id, e),
                }
            });

            let _ = signals.send(NodeSignal::Ready {
                node: node.identifier().to_string(),
                resumed,
                session_reset: resuming && !resumed,
            });
        }
        Some("stats") => match serde_json::from_value(value.clone()) {
            Ok(stats) => node.set_stats(stats),
            Err(e) => debug!("Stats ilegibles del nodo '{}': {}", node.identifier(), e),
        },
        Some("playerUpdate") => {
            let Some(guild_id) = parse_guild_id(&value) else {
                return;
            };
            let state: PlayerUpdateState =
                serde_json::from_value(value["state"].clone()).unwrap_or_default();
            let _ = signals.send(NodeSignal::PlayerUpdate { guild_id, state });
        }
        Some("event") => {
            if let Some((guild_id, event)) = parse_event(&value) {
                let _ = signals.send(NodeSignal::Event { guild_id, event });
            }
        }
        Some(otro) => {
            debug!("Op desconocido '{}' del nodo '{}', ignorado", otro, node.identifier());
        }
        None => {
            debug!("Mensaje sin discriminante del nodo '{}', ignorado", node.identifier());
        }
    }
}

fn parse_guild_id(value: &Value) -> Option<u64> {
    value["guildId"].as_str().and_then(|s| s.parse().ok())
}

fn parse_track(value: &Value) -> Option<Track> {
    serde_json::from_value(value.clone()).ok()
}

/// Clasifica un mensaje `event` por su sub-tipo. Tipos desconocidos se
/// descartan con log, nunca son fatales.
fn parse_event(value: &Value) -> Option<(u64, NodeEvent)> {
    let guild_id = parse_guild_id(value)?;

    let event = match value["type"].as_str()? {
        "TrackStartEvent" => NodeEvent::TrackStart { track: parse_track(&value["track"])? },
        "TrackEndEvent" => NodeEvent::TrackEnd {
            track: parse_track(&value["track"])?,
            reason: serde_json::from_value(value["reason"].clone()).unwrap_or(EndReason::Finished),
        },
        "TrackExceptionEvent" => NodeEvent::TrackException {
            track: parse_track(&value["track"]),
            message: value["exception"]["message"].as_str().unwrap_or("desconocido").to_string(),
            severity: value["exception"]["severity"].as_str().unwrap_or("common").to_string(),
            cause: value["exception"]["cause"].as_str().unwrap_or_default().to_string(),
        },
        "TrackStuckEvent" => NodeEvent::TrackStuck {
            track: parse_track(&value["track"]),
            threshold_ms: value["thresholdMs"].as_u64().unwrap_or(0),
        },
        "WebSocketClosedEvent" => NodeEvent::WebSocketClosed {
            code: value["code"].as_u64().unwrap_or(1000) as u16,
            reason: value["reason"].as_str().unwrap_or_default().to_string(),
            by_remote: value["byRemote"].as_bool().unwrap_or(false),
        },
        otro => {
            debug!("Evento desconocido '{}', ignorado", otro);
            return None;
        }
    };

    Some((guild_id, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackInfo;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn track_json() -> Value {
        let info = TrackInfo {
            identifier: "abc".to_string(),
            title: "Tema".to_string(),
            author: "Autora".to_string(),
            length: 60_000,
            is_stream: false,
            is_seekable: true,
            uri: None,
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
            position: 0,
        };
        serde_json::to_value(Track::new("HANDLE".to_string(), info)).unwrap()
    }

    #[test]
    fn test_parse_track_end_event() {
        let value = json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "42",
            "track": track_json(),
            "reason": "finished",
        });

        let (guild_id, event) = parse_event(&value).expect("evento válido");
        assert_eq!(guild_id, 42);
        match event {
            NodeEvent::TrackEnd { track, reason } => {
                assert_eq!(track.encoded, "HANDLE");
                assert_eq!(reason, EndReason::Finished);
            }
            otro => panic!("se esperaba TrackEnd, se obtuvo {:?}", otro),
        }
    }

    #[test]
    fn test_parse_exception_event() {
        let value = json!({
            "op": "event",
            "type": "TrackExceptionEvent",
            "guildId": "42",
            "track": track_json(),
            "exception": { "message": "se rompió", "severity": "fault", "cause": "IOException" },
        });

        let (_, event) = parse_event(&value).unwrap();
        match event {
            NodeEvent::TrackException { message, severity, cause, .. } => {
                assert_eq!(message, "se rompió");
                assert_eq!(severity, "fault");
                assert_eq!(cause, "IOException");
            }
            otro => panic!("se esperaba TrackException, se obtuvo {:?}", otro),
        }
    }

    #[test]
    fn test_evento_desconocido_se_descarta() {
        let value = json!({
            "op": "event",
            "type": "EventoInventado",
            "guildId": "42",
        });
        assert!(parse_event(&value).is_none());
    }

    #[test]
    fn test_guild_id_invalido_se_descarta() {
        let value = json!({
            "op": "event",
            "type": "TrackStartEvent",
            "guildId": "no-numerico",
            "track": track_json(),
        });
        assert!(parse_event(&value).is_none());
    }

    #[test]
    fn test_player_update_state_parse() {
        let state: PlayerUpdateState = serde_json::from_value(json!({
            "time": 1700000000000u64,
            "position": 4500,
            "connected": true,
            "ping": 12,
        }))
        .unwrap();
        assert_eq!(state.position, 4500);
        assert!(state.connected);
    }
}
