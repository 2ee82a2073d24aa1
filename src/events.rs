use serde::{Deserialize, Serialize};

use crate::track::Track;

/// Razón con la que el nodo dio por terminado un track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl EndReason {
    /// Indica si el player debe avanzar al siguiente track de la cola.
    pub fn may_start_next(&self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

/// Eventos emitidos hacia la aplicación anfitriona.
///
/// Se entregan por un canal único del manager; el orden dentro de un mismo
/// guild siempre se preserva.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Un nodo estableció (o retomó) su sesión de socket
    NodeConnect { node: String, resumed: bool },
    /// Un nodo perdió su socket; los players afectados migran o quedan marcados
    NodeDisconnect { node: String, code: Option<u16>, reason: String },
    /// Falla de un nodo reportada fuera del ciclo normal de reconexión
    NodeError { node: String, message: String },

    TrackStart { guild_id: u64, track: Track },
    TrackEnd { guild_id: u64, track: Track, reason: EndReason },
    TrackException {
        guild_id: u64,
        track: Option<Track>,
        message: String,
        severity: String,
        cause: String,
    },
    TrackStuck { guild_id: u64, track: Option<Track>, threshold_ms: u64 },

    /// La cola quedó vacía tras terminar el track actual
    QueueEnded { guild_id: u64 },
    /// Heartbeat de posición/conexión de un player
    PlayerUpdate { guild_id: u64, position: i64, connected: bool, ping: i64 },
    /// El websocket de voz del guild se cerró en el lado del nodo
    WebSocketClosed { guild_id: u64, code: u16, reason: String, by_remote: bool },

    /// Diagnóstico de bajo nivel (correlación de voz, failover, descartes)
    Debug { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_reason_advance_policy() {
        assert!(EndReason::Finished.may_start_next());
        assert!(EndReason::LoadFailed.may_start_next());
        assert!(!EndReason::Stopped.may_start_next());
        assert!(!EndReason::Replaced.may_start_next());
        assert!(!EndReason::Cleanup.may_start_next());
    }

    #[test]
    fn test_end_reason_wire_format() {
        let parsed: EndReason = serde_json::from_str("\"loadFailed\"").unwrap();
        assert_eq!(parsed, EndReason::LoadFailed);
        assert_eq!(serde_json::to_string(&EndReason::Finished).unwrap(), "\"finished\"");
    }
}
