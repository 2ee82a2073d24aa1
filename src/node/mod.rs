pub mod registry;
pub mod rest;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{LinkOptions, NodeConfig};
use crate::error::Result;
use crate::node::rest::RestClient;

/// Estado de la conexión de socket de un nodo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Disconnected,
    Connecting,
    Open,
    Resuming,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// Instantánea de estadísticas que el nodo publica por su socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    /// Uptime del nodo en milisegundos
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    pub frame_stats: Option<FrameStats>,
}

/// Un nodo remoto: cliente REST + socket persistente + metadatos + salud.
///
/// El registro es el único dueño de los `Arc<Node>`; los players solo
/// guardan referencias débiles de consulta.
pub struct Node {
    config: NodeConfig,
    rest: RestClient,
    /// Orden de registro, desempate determinista en la selección
    seq: usize,
    state: RwLock<NodeState>,
    stats: RwLock<Option<NodeStats>>,
    session_id: RwLock<Option<String>>,
    cancel: CancellationToken,
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        options: &LinkOptions,
        seq: usize,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let rest = RestClient::new(
            &config,
            Duration::from_secs(options.rest_timeout_secs),
            options.rest_retry_attempts,
        )?;
        info!("🎛️ Nodo '{}' registrado ({}:{})", config.identifier, config.host, config.port);
        Ok(Arc::new(Self {
            config,
            rest,
            seq,
            state: RwLock::new(NodeState::Disconnected),
            stats: RwLock::new(None),
            session_id: RwLock::new(None),
            cancel,
        }))
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub(crate) fn seq(&self) -> usize {
        self.seq
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }

    pub fn is_open(&self) -> bool {
        self.state() == NodeState::Open
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    /// Escrito únicamente por el loop de socket del propio nodo.
    pub(crate) fn set_stats(&self, stats: NodeStats) {
        *self.stats.write() = Some(stats);
    }

    /// Token de sesión usado por las rutas REST y el resume.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub(crate) fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.write() = session_id;
    }

    /// Indica si el nodo declara servir la región de voz dada.
    pub fn serves_region(&self, region: &str) -> bool {
        self.config.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }

    /// Carga actual para la selección: razón players/capacidad con stats,
    /// o el conteo local de players adjuntos como respaldo.
    pub(crate) fn load_score(&self, local_players: usize) -> f64 {
        match self.stats() {
            Some(stats) => stats.players as f64 / self.config.capacity.max(1) as f64,
            None => local_players as f64,
        }
    }

    /// Detiene el loop de socket del nodo; idempotente.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        self.set_state(NodeState::Disconnected);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.config.identifier)
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}
