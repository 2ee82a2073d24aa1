pub mod filters;
pub mod queue;
pub mod registry;

use std::sync::{Arc, Weak};

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::events::LinkEvent;
use crate::manager::PlayerContext;
use crate::node::rest::{PlayerPatch, TrackPatch};
use crate::node::socket::{NodeEvent, PlayerUpdateState};
use crate::node::Node;
use crate::player::filters::Filters;
use crate::player::queue::{LoopMode, TrackQueue};
use crate::storage::{PlayerSnapshot, SnapshotTrack};
use crate::track::Track;
use crate::voice::VoiceBundle;

/// Etapas del ciclo de vida de un player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerLifecycle {
    Idle,
    Connecting,
    Connected,
    Ended,
    Destroyed,
}

struct PlayerInner {
    lifecycle: PlayerLifecycle,
    voice_channel_id: Option<u64>,
    text_channel_id: Option<u64>,
    /// Referencia débil: el registro de nodos es el dueño del ciclo de vida
    node: Weak<Node>,
    queue: TrackQueue,
    current: Option<Track>,
    position: i64,
    paused: bool,
    volume: u16,
    filters: Filters,
    voice: Option<VoiceBundle>,
    connected: bool,
    ping: i64,
    self_deaf: bool,
    self_mute: bool,
}

/// Máquina de estados de reproducción de un guild.
///
/// Todas las operaciones que mutan estado (comandos del usuario y eventos
/// asíncronos del nodo) se serializan por el mutex interno: nunca corre un
/// comando a la vez que un evento del mismo guild.
pub struct Player {
    guild_id: u64,
    inner: Mutex<PlayerInner>,
    ctx: Arc<PlayerContext>,
}

impl Player {
    pub(crate) fn new(
        guild_id: u64,
        node: &Arc<Node>,
        voice_channel_id: u64,
        text_channel_id: Option<u64>,
        ctx: Arc<PlayerContext>,
    ) -> Arc<Self> {
        let volume = ctx.options.default_volume;
        let history = ctx.options.history_limit;
        Arc::new(Self {
            guild_id,
            inner: Mutex::new(PlayerInner {
                lifecycle: PlayerLifecycle::Idle,
                voice_channel_id: Some(voice_channel_id),
                text_channel_id,
                node: Arc::downgrade(node),
                queue: TrackQueue::new(history),
                current: None,
                position: 0,
                paused: false,
                volume,
                filters: Filters::default(),
                voice: None,
                connected: false,
                ping: -1,
                self_deaf: true,
                self_mute: false,
            }),
            ctx,
        })
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    // ── Consultas ─────────────────────────────────────────────────────

    pub async fn lifecycle(&self) -> PlayerLifecycle {
        self.inner.lock().await.lifecycle
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.inner.lock().await.current.clone()
    }

    pub async fn position(&self) -> i64 {
        self.inner.lock().await.position
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn volume(&self) -> u16 {
        self.inner.lock().await.volume
    }

    /// Latencia reportada por el nodo en el último heartbeat (-1 sin dato).
    pub async fn ping(&self) -> i64 {
        self.inner.lock().await.ping
    }

    pub async fn loop_mode(&self) -> LoopMode {
        self.inner.lock().await.queue.loop_mode()
    }

    /// Identificador del nodo al que está adjunto, si sigue vivo.
    pub async fn node_identifier(&self) -> Option<String> {
        self.inner.lock().await.node.upgrade().map(|n| n.identifier().to_string())
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn queue_snapshot(&self) -> Vec<Track> {
        self.inner.lock().await.queue.tracks().cloned().collect()
    }

    pub async fn history_snapshot(&self) -> Vec<Track> {
        self.inner.lock().await.queue.history().cloned().collect()
    }

    // ── Conexión de voz ───────────────────────────────────────────────

    /// Pide al gateway del chat entrar al canal de voz y queda esperando
    /// las credenciales correlacionadas.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let canal = inner.voice_channel_id;
        let payload = json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id.to_string(),
                "channel_id": canal.map(|c| c.to_string()),
                "self_mute": inner.self_mute,
                "self_deaf": inner.self_deaf,
            }
        });
        self.ctx
            .gateway
            .send(self.guild_id, payload)
            .await
            .map_err(LinkError::Source)?;

        inner.lifecycle = PlayerLifecycle::Connecting;
        info!("🔗 Player {} conectando al canal {:?}", self.guild_id, canal);

        // Con credenciales ya correlacionadas, el attach sale de inmediato
        if inner.voice.is_some() {
            let patch = PlayerPatch { voice: inner.voice.clone(), ..Default::default() };
            self.send_patch(&inner, &patch, false).await?;
        }
        Ok(())
    }

    /// Abandona el canal de voz conservando player y cola.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let payload = json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id.to_string(),
                "channel_id": serde_json::Value::Null,
                "self_mute": false,
                "self_deaf": false,
            }
        });
        self.ctx
            .gateway
            .send(self.guild_id, payload)
            .await
            .map_err(LinkError::Source)?;

        inner.voice = None;
        inner.connected = false;
        inner.lifecycle = PlayerLifecycle::Idle;
        info!("👋 Player {} desconectado del canal de voz", self.guild_id);
        Ok(())
    }

    /// Adjunta las credenciales correlacionadas y las envía al nodo.
    pub(crate) async fn attach_voice(&self, bundle: VoiceBundle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        inner.voice = Some(bundle.clone());
        if inner.lifecycle == PlayerLifecycle::Idle {
            inner.lifecycle = PlayerLifecycle::Connecting;
        }
        let patch = PlayerPatch { voice: Some(bundle), ..Default::default() };
        self.send_patch(&inner, &patch, false).await?;
        debug!("🎙️ Credenciales de voz adjuntadas para guild {}", self.guild_id);
        Ok(())
    }

    /// Reenvía credenciales y estado tras un reset de sesión del nodo
    /// (resume fallido): el servidor ya no recuerda a este player.
    pub(crate) async fn reattach(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return Ok(());
        }
        inner.connected = false;

        let Some(voice) = inner.voice.clone() else {
            return Ok(()); // sin credenciales no hay nada que reenviar
        };
        let patch = PlayerPatch {
            voice: Some(voice),
            track: inner.current.as_ref().map(|t| TrackPatch { encoded: Some(t.encoded.clone()) }),
            position: inner.current.is_some().then_some(inner.position),
            paused: Some(inner.paused),
            volume: Some(inner.volume),
            filters: (!inner.filters.is_empty()).then(|| inner.filters.clone()),
        };
        self.send_patch(&inner, &patch, false).await?;
        inner.lifecycle = PlayerLifecycle::Connecting;
        Ok(())
    }

    // ── Reproducción ──────────────────────────────────────────────────

    /// Reproduce el track dado o el frente de la cola.
    pub async fn play(&self, track: Option<Track>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let siguiente = match track {
            Some(t) => t,
            None => inner.queue.advance(None).ok_or(LinkError::EmptyQueue)?,
        };

        let patch = PlayerPatch {
            track: Some(TrackPatch { encoded: Some(siguiente.encoded.clone()) }),
            position: Some(0),
            paused: Some(false),
            volume: Some(inner.volume),
            ..Default::default()
        };
        if let Err(e) = self.send_patch(&inner, &patch, false).await {
            // Devolver el track al frente: la cola no pierde nada por una
            // falla transitoria del nodo
            inner.queue.add_at(0, siguiente);
            return Err(e);
        }

        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, siguiente.info.title);
        inner.current = Some(siguiente);
        inner.position = 0;
        inner.paused = false;
        inner.lifecycle = PlayerLifecycle::Connected;
        Ok(())
    }

    /// Agrega a la cola; devuelve la posición asignada.
    pub async fn enqueue(&self, track: Track) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.add(track);
        Ok(inner.queue.len() - 1)
    }

    pub async fn pause(&self) -> Result<()> {
        self.set_paused(true).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        if inner.paused == paused {
            return Ok(()); // ya estamos en el estado pedido
        }
        let patch = PlayerPatch { paused: Some(paused), ..Default::default() };
        self.send_patch(&inner, &patch, false).await?;
        inner.paused = paused;
        Ok(())
    }

    /// Salta a una posición del track actual (milisegundos).
    pub async fn seek(&self, position_ms: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let actual = inner.current.as_ref().ok_or(LinkError::EmptyQueue)?;
        if actual.info.is_stream || !actual.info.is_seekable {
            return Err(LinkError::NotSeekable);
        }
        let destino = position_ms.clamp(0, actual.info.length);
        let patch = PlayerPatch { position: Some(destino), ..Default::default() };
        self.send_patch(&inner, &patch, false).await?;
        inner.position = destino;
        Ok(())
    }

    /// Ajusta el volumen, acotado a 0..=1000.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let volumen = volume.min(1000);
        let patch = PlayerPatch { volume: Some(volumen), ..Default::default() };
        self.send_patch(&inner, &patch, false).await?;
        inner.volume = volumen;
        Ok(())
    }

    /// Aplica un set de filtros; se conserva para reconciliar tras migrar.
    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let patch = PlayerPatch { filters: Some(filters.clone()), ..Default::default() };
        self.send_patch(&inner, &patch, false).await?;
        inner.filters = filters;
        Ok(())
    }

    /// Solo estado local: define la política de avance al terminar un track.
    pub async fn set_loop(&self, mode: LoopMode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.set_loop_mode(mode);
        Ok(())
    }

    pub async fn set_shuffle(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.set_shuffle(enabled);
        Ok(())
    }

    /// Descarta el track actual y avanza sin esperar el evento del nodo.
    /// Devuelve el track que empezó a sonar, si quedaba alguno.
    pub async fn skip(&self) -> Result<Option<Track>> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        let descartado = inner.current.take();
        let siguiente = inner.queue.advance_skipping(descartado);
        match siguiente {
            Some(track) => {
                let patch = PlayerPatch {
                    track: Some(TrackPatch { encoded: Some(track.encoded.clone()) }),
                    position: Some(0),
                    paused: Some(false),
                    ..Default::default()
                };
                self.send_patch(&inner, &patch, false).await?;
                inner.current = Some(track.clone());
                inner.position = 0;
                inner.paused = false;
                Ok(Some(track))
            }
            None => {
                self.send_patch(&inner, &PlayerPatch::stop(), false).await?;
                inner.lifecycle = PlayerLifecycle::Ended;
                self.ctx.emit(LinkEvent::QueueEnded { guild_id: self.guild_id });
                Ok(None)
            }
        }
    }

    /// Detiene la reproducción actual sin tocar la cola.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;

        self.send_patch(&inner, &PlayerPatch::stop(), false).await?;
        inner.current = None;
        inner.position = 0;
        Ok(())
    }

    // ── Cola ──────────────────────────────────────────────────────────

    pub async fn remove_from_queue(&self, index: usize) -> Result<Track> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.remove(index)
    }

    pub async fn move_in_queue(&self, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.move_track(from, to)
    }

    pub async fn clear_queue(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_alive(self.guild_id, &inner)?;
        inner.queue.clear();
        Ok(())
    }

    // ── Destrucción ───────────────────────────────────────────────────

    /// Destruye el player en el nodo y lo deja terminal. Cualquier llamada
    /// posterior falla con [`LinkError::PlayerDestroyed`].
    pub async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return Ok(()); // idempotente
        }

        // Mejor esfuerzo: si el nodo ya no está, el estado local igual muere
        if let Some(node) = inner.node.upgrade() {
            if let Some(session) = node.session_id() {
                if let Err(e) = node.rest().destroy_player(&session, self.guild_id).await {
                    debug!("destroy remoto del guild {} falló: {}", self.guild_id, e);
                }
            }
        }

        inner.queue.clear();
        inner.current = None;
        inner.voice = None;
        inner.connected = false;
        inner.lifecycle = PlayerLifecycle::Destroyed;
        info!("💀 Player del guild {} destruido", self.guild_id);
        Ok(())
    }

    // ── Failover ──────────────────────────────────────────────────────

    /// Reata el player a otro nodo reemitiendo todo su estado.
    pub(crate) async fn migrate_to(&self, nuevo: Arc<Node>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return Ok(());
        }

        inner.node = Arc::downgrade(&nuevo);
        let Some(voice) = inner.voice.clone() else {
            debug!("Guild {} migrado sin credenciales de voz", self.guild_id);
            return Ok(());
        };
        let patch = PlayerPatch {
            voice: Some(voice),
            track: inner.current.as_ref().map(|t| TrackPatch { encoded: Some(t.encoded.clone()) }),
            position: inner.current.is_some().then_some(inner.position),
            paused: Some(inner.paused),
            volume: Some(inner.volume),
            filters: (!inner.filters.is_empty()).then(|| inner.filters.clone()),
        };
        self.send_patch(&inner, &patch, false).await?;
        info!("🚚 Player del guild {} migrado al nodo '{}'", self.guild_id, nuevo.identifier());
        Ok(())
    }

    /// Sin nodo de destino: se preserva el player, marcado como desconectado.
    pub(crate) async fn mark_disconnected(&self) {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
    }

    // ── Eventos entrantes del nodo ────────────────────────────────────

    pub(crate) async fn handle_player_update(&self, state: PlayerUpdateState) {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return;
        }
        inner.position = state.position;
        inner.connected = state.connected;
        inner.ping = state.ping;
        if inner.lifecycle == PlayerLifecycle::Connecting && state.connected {
            inner.lifecycle = PlayerLifecycle::Connected;
            debug!("✅ Player {} confirmado por el nodo", self.guild_id);
        }
        self.ctx.emit(LinkEvent::PlayerUpdate {
            guild_id: self.guild_id,
            position: state.position,
            connected: state.connected,
            ping: state.ping,
        });
    }

    pub(crate) async fn handle_event(&self, event: NodeEvent) {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return;
        }

        match event {
            NodeEvent::TrackStart { track } => {
                inner.current = Some(track.clone());
                inner.paused = false;
                inner.lifecycle = PlayerLifecycle::Connected;
                self.ctx.emit(LinkEvent::TrackStart { guild_id: self.guild_id, track });
            }
            NodeEvent::TrackEnd { track, reason } => {
                let terminado = inner.current.take().unwrap_or_else(|| track.clone());
                inner.position = 0;
                self.ctx.emit(LinkEvent::TrackEnd {
                    guild_id: self.guild_id,
                    track,
                    reason,
                });
                if reason.may_start_next() {
                    let siguiente = inner.queue.advance(Some(terminado));
                    self.start_next(&mut inner, siguiente).await;
                }
            }
            NodeEvent::TrackException { track, message, severity, cause } => {
                warn!("💥 Excepción de track en guild {}: {}", self.guild_id, message);
                self.ctx.emit(LinkEvent::TrackException {
                    guild_id: self.guild_id,
                    track,
                    message,
                    severity,
                    cause,
                });
                // Avanzar sin loop para no reintentar el mismo track
                let roto = inner.current.take();
                let siguiente = inner.queue.advance_after_failure(roto);
                self.start_next(&mut inner, siguiente).await;
            }
            NodeEvent::TrackStuck { track, threshold_ms } => {
                warn!("🪤 Track trabado en guild {} ({}ms)", self.guild_id, threshold_ms);
                self.ctx.emit(LinkEvent::TrackStuck {
                    guild_id: self.guild_id,
                    track,
                    threshold_ms,
                });
                let trabado = inner.current.take();
                let siguiente = inner.queue.advance_after_failure(trabado);
                self.start_next(&mut inner, siguiente).await;
            }
            NodeEvent::WebSocketClosed { code, reason, by_remote } => {
                inner.connected = false;
                self.ctx.emit(LinkEvent::WebSocketClosed {
                    guild_id: self.guild_id,
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }

    /// Arranca el siguiente track tras un avance, o cierra la cola.
    async fn start_next(&self, inner: &mut PlayerInner, siguiente: Option<Track>) {
        match siguiente {
            Some(track) => {
                let patch = PlayerPatch {
                    track: Some(TrackPatch { encoded: Some(track.encoded.clone()) }),
                    position: Some(0),
                    paused: Some(false),
                    ..Default::default()
                };
                match self.send_patch(inner, &patch, false).await {
                    Ok(()) => {
                        inner.current = Some(track);
                        inner.position = 0;
                        inner.paused = false;
                    }
                    Err(e) => {
                        warn!("No se pudo avanzar la cola del guild {}: {}", self.guild_id, e);
                        inner.queue.add_at(0, track);
                        self.ctx.emit(LinkEvent::Debug {
                            message: format!("avance de cola fallido en guild {}: {}", self.guild_id, e),
                        });
                    }
                }
            }
            None => {
                inner.lifecycle = PlayerLifecycle::Ended;
                self.ctx.emit(LinkEvent::QueueEnded { guild_id: self.guild_id });
            }
        }
    }

    // ── Persistencia ──────────────────────────────────────────────────

    pub async fn snapshot(&self) -> PlayerSnapshot {
        let inner = self.inner.lock().await;
        PlayerSnapshot {
            guild_id: self.guild_id,
            voice_channel_id: inner.voice_channel_id,
            text_channel_id: inner.text_channel_id,
            current: inner.current.as_ref().map(|t| SnapshotTrack {
                encoded: t.encoded.clone(),
                requester: t.requester.clone(),
            }),
            position: inner.position,
            volume: inner.volume,
            paused: inner.paused,
            loop_mode: inner.queue.loop_mode(),
            filters: inner.filters.clone(),
            queue: inner
                .queue
                .tracks()
                .map(|t| SnapshotTrack { encoded: t.encoded.clone(), requester: t.requester.clone() })
                .collect(),
            saved_at: chrono::Utc::now(),
        }
    }

    /// Repuebla cola y estado desde una instantánea (restore tras reinicio).
    pub(crate) async fn restore(&self, current: Option<Track>, queue: Vec<Track>, snapshot: &PlayerSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.current = current;
        inner.position = snapshot.position;
        inner.volume = snapshot.volume.min(1000);
        inner.paused = snapshot.paused;
        inner.filters = snapshot.filters.clone();
        inner.queue.set_loop_mode(snapshot.loop_mode);
        for track in queue {
            inner.queue.add(track);
        }
    }

    // ── Internos ──────────────────────────────────────────────────────

    fn ensure_alive(guild_id: u64, inner: &PlayerInner) -> Result<()> {
        if inner.lifecycle == PlayerLifecycle::Destroyed {
            return Err(LinkError::PlayerDestroyed(guild_id));
        }
        Ok(())
    }

    async fn send_patch(&self, inner: &PlayerInner, patch: &PlayerPatch, no_replace: bool) -> Result<()> {
        let node = inner.node.upgrade().ok_or(LinkError::NoAvailableNode)?;
        let session = node
            .session_id()
            .ok_or_else(|| LinkError::NodeUnavailable(node.identifier().to_string()))?;
        node.rest().update_player(&session, self.guild_id, patch, no_replace).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").field("guild_id", &self.guild_id).finish()
    }
}
