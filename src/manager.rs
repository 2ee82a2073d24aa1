//! Fachada principal de la librería.
//!
//! El manager es el único objeto que la aplicación anfitriona toca: es dueño
//! exclusivo de ambos registros, del correlador de voz, del canal de eventos
//! y del puerto de persistencia. Todo el tráfico entrante de los nodos pasa
//! por un único task despachador, que preserva el orden de eventos por guild.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LinkOptions, NodeConfig};
use crate::error::{LinkError, Result};
use crate::events::LinkEvent;
use crate::node::registry::NodeRegistry;
use crate::node::socket::{self, NodeSignal};
use crate::node::Node;
use crate::player::registry::PlayerRegistry;
use crate::player::Player;
use crate::sources::{SearchSource, SourceRegistry};
use crate::storage::{PlayerStore, SnapshotTrack};
use crate::track::{codec, SearchResult, Track};
use crate::voice::{VoiceBundle, VoiceCorrelator};

/// Seam de salida hacia el gateway del chat: la aplicación anfitriona debe
/// reenviar cada payload a su conexión de gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewaySender: Send + Sync {
    async fn send(&self, guild_id: u64, payload: Value) -> anyhow::Result<()>;
}

/// Dependencias compartidas que cada player recibe del manager.
pub(crate) struct PlayerContext {
    pub(crate) gateway: Arc<dyn GatewaySender>,
    pub(crate) events: UnboundedSender<LinkEvent>,
    pub(crate) options: Arc<LinkOptions>,
}

impl PlayerContext {
    pub(crate) fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }
}

struct ManagerInner {
    options: Arc<LinkOptions>,
    nodes: NodeRegistry,
    players: PlayerRegistry,
    correlator: VoiceCorrelator,
    sources: SourceRegistry,
    store: parking_lot::RwLock<Option<Arc<dyn PlayerStore>>>,
    ctx: Arc<PlayerContext>,
    /// Región de voz conocida por guild, derivada del endpoint del gateway
    regions: DashMap<u64, String>,
    signal_tx: UnboundedSender<NodeSignal>,
    signal_rx: parking_lot::Mutex<Option<UnboundedReceiver<NodeSignal>>>,
    event_rx: parking_lot::Mutex<Option<UnboundedReceiver<LinkEvent>>>,
    user_id: parking_lot::RwLock<Option<u64>>,
    cancel: CancellationToken,
}

/// Punto de entrada de la librería. Clonar es barato: todas las copias
/// comparten el mismo estado interno.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<ManagerInner>,
}

impl LinkManager {
    pub fn new(
        options: LinkOptions,
        node_configs: Vec<NodeConfig>,
        gateway: Arc<dyn GatewaySender>,
    ) -> Result<Self> {
        options.validate()?;
        info!("🎼 Inicializando manager: {}", options.summary());

        let options = Arc::new(options);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let ctx = Arc::new(PlayerContext {
            gateway,
            events: event_tx,
            options: options.clone(),
        });

        let nodes = NodeRegistry::new();
        for config in node_configs {
            nodes.add(config, &options, &cancel)?;
        }

        Ok(Self {
            inner: Arc::new(ManagerInner {
                options: options.clone(),
                nodes,
                players: PlayerRegistry::new(),
                correlator: VoiceCorrelator::new(Duration::from_secs(options.voice_timeout_secs)),
                sources: SourceRegistry::new(),
                store: parking_lot::RwLock::new(None),
                ctx,
                regions: DashMap::new(),
                signal_tx,
                signal_rx: parking_lot::Mutex::new(Some(signal_rx)),
                event_rx: parking_lot::Mutex::new(Some(event_rx)),
                user_id: parking_lot::RwLock::new(None),
                cancel,
            }),
        })
    }

    /// Arranca los sockets de todos los nodos y el task despachador.
    /// Debe llamarse una vez, con el user id del bot ya conocido.
    pub fn init(&self, bot_user_id: u64) {
        {
            let mut user_id = self.inner.user_id.write();
            if user_id.is_some() {
                warn!("init() llamado más de una vez, ignorado");
                return;
            }
            *user_id = Some(bot_user_id);
        }

        if let Some(signal_rx) = self.inner.signal_rx.lock().take() {
            tokio::spawn(dispatch(self.inner.clone(), signal_rx));
        }

        for node in self.inner.nodes.all() {
            socket::spawn(
                node,
                bot_user_id,
                self.inner.options.clone(),
                self.inner.signal_tx.clone(),
            );
        }

        // Barrido periódico de fragmentos de voz huérfanos
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let ventana = Duration::from_secs(inner.options.voice_timeout_secs);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(ventana) => {}
                }
                for guild_id in inner.correlator.sweep_expired() {
                    inner.ctx.emit(LinkEvent::Debug {
                        message: LinkError::VoiceCorrelationTimeout(guild_id).to_string(),
                    });
                }
            }
        });

        info!("🚀 Manager iniciado para el usuario {}", bot_user_id);
    }

    /// Canal de eventos hacia la aplicación; puede tomarse una sola vez.
    pub fn take_event_stream(&self) -> Option<UnboundedReceiver<LinkEvent>> {
        self.inner.event_rx.lock().take()
    }

    /// Registra una fuente de búsqueda conectable.
    pub fn register_source(&self, source: Arc<dyn SearchSource>) {
        self.inner.sources.register(source);
    }

    /// Consulta una fuente registrada por nombre.
    pub fn source(&self, name: &str) -> Option<Arc<dyn SearchSource>> {
        self.inner.sources.get(name)
    }

    /// Configura el puerto de persistencia.
    pub fn set_store(&self, store: Arc<dyn PlayerStore>) {
        *self.inner.store.write() = Some(store);
    }

    // ── Nodos ─────────────────────────────────────────────────────────

    /// Agrega un nodo en caliente; si el manager ya inició, conecta ya.
    pub fn add_node(&self, config: NodeConfig) -> Result<()> {
        let node = self.inner.nodes.add(config, &self.inner.options, &self.inner.cancel)?;
        if let Some(user_id) = *self.inner.user_id.read() {
            socket::spawn(node, user_id, self.inner.options.clone(), self.inner.signal_tx.clone());
        }
        Ok(())
    }

    /// Remueve un nodo, migrando sus players si hay otro disponible.
    pub async fn remove_node(&self, identifier: &str) -> Result<()> {
        // El Arc removido se retiene hasta terminar la migración: los
        // players lo referencian débil y aún deben poder consultarlo
        let Some(removido) = self.inner.nodes.remove(identifier) else {
            return Err(LinkError::Config(format!("no existe el nodo '{}'", identifier)));
        };
        failover(&self.inner, removido.identifier()).await;
        Ok(())
    }

    pub fn node(&self, identifier: &str) -> Option<Arc<Node>> {
        self.inner.nodes.get(identifier)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.nodes.all()
    }

    // ── Players ───────────────────────────────────────────────────────

    /// Crea (o devuelve) el player del guild, adjunto al mejor nodo.
    /// Invariante: a lo sumo un player por guild.
    pub async fn create_player(
        &self,
        guild_id: u64,
        voice_channel_id: u64,
        text_channel_id: Option<u64>,
    ) -> Result<Arc<Player>> {
        if let Some(existente) = self.inner.players.get(guild_id) {
            return Ok(existente);
        }

        let counts = self.inner.players.count_by_node().await;
        let region = self.inner.regions.get(&guild_id).map(|r| r.value().clone());
        let node = self.inner.nodes.select(region.as_deref(), &counts)?;
        debug!("Guild {} asignado al nodo '{}'", guild_id, node.identifier());

        let player = Player::new(
            guild_id,
            &node,
            voice_channel_id,
            text_channel_id,
            self.inner.ctx.clone(),
        );
        Ok(self.inner.players.insert_or_existing(guild_id, player))
    }

    pub fn get_player(&self, guild_id: u64) -> Option<Arc<Player>> {
        self.inner.players.get(guild_id)
    }

    /// Destruye el player y limpia todo rastro del guild.
    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        self.inner.correlator.clear(guild_id);
        let Some(player) = self.inner.players.remove(guild_id) else {
            return Ok(());
        };
        player.destroy().await?;

        let store = self.inner.store.read().clone();
        if let Some(store) = store {
            if let Err(e) = store.delete(guild_id).await {
                warn!("No se pudo borrar la instantánea del guild {}: {}", guild_id, e);
            }
        }
        Ok(())
    }

    // ── Búsqueda y tracks ─────────────────────────────────────────────

    /// Resuelve una consulta: primero las fuentes registradas, después el
    /// mejor nodo disponible.
    pub async fn search(&self, query: &str, requester: Option<Value>) -> Result<SearchResult> {
        if let Some(source) = self.inner.sources.find(query) {
            debug!("Consulta despachada a la fuente '{}'", source.name());
            return source.load(query, requester.as_ref()).await.map_err(LinkError::Source);
        }

        let identifier = if url::Url::parse(query).is_ok() {
            query.to_string()
        } else {
            format!("{}:{}", self.inner.options.default_search_prefix, query)
        };

        let counts = self.inner.players.count_by_node().await;
        let node = self.inner.nodes.select(None, &counts)?;
        node.rest()
            .load_tracks(&identifier, requester.as_ref(), self.inner.options.playlist_load_limit)
            .await
    }

    /// Decodifica un handle: primero el codec local; si la versión no se
    /// reconoce (plugins del nodo), consulta al nodo.
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        match codec::decode(encoded) {
            Ok(info) => Ok(Track::new(encoded.to_string(), info)),
            Err(e) => {
                debug!("Codec local no reconoció el handle ({}), consultando al nodo", e);
                let counts = self.inner.players.count_by_node().await;
                let node = self.inner.nodes.select(None, &counts)?;
                node.rest().decode_track(encoded).await
            }
        }
    }

    // ── Gateway de voz ────────────────────────────────────────────────

    /// Alimenta los paquetes crudos del gateway del chat. Reconoce los
    /// updates de voz y los correlaciona por guild; el resto se ignora.
    pub async fn handle_gateway_packet(&self, packet: &Value) {
        match packet["t"].as_str() {
            Some("VOICE_SERVER_UPDATE") => {
                let d = &packet["d"];
                let Some(guild_id) = parse_snowflake(&d["guild_id"]) else { return };
                let Some(endpoint) = d["endpoint"].as_str() else {
                    // Endpoint nulo: el servidor de voz se cayó, llegará otro
                    debug!("VOICE_SERVER_UPDATE sin endpoint para guild {}", guild_id);
                    return;
                };
                let token = d["token"].as_str().unwrap_or_default().to_string();
                self.inner.regions.insert(guild_id, region_from_endpoint(endpoint));

                if let Some(bundle) =
                    self.inner.correlator.on_server_update(guild_id, token, endpoint.to_string())
                {
                    self.attach(guild_id, bundle).await;
                }
            }
            Some("VOICE_STATE_UPDATE") => {
                let d = &packet["d"];
                let Some(guild_id) = parse_snowflake(&d["guild_id"]) else { return };

                // Solo el estado de voz del propio bot nos incumbe
                if let Some(user_id) = *self.inner.user_id.read() {
                    if parse_snowflake(&d["user_id"]) != Some(user_id) {
                        return;
                    }
                }

                if d["channel_id"].is_null() {
                    // Expulsado o desconectado desde el chat
                    self.inner.correlator.clear(guild_id);
                    if let Some(player) = self.inner.players.get(guild_id) {
                        player.mark_disconnected().await;
                    }
                    return;
                }

                let session_id = d["session_id"].as_str().unwrap_or_default().to_string();
                if let Some(bundle) = self.inner.correlator.on_state_update(guild_id, session_id) {
                    self.attach(guild_id, bundle).await;
                }
            }
            _ => {}
        }
    }

    async fn attach(&self, guild_id: u64, bundle: VoiceBundle) {
        let Some(player) = self.inner.players.get(guild_id) else {
            debug!("Credenciales correlacionadas sin player para guild {}", guild_id);
            return;
        };
        if let Err(e) = player.attach_voice(bundle).await {
            self.inner.ctx.emit(LinkEvent::Debug {
                message: format!("attach de voz fallido en guild {}: {}", guild_id, e),
            });
        }
    }

    // ── Persistencia ──────────────────────────────────────────────────

    /// Guarda una instantánea de cada player activo; devuelve cuántas.
    pub async fn save_players(&self) -> usize {
        let store = self.inner.store.read().clone();
        let Some(store) = store else { return 0 };

        let mut guardados = 0;
        for player in self.inner.players.all() {
            let snapshot = player.snapshot().await;
            match store.save(player.guild_id(), &snapshot).await {
                Ok(()) => guardados += 1,
                Err(e) => warn!("No se pudo guardar el guild {}: {}", player.guild_id(), e),
            }
        }
        if guardados > 0 {
            info!("💾 {} instantáneas de player guardadas", guardados);
        }
        guardados
    }

    /// Restaura un player desde el puerto de persistencia, repoblando la
    /// cola decodificando los handles localmente.
    pub async fn restore_player(&self, guild_id: u64) -> Result<Option<Arc<Player>>> {
        let store = self.inner.store.read().clone();
        let Some(store) = store else { return Ok(None) };
        let Some(snapshot) = store.load(guild_id).await.map_err(LinkError::Source)? else {
            return Ok(None);
        };

        let player = self
            .create_player(
                snapshot.guild_id,
                snapshot.voice_channel_id.unwrap_or_default(),
                snapshot.text_channel_id,
            )
            .await?;

        let current = snapshot.current.as_ref().and_then(track_from_snapshot);
        let queue: Vec<Track> =
            snapshot.queue.iter().filter_map(|s| track_from_snapshot(s)).collect();
        player.restore(current, queue, &snapshot).await;

        info!("📂 Player del guild {} restaurado desde persistencia", guild_id);
        Ok(Some(player))
    }

    // ── Shutdown ──────────────────────────────────────────────────────

    /// Detiene sockets y tasks; con `persist` guarda antes los players.
    /// Las llamadas REST en vuelo terminan o expiran por su timeout.
    pub async fn shutdown(&self, persist: bool) {
        if persist {
            self.save_players().await;
        }
        self.inner.nodes.shutdown_all();
        self.inner.cancel.cancel();
        info!("🛑 Manager detenido ({} players preservados)", self.inner.players.len());
    }
}

/// Task despachador: único consumidor del tráfico de todos los nodos, de
/// modo que los eventos de un guild conservan su orden de llegada.
async fn dispatch(inner: Arc<ManagerInner>, mut rx: UnboundedReceiver<NodeSignal>) {
    loop {
        let signal = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            s = rx.recv() => match s {
                Some(s) => s,
                None => return,
            },
        };

        match signal {
            NodeSignal::Ready { node, resumed, session_reset } => {
                inner.ctx.emit(LinkEvent::NodeConnect { node: node.clone(), resumed });
                if session_reset {
                    // El servidor no retuvo la sesión: los players del nodo
                    // quedan desconectados y deben re-adjuntar su voz
                    for player in inner.players.attached_to(&node).await {
                        player.mark_disconnected().await;
                        if let Err(e) = player.reattach().await {
                            inner.ctx.emit(LinkEvent::Debug {
                                message: format!(
                                    "re-adjuntar guild {} tras reset de sesión falló: {}",
                                    player.guild_id(),
                                    e
                                ),
                            });
                        }
                    }
                }
            }
            NodeSignal::Disconnected { node, code, reason } => {
                inner.ctx.emit(LinkEvent::NodeDisconnect {
                    node: node.clone(),
                    code,
                    reason,
                });
                failover(&inner, &node).await;
            }
            NodeSignal::PlayerUpdate { guild_id, state } => {
                if let Some(player) = inner.players.get(guild_id) {
                    player.handle_player_update(state).await;
                }
            }
            NodeSignal::Event { guild_id, event } => {
                match inner.players.get(guild_id) {
                    Some(player) => player.handle_event(event).await,
                    None => debug!("Evento para guild {} sin player, descartado", guild_id),
                }
            }
        }
    }
}

/// Migra los players de un nodo caído al mejor nodo restante; sin destino,
/// los marca desconectados pero los preserva junto con sus colas.
async fn failover(inner: &Arc<ManagerInner>, caido: &str) {
    let afectados = inner.players.attached_to(caido).await;
    if afectados.is_empty() {
        return;
    }
    info!("🚑 Failover del nodo '{}': {} players afectados", caido, afectados.len());

    let counts = inner.players.count_by_node().await;
    for player in afectados {
        let guild_id = player.guild_id();
        let region = inner.regions.get(&guild_id).map(|r| r.value().clone());

        match inner.nodes.select_excluding(region.as_deref(), &counts, caido) {
            Ok(nuevo) => {
                let destino = nuevo.identifier().to_string();
                if let Err(e) = player.migrate_to(nuevo).await {
                    inner.ctx.emit(LinkEvent::NodeError {
                        node: destino,
                        message: format!("migración del guild {} falló: {}", guild_id, e),
                    });
                }
            }
            Err(_) => {
                player.mark_disconnected().await;
                inner.ctx.emit(LinkEvent::Debug {
                    message: format!(
                        "sin nodo de failover para guild {}; player preservado",
                        guild_id
                    ),
                });
            }
        }
    }
}

/// Los snowflakes llegan como string o número según la librería del host.
fn parse_snowflake(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Deriva la región de voz del endpoint del gateway
/// (`rotterdam10234.discord.media:443` → `rotterdam`).
fn region_from_endpoint(endpoint: &str) -> String {
    endpoint
        .split('.')
        .next()
        .unwrap_or(endpoint)
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string()
}

fn track_from_snapshot(entry: &SnapshotTrack) -> Option<Track> {
    match codec::decode(&entry.encoded) {
        Ok(info) => {
            Some(Track::new(entry.encoded.clone(), info).with_requester(entry.requester.clone()))
        }
        Err(e) => {
            warn!("Handle persistido ilegible, descartado: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeState;
    use crate::player::PlayerLifecycle;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const GUILD: u64 = 4242;
    const BOT: u64 = 777;

    fn node_config(id: &str) -> NodeConfig {
        NodeConfig {
            identifier: id.to_string(),
            host: "localhost".to_string(),
            port: 2333,
            secure: false,
            password: "pass".to_string(),
            regions: vec![],
            resume: true,
            capacity: 1000,
        }
    }

    fn gateway_ok() -> Arc<MockGatewaySender> {
        let mut gateway = MockGatewaySender::new();
        gateway.expect_send().returning(|_, _| Ok(()));
        Arc::new(gateway)
    }

    fn manager_con_nodo_abierto(gateway: Arc<MockGatewaySender>) -> LinkManager {
        let manager =
            LinkManager::new(LinkOptions::default(), vec![node_config("principal")], gateway)
                .unwrap();
        manager.node("principal").unwrap().set_state(NodeState::Open);
        manager
    }

    #[test]
    fn test_region_from_endpoint() {
        assert_eq!(region_from_endpoint("rotterdam10234.discord.media:443"), "rotterdam");
        assert_eq!(region_from_endpoint("us-east7.discord.media:443"), "us-east");
        assert_eq!(region_from_endpoint("sinpuntos"), "sinpuntos");
    }

    #[test]
    fn test_parse_snowflake_string_y_numero() {
        assert_eq!(parse_snowflake(&json!("123")), Some(123));
        assert_eq!(parse_snowflake(&json!(456)), Some(456));
        assert_eq!(parse_snowflake(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_un_solo_player_por_guild() {
        let manager = manager_con_nodo_abierto(gateway_ok());

        let a = manager.create_player(GUILD, 1, None).await.unwrap();
        let b = manager.create_player(GUILD, 2, None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_create_player_sin_nodos_abiertos() {
        let manager = LinkManager::new(
            LinkOptions::default(),
            vec![node_config("cerrado")],
            gateway_ok(),
        )
        .unwrap();

        let err = manager.create_player(GUILD, 1, None).await.unwrap_err();
        assert!(matches!(err, LinkError::NoAvailableNode));
    }

    #[tokio::test]
    async fn test_connect_envia_payload_de_voz_al_gateway() {
        let mut gateway = MockGatewaySender::new();
        gateway
            .expect_send()
            .withf(|guild_id, payload| {
                *guild_id == GUILD
                    && payload["op"] == 4
                    && payload["d"]["guild_id"] == GUILD.to_string()
                    && payload["d"]["channel_id"] == "555"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = manager_con_nodo_abierto(Arc::new(gateway));
        let player = manager.create_player(GUILD, 555, None).await.unwrap();

        player.connect().await.unwrap();
        assert_eq!(player.lifecycle().await, PlayerLifecycle::Connecting);
    }

    #[tokio::test]
    async fn test_correlacion_completa_intenta_attach() {
        let manager = manager_con_nodo_abierto(gateway_ok());
        manager.init(BOT);
        let mut eventos = manager.take_event_stream().unwrap();

        let player = manager.create_player(GUILD, 555, None).await.unwrap();
        player.connect().await.unwrap();

        manager
            .handle_gateway_packet(&json!({
                "t": "VOICE_SERVER_UPDATE",
                "d": { "guild_id": GUILD.to_string(), "token": "tok", "endpoint": "brazil999.discord.media:443" },
            }))
            .await;
        manager
            .handle_gateway_packet(&json!({
                "t": "VOICE_STATE_UPDATE",
                "d": { "guild_id": GUILD.to_string(), "user_id": BOT.to_string(), "channel_id": "555", "session_id": "ses-1" },
            }))
            .await;

        // La región quedó cacheada desde el endpoint
        assert_eq!(manager.inner.regions.get(&GUILD).unwrap().value(), "brazil");

        // Sin sesión de socket real el attach REST falla y se reporta por Debug
        let mut visto_debug = false;
        while let Ok(evento) = eventos.try_recv() {
            if matches!(evento, LinkEvent::Debug { .. }) {
                visto_debug = true;
            }
        }
        assert!(visto_debug);
    }

    #[tokio::test]
    async fn test_voice_state_de_otro_usuario_se_ignora() {
        let manager = manager_con_nodo_abierto(gateway_ok());
        manager.init(BOT);
        manager.create_player(GUILD, 555, None).await.unwrap();

        manager
            .handle_gateway_packet(&json!({
                "t": "VOICE_SERVER_UPDATE",
                "d": { "guild_id": GUILD.to_string(), "token": "tok", "endpoint": "ep.discord.media:443" },
            }))
            .await;
        // Estado de voz de un humano cualquiera, no del bot
        manager
            .handle_gateway_packet(&json!({
                "t": "VOICE_STATE_UPDATE",
                "d": { "guild_id": GUILD.to_string(), "user_id": "111111", "channel_id": "555", "session_id": "ses-x" },
            }))
            .await;

        // El fragmento de servidor sigue esperando a su pareja
        assert!(manager
            .inner
            .correlator
            .on_state_update(GUILD, "ses-real".to_string())
            .is_some());
    }

    #[tokio::test]
    async fn test_destroy_player_es_terminal() {
        let manager = manager_con_nodo_abierto(gateway_ok());
        let player = manager.create_player(GUILD, 555, None).await.unwrap();

        manager.destroy_player(GUILD).await.unwrap();
        assert!(manager.get_player(GUILD).is_none());
        assert_eq!(player.lifecycle().await, PlayerLifecycle::Destroyed);

        let err = player.play(None).await.unwrap_err();
        assert!(matches!(err, LinkError::PlayerDestroyed(g) if g == GUILD));
    }

    #[tokio::test]
    async fn test_play_con_cola_vacia_falla_sin_transicionar() {
        let manager = manager_con_nodo_abierto(gateway_ok());
        let player = manager.create_player(GUILD, 555, None).await.unwrap();

        let antes = player.lifecycle().await;
        let err = player.play(None).await.unwrap_err();
        assert!(matches!(err, LinkError::EmptyQueue));
        assert_eq!(player.lifecycle().await, antes);
    }

    #[tokio::test]
    async fn test_track_start_actualiza_el_actual() {
        use crate::node::socket::NodeEvent;
        use crate::track::TrackInfo;

        let manager = manager_con_nodo_abierto(gateway_ok());
        let mut eventos = manager.take_event_stream().unwrap();
        let player = manager.create_player(GUILD, 555, None).await.unwrap();

        let info = TrackInfo {
            identifier: "y".to_string(),
            title: "Siguiente".to_string(),
            author: "B".to_string(),
            length: 2000,
            is_stream: false,
            is_seekable: true,
            uri: None,
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
            position: 0,
        };
        let track = Track::new("SIG".to_string(), info);

        player.handle_event(NodeEvent::TrackStart { track: track.clone() }).await;

        assert_eq!(player.current_track().await, Some(track.clone()));
        assert_eq!(player.lifecycle().await, PlayerLifecycle::Connected);

        let mut inicio_visto = false;
        while let Ok(evento) = eventos.try_recv() {
            if let LinkEvent::TrackStart { guild_id, track: t } = evento {
                assert_eq!(guild_id, GUILD);
                assert_eq!(t, track);
                inicio_visto = true;
            }
        }
        assert!(inicio_visto);
    }

    #[tokio::test]
    async fn test_queue_ended_al_terminar_con_cola_vacia() {
        use crate::events::EndReason;
        use crate::node::socket::NodeEvent;
        use crate::track::TrackInfo;

        let manager = manager_con_nodo_abierto(gateway_ok());
        let mut eventos = manager.take_event_stream().unwrap();
        let player = manager.create_player(GUILD, 555, None).await.unwrap();

        let info = TrackInfo {
            identifier: "x".to_string(),
            title: "Última".to_string(),
            author: "A".to_string(),
            length: 1000,
            is_stream: false,
            is_seekable: true,
            uri: None,
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
            position: 0,
        };
        let track = Track::new("FIN".to_string(), info);

        player
            .handle_event(NodeEvent::TrackEnd { track: track.clone(), reason: EndReason::Finished })
            .await;
        assert_eq!(player.lifecycle().await, PlayerLifecycle::Ended);

        let mut fin_visto = false;
        let mut cola_vacia_vista = false;
        while let Ok(evento) = eventos.try_recv() {
            match evento {
                LinkEvent::TrackEnd { guild_id, reason, .. } => {
                    assert_eq!(guild_id, GUILD);
                    assert_eq!(reason, EndReason::Finished);
                    fin_visto = true;
                }
                LinkEvent::QueueEnded { guild_id } => {
                    assert_eq!(guild_id, GUILD);
                    cola_vacia_vista = true;
                }
                _ => {}
            }
        }
        assert!(fin_visto && cola_vacia_vista);
    }
}
