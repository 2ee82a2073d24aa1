//! Puerto de persistencia de players.
//!
//! El contrato abstracto permite guardar/restaurar el estado de cada player
//! para retomar tras un reinicio; los backends concretos son externos.
//! Se incluye un backend de referencia basado en archivos JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::player::filters::Filters;
use crate::player::queue::LoopMode;

/// Entrada persistida de la cola: handle + solicitante opaco.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTrack {
    pub encoded: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Value>,
}

/// Instantánea completa del estado de un player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub guild_id: u64,
    pub voice_channel_id: Option<u64>,
    pub text_channel_id: Option<u64>,
    pub current: Option<SnapshotTrack>,
    /// Posición del track actual en milisegundos
    pub position: i64,
    pub volume: u16,
    pub paused: bool,
    pub loop_mode: LoopMode,
    pub filters: Filters,
    pub queue: Vec<SnapshotTrack>,
    pub saved_at: DateTime<Utc>,
}

/// Contrato abstracto de guardado/restauración por guild.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn save(&self, guild_id: u64, snapshot: &PlayerSnapshot) -> anyhow::Result<()>;
    async fn load(&self, guild_id: u64) -> anyhow::Result<Option<PlayerSnapshot>>;
    async fn delete(&self, guild_id: u64) -> anyhow::Result<()>;
}

/// Backend de referencia basado en archivos JSON.
pub struct JsonPlayerStore {
    data_dir: PathBuf,
}

impl JsonPlayerStore {
    pub async fn new(data_dir: PathBuf) -> anyhow::Result<Self> {
        let players_dir = data_dir.join("players");
        fs::create_dir_all(&players_dir).await?;
        info!("📁 Storage de players inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    /// Carga todas las instantáneas presentes (arranque con auto-resume).
    pub async fn load_all(&self) -> anyhow::Result<Vec<PlayerSnapshot>> {
        let players_dir = self.data_dir.join("players");
        let mut snapshots = Vec::new();

        let mut files = fs::read_dir(&players_dir).await?;
        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<PlayerSnapshot>(&content) {
                        Ok(snapshot) => snapshots.push(snapshot),
                        Err(e) => warn!("Instantánea ilegible en {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("No se pudo leer {}: {}", path.display(), e),
                }
            }
        }

        if !snapshots.is_empty() {
            info!("📂 Cargadas {} instantáneas de player", snapshots.len());
        }
        Ok(snapshots)
    }

    fn file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join("players").join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl PlayerStore for JsonPlayerStore {
    async fn save(&self, guild_id: u64, snapshot: &PlayerSnapshot) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.file_path(guild_id), content).await?;
        Ok(())
    }

    async fn load(&self, guild_id: u64) -> anyhow::Result<Option<PlayerSnapshot>> {
        let path = self.file_path(guild_id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, guild_id: u64) -> anyhow::Result<()> {
        match fs::remove_file(self.file_path(guild_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
