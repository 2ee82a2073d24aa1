use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Configuración de un nodo de audio remoto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identificador único del nodo dentro del registro
    pub identifier: String,
    pub host: String,
    pub port: u16,
    /// Usar TLS (https/wss)
    #[serde(default)]
    pub secure: bool,
    pub password: String,

    /// Regiones de voz que este nodo declara servir
    #[serde(default)]
    pub regions: Vec<String>,

    /// Habilita resume de sesión tras una desconexión corta
    #[serde(default = "default_resume")]
    pub resume: bool,

    /// Capacidad nominal de players para el cálculo de carga
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_resume() -> bool {
    true
}

fn default_capacity() -> u32 {
    1000
}

impl NodeConfig {
    /// Base REST del nodo (`/v4`)
    pub fn rest_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/v4", scheme, self.host, self.port)
    }

    /// Base REST sin versión (endpoints como `/version`)
    pub fn rest_root(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// URL del socket de protocolo persistente
    pub fn socket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(LinkError::Config(
                "el identificador del nodo no puede estar vacío".into(),
            ));
        }
        if self.host.is_empty() {
            return Err(LinkError::Config(format!("nodo '{}': host vacío", self.identifier)));
        }
        if self.port == 0 {
            return Err(LinkError::Config(format!("nodo '{}': puerto inválido", self.identifier)));
        }
        if self.password.is_empty() {
            return Err(LinkError::Config(format!("nodo '{}': credencial vacía", self.identifier)));
        }
        if self.capacity == 0 {
            return Err(LinkError::Config(format!(
                "nodo '{}': capacidad debe ser mayor que 0",
                self.identifier
            )));
        }
        Ok(())
    }
}

/// Opciones globales del manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    // Resume y reconexión
    pub auto_resume: bool,
    /// Ventana de gracia del resume en el servidor (segundos)
    pub resume_timeout_secs: u64,
    /// Techo del backoff exponencial de reconexión (segundos)
    pub reconnect_backoff_ceiling_secs: u64,

    // REST
    /// Timeout por petición REST (segundos)
    pub rest_timeout_secs: u64,
    /// Reintentos ante fallas transitorias
    pub rest_retry_attempts: u32,

    // Reproducción
    /// Máximo de tracks aceptados al cargar una playlist (0 = sin límite)
    pub playlist_load_limit: usize,
    /// Volumen inicial de cada player (0-1000)
    pub default_volume: u16,
    /// Prefijo de búsqueda cuando la consulta no es una URL
    pub default_search_prefix: String,

    // Límites
    /// Ventana para descartar fragmentos de voz huérfanos (segundos)
    pub voice_timeout_secs: u64,
    /// Tamaño del historial de cada cola
    pub history_limit: usize,

    /// Nombre de cliente anunciado en el handshake del socket
    pub client_name: String,
}

impl LinkOptions {
    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks to catch common mistakes before any
    /// node connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 1000 {
            return Err(LinkError::Config(format!(
                "default_volume debe estar entre 0 y 1000, se recibió: {}",
                self.default_volume
            )));
        }
        if self.rest_timeout_secs == 0 {
            return Err(LinkError::Config("rest_timeout_secs debe ser mayor que 0".into()));
        }
        if self.reconnect_backoff_ceiling_secs == 0 {
            return Err(LinkError::Config(
                "reconnect_backoff_ceiling_secs debe ser mayor que 0".into(),
            ));
        }
        if self.voice_timeout_secs == 0 {
            return Err(LinkError::Config("voice_timeout_secs debe ser mayor que 0".into()));
        }
        Ok(())
    }

    /// Resumen seguro para logging (sin credenciales).
    pub fn summary(&self) -> String {
        format!(
            "Opciones: resume={} ({}s), backoff<={}s, rest {}s x{}, playlist<={}, vol={}, voz {}s",
            self.auto_resume,
            self.resume_timeout_secs,
            self.reconnect_backoff_ceiling_secs,
            self.rest_timeout_secs,
            self.rest_retry_attempts,
            self.playlist_load_limit,
            self.default_volume,
            self.voice_timeout_secs,
        )
    }
}

/// Valores por defecto pensados para un despliegue típico de un solo nodo.
impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            auto_resume: true,
            resume_timeout_secs: 60,
            reconnect_backoff_ceiling_secs: 64,
            rest_timeout_secs: 10,
            rest_retry_attempts: 3,
            playlist_load_limit: 100,
            default_volume: 100,
            default_search_prefix: "ytsearch".to_string(),
            voice_timeout_secs: 15,
            history_limit: 50,
            client_name: concat!("open-link/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
