use thiserror::Error;

/// Errores públicos de la librería.
///
/// Cada variante corresponde a una falla concreta de un componente; los
/// errores transitorios (reintentos REST, reconexión de socket) se manejan
/// internamente y solo salen a la superficie al agotarse.
#[derive(Debug, Error)]
pub enum LinkError {
    /// El handle codificado no pudo decodificarse
    #[error("track mal formado: {0}")]
    MalformedTrack(String),

    /// El nodo respondió 4xx; no se reintenta
    #[error("el nodo rechazó la petición ({status}): {body}")]
    RequestRejected { status: u16, body: String },

    /// Reintentos agotados contra un nodo
    #[error("nodo '{0}' no disponible tras agotar reintentos")]
    NodeUnavailable(String),

    /// Ningún nodo en estado Open para seleccionar
    #[error("no hay ningún nodo conectado disponible")]
    NoAvailableNode,

    /// play() sin track explícito y con la cola vacía
    #[error("la cola está vacía y no se indicó ningún track")]
    EmptyQueue,

    /// seek() sobre un stream en vivo o track no posicionable
    #[error("el track actual no permite seek")]
    NotSeekable,

    /// Operación sobre un player ya destruido
    #[error("el player del guild {0} fue destruido")]
    PlayerDestroyed(u64),

    /// Índice de cola fuera de rango
    #[error("índice {0} fuera de rango")]
    InvalidIndex(usize),

    /// Fragmento de voz huérfano descartado por la ventana de correlación
    #[error("credenciales de voz incompletas para el guild {0} (fragmento expirado)")]
    VoiceCorrelationTimeout(u64),

    /// Falla de una fuente de búsqueda registrada
    #[error("fuente de búsqueda externa: {0}")]
    Source(anyhow::Error),

    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("error de WebSocket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("error de serialización: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuración inválida: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
