//! Cliente REST sin estado contra un nodo.
//!
//! Las fallas transitorias (conexión rechazada, 5xx, timeout) se reintentan
//! con backoff exponencial acotado; un 4xx sale de inmediato como
//! [`LinkError::RequestRejected`]; al agotarse los reintentos se reporta
//! [`LinkError::NodeUnavailable`], que el registro usa para marcar el nodo.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::NodeConfig;
use crate::error::{LinkError, Result};
use crate::node::NodeStats;
use crate::player::filters::Filters;
use crate::track::{SearchResult, Track};
use crate::voice::VoiceBundle;

/// Parche parcial del estado de un player en el nodo.
///
/// Solo los campos presentes se aplican; `track.encoded = None` detiene la
/// reproducción actual.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceBundle>,
}

/// `encoded: null` se serializa explícitamente para indicar "detener".
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackPatch {
    pub encoded: Option<String>,
}

impl PlayerPatch {
    pub fn play(encoded: String) -> Self {
        Self { track: Some(TrackPatch { encoded: Some(encoded) }), ..Default::default() }
    }

    pub fn stop() -> Self {
        Self { track: Some(TrackPatch { encoded: None }), ..Default::default() }
    }
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    node_id: String,
    base: String,
    root: String,
    retry_attempts: u32,
}

impl RestClient {
    pub fn new(config: &NodeConfig, timeout: Duration, retry_attempts: u32) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut credential = HeaderValue::from_str(&config.password)
            .map_err(|_| LinkError::Config(format!("nodo '{}': credencial no representable como header", config.identifier)))?;
        credential.set_sensitive(true);
        headers.insert(AUTHORIZATION, credential);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            node_id: config.identifier.clone(),
            base: config.rest_base(),
            root: config.rest_root(),
            retry_attempts: retry_attempts.max(1),
        })
    }

    /// Carga tracks por identificador (URL directa o `prefijo:términos`),
    /// decorando cada resultado con el solicitante.
    pub async fn load_tracks(
        &self,
        identifier: &str,
        requester: Option<&Value>,
        playlist_limit: usize,
    ) -> Result<SearchResult> {
        let url = format!("{}/loadtracks?identifier={}", self.base, urlencoding::encode(identifier));
        let value: Value = self.send(|| self.http.request(Method::GET, &url)).await?.json().await?;
        Ok(SearchResult::from_response(&value, requester, playlist_limit))
    }

    /// Decodifica un handle en el nodo (verificación de ida y vuelta).
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let url = format!("{}/decodetrack?encodedTrack={}", self.base, urlencoding::encode(encoded));
        let track = self.send(|| self.http.request(Method::GET, &url)).await?.json().await?;
        Ok(track)
    }

    /// Aplica un parche parcial al player del guild.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        patch: &PlayerPatch,
        no_replace: bool,
    ) -> Result<Value> {
        let url = format!(
            "{}/sessions/{}/players/{}?noReplace={}",
            self.base, session_id, guild_id, no_replace
        );
        let value = self
            .send(|| self.http.request(Method::PATCH, &url).json(patch))
            .await?
            .json()
            .await?;
        Ok(value)
    }

    /// Destruye el player del guild en el nodo.
    pub async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        let url = format!("{}/sessions/{}/players/{}", self.base, session_id, guild_id);
        self.send(|| self.http.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    /// Configura el resume del lado del servidor para esta sesión.
    pub async fn update_session(&self, session_id: &str, resuming: bool, timeout_secs: u64) -> Result<()> {
        let url = format!("{}/sessions/{}", self.base, session_id);
        let body = serde_json::json!({ "resuming": resuming, "timeout": timeout_secs });
        self.send(|| self.http.request(Method::PATCH, &url).json(&body)).await?;
        Ok(())
    }

    /// Estadísticas actuales del nodo.
    pub async fn fetch_stats(&self) -> Result<NodeStats> {
        let url = format!("{}/stats", self.base);
        let stats = self.send(|| self.http.request(Method::GET, &url)).await?.json().await?;
        Ok(stats)
    }

    /// Versión del nodo (diagnóstico al conectar).
    pub async fn fetch_version(&self) -> Result<String> {
        let url = format!("{}/version", self.root);
        let version = self.send(|| self.http.request(Method::GET, &url)).await?.text().await?;
        Ok(version)
    }

    /// Ejecuta la petición con reintentos exponenciales para fallas
    /// transitorias. El builder se reconstruye en cada intento.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = Duration::from_millis(500);

        for intento in 1..=self.retry_attempts {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(LinkError::RequestRejected { status: status.as_u16(), body });
                    }
                    warn!(
                        "⚠️ Nodo '{}' respondió {} (intento {}/{})",
                        self.node_id, status, intento, self.retry_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "⚠️ Petición al nodo '{}' falló: {} (intento {}/{})",
                        self.node_id, e, intento, self.retry_attempts
                    );
                }
            }

            if intento < self.retry_attempts {
                debug!("Reintentando contra '{}' en {:?}", self.node_id, backoff);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(LinkError::NodeUnavailable(self.node_id.clone()))
    }
}
