pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadatos decodificados de un track.
///
/// Inmutable una vez decodificado; la igualdad de [`Track`] se decide por el
/// handle codificado, no por estos campos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    pub author: String,
    /// Duración en milisegundos
    pub length: i64,
    pub is_stream: bool,
    pub is_seekable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    pub source_name: String,
    /// Cursor de posición en milisegundos
    #[serde(default)]
    pub position: i64,
}

/// Un track reproducible: handle opaco + metadatos + solicitante.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Handle opaco emitido por el nodo (o por [`codec::encode`])
    pub encoded: String,
    pub info: TrackInfo,
    /// Referencia opaca al solicitante, provista por el caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Value>,
}

impl Track {
    pub fn new(encoded: String, info: TrackInfo) -> Self {
        Self { encoded, info, requester: None }
    }

    pub fn with_requester(mut self, requester: Option<Value>) -> Self {
        self.requester = requester;
        self
    }
}

/// La igualdad es por handle codificado.
impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for Track {}

/// Metadatos agregados de una playlist cargada.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistInfo {
    pub name: String,
    /// Índice del track seleccionado dentro de la playlist (-1 si ninguno)
    pub selected_track: i32,
}

/// Resultado de una carga/búsqueda; nunca se muta tras construirse.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    /// Un único track resuelto (URL directa)
    Track(Track),
    /// Playlist completa con metadatos agregados
    Playlist { info: PlaylistInfo, tracks: Vec<Track> },
    /// Lista de coincidencias de búsqueda
    Search(Vec<Track>),
    /// Sin resultados
    Empty,
    /// El nodo reportó una falla al cargar
    Error { message: String, severity: String },
}

impl SearchResult {
    /// Construye el resultado desde la respuesta JSON del nodo.
    ///
    /// `playlist_limit` recorta playlists grandes (0 = sin límite) y
    /// `requester` se propaga a cada track del resultado.
    pub fn from_response(value: &Value, requester: Option<&Value>, playlist_limit: usize) -> Self {
        let decorate = |mut track: Track| {
            track.requester = requester.cloned();
            track
        };

        match value["loadType"].as_str() {
            Some("track") => match serde_json::from_value::<Track>(value["data"].clone()) {
                Ok(track) => SearchResult::Track(decorate(track)),
                Err(e) => SearchResult::Error {
                    message: format!("respuesta de track ilegible: {}", e),
                    severity: "fault".to_string(),
                },
            },
            Some("playlist") => {
                let info: PlaylistInfo =
                    serde_json::from_value(value["data"]["info"].clone()).unwrap_or_default();
                let mut tracks: Vec<Track> =
                    serde_json::from_value(value["data"]["tracks"].clone()).unwrap_or_default();
                if playlist_limit > 0 && tracks.len() > playlist_limit {
                    tracks.truncate(playlist_limit);
                }
                let tracks = tracks.into_iter().map(decorate).collect();
                SearchResult::Playlist { info, tracks }
            }
            Some("search") => {
                let tracks: Vec<Track> =
                    serde_json::from_value(value["data"].clone()).unwrap_or_default();
                if tracks.is_empty() {
                    SearchResult::Empty
                } else {
                    SearchResult::Search(tracks.into_iter().map(decorate).collect())
                }
            }
            Some("empty") => SearchResult::Empty,
            Some("error") => SearchResult::Error {
                message: value["data"]["message"].as_str().unwrap_or("desconocido").to_string(),
                severity: value["data"]["severity"].as_str().unwrap_or("common").to_string(),
            },
            _ => SearchResult::Error {
                message: "loadType desconocido en la respuesta del nodo".to_string(),
                severity: "suspicious".to_string(),
            },
        }
    }

    /// Primer track del resultado, si existe.
    pub fn first(&self) -> Option<&Track> {
        match self {
            SearchResult::Track(t) => Some(t),
            SearchResult::Playlist { tracks, .. } => tracks.first(),
            SearchResult::Search(tracks) => tracks.first(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SearchResult::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn info() -> TrackInfo {
        TrackInfo {
            identifier: "dQw4w9WgXcQ".to_string(),
            title: "Never Gonna Give You Up".to_string(),
            author: "Rick Astley".to_string(),
            length: 212_000,
            is_stream: false,
            is_seekable: true,
            uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
            position: 0,
        }
    }

    #[test]
    fn test_track_equality_by_handle() {
        let a = Track::new("AAA".to_string(), info());
        let mut otra_info = info();
        otra_info.title = "Otro título".to_string();
        let b = Track::new("AAA".to_string(), otra_info);
        let c = Track::new("BBB".to_string(), info());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_response_search_with_requester() {
        let track = Track::new("AAA".to_string(), info());
        let response = json!({
            "loadType": "search",
            "data": [serde_json::to_value(&track).unwrap()],
        });
        let requester = json!({ "userId": "123" });

        let result = SearchResult::from_response(&response, Some(&requester), 0);
        match result {
            SearchResult::Search(tracks) => {
                assert_eq!(tracks.len(), 1);
                assert_eq!(tracks[0].requester, Some(requester));
            }
            otro => panic!("se esperaba Search, se obtuvo {:?}", otro),
        }
    }

    #[test]
    fn test_from_response_playlist_limit() {
        let tracks: Vec<Track> = (0..5)
            .map(|i| Track::new(format!("T{}", i), info()))
            .collect();
        let response = json!({
            "loadType": "playlist",
            "data": {
                "info": { "name": "Favoritas", "selectedTrack": -1 },
                "tracks": serde_json::to_value(&tracks).unwrap(),
            },
        });

        let result = SearchResult::from_response(&response, None, 3);
        match result {
            SearchResult::Playlist { info, tracks } => {
                assert_eq!(info.name, "Favoritas");
                assert_eq!(tracks.len(), 3);
            }
            otro => panic!("se esperaba Playlist, se obtuvo {:?}", otro),
        }
    }

    #[test]
    fn test_from_response_empty_and_error() {
        assert!(SearchResult::from_response(&json!({ "loadType": "empty" }), None, 0).is_empty());

        let error = json!({
            "loadType": "error",
            "data": { "message": "video no disponible", "severity": "common" },
        });
        match SearchResult::from_response(&error, None, 0) {
            SearchResult::Error { message, severity } => {
                assert_eq!(message, "video no disponible");
                assert_eq!(severity, "common");
            }
            otro => panic!("se esperaba Error, se obtuvo {:?}", otro),
        }
    }
}
