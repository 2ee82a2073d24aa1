//! Fuentes de búsqueda conectables.
//!
//! El núcleo no trae backends concretos: cada integración externa
//! (Spotify, etc.) implementa [`SearchSource`] y se registra por nombre.
//! El manager consulta las fuentes registradas antes de delegar la carga
//! al nodo.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::track::SearchResult;

/// Capacidad que toda fuente de búsqueda debe satisfacer.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Nombre de la fuente (clave de registro)
    fn name(&self) -> &'static str;

    /// Verifica si la consulta pertenece a esta fuente
    fn matches(&self, query: &str) -> bool;

    /// Resuelve la consulta en un resultado de búsqueda
    async fn load(&self, query: &str, requester: Option<&Value>) -> anyhow::Result<SearchResult>;
}

/// Colección de fuentes registradas, despachadas por capacidad declarada
/// en orden de registro.
pub(crate) struct SourceRegistry {
    sources: RwLock<Vec<Arc<dyn SearchSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { sources: RwLock::new(Vec::new()) }
    }

    /// Registra una fuente; un nombre repetido reemplaza a la anterior.
    pub fn register(&self, source: Arc<dyn SearchSource>) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        debug!("🔌 Fuente de búsqueda registrada: {}", source.name());
        sources.push(source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchSource>> {
        self.sources.read().iter().find(|s| s.name() == name).cloned()
    }

    /// Primera fuente que reclama la consulta, en orden de registro.
    pub fn find(&self, query: &str) -> Option<Arc<dyn SearchSource>> {
        self.sources.read().iter().find(|s| s.matches(query)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FuentePrueba {
        nombre: &'static str,
        prefijo: &'static str,
    }

    #[async_trait]
    impl SearchSource for FuentePrueba {
        fn name(&self) -> &'static str {
            self.nombre
        }

        fn matches(&self, query: &str) -> bool {
            query.starts_with(self.prefijo)
        }

        async fn load(&self, _query: &str, _requester: Option<&Value>) -> anyhow::Result<SearchResult> {
            Ok(SearchResult::Empty)
        }
    }

    #[test]
    fn test_despacho_por_prefijo_en_orden_de_registro() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(FuentePrueba { nombre: "spotify", prefijo: "spsearch:" }));
        registry.register(Arc::new(FuentePrueba { nombre: "deezer", prefijo: "dzsearch:" }));

        assert_eq!(registry.find("spsearch:queen").unwrap().name(), "spotify");
        assert_eq!(registry.find("dzsearch:queen").unwrap().name(), "deezer");
        assert!(registry.find("ytsearch:queen").is_none());
    }

    #[test]
    fn test_registro_repetido_reemplaza() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(FuentePrueba { nombre: "spotify", prefijo: "spsearch:" }));
        registry.register(Arc::new(FuentePrueba { nombre: "spotify", prefijo: "sp:" }));

        assert!(registry.find("spsearch:x").is_none());
        assert!(registry.find("sp:x").is_some());
    }
}
