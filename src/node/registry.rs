//! Registro de nodos y algoritmo de selección.
//!
//! El registro es el dueño exclusivo de los `Arc<Node>`. La selección es una
//! función pura de (región, stats, orden de registro): mismos insumos,
//! mismo nodo elegido.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{LinkOptions, NodeConfig};
use crate::error::{LinkError, Result};
use crate::node::Node;

pub struct NodeRegistry {
    /// En orden de registro; el índice de inserción desempata la selección
    nodes: RwLock<Vec<Arc<Node>>>,
    next_seq: AtomicUsize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: RwLock::new(Vec::new()), next_seq: AtomicUsize::new(0) }
    }

    /// Registra un nodo nuevo; el identificador debe ser único.
    pub fn add(
        &self,
        config: NodeConfig,
        options: &LinkOptions,
        parent: &CancellationToken,
    ) -> Result<Arc<Node>> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.identifier() == config.identifier) {
            return Err(LinkError::Config(format!(
                "ya existe un nodo con identificador '{}'",
                config.identifier
            )));
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let node = Node::new(config, options, seq, parent.child_token())?;
        nodes.push(node.clone());
        Ok(node)
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.identifier() == identifier).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Quita un nodo del registro y detiene su socket.
    pub fn remove(&self, identifier: &str) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let pos = nodes.iter().position(|n| n.identifier() == identifier)?;
        let node = nodes.remove(pos);
        node.shutdown();
        info!("🗑️ Nodo '{}' removido del registro", identifier);
        Some(node)
    }

    /// Detiene todos los sockets (shutdown del manager).
    pub fn shutdown_all(&self) {
        for node in self.nodes.read().iter() {
            node.shutdown();
        }
    }

    /// Selecciona el mejor nodo Open para adjuntar un player.
    ///
    /// `local_players` aporta el conteo de players adjuntos por nodo, usado
    /// como respaldo cuando un nodo aún no publicó stats.
    pub fn select(
        &self,
        region: Option<&str>,
        local_players: &HashMap<String, usize>,
    ) -> Result<Arc<Node>> {
        select_among(self.all(), region, local_players, None).ok_or(LinkError::NoAvailableNode)
    }

    /// Igual que [`select`](Self::select) pero excluyendo un nodo (failover).
    pub fn select_excluding(
        &self,
        region: Option<&str>,
        local_players: &HashMap<String, usize>,
        exclude: &str,
    ) -> Result<Arc<Node>> {
        select_among(self.all(), region, local_players, Some(exclude))
            .ok_or(LinkError::NoAvailableNode)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Núcleo puro de la selección: filtra a los Open, prefiere la región del
/// guild si algún candidato la sirve, elige la menor carga y desempata por
/// orden de registro.
fn select_among(
    nodes: Vec<Arc<Node>>,
    region: Option<&str>,
    local_players: &HashMap<String, usize>,
    exclude: Option<&str>,
) -> Option<Arc<Node>> {
    let open: Vec<Arc<Node>> = nodes
        .into_iter()
        .filter(|n| n.is_open() && exclude.map_or(true, |ex| n.identifier() != ex))
        .collect();

    let pool: Vec<Arc<Node>> = match region {
        Some(region) => {
            let regionales: Vec<Arc<Node>> =
                open.iter().filter(|n| n.serves_region(region)).cloned().collect();
            if regionales.is_empty() {
                open
            } else {
                regionales
            }
        }
        None => open,
    };

    pool.into_iter().min_by(|a, b| {
        let carga_a = a.load_score(local_players.get(a.identifier()).copied().unwrap_or(0));
        let carga_b = b.load_score(local_players.get(b.identifier()).copied().unwrap_or(0));
        carga_a
            .partial_cmp(&carga_b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.seq().cmp(&b.seq()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeState, NodeStats};
    use pretty_assertions::assert_eq;

    fn config(id: &str, regions: &[&str], capacity: u32) -> NodeConfig {
        NodeConfig {
            identifier: id.to_string(),
            host: "localhost".to_string(),
            port: 2333,
            secure: false,
            password: "pass".to_string(),
            regions: regions.iter().map(|r| r.to_string()).collect(),
            resume: true,
            capacity,
        }
    }

    fn registry_con(nodes: &[(&str, &[&str], u32)]) -> NodeRegistry {
        let registry = NodeRegistry::new();
        let options = LinkOptions::default();
        let root = CancellationToken::new();
        for (id, regions, capacity) in nodes {
            registry.add(config(id, regions, *capacity), &options, &root).unwrap();
        }
        registry
    }

    fn abrir(registry: &NodeRegistry, id: &str, players: Option<u32>) {
        let node = registry.get(id).unwrap();
        node.set_state(NodeState::Open);
        if let Some(players) = players {
            node.set_stats(NodeStats { players, ..Default::default() });
        }
    }

    #[test]
    fn test_identificador_duplicado_rechazado() {
        let registry = registry_con(&[("a", &[], 100)]);
        let err = registry
            .add(config("a", &[], 100), &LinkOptions::default(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_sin_nodos_abiertos_falla() {
        let registry = registry_con(&[("a", &[], 100), ("b", &[], 100)]);
        let err = registry.select(None, &HashMap::new()).unwrap_err();
        assert!(matches!(err, LinkError::NoAvailableNode));
    }

    #[test]
    fn test_prefiere_menor_carga() {
        let registry = registry_con(&[("cargado", &[], 100), ("libre", &[], 100)]);
        abrir(&registry, "cargado", Some(80));
        abrir(&registry, "libre", Some(5));

        let elegido = registry.select(None, &HashMap::new()).unwrap();
        assert_eq!(elegido.identifier(), "libre");
    }

    #[test]
    fn test_empate_gana_el_primero_registrado() {
        let registry = registry_con(&[("primero", &[], 100), ("segundo", &[], 100)]);
        abrir(&registry, "primero", Some(10));
        abrir(&registry, "segundo", Some(10));

        // Determinista: mismos insumos, mismo resultado, todas las veces
        for _ in 0..5 {
            let elegido = registry.select(None, &HashMap::new()).unwrap();
            assert_eq!(elegido.identifier(), "primero");
        }
    }

    #[test]
    fn test_region_preferida_sobre_carga() {
        let registry = registry_con(&[("global", &[], 100), ("brasil", &["brazil"], 100)]);
        abrir(&registry, "global", Some(1));
        abrir(&registry, "brasil", Some(90));

        let elegido = registry.select(Some("brazil"), &HashMap::new()).unwrap();
        assert_eq!(elegido.identifier(), "brasil");
    }

    #[test]
    fn test_region_sin_candidatos_cae_al_resto() {
        let registry = registry_con(&[("global", &[], 100)]);
        abrir(&registry, "global", Some(1));

        let elegido = registry.select(Some("japan"), &HashMap::new()).unwrap();
        assert_eq!(elegido.identifier(), "global");
    }

    #[test]
    fn test_sin_stats_usa_conteo_local() {
        let registry = registry_con(&[("a", &[], 100), ("b", &[], 100)]);
        abrir(&registry, "a", None);
        abrir(&registry, "b", None);

        let mut counts = HashMap::new();
        counts.insert("a".to_string(), 7usize);
        counts.insert("b".to_string(), 2usize);

        let elegido = registry.select(None, &counts).unwrap();
        assert_eq!(elegido.identifier(), "b");
    }

    #[test]
    fn test_capacidad_pondera_la_razon() {
        // 40/1000 < 10/100: el nodo grande gana aunque tenga más players
        let registry = registry_con(&[("chico", &[], 100), ("grande", &[], 1000)]);
        abrir(&registry, "chico", Some(10));
        abrir(&registry, "grande", Some(40));

        let elegido = registry.select(None, &HashMap::new()).unwrap();
        assert_eq!(elegido.identifier(), "grande");
    }

    #[test]
    fn test_select_excluding_evita_el_nodo_caido() {
        let registry = registry_con(&[("a", &[], 100), ("b", &[], 100)]);
        abrir(&registry, "a", Some(0));
        abrir(&registry, "b", Some(50));

        let elegido = registry.select_excluding(None, &HashMap::new(), "a").unwrap();
        assert_eq!(elegido.identifier(), "b");
    }

    #[test]
    fn test_remove_detiene_y_saca_del_registro() {
        let registry = registry_con(&[("a", &[], 100)]);
        abrir(&registry, "a", Some(0));

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_none());
    }
}
