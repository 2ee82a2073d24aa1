//! Registro de players por guild.
//!
//! Invariante: a lo sumo un player por guild. El manager es el único dueño
//! del registro; el resto del sistema consulta por clave.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::player::Player;

pub struct PlayerRegistry {
    players: DashMap<u64, Arc<Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self { players: DashMap::new() }
    }

    /// Inserta solo si el guild no tenía player; devuelve el vigente.
    pub fn insert_or_existing(&self, guild_id: u64, player: Arc<Player>) -> Arc<Player> {
        self.players.entry(guild_id).or_insert(player).clone()
    }

    pub fn get(&self, guild_id: u64) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|p| p.clone())
    }

    pub fn remove(&self, guild_id: u64) -> Option<Arc<Player>> {
        self.players.remove(&guild_id).map(|(_, p)| p)
    }

    pub fn all(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Conteo de players adjuntos por nodo, para la selección de respaldo.
    pub async fn count_by_node(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for player in self.all() {
            if let Some(node) = player.node_identifier().await {
                *counts.entry(node).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Players actualmente adjuntos al nodo dado (para failover).
    pub async fn attached_to(&self, node_identifier: &str) -> Vec<Arc<Player>> {
        let mut adjuntos = Vec::new();
        for player in self.all() {
            if player.node_identifier().await.as_deref() == Some(node_identifier) {
                adjuntos.push(player);
            }
        }
        adjuntos
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
