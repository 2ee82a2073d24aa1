use std::collections::VecDeque;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::track::Track;

/// Modo de repetición de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Off,
    Track,
    Queue,
}

/// Cola de reproducción de un guild.
///
/// Propiedad exclusiva de un Player: toda mutación entra por las operaciones
/// del player, nunca desde dos llamadores a la vez.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    history: VecDeque<Track>,
    loop_mode: LoopMode,
    shuffle: bool,
    max_history: usize,
}

impl TrackQueue {
    pub fn new(max_history: usize) -> Self {
        Self {
            items: VecDeque::new(),
            history: VecDeque::new(),
            loop_mode: LoopMode::Off,
            shuffle: false,
            max_history,
        }
    }

    /// Agrega un track al final de la cola
    pub fn add(&mut self, track: Track) {
        debug!("➕ Agregado a la cola: {}", track.info.title);
        self.items.push_back(track);
    }

    /// Inserta un track en una posición específica
    pub fn add_at(&mut self, index: usize, track: Track) {
        let index = index.min(self.items.len());
        self.items.insert(index, track);
    }

    /// Avanza la cola tras terminar `finished`, aplicando el modo de loop
    pub fn advance(&mut self, finished: Option<Track>) -> Option<Track> {
        self.advance_with(finished, self.loop_mode)
    }

    /// Avance por skip: descarta el track actual aunque el loop sea de track
    pub fn advance_skipping(&mut self, finished: Option<Track>) -> Option<Track> {
        let mode = match self.loop_mode {
            LoopMode::Track => LoopMode::Off,
            otro => otro,
        };
        self.advance_with(finished, mode)
    }

    /// Avance tras una falla: sin loop, para no reintentar el mismo track
    pub fn advance_after_failure(&mut self, finished: Option<Track>) -> Option<Track> {
        self.advance_with(finished, LoopMode::Off)
    }

    fn advance_with(&mut self, finished: Option<Track>, mode: LoopMode) -> Option<Track> {
        if let Some(done) = finished {
            self.push_history(done.clone());
            match mode {
                LoopMode::Track => {
                    info!("🔂 Repitiendo track: {}", done.info.title);
                    return Some(done);
                }
                LoopMode::Queue => {
                    debug!("🔁 Track devuelto al final por loop de cola: {}", done.info.title);
                    self.items.push_back(done);
                }
                LoopMode::Off => {}
            }
        }
        self.next_pick()
    }

    /// Saca el siguiente track; con shuffle activo elige una posición al azar
    /// sin alterar el orden almacenado del resto.
    fn next_pick(&mut self) -> Option<Track> {
        if self.items.is_empty() {
            return None;
        }
        if self.shuffle {
            let index = rand::thread_rng().gen_range(0..self.items.len());
            self.items.remove(index)
        } else {
            self.items.pop_front()
        }
    }

    /// Elimina el track en la posición dada
    pub fn remove(&mut self, index: usize) -> Result<Track> {
        self.items.remove(index).ok_or(LinkError::InvalidIndex(index))
    }

    /// Mueve un track a una nueva posición
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.items.len() || to >= self.items.len() {
            return Err(LinkError::InvalidIndex(from.max(to)));
        }
        if from != to {
            if let Some(item) = self.items.remove(from) {
                self.items.insert(to, item);
                debug!("📍 Track movido de posición {} a {}", from, to);
            }
        }
        Ok(())
    }

    /// Limpia la cola (el historial se conserva)
    pub fn clear(&mut self) {
        self.items.clear();
        debug!("🗑️ Cola limpiada");
    }

    /// Elimina duplicados por handle codificado; devuelve cuántos quitó
    pub fn clear_duplicates(&mut self) -> usize {
        let mut vistos = std::collections::HashSet::new();
        let original = self.items.len();
        self.items.retain(|t| vistos.insert(t.encoded.clone()));
        original - self.items.len()
    }

    /// Orden de presentación aleatorio, sin mutar la secuencia almacenada
    pub fn shuffled_view(&self) -> Vec<&Track> {
        let mut vista: Vec<&Track> = self.items.iter().collect();
        vista.shuffle(&mut rand::thread_rng());
        vista
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Vista inmutable en orden de inserción
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    /// Historial, el más reciente primero
    pub fn history(&self) -> impl Iterator<Item = &Track> {
        self.history.iter()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => debug!("➡️ Repetición desactivada"),
            LoopMode::Track => debug!("🔂 Repetir track activado"),
            LoopMode::Queue => debug!("🔁 Repetir cola activado"),
        }
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle = enabled;
    }

    /// Duración total encolada (los streams no suman)
    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .filter(|t| !t.info.is_stream)
            .map(|t| Duration::from_millis(t.info.length.max(0) as u64))
            .sum()
    }

    fn push_history(&mut self, track: Track) {
        self.history.push_front(track);
        self.history.truncate(self.max_history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackInfo;
    use pretty_assertions::assert_eq;

    fn track(id: &str) -> Track {
        Track::new(
            format!("handle-{}", id),
            TrackInfo {
                identifier: id.to_string(),
                title: format!("Canción {}", id),
                author: "Autor".to_string(),
                length: 180_000,
                is_stream: false,
                is_seekable: true,
                uri: None,
                artwork_url: None,
                isrc: None,
                source_name: "youtube".to_string(),
                position: 0,
            },
        )
    }

    #[test]
    fn test_add_remove_restaura_tamano() {
        let mut q = TrackQueue::new(10);
        q.add(track("a"));
        q.add(track("b"));
        let antes = q.len();

        q.add(track("c"));
        q.remove(q.len() - 1).unwrap();
        assert_eq!(q.len(), antes);
    }

    #[test]
    fn test_clear_siempre_vacia() {
        let mut q = TrackQueue::new(10);
        for i in 0..5 {
            q.add(track(&i.to_string()));
        }
        q.clear();
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn test_advance_fifo() {
        let mut q = TrackQueue::new(10);
        q.add(track("a"));
        q.add(track("b"));

        assert_eq!(q.advance(None).unwrap(), track("a"));
        assert_eq!(q.advance(Some(track("a"))).unwrap(), track("b"));
        assert_eq!(q.advance(Some(track("b"))), None);
    }

    #[test]
    fn test_loop_track_no_cambia_la_cola() {
        let mut q = TrackQueue::new(10);
        q.add(track("siguiente"));
        q.set_loop_mode(LoopMode::Track);

        let repetido = q.advance(Some(track("actual"))).unwrap();
        assert_eq!(repetido, track("actual"));
        assert_eq!(q.len(), 1); // "siguiente" sigue intacto
    }

    #[test]
    fn test_loop_queue_reencola_al_final_una_sola_vez() {
        let mut q = TrackQueue::new(10);
        q.add(track("b"));
        q.set_loop_mode(LoopMode::Queue);

        let siguiente = q.advance(Some(track("a"))).unwrap();
        assert_eq!(siguiente, track("b"));

        let al_final: Vec<_> = q.tracks().cloned().collect();
        assert_eq!(al_final, vec![track("a")]);
    }

    #[test]
    fn test_loop_queue_con_cola_vacia_repite() {
        let mut q = TrackQueue::new(10);
        q.set_loop_mode(LoopMode::Queue);

        // Única canción en loop de cola: vuelve a salir ella misma
        assert_eq!(q.advance(Some(track("unica"))).unwrap(), track("unica"));
    }

    #[test]
    fn test_skip_ignora_loop_de_track() {
        let mut q = TrackQueue::new(10);
        q.add(track("b"));
        q.set_loop_mode(LoopMode::Track);

        assert_eq!(q.advance_skipping(Some(track("a"))).unwrap(), track("b"));
    }

    #[test]
    fn test_falla_no_reencola_con_loop_de_cola() {
        let mut q = TrackQueue::new(10);
        q.add(track("b"));
        q.set_loop_mode(LoopMode::Queue);

        assert_eq!(q.advance_after_failure(Some(track("rota"))).unwrap(), track("b"));
        assert!(q.is_empty()); // la rota no volvió a la cola
    }

    #[test]
    fn test_historial_mas_reciente_primero_y_acotado() {
        let mut q = TrackQueue::new(2);
        q.advance(Some(track("1")));
        q.advance(Some(track("2")));
        q.advance(Some(track("3")));

        let historial: Vec<_> = q.history().cloned().collect();
        assert_eq!(historial, vec![track("3"), track("2")]);
    }

    #[test]
    fn test_shuffled_view_no_muta_el_orden() {
        let mut q = TrackQueue::new(10);
        for i in 0..8 {
            q.add(track(&i.to_string()));
        }
        let _ = q.shuffled_view();

        let orden: Vec<_> = q.tracks().map(|t| t.info.identifier.clone()).collect();
        let esperado: Vec<_> = (0..8).map(|i| i.to_string()).collect();
        assert_eq!(orden, esperado);
    }

    #[test]
    fn test_shuffle_afecta_la_eleccion_no_el_orden() {
        let mut q = TrackQueue::new(10);
        for i in 0..6 {
            q.add(track(&i.to_string()));
        }
        q.set_shuffle(true);

        let elegido = q.advance(None).unwrap();
        assert_eq!(q.len(), 5);
        // El resto mantiene orden relativo de inserción
        let restantes: Vec<_> = q.tracks().map(|t| t.info.identifier.clone()).collect();
        let mut esperado: Vec<_> = (0..6).map(|i| i.to_string()).collect();
        esperado.retain(|id| *id != elegido.info.identifier);
        assert_eq!(restantes, esperado);
    }

    #[test]
    fn test_clear_duplicates() {
        let mut q = TrackQueue::new(10);
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("a"));

        assert_eq!(q.clear_duplicates(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_move_track() {
        let mut q = TrackQueue::new(10);
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("c"));

        q.move_track(2, 0).unwrap();
        let orden: Vec<_> = q.tracks().map(|t| t.info.identifier.clone()).collect();
        assert_eq!(orden, vec!["c", "a", "b"]);

        assert!(q.move_track(5, 0).is_err());
    }
}
