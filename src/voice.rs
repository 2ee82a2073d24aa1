//! Correlación de paquetes de voz del gateway.
//!
//! El gateway del chat entrega las credenciales de voz en dos fragmentos
//! independientes por guild (`VOICE_SERVER_UPDATE` y `VOICE_STATE_UPDATE`);
//! este módulo los aparea por guild y emite el paquete completo que el
//! player necesita para adjuntarse a un nodo.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Credenciales de voz completas de un guild.
///
/// Existe solo entre la recepción de los paquetes del gateway y el attach;
/// se limpia al desconectar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceBundle {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

#[derive(Debug, Default)]
struct Pending {
    server: Option<(String, String, Instant)>, // (token, endpoint, recibido)
    state: Option<(String, Instant)>,          // (session_id, recibido)
}

/// Buffer de a lo sumo un fragmento de cada tipo por guild.
///
/// Los fragmentos sin pareja dentro de la ventana se descartan para
/// acotar memoria.
pub struct VoiceCorrelator {
    window: Duration,
    pending: DashMap<u64, Pending>,
}

impl VoiceCorrelator {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: DashMap::new() }
    }

    /// Registra el fragmento de servidor de voz de un guild.
    pub fn on_server_update(&self, guild_id: u64, token: String, endpoint: String) -> Option<VoiceBundle> {
        self.on_server_update_at(guild_id, token, endpoint, Instant::now())
    }

    /// Registra el fragmento de estado de voz (session id) de un guild.
    pub fn on_state_update(&self, guild_id: u64, session_id: String) -> Option<VoiceBundle> {
        self.on_state_update_at(guild_id, session_id, Instant::now())
    }

    pub(crate) fn on_server_update_at(
        &self,
        guild_id: u64,
        token: String,
        endpoint: String,
        now: Instant,
    ) -> Option<VoiceBundle> {
        let mut entry = self.pending.entry(guild_id).or_default();
        Self::purge_stale(&mut entry, self.window, now);
        entry.server = Some((token, endpoint, now));
        let completo = Self::try_complete(&entry);
        drop(entry);
        if completo.is_some() {
            self.pending.remove(&guild_id);
        }
        completo
    }

    pub(crate) fn on_state_update_at(
        &self,
        guild_id: u64,
        session_id: String,
        now: Instant,
    ) -> Option<VoiceBundle> {
        let mut entry = self.pending.entry(guild_id).or_default();
        Self::purge_stale(&mut entry, self.window, now);
        entry.state = Some((session_id, now));
        let completo = Self::try_complete(&entry);
        drop(entry);
        if completo.is_some() {
            self.pending.remove(&guild_id);
        }
        completo
    }

    /// Descarta todo fragmento pendiente de un guild (desconexión explícita).
    pub fn clear(&self, guild_id: u64) {
        self.pending.remove(&guild_id);
    }

    /// Barrido de fragmentos vencidos; devuelve los guilds afectados.
    pub fn sweep_expired(&self) -> Vec<u64> {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: Instant) -> Vec<u64> {
        let mut expirados = Vec::new();
        self.pending.retain(|guild_id, entry| {
            Self::purge_stale(entry, self.window, now);
            let vacio = entry.server.is_none() && entry.state.is_none();
            if vacio {
                debug!("🧹 Fragmentos de voz expirados para guild {}", guild_id);
                expirados.push(*guild_id);
            }
            !vacio
        });
        expirados
    }

    fn purge_stale(entry: &mut Pending, window: Duration, now: Instant) {
        if let Some((_, _, recibido)) = &entry.server {
            if now.duration_since(*recibido) > window {
                entry.server = None;
            }
        }
        if let Some((_, recibido)) = &entry.state {
            if now.duration_since(*recibido) > window {
                entry.state = None;
            }
        }
    }

    fn try_complete(entry: &Pending) -> Option<VoiceBundle> {
        match (&entry.server, &entry.state) {
            (Some((token, endpoint, _)), Some((session_id, _))) => Some(VoiceBundle {
                token: token.clone(),
                endpoint: endpoint.clone(),
                session_id: session_id.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GUILD: u64 = 998877;

    fn correlator() -> VoiceCorrelator {
        VoiceCorrelator::new(Duration::from_secs(15))
    }

    #[test]
    fn test_server_luego_estado_emite_un_bundle() {
        let c = correlator();
        let t0 = Instant::now();

        assert_eq!(
            c.on_server_update_at(GUILD, "tok".into(), "voz.ejemplo.com:443".into(), t0),
            None
        );
        let bundle = c
            .on_state_update_at(GUILD, "sesion-abc".into(), t0 + Duration::from_millis(80))
            .expect("ambos fragmentos presentes");

        assert_eq!(bundle.token, "tok");
        assert_eq!(bundle.endpoint, "voz.ejemplo.com:443");
        assert_eq!(bundle.session_id, "sesion-abc");

        // El buffer quedó limpio: un nuevo fragmento no completa nada
        assert_eq!(
            c.on_state_update_at(GUILD, "sesion-abc".into(), t0 + Duration::from_millis(100)),
            None
        );
    }

    #[test]
    fn test_orden_inverso_tambien_correlaciona() {
        let c = correlator();
        let t0 = Instant::now();

        assert_eq!(c.on_state_update_at(GUILD, "sesion".into(), t0), None);
        assert!(c
            .on_server_update_at(GUILD, "tok".into(), "ep:443".into(), t0 + Duration::from_secs(1))
            .is_some());
    }

    #[test]
    fn test_fragmento_fuera_de_ventana_no_correlaciona() {
        let c = correlator();
        let t0 = Instant::now();

        c.on_state_update_at(GUILD, "sesion-vieja".into(), t0);
        // El fragmento de servidor llega pasada la ventana: el estado ya expiró
        let tarde = t0 + Duration::from_secs(20);
        assert_eq!(
            c.on_server_update_at(GUILD, "tok".into(), "ep:443".into(), tarde),
            None
        );
    }

    #[test]
    fn test_guilds_independientes() {
        let c = correlator();
        let t0 = Instant::now();

        c.on_server_update_at(1, "tok1".into(), "ep1:443".into(), t0);
        c.on_server_update_at(2, "tok2".into(), "ep2:443".into(), t0);

        let bundle = c.on_state_update_at(2, "sesion2".into(), t0).unwrap();
        assert_eq!(bundle.token, "tok2");
        // El guild 1 sigue esperando su estado
        assert!(c.on_state_update_at(1, "sesion1".into(), t0).is_some());
    }

    #[test]
    fn test_sweep_reporta_guilds_expirados() {
        let c = correlator();
        let t0 = Instant::now();

        c.on_state_update_at(GUILD, "sesion".into(), t0);
        assert!(c.sweep_expired_at(t0 + Duration::from_secs(1)).is_empty());

        let expirados = c.sweep_expired_at(t0 + Duration::from_secs(30));
        assert_eq!(expirados, vec![GUILD]);
    }
}
