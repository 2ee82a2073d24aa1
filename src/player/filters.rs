//! Filtros DSP enviados tal cual al nodo.
//!
//! El player conserva el último set aplicado para reconciliarlo tras una
//! reconexión o una migración de nodo.

use serde::{Deserialize, Serialize};

/// Banda de ecualizador: índice 0-14, ganancia -0.25..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

/// 1.0 en todos los ejes = sin alteración
impl Default for Timescale {
    fn default() -> Self {
        Self { speed: 1.0, pitch: 1.0, rate: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tremolo {
    pub frequency: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vibrato {
    pub frequency: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Karaoke {
    pub level: f64,
    pub mono_level: f64,
    pub filter_band: f64,
    pub filter_width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Distortion {
    pub sin_offset: f64,
    pub sin_scale: f64,
    pub cos_offset: f64,
    pub cos_scale: f64,
    pub tan_offset: f64,
    pub tan_scale: f64,
    pub offset: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rotation {
    pub rotation_hz: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelMix {
    pub left_to_left: f64,
    pub left_to_right: f64,
    pub right_to_left: f64,
    pub right_to_right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LowPass {
    pub smoothing: f64,
}

/// Set de parámetros DSP con nombre; cada bloque ausente queda sin tocar
/// en el nodo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Filters::default()
    }

    /// Preset de refuerzo de graves (primeras bandas del EQ)
    pub fn bass_boost() -> Self {
        let gains = [0.20, 0.15, 0.10, 0.05, 0.0];
        Self {
            equalizer: Some(
                gains
                    .iter()
                    .enumerate()
                    .map(|(band, gain)| EqualizerBand { band: band as u8, gain: *gain })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Preset nightcore: velocidad y tono elevados
    pub fn nightcore() -> Self {
        Self {
            timescale: Some(Timescale { speed: 1.2, pitch: 1.2, rate: 1.0 }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_vacios_serializan_como_objeto_vacio() {
        let json = serde_json::to_string(&Filters::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_bass_boost_serializa_solo_equalizer() {
        let value = serde_json::to_value(Filters::bass_boost()).unwrap();
        assert!(value.get("equalizer").is_some());
        assert!(value.get("timescale").is_none());
        assert_eq!(value["equalizer"][0]["band"], 0);
    }

    #[test]
    fn test_round_trip_serde() {
        let filters = Filters {
            timescale: Some(Timescale { speed: 1.1, pitch: 0.9, rate: 1.0 }),
            low_pass: Some(LowPass { smoothing: 20.0 }),
            ..Default::default()
        };
        let json = serde_json::to_string(&filters).unwrap();
        let vuelta: Filters = serde_json::from_str(&json).unwrap();
        assert_eq!(vuelta, filters);
    }
}
