//! # Open Link
//!
//! High-performance Lavalink/Nodelink client for Discord music bots.
//!
//! This library orchestrates one or more audio-routing nodes on behalf of a
//! voice-capable bot, exposing per-guild playback control while hiding node
//! selection, reconnection, voice-session correlation, and wire-protocol
//! details.
//!
//! ## Architecture
//!
//! The system is built around a handful of components:
//!
//! ### [`manager`] - Manager Facade
//! - The only object the host application addresses
//! - Owns the node and player registries, the voice correlator and the
//!   persistence port
//! - Routes every inbound node message through a single dispatch task,
//!   preserving per-guild event ordering
//!
//! ### [`node`] - Nodes
//! - One REST client + one persistent socket client per node
//! - Session resume inside a configurable grace window
//! - Reconnection with exponential backoff and deterministic selection
//!   (region preference, load ratio, registration order)
//!
//! ### [`player`] - Players
//! - Per-guild playback state machine with its own queue
//! - All mutations serialized per guild: user commands never race against
//!   asynchronously arriving node events
//!
//! ### [`track`] - Tracks
//! - Opaque handle codec (base64 over a length-prefixed binary body)
//! - Round-trip law: `decode(encode(info)) == info`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use open_link::{GatewaySender, LinkManager, LinkOptions, NodeConfig};
//!
//! struct MiGateway;
//!
//! #[async_trait::async_trait]
//! impl GatewaySender for MiGateway {
//!     async fn send(&self, _guild_id: u64, _payload: serde_json::Value) -> anyhow::Result<()> {
//!         // reenviar al gateway del bot
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let nodos = vec![NodeConfig {
//!     identifier: "principal".into(),
//!     host: "localhost".into(),
//!     port: 2333,
//!     secure: false,
//!     password: "youshallnotpass".into(),
//!     regions: vec![],
//!     resume: true,
//!     capacity: 1000,
//! }];
//!
//! let manager = LinkManager::new(LinkOptions::default(), nodos, Arc::new(MiGateway))?;
//! let mut eventos = manager.take_event_stream().unwrap();
//! manager.init(111222333);
//!
//! let player = manager.create_player(987654321, 1122334455, None).await?;
//! player.connect().await?;
//!
//! let resultado = manager.search("never gonna give you up", None).await?;
//! if let Some(track) = resultado.first() {
//!     player.play(Some(track.clone())).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod node;
pub mod player;
pub mod sources;
pub mod storage;
pub mod track;
pub mod voice;

pub use config::{LinkOptions, NodeConfig};
pub use error::{LinkError, Result};
pub use events::{EndReason, LinkEvent};
pub use manager::{GatewaySender, LinkManager};
pub use node::{Node, NodeState, NodeStats};
pub use player::filters::Filters;
pub use player::queue::LoopMode;
pub use player::{Player, PlayerLifecycle};
pub use sources::SearchSource;
pub use storage::{JsonPlayerStore, PlayerSnapshot, PlayerStore};
pub use track::{SearchResult, Track, TrackInfo};
pub use voice::{VoiceBundle, VoiceCorrelator};
