// MIT License - Copyright (c) 2026 Peter Wright
// Telenot GMS telegram protocol client
//
//! # telenot-gms
//!
//! Client for the byte-oriented GMS telegram protocol spoken by Telenot
//! alarm-panel bus gateways over TCP.
//!
//! The crate frames and validates telegrams ([`telegram`]), expands data
//! telegrams into typed message blocks ([`message`]), sends area commands
//! through the announce/data acknowledgement handshake
//! ([`transport::command`]) and discovers the configured names of bus
//! addresses ([`transport::discovery`]). [`TelenotPanel`] ties these
//! together around one shared connection with a background listener.
//!
//! ## Quick Start
//!
//! ```no_run
//! use telenot_gms::{ConnectionConfig, TelenotPanel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConnectionConfig::builder()
//!         .host("192.168.0.50")
//!         .port(8234)
//!         .build();
//!
//!     let mut panel = TelenotPanel::connect(config).await?;
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.arm_away(1).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod message;
pub mod panel;
pub mod protocol;
pub mod telegram;
pub mod text;
pub mod transport;

// Re-exports for convenience
pub use config::{ArmType, ConnectionConfig, ConnectionConfigBuilder};
pub use constants::{AlarmKind, MessageType};
pub use error::{FrameError, GmsError, Result};
pub use event::{EventReceiver, PanelEvent};
pub use message::{AreaStatusFlags, BlockStatusFields, MessageBlock, StateChangeFields};
pub use panel::TelenotPanel;
pub use protocol::Command;
pub use telegram::Telegram;
pub use text::{DecodedText, TextEncoding};
pub use transport::command::{CommandOutcome, CommandPhase, CommandSession, PhaseFailure};
pub use transport::connection::Connection;
pub use transport::discovery::{DiscoveryEngine, DiscoveryReport, NameCache, RetryPolicy};
