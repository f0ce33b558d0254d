//! # Arena Client Library
//!
//! The observer side of an arena shooter session. A client owns exactly one
//! player (its input-authority) and nothing else; every value it displays
//! comes from the server.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Local input moves the owned player immediately through the same movement
//! function the server runs, so controls feel responsive despite latency.
//!
//! ### Server Reconciliation
//! Each authoritative transform for the owned player is replayed forward with
//! the inputs the server has not acknowledged yet. The prediction only snaps
//! when the replayed result disagrees with it.
//!
//! ### Interpolation and Visibility Gating
//! Remote players and projectiles are smoothed toward their last
//! authoritative positions and never simulated locally. A projectile stays
//! hidden until its suppress counter runs out, so it first appears at the
//! position it was fired from.
//!
//! ## Module Organization
//!
//! - [`game`]: the [`game::ClientWorld`] view of players, projectiles and the match
//! - [`input`]: input sources and the sequencing [`input::InputSampler`]
//! - [`session`]: host/join/auto session creation with bounded retry and leave
//! - [`network`]: the fixed-rate client loop, reliable fact receipt and acks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::WanderInput;
//! use client::network::Client;
//! use client::session::{create_session, leave_channel, SessionConfig};
//! use shared::{Bus, Tuning};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bus = Bus::new();
//!     let (_leave, mut listener) = leave_channel();
//!
//!     let config = SessionConfig::default();
//!     let session = create_session(&config, &mut bus, &mut listener).await?;
//!
//!     let mut client = Client::new(session, Tuning::default(), Duration::ZERO);
//!     client.run(&mut WanderInput::new(1), listener).await?;
//!     client.leave().await;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod session;
