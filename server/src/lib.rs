//! # Arena Server Library
//!
//! The authoritative side of an arena shooter session. One process owns the
//! canonical state of every player, projectile and the match itself; every
//! other process only submits input and renders what it is told.
//!
//! ## Authority
//!
//! State-authority (who may write a value) is always the server. Input-authority
//! (who may drive an entity) belongs to the client that owns the entity. Inputs
//! naming an entity the sender does not own are rejected and logged, never
//! applied.
//!
//! ## Tick Order
//!
//! Each tick the server:
//! 1. advances the tick counter and respawns players whose timer ran out
//! 2. moves projectiles, resolves hits through the single damage path
//! 3. applies buffered inputs in timestamp order (movement, then firing)
//! 4. sends the facts produced this tick on every reliable channel
//! 5. broadcasts a snapshot with thinned player transforms and active projectiles
//!
//! ## Module Organization
//!
//! - [`client_manager`]: connections, input buffers, per-client reliable senders
//! - [`game`]: the authoritative [`game::GameState`] and its damage, respawn and
//!   match side effects
//! - [`network`]: UDP transport and the fixed-rate loop
//! - [`player`]: player records and the ownership-indexed player table
//! - [`projectile`]: the pooled projectile lifecycle and its visibility protocol
//! - [`world`]: swept collision queries against players and terrain
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod network;
pub mod player;
pub mod projectile;
pub mod world;
