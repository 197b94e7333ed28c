//! # Fuseguard - fuse-aware EV charger load balancer
//!
//! Keeps an EV charger's current limit below what the home's main fuse can
//! carry, per phase, while giving the car as much current as is safe.
//!
//! ## Features
//!
//! - **Two policies**: risk-tolerant (optimised) mode driven by a breaker
//!   thermal model, or zero-tolerance (conservative) mode
//! - **Hysteresis**: limits are only raised again after a stable surplus window
//!   that grows when usage is unstable
//! - **Per-phase control**: independent state per phase, with coalescing for
//!   chargers that apply one limit to all phases
//! - **Capability traits**: any meter or charger behind `Meter` / `Charger`
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `breaker`: Breaker trip-curve thermal model
//! - `meter` / `charger`: Device capabilities consumed by the engine
//! - `device`: Binding device records to implementations at setup
//! - `balancer`: Pure per-phase decision logic
//! - `controller`: Tick loop, command issuing and snapshots
//! - `events`: Limit-change and fault events
//! - `simulation`: Simulated meter and charger

pub mod balancer;
pub mod breaker;
pub mod charger;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod meter;
pub mod simulation;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use controller::LoadBalancerController;
pub use error::{FuseguardError, Result};
