//! Seeded, discrete-time epidemic simulation with player interventions and run scoring.

pub mod analysis;
pub mod config;
pub mod disease;
pub mod economy;
pub mod engine;
pub mod error;
pub mod interventions;
pub mod manager;
pub mod model;
pub mod rng;
pub mod scoring;
pub mod stats;
pub mod strategy;
pub mod variants;

pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;
pub use scoring::ScoreBreakdown;
