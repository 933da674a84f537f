//! Vigil - model lifecycle and request admission for inference services
//!
//! Vigil sits in front of a single resident inference engine and decides
//! which requests reach it, and when.
//!
//! # Architecture
//!
//! - **admission**: dual-window rate limiting and deadline enforcement
//! - **engine**: model catalog, download/load/unload transitions, execution
//! - **params**: per-model generation parameter sets
//! - **telemetry**: request counters, latency and host health
//! - **gateway**: the single pipeline every call passes through
//! - **server** / **cli**: HTTP and command-line surfaces
//!
//! # Example
//!
//! ```bash
//! # Start the service with a config file
//! vigil serve --config vigil.yaml --model mistral-7b
//!
//! # Download weights without starting the service
//! vigil pull TheBloke/Mistral-7B-v0.1-GGUF --format gguf
//!
//! # List local models
//! vigil list
//! ```

pub mod admission;
pub mod app;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod loader;
pub mod logs;
pub mod maintenance;
pub mod params;
pub mod server;
pub mod telemetry;

// Re-export key types
pub use admission::{DeadlineGuard, RateLimiter, RequestContext};
pub use app::Services;
pub use config::{ServerConfig, VigilConfig};
pub use engine::{ModelDescriptor, ModelManager, ModelStatus};
pub use error::{Error, ErrorCategory, Result};
pub use gateway::RequestGateway;
pub use params::{GenerationParams, ParameterSet, ParameterStore};
pub use telemetry::TelemetryHub;
