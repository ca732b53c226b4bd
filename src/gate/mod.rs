//! Synthesis gateway module
//!
//! Serves `POST /ai-stream` and `GET /health` over one configured provider.

pub mod config;
pub mod gateway;
pub mod handlers;
pub mod server;

pub use config::{ConfigFile, GatewayConfig};
pub use gateway::{DeltaStream, Gateway, Synthesis, SynthesisRequest};
pub use handlers::GatewayState;
pub use server::{router, start_server};
