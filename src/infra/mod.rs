//! Infrastructure adapters and runtime bootstrap.

pub mod assets;
pub mod browser;
pub mod documents;
pub mod error;
pub mod http;
pub mod telemetry;
pub mod watch;
