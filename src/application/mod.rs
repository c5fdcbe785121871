//! Application services: rendering, scheduling, export, and host lifecycle.

pub mod error;
pub mod export;
pub mod lifecycle;
pub mod render;
pub mod repos;
pub mod throttle;
