//! Live browser preview for markup documents.
//!
//! Edits flow from the host editor into [`application::lifecycle::PreviewCoordinator`],
//! which debounces them through [`application::throttle::ThrottleScheduler`]. Renders
//! land in [`cache::RenderCache`], and the preview server in [`infra::http`] serves the
//! cached fragment to browsers.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

mod util;
