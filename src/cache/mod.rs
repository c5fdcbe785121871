//! Render cache: the latest rendered fragment per open document.

mod store;

pub use store::RenderCache;

pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
