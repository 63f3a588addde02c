//! Source visitors used while building the module graph

pub mod require_discovery;

pub use require_discovery::{DiscoveredRequire, discover_requires};
