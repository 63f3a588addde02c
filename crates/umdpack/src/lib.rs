pub mod combine;
pub mod config;
pub mod dirs;
pub mod emit;
pub mod error;
pub mod module_graph;
pub mod namespace;
pub mod orchestrator;
pub mod output;
pub mod resolver;
pub mod sink;
pub mod util;
pub mod visitors;

pub use config::{BuildConfig, Config};
pub use error::{BuildError, BuildResult};
pub use namespace::NamespacePath;
pub use orchestrator::{BuildHandle, BuildReport, BundleOrchestrator};
