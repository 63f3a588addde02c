use log::{debug, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::config::BuildConfig;
use crate::emit::{BundleEmitter, EmitStats};
use crate::error::{BuildError, BuildResult};
use crate::module_graph::ModuleGraph;
use crate::output::prepare_output_dir;
use crate::resolver::{ModuleResolver, NodeResolver};
use crate::sink::ArtifactSink;

/// Outcome of a finished build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output_path: PathBuf,
    pub modules: usize,
    pub bytes: u64,
}

pub struct BundleOrchestrator {
    config: BuildConfig,
    resolver: Box<dyn ModuleResolver>,
}

impl std::fmt::Debug for BundleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BundleOrchestrator {
    /// Orchestrator with Node-style resolution configured from `config`
    pub fn new(config: BuildConfig) -> Self {
        let resolver = NodeResolver::from_config(&config);
        Self::with_resolver(config, Box::new(resolver))
    }

    pub fn with_resolver(config: BuildConfig, resolver: Box<dyn ModuleResolver>) -> Self {
        Self { config, resolver }
    }

    pub const fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Prepare the output directory, bundle, and wait until the artifact is on disk
    pub fn build(&self) -> BuildResult<BuildReport> {
        info!("Starting bundle process");
        prepare_output_dir(&self.config.output_dir)?;
        self.start()?.wait()
    }

    /// Resolve the whole graph, then start streaming the artifact to the
    /// output file. Returns as soon as bytes are flowing; the output
    /// directory must already exist.
    pub fn start(&self) -> BuildResult<BuildHandle> {
        let graph = self.resolve_graph()?;
        let output_path = self.config.output_path();
        debug!("Output: {:?}", output_path);

        let (mut writer, sink) = ArtifactSink::open(&output_path)?;
        let namespace = self.config.namespace.clone();
        let destination = output_path.clone();

        let producer = thread::Builder::new()
            .name("umdpack-emit".to_owned())
            .spawn(move || {
                let stats = BundleEmitter::new(&graph, &namespace)
                    .with_destination(&destination)
                    .emit(&mut writer)?;
                writer.finish().map_err(|e| {
                    BuildError::filesystem("Failed to write bundle", &destination, e)
                })?;
                Ok(stats)
            });

        let producer = match producer {
            Ok(handle) => handle,
            Err(e) => {
                // the writer went down with the closure, so the sink sees a closed channel
                sink.discard()?;
                return Err(BuildError::filesystem(
                    "Failed to start bundle emitter",
                    output_path,
                    e,
                ));
            }
        };

        Ok(BuildHandle {
            output_path,
            producer,
            sink,
        })
    }

    /// Resolve and emit the artifact into `writer` on the calling thread
    pub fn bundle_to_writer<W: Write>(&self, writer: W) -> BuildResult<EmitStats> {
        let graph = self.resolve_graph()?;
        BundleEmitter::new(&graph, &self.config.namespace).emit(writer)
    }

    fn resolve_graph(&self) -> BuildResult<ModuleGraph> {
        debug!("Entry: {:?}", self.config.entry);
        debug!("Global namespace: {}", self.config.namespace);
        ModuleGraph::build(&self.config.entry, self.resolver.as_ref())
    }
}

/// A build whose artifact is still being streamed to disk
#[derive(Debug)]
pub struct BuildHandle {
    output_path: PathBuf,
    producer: JoinHandle<BuildResult<EmitStats>>,
    sink: ArtifactSink,
}

impl BuildHandle {
    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }

    /// Block until the artifact is flushed, closed and moved onto the output
    /// path. On failure the previous artifact, if any, is left in place.
    pub fn wait(self) -> BuildResult<BuildReport> {
        let produced = self.producer.join().unwrap_or_else(|_| {
            Err(BuildError::filesystem(
                "Bundle emitter panicked",
                &self.output_path,
                std::io::Error::other("emitter thread panicked"),
            ))
        });

        let stats = match produced {
            Ok(stats) => stats,
            Err(producer_error) => {
                // a failing consumer makes the producer fail with a closed
                // channel, so the consumer's error is the root cause
                self.sink.discard()?;
                warn!("Discarded partial artifact for {:?}", self.output_path);
                return Err(producer_error);
            }
        };

        let bytes = self.sink.commit()?;
        if bytes != stats.bytes {
            warn!(
                "Emitter produced {} bytes but {} reached {:?}",
                stats.bytes, bytes, self.output_path
            );
        }

        let report = BuildReport {
            output_path: self.output_path,
            modules: stats.modules,
            bytes,
        };
        info!(
            "Bundle written to {:?} ({} modules, {} bytes)",
            report.output_path, report.modules, report.bytes
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespacePath;
    use indexmap::IndexSet;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path) -> BuildConfig {
        BuildConfig {
            entry: root.join("index.js"),
            namespace: NamespacePath::parse("d3.layout.cloud").unwrap(),
            output_dir: root.join("build"),
            output_file: "d3.layout.cloud.js".to_owned(),
            extensions: vec![".js".to_owned(), ".json".to_owned()],
            external: IndexSet::new(),
            browser_field: true,
        }
    }

    #[test]
    fn test_build_writes_artifact() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("index.js"),
            "var words = require('./words');\nmodule.exports = { words: words };\n",
        )
        .unwrap();
        fs::write(temp.path().join("words.js"), "module.exports = ['a'];\n").unwrap();

        let report = BundleOrchestrator::new(config(temp.path())).build().unwrap();

        let output = temp.path().join("build/d3.layout.cloud.js");
        assert_eq!(report.output_path, output);
        assert_eq!(report.modules, 2);
        let written = fs::read(&output).unwrap();
        assert_eq!(report.bytes, written.len() as u64);
    }

    #[test]
    fn test_file_output_matches_writer_output() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.js"), "module.exports = 1;\n").unwrap();

        let orchestrator = BundleOrchestrator::new(config(temp.path()));
        let mut in_memory = Vec::new();
        orchestrator.bundle_to_writer(&mut in_memory).unwrap();
        orchestrator.build().unwrap();

        assert_eq!(
            fs::read(temp.path().join("build/d3.layout.cloud.js")).unwrap(),
            in_memory
        );
    }

    #[test]
    fn test_missing_entry_creates_no_output() {
        let temp = TempDir::new().unwrap();

        let err = BundleOrchestrator::new(config(temp.path()))
            .build()
            .unwrap_err();

        assert!(err.is_resolution());
        let build_dir = temp.path().join("build");
        assert!(build_dir.is_dir());
        assert_eq!(fs::read_dir(&build_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_start_requires_prepared_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.js"), "").unwrap();

        let err = BundleOrchestrator::new(config(temp.path()))
            .start()
            .unwrap_err();
        assert!(err.is_filesystem());
    }

    #[test]
    fn test_failed_rename_leaves_no_temporary_file() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        fs::write(&cfg.entry, "module.exports = 1;").unwrap();
        // a non-empty directory squatting on the output path cannot be replaced
        fs::create_dir_all(cfg.output_path().join("keep")).unwrap();

        let err = BundleOrchestrator::new(cfg.clone()).build().unwrap_err();

        assert!(err.is_filesystem());
        assert!(cfg.output_path().join("keep").is_dir());
        let leftovers = fs::read_dir(&cfg.output_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".umdpack-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
