use criterion::{Criterion, criterion_group, criterion_main};
use std::fs;
use std::hint::black_box;
use std::path::Path;
use tempfile::TempDir;

use umdpack::config::Config;
use umdpack::orchestrator::BundleOrchestrator;
use umdpack::resolver::{ModuleResolver, NodeResolver};
use umdpack::visitors::discover_requires;

const LAYOUT_SOURCE: &str = r#"var dispatch = require("d3-dispatch");
var words = require("./words");
var sprite = require("./sprite");

// require("./commented-out") must not be picked up
var cloudRadians = Math.PI / 180;
var pattern = /require\("x"\)/g;

module.exports = function () {
  var size = [256, 256],
      event = dispatch("word", "end"),
      text = `words: ${words.length}`;

  function place(board, tag, bounds) {
    var perimeter = [{ x: 0, y: 0 }, { x: size[0], y: size[1] }];
    return sprite(board, tag, bounds, perimeter, cloudRadians);
  }

  return { place: place, event: event, label: text };
};
"#;

/// Create a small word cloud style project with a node_modules dependency
fn create_test_project(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir.join("lib"))?;
    fs::create_dir_all(dir.join("node_modules/d3-dispatch/src"))?;

    fs::write(
        dir.join("index.js"),
        "module.exports = require(\"./lib/layout\");\n",
    )?;
    fs::write(dir.join("lib/layout.js"), LAYOUT_SOURCE)?;
    fs::write(
        dir.join("lib/words.js"),
        "module.exports = require(\"../words.json\");\n",
    )?;
    fs::write(
        dir.join("lib/sprite.js"),
        "module.exports = function (board, tag) { return board && tag; };\n",
    )?;
    fs::write(dir.join("words.json"), "[\"alpha\", \"beta\", \"gamma\"]\n")?;
    fs::write(
        dir.join("node_modules/d3-dispatch/package.json"),
        r#"{"name": "d3-dispatch", "main": "src/index.js"}"#,
    )?;
    fs::write(
        dir.join("node_modules/d3-dispatch/src/index.js"),
        "module.exports = function () { return {}; };\n",
    )?;

    Ok(())
}

/// Benchmark the full bundling process
fn benchmark_bundling(c: &mut Criterion) {
    c.bench_function("bundle_word_cloud_project", |b| {
        b.iter_with_setup(
            || {
                // Setup: Create temp directory with test project
                let temp_dir = TempDir::new().expect("Failed to create temp dir");
                create_test_project(temp_dir.path()).expect("Failed to create test project");

                let config = Config::default()
                    .into_build_config(temp_dir.path())
                    .expect("Default configuration is valid");

                (temp_dir, config)
            },
            |(temp_dir, config)| {
                // Benchmark: Bundle the project
                BundleOrchestrator::new(black_box(config))
                    .build()
                    .expect("Bundling should succeed");

                // Keep temp_dir alive until benchmark completes
                drop(temp_dir);
            },
        );
    });
}

/// Benchmark module resolution
fn benchmark_module_resolution(c: &mut Criterion) {
    c.bench_function("resolve_specifiers", |b| {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        create_test_project(temp_dir.path()).expect("Failed to create test project");
        let referrer = temp_dir.path().join("lib/layout.js");

        b.iter(|| {
            // a fresh resolver per iteration so the memo cache does not hide the probing
            let resolver = NodeResolver::new(
                vec![".js".to_owned(), ".json".to_owned()],
                Default::default(),
                true,
            );
            let _ = resolver.resolve(black_box("./words"), &referrer);
            let _ = resolver.resolve(black_box("../words.json"), &referrer);
            let _ = resolver.resolve(black_box("d3-dispatch"), &referrer);
        });
    });
}

/// Benchmark require discovery
fn benchmark_require_discovery(c: &mut Criterion) {
    c.bench_function("discover_requires", |b| {
        b.iter(|| discover_requires(black_box(LAYOUT_SOURCE)));
    });
}

criterion_group!(
    benches,
    benchmark_bundling,
    benchmark_module_resolution,
    benchmark_require_discovery
);
criterion_main!(benches);
