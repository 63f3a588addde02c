//! Streams a resolved [`ModuleGraph`] as one standalone script.
//!
//! The artifact has three layers:
//!
//! - a UMD wrapper that hands the bundle's export to `module.exports`, to
//!   AMD `define`, or to the configured global namespace, depending on the
//!   host that loads it;
//! - a small module runtime with a cache, so each module runs at most once
//!   and `require` only consults the bundle's own table (falling back to a
//!   host `require` that already existed);
//! - one record per module: the source wrapped in a CommonJS function plus
//!   the map from each literal specifier to its module id.
//!
//! Sources are re-read one at a time while writing, so memory use does not
//! grow with the size of the library.

use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, BuildResult};
use crate::module_graph::{Dependency, ModuleGraph, ModuleKind, ModuleNode};
use crate::namespace::{NamespacePath, render_installer};
use crate::util::{content_fingerprint, normalize_line_endings, strip_bom, strip_shebang};

const UMD_PRELUDE: &str = r#"(function (factory) {
  if (typeof exports === "object" && typeof module !== "undefined") {
    module.exports = factory();
  } else if (typeof define === "function" && define.amd) {
    define([], factory);
  } else {
    var g;
    if (typeof window !== "undefined") {
      g = window;
    } else if (typeof global !== "undefined") {
      g = global;
    } else if (typeof self !== "undefined") {
      g = self;
    } else {
      g = this;
    }
    var exported = factory();
"#;

const FACTORY_OPEN: &str = r#"  }
})(function () {
  var define, module, exports;
  return (function (modules, cache, entry) {
    var previousRequire = typeof require === "function" && require;
    function load(id) {
      if (!cache[id]) {
        var record = modules[id];
        var module = (cache[id] = { exports: {} });
        record[0].call(
          module.exports,
          function (specifier) {
            if (Object.prototype.hasOwnProperty.call(record[1], specifier)) {
              return load(record[1][specifier]);
            }
            if (previousRequire) {
              return previousRequire(specifier);
            }
            var err = new Error("Cannot find module '" + specifier + "'");
            err.code = "MODULE_NOT_FOUND";
            throw err;
          },
          module,
          module.exports
        );
      }
      return cache[id].exports;
    }
    return load(entry);
  })({
"#;

/// Id of the shared empty module that `browser`-disabled specifiers map to.
/// Real modules are numbered from 1.
const IGNORED_MODULE_ID: usize = 0;

const IGNORED_MODULE_RECORD: &str = "0: [function (require, module, exports) {\n// (ignored)\n}, {}]";

/// Summary of one emitted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitStats {
    pub modules: usize,
    pub bytes: u64,
}

/// Writes the artifact for one graph and namespace
#[derive(Debug)]
pub struct BundleEmitter<'a> {
    graph: &'a ModuleGraph,
    namespace: &'a NamespacePath,
    /// Module paths in comments are shown relative to this directory
    root: PathBuf,
    /// Reported in write errors
    destination: PathBuf,
}

impl<'a> BundleEmitter<'a> {
    pub fn new(graph: &'a ModuleGraph, namespace: &'a NamespacePath) -> Self {
        let root = graph
            .entry()
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            graph,
            namespace,
            root,
            destination: PathBuf::from("<output stream>"),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn emit<W: Write>(&self, writer: W) -> BuildResult<EmitStats> {
        let mut out = CountingWriter::new(writer);
        let order = self.graph.emission_order();
        let ids: FxHashMap<&Path, usize> = order
            .iter()
            .enumerate()
            .map(|(index, module)| (module.path.as_path(), index + 1))
            .collect();
        let entry_id = ids
            .get(self.graph.entry().path.as_path())
            .copied()
            .unwrap_or(1);

        self.write(&mut out, UMD_PRELUDE)?;
        for line in render_installer(self.namespace, "g", "exported").lines() {
            self.write(&mut out, &format!("    {line}\n"))?;
        }
        self.write(&mut out, FACTORY_OPEN)?;

        let any_ignored = order.iter().any(|module| {
            module
                .dependencies
                .values()
                .any(|dependency| *dependency == Dependency::Ignored)
        });
        if any_ignored {
            self.write(&mut out, IGNORED_MODULE_RECORD)?;
        }

        for (index, module) in order.iter().enumerate() {
            let id = index + 1;
            trace!("Emitting module {} as id {}", module.path.display(), id);
            if index > 0 || any_ignored {
                self.write(&mut out, ",\n")?;
            }
            self.write_module(&mut out, id, module, &ids)?;
        }

        self.write(&mut out, &format!("\n  }}, {{}}, {entry_id});\n}});\n"))?;
        out.flush()
            .map_err(|e| BuildError::filesystem("Failed to flush bundle", &self.destination, e))?;

        debug!(
            "Emitted {} modules ({} bytes), entry id {}",
            order.len(),
            out.written,
            entry_id
        );
        Ok(EmitStats {
            modules: order.len(),
            bytes: out.written,
        })
    }

    fn write_module<W: Write>(
        &self,
        out: &mut W,
        id: usize,
        module: &ModuleNode,
        ids: &FxHashMap<&Path, usize>,
    ) -> BuildResult<()> {
        let read_error = |e| BuildError::filesystem("Failed to read module", &module.path, e);
        let bytes = fs::read(&module.path).map_err(read_error)?;
        if content_fingerprint(&bytes) != module.fingerprint {
            return Err(read_error(io::Error::other(
                "module changed on disk while the bundle was being built",
            )));
        }
        let raw = String::from_utf8(bytes)
            .map_err(|e| read_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let text = normalize_line_endings(strip_bom(&raw));

        let label = module
            .path
            .strip_prefix(&self.root)
            .unwrap_or(&module.path)
            .display()
            .to_string()
            .replace(['\r', '\n'], " ");

        self.write(
            out,
            &format!("{id}: [function (require, module, exports) {{\n// {label}\n"),
        )?;

        match module.kind {
            ModuleKind::Script => {
                let body = strip_shebang(&text);
                self.write(out, &body)?;
                if !body.ends_with('\n') {
                    self.write(out, "\n")?;
                }
            }
            ModuleKind::Json => {
                let body = text.trim();
                self.write(out, &format!("module.exports = {body};\n"))?;
            }
        }

        let dependencies = dependency_map(module, ids);
        self.write(out, &format!("}}, {dependencies}]"))
    }

    fn write<W: Write>(&self, out: &mut W, text: &str) -> BuildResult<()> {
        out.write_all(text.as_bytes())
            .map_err(|e| BuildError::filesystem("Failed to write bundle", &self.destination, e))
    }
}

/// `{"./lib/cloud": 2, ...}` for a module's bundled dependencies. External
/// specifiers are left out so the runtime hands them to the host `require`;
/// disabled ones point at the empty module.
fn dependency_map(module: &ModuleNode, ids: &FxHashMap<&Path, usize>) -> String {
    let map: indexmap::IndexMap<&str, usize> = module
        .dependencies
        .iter()
        .filter_map(|(specifier, dependency)| match dependency {
            Dependency::Module(path) => ids
                .get(path.as_path())
                .map(|&id| (specifier.as_str(), id)),
            Dependency::Ignored => Some((specifier.as_str(), IGNORED_MODULE_ID)),
            Dependency::External => None,
        })
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_owned())
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    const fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
