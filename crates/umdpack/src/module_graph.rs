use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, BuildResult};
use crate::resolver::{ModuleResolver, Resolution};
use crate::util::{content_fingerprint, strip_bom};
use crate::visitors::discover_requires;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// CommonJS source, wrapped in a function
    Script,
    /// JSON document, exported as `module.exports`
    Json,
}

impl ModuleKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Script,
        }
    }
}

/// What a specifier in a module's dependency map points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Module(PathBuf),
    External,
    /// Disabled by a `browser` field; served by the shared empty module
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// Fingerprint of the bytes the dependency map was built from
    pub fingerprint: u64,
    /// Specifier as written in the source -> its target, in discovery order
    pub dependencies: IndexMap<String, Dependency>,
}

/// Dependency graph of the modules reachable from one entry.
///
/// Edges run from dependency to dependent, so a topological walk yields
/// dependencies first.
#[derive(Debug)]
pub struct ModuleGraph {
    graph: DiGraph<ModuleNode, ()>,
    node_indices: FxHashMap<PathBuf, NodeIndex>,
    entry: NodeIndex,
}

impl ModuleGraph {
    fn with_entry(entry: ModuleNode) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = FxHashMap::default();
        let path = entry.path.clone();
        let index = graph.add_node(entry);
        node_indices.insert(path, index);
        Self {
            graph,
            node_indices,
            entry: index,
        }
    }

    /// Add a module, or return the existing node for the same path
    pub fn add_module(&mut self, module: ModuleNode) -> NodeIndex {
        if let Some(&existing) = self.node_indices.get(&module.path) {
            return existing;
        }
        let path = module.path.clone();
        let index = self.graph.add_node(module);
        self.node_indices.insert(path, index);
        index
    }

    /// Record that `dependent` requires `dependency`
    pub fn add_dependency(&mut self, dependency: &Path, dependent: &Path) -> BuildResult<()> {
        let from = self.index_of(dependency)?;
        let to = self.index_of(dependent)?;
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    fn index_of(&self, path: &Path) -> BuildResult<NodeIndex> {
        self.node_indices.get(path).copied().ok_or_else(|| {
            BuildError::resolution(
                &path.display().to_string(),
                path,
                "module is not part of the graph",
            )
        })
    }

    pub fn entry(&self) -> &ModuleNode {
        &self.graph[self.entry]
    }

    pub fn get_module(&self, path: &Path) -> Option<&ModuleNode> {
        self.node_indices.get(path).map(|&index| &self.graph[index])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Modules in evaluation-safe order: every module comes after the modules it
    /// depends on. Members of a dependency cycle keep their discovery order.
    pub fn emission_order(&self) -> Vec<&ModuleNode> {
        // tarjan_scc yields components in reverse topological order
        let mut components = tarjan_scc(&self.graph);
        components.reverse();

        components
            .into_iter()
            .flat_map(|mut component| {
                component.sort_unstable();
                component
            })
            .map(|index| &self.graph[index])
            .collect()
    }

    /// Groups of modules that require each other, directly or transitively
    pub fn cycles(&self) -> Vec<Vec<&Path>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.graph.contains_edge(component[0], component[0])
            })
            .map(|mut component| {
                component.sort_unstable();
                component
                    .into_iter()
                    .map(|index| self.graph[index].path.as_path())
                    .collect()
            })
            .collect()
    }

    /// Discover every module reachable from `entry` through `resolver`.
    ///
    /// Sources are scanned and dropped again; the emitter re-reads them while
    /// streaming and checks them against the recorded fingerprint. Any
    /// unresolvable specifier or unparsable module aborts the whole walk.
    pub fn build(entry: &Path, resolver: &dyn ModuleResolver) -> BuildResult<Self> {
        let entry_path = resolver.resolve_entry(entry)?;
        info!("Entry module: {:?}", entry_path);

        let mut graph = Self::with_entry(scan_module(&entry_path, resolver)?);
        let mut queue = VecDeque::from([graph.entry]);

        while let Some(index) = queue.pop_front() {
            let dependent = graph.graph[index].path.clone();
            let targets: Vec<PathBuf> = graph.graph[index]
                .dependencies
                .values()
                .filter_map(|dep| match dep {
                    Dependency::Module(path) => Some(path.clone()),
                    Dependency::External | Dependency::Ignored => None,
                })
                .collect();

            for target in targets {
                if !graph.node_indices.contains_key(&target) {
                    debug!("Discovered module {:?}", target);
                    let node = scan_module(&target, resolver)?;
                    queue.push_back(graph.add_module(node));
                }
                graph.add_dependency(&target, &dependent)?;
            }
        }

        info!("Dependency graph built with {} modules", graph.len());
        for cycle in graph.cycles() {
            warn!(
                "Circular dependency between {:?}; modules in the cycle may observe partially initialized exports",
                cycle
            );
        }

        Ok(graph)
    }
}

/// Read one module, check that it parses and resolve its requires
fn scan_module(path: &Path, resolver: &dyn ModuleResolver) -> BuildResult<ModuleNode> {
    let kind = ModuleKind::from_path(path);
    let bytes =
        fs::read(path).map_err(|e| BuildError::filesystem("Failed to read module", path, e))?;
    let fingerprint = content_fingerprint(&bytes);
    let source = std::str::from_utf8(&bytes).map_err(|e| {
        BuildError::filesystem(
            "Failed to read module",
            path,
            io::Error::new(io::ErrorKind::InvalidData, e),
        )
    })?;
    let source = strip_bom(source);
    let unparsable =
        |reason: String| BuildError::resolution(&path.display().to_string(), path, reason);

    let mut dependencies = IndexMap::new();
    match kind {
        ModuleKind::Json => {
            serde_json::from_str::<serde::de::IgnoredAny>(source)
                .map_err(|e| unparsable(format!("invalid JSON: {e}")))?;
        }
        ModuleKind::Script => {
            let requires = discover_requires(source)
                .map_err(|e| unparsable(format!("invalid JavaScript: {e}")))?;
            for require in requires {
                if dependencies.contains_key(&require.specifier) {
                    continue;
                }
                trace!(
                    "{}:{} requires '{}'",
                    path.display(),
                    require.line,
                    require.specifier
                );
                let dependency = match resolver.resolve(&require.specifier, path)? {
                    Resolution::Module(target) => Dependency::Module(target),
                    Resolution::External(_) => Dependency::External,
                    Resolution::Ignored => Dependency::Ignored,
                };
                dependencies.insert(require.specifier, dependency);
            }
        }
    }

    Ok(ModuleNode {
        path: path.to_path_buf(),
        kind,
        fingerprint,
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NodeResolver;
    use indexmap::IndexSet;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            let path = temp.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        temp
    }

    fn resolver() -> NodeResolver {
        NodeResolver::new(
            vec![".js".to_owned(), ".json".to_owned()],
            IndexSet::from(["external-lib".to_owned()]),
            true,
        )
    }

    fn names(modules: &[&ModuleNode]) -> Vec<String> {
        modules
            .iter()
            .map(|m| m.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let temp = project(&[
            ("index.js", "var a = require('./a'); var b = require('./b');"),
            ("a.js", "module.exports = require('./shared') + 1;"),
            ("b.js", "var s = require('./shared'); var c = require('./config.json');"),
            ("shared.js", "module.exports = 1;"),
            ("config.json", "{\"x\": 1}"),
            ("unused.js", "module.exports = 'never required';"),
        ]);

        let graph = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap();
        let order = names(&graph.emission_order());

        assert_eq!(order.len(), 5);
        assert!(!order.contains(&"unused.js".to_owned()));
        assert_eq!(order.last().map(String::as_str), Some("index.js"));
        assert!(position(&order, "shared.js") < position(&order, "a.js"));
        assert!(position(&order, "shared.js") < position(&order, "b.js"));
        assert!(position(&order, "config.json") < position(&order, "b.js"));
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn test_dependency_maps_and_kinds() {
        let temp = project(&[
            (
                "index.js",
                "require('./lib'); require('./lib'); require('external-lib'); require('./data.json');",
            ),
            ("lib.js", ""),
            ("data.json", "[]"),
        ]);

        let graph = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap();
        let entry = graph.entry();

        assert_eq!(
            entry.dependencies.keys().cloned().collect::<Vec<_>>(),
            vec!["./lib", "external-lib", "./data.json"]
        );
        assert_eq!(entry.dependencies["external-lib"], Dependency::External);

        let Dependency::Module(data) = &entry.dependencies["./data.json"] else {
            panic!("data.json should resolve to a module");
        };
        assert_eq!(graph.get_module(data).map(|m| m.kind), Some(ModuleKind::Json));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_cycles_are_kept_and_reported() {
        let temp = project(&[
            ("index.js", "require('./even');"),
            ("even.js", "require('./odd'); require('./leaf');"),
            ("odd.js", "require('./even');"),
            ("leaf.js", ""),
        ]);

        let graph = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap();
        let order = names(&graph.emission_order());

        assert_eq!(order.len(), 4);
        assert!(position(&order, "leaf.js") < position(&order, "even.js"));
        assert_eq!(order.last().map(String::as_str), Some("index.js"));

        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }

    #[test]
    fn test_missing_dependency_fails_the_walk() {
        let temp = project(&[
            ("index.js", "require('./present');"),
            ("present.js", "require('./absent');"),
        ]);

        let err = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("./absent"));
    }

    #[test]
    fn test_missing_entry_fails() {
        let temp = project(&[]);
        let err = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn test_requires_after_division_join_the_graph() {
        let temp = project(&[
            ("index.js", "var n = 1;\nvar half = n++ / 2;\nmodule.exports = require('./dep');\n"),
            ("dep.js", "if (half) /\"/.test(s); module.exports = require(\"./leaf\");"),
            ("leaf.js", "module.exports = 1;"),
        ]);

        let graph = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap();
        assert_eq!(names(&graph.emission_order()), vec!["leaf.js", "dep.js", "index.js"]);
    }

    #[test]
    fn test_invalid_json_fails_the_walk() {
        let temp = project(&[
            ("index.js", "module.exports = require('./data.json');"),
            ("data.json", "{ \"a\": 1,, }"),
        ]);

        let err = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("invalid JSON"), "{err}");
    }

    #[test]
    fn test_invalid_javascript_fails_the_walk() {
        let temp = project(&[
            ("index.js", "require('./broken');"),
            ("broken.js", "module.exports = function ( {;"),
        ]);

        let err = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("broken.js"), "{err}");
        assert!(err.to_string().contains("invalid JavaScript"), "{err}");
    }

    #[test]
    fn test_browser_disabled_modules_stay_out_of_the_graph() {
        let temp = project(&[
            ("package.json", r#"{"browser": {"./server.js": false}}"#),
            ("index.js", "require('./server'); require('./client');"),
            ("server.js", "require('http');"),
            ("client.js", ""),
        ]);

        let graph = ModuleGraph::build(&temp.path().join("index.js"), &resolver()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.entry().dependencies["./server"], Dependency::Ignored);
    }
}
