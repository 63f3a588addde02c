use indexmap::IndexSet;
use log::{debug, trace};
use oxc_resolver::{ResolveError, ResolveOptions, Resolver};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};

/// Node built-ins that a browser bundle cannot carry without shims
const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "events",
    "fs",
    "http",
    "https",
    "net",
    "os",
    "path",
    "stream",
    "string_decoder",
    "url",
    "util",
    "zlib",
];

/// Where a `require` specifier leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A module file to bundle, by canonical path
    Module(PathBuf),
    /// Left to the host's own `require` at runtime
    External(String),
    /// Mapped to `false` by a package's `browser` field; bundled as an empty module
    Ignored,
}

/// Maps specifiers to module files. The bundler only hands over the graph
/// root and each discovered specifier, so implementations are free to use
/// any lookup rules.
pub trait ModuleResolver {
    /// Locate the entry module itself
    fn resolve_entry(&self, entry: &Path) -> BuildResult<PathBuf>;

    /// Resolve `specifier` as required from the module at `referrer`
    fn resolve(&self, specifier: &str, referrer: &Path) -> BuildResult<Resolution>;
}

/// Node-style resolution backed by `oxc_resolver`: extension and index
/// probing, `node_modules` lookup, `package.json` entry fields and, for
/// browser builds, the string and object forms of the `browser` field.
pub struct NodeResolver {
    resolver: Resolver,
    external: IndexSet<String>,
    browser_field: bool,
}

impl fmt::Debug for NodeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeResolver")
            .field("external", &self.external)
            .field("browser_field", &self.browser_field)
            .finish_non_exhaustive()
    }
}

impl NodeResolver {
    pub fn new(extensions: Vec<String>, external: IndexSet<String>, browser_field: bool) -> Self {
        let mut main_fields = vec!["main".to_owned()];
        let mut alias_fields = Vec::new();
        let mut condition_names = vec!["require".to_owned(), "default".to_owned()];
        if browser_field {
            main_fields.insert(0, "browser".to_owned());
            alias_fields.push(vec!["browser".to_owned()]);
            condition_names.insert(0, "browser".to_owned());
        }

        let options = ResolveOptions {
            extensions,
            main_fields,
            alias_fields,
            condition_names,
            ..ResolveOptions::default()
        };
        Self {
            resolver: Resolver::new(options),
            external,
            browser_field,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(
            config.extensions.clone(),
            config.external.clone(),
            config.browser_field,
        )
    }

    fn is_external(&self, specifier: &str) -> bool {
        self.external.contains(specifier) || self.external.contains(package_name(specifier))
    }
}

impl ModuleResolver for NodeResolver {
    fn resolve_entry(&self, entry: &Path) -> BuildResult<PathBuf> {
        let display = entry.display().to_string();
        let not_found = |reason: String| BuildError::resolution(&display, entry, reason);

        let specifier = if entry.is_absolute() {
            entry.to_str().map(ToOwned::to_owned)
        } else {
            entry.to_str().map(|relative| format!("./{relative}"))
        }
        .ok_or_else(|| not_found("entry path is not valid UTF-8".to_owned()))?;
        let base_dir = if entry.is_absolute() {
            entry.parent().unwrap_or(entry)
        } else {
            Path::new(".")
        };

        match self.resolver.resolve(base_dir, &specifier) {
            Ok(found) => canonical(found.path(), &display, entry),
            Err(ResolveError::NotFound(_)) => {
                Err(not_found("entry module does not exist".to_owned()))
            }
            Err(e) => Err(not_found(e.to_string())),
        }
    }

    fn resolve(&self, specifier: &str, referrer: &Path) -> BuildResult<Resolution> {
        if self.is_external(specifier) {
            debug!("'{}' is external, leaving it to the host", specifier);
            return Ok(Resolution::External(specifier.to_owned()));
        }

        let base_dir = referrer.parent().unwrap_or_else(|| Path::new("."));
        trace!("Resolving '{}' from {:?}", specifier, base_dir);
        let resolution = match self.resolver.resolve(base_dir, specifier) {
            Ok(found) => Resolution::Module(canonical(found.path(), specifier, referrer)?),
            Err(ResolveError::Ignored(path)) => {
                debug!(
                    "'{}' ({:?}) is disabled by a browser field, bundling an empty module",
                    specifier, path
                );
                Resolution::Ignored
            }
            Err(ResolveError::NotFound(_)) => {
                let name = package_name(specifier);
                let reason = if NODE_BUILTINS.contains(&name.trim_start_matches("node:")) {
                    "Node built-in modules are not bundled; list it under `external`"
                } else {
                    "no matching file, directory or package"
                };
                return Err(BuildError::resolution(specifier, referrer, reason));
            }
            Err(e) => return Err(BuildError::resolution(specifier, referrer, e.to_string())),
        };

        debug!("Resolved '{}' from {:?} to {:?}", specifier, referrer, resolution);
        Ok(resolution)
    }
}

fn canonical(path: &Path, specifier: &str, referrer: &Path) -> BuildResult<PathBuf> {
    path.canonicalize()
        .map_err(|e| BuildError::resolution(specifier, referrer, e.to_string()))
}

/// `lodash/fp` -> `lodash`, `@scope/pkg/sub` -> `@scope/pkg`
fn package_name(specifier: &str) -> &str {
    let mut separators = specifier.match_indices('/').map(|(i, _)| i);
    let cut = if specifier.starts_with('@') {
        separators.nth(1)
    } else {
        separators.next()
    };
    cut.map_or(specifier, |i| &specifier[..i])
}
