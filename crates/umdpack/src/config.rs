use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::combine::Combine;
use crate::dirs::{CONFIG_FILE, system_config_file, user_umdpack_config_file};
use crate::namespace::NamespacePath;

/// Entry module used when nothing else is configured
pub const DEFAULT_ENTRY: &str = "index.js";
/// Global namespace used when nothing else is configured
pub const DEFAULT_STANDALONE: &str = "d3.layout.cloud";
/// Output directory used when nothing else is configured
pub const DEFAULT_OUTDIR: &str = "build";
/// Output file name used when nothing else is configured
pub const DEFAULT_OUTFILE: &str = "d3.layout.cloud.js";

/// One configuration layer. Unset keys fall through to lower precedence
/// layers and finally to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Entry module, relative to the project root
    pub entry: Option<PathBuf>,

    /// Dotted global namespace the entry module's export is installed at
    pub standalone: Option<String>,

    /// Output directory, relative to the project root
    pub outdir: Option<PathBuf>,

    /// Output file name inside `outdir`
    pub outfile: Option<String>,

    /// Extensions probed when a specifier omits one, in order
    pub extensions: Option<Vec<String>>,

    /// Specifiers left to the host's own `require` at runtime
    pub external: Option<IndexSet<String>>,

    /// Prefer the `browser` field of package.json over `main`
    pub browser_field: Option<bool>,
}

impl Combine for Config {
    fn combine(self, other: Self) -> Self {
        Self {
            entry: self.entry.combine(other.entry),
            standalone: self.standalone.combine(other.standalone),
            outdir: self.outdir.combine(other.outdir),
            outfile: self.outfile.combine(other.outfile),
            extensions: self.extensions.combine(other.extensions),
            external: self.external.combine(other.external),
            browser_field: self.browser_field.combine(other.browser_field),
        }
    }
}

/// Fully resolved settings for one build invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Absolute path of the entry module
    pub entry: PathBuf,
    pub namespace: NamespacePath,
    /// Absolute path of the output directory
    pub output_dir: PathBuf,
    pub output_file: String,
    pub extensions: Vec<String>,
    pub external: IndexSet<String>,
    pub browser_field: bool,
}

impl BuildConfig {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }
}

/// Parse a boolean value from string, supporting various common formats
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

impl Config {
    /// Configuration layer read from `UMDPACK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(entry) = var("UMDPACK_ENTRY").filter(|s| !s.is_empty()) {
            config.entry = Some(PathBuf::from(entry));
        }
        if let Some(standalone) = var("UMDPACK_STANDALONE").filter(|s| !s.is_empty()) {
            config.standalone = Some(standalone);
        }
        if let Some(outdir) = var("UMDPACK_OUTDIR").filter(|s| !s.is_empty()) {
            config.outdir = Some(PathBuf::from(outdir));
        }
        if let Some(outfile) = var("UMDPACK_OUTFILE").filter(|s| !s.is_empty()) {
            config.outfile = Some(outfile);
        }

        // UMDPACK_EXTENSIONS - comma-separated, e.g. ".js,.json"
        if let Some(extensions) = var("UMDPACK_EXTENSIONS") {
            let extensions: Vec<String> = parse_list(&extensions).collect();
            if !extensions.is_empty() {
                config.extensions = Some(extensions);
            }
        }

        // UMDPACK_EXTERNAL - comma-separated specifiers
        if let Some(external) = var("UMDPACK_EXTERNAL") {
            let external: IndexSet<String> = parse_list(&external).collect();
            if !external.is_empty() {
                config.external = Some(external);
            }
        }

        if let Some(browser_field) = var("UMDPACK_BROWSER_FIELD") {
            config.browser_field = parse_bool(&browser_field);
        }

        config
    }

    /// Load a single config file from a path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        if let Some(standalone) = &config.standalone {
            NamespacePath::parse(standalone)
                .with_context(|| format!("Invalid standalone in config file: {:?}", path))?;
        }

        Ok(config)
    }

    /// Load configuration with hierarchical precedence:
    /// 1. CLI-provided config path (highest precedence)
    /// 2. Environment variables (UMDPACK_*)
    /// 3. Project config (umdpack.toml in current directory)
    /// 4. User config (~/.config/umdpack/umdpack.toml)
    /// 5. System config (/etc/umdpack/umdpack.toml or equivalent)
    /// 6. Default values (lowest precedence)
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_config_path) = system_config_file() {
            log::debug!("Loading system config from: {:?}", system_config_path);
            let system_config = Self::load_from_file(&system_config_path).with_context(|| {
                format!("Failed to load system config from {:?}", system_config_path)
            })?;
            config = system_config.combine(config);
        }

        if let Some(user_config_path) = user_umdpack_config_file() {
            if user_config_path.exists() {
                log::debug!("Loading user config from: {:?}", user_config_path);
                let user_config = Self::load_from_file(&user_config_path).with_context(|| {
                    format!("Failed to load user config from {:?}", user_config_path)
                })?;
                config = user_config.combine(config);
            }
        }

        let project_config_path = PathBuf::from(CONFIG_FILE);
        if project_config_path.exists() {
            log::debug!("Loading project config from: {:?}", project_config_path);
            let project_config = Self::load_from_file(&project_config_path).with_context(|| {
                format!(
                    "Failed to load project config from {:?}",
                    project_config_path
                )
            })?;
            config = project_config.combine(config);
        }

        config = Self::from_env().combine(config);

        if let Some(cli_config_path) = cli_config_path {
            log::debug!("Loading CLI config from: {:?}", cli_config_path);
            let cli_config = Self::load_from_file(cli_config_path)
                .with_context(|| format!("Failed to load CLI config from {:?}", cli_config_path))?;
            config = cli_config.combine(config);
        }

        Ok(config)
    }

    /// Fill in defaults, anchor relative paths at `project_root` and validate.
    pub fn into_build_config(self, project_root: &Path) -> Result<BuildConfig> {
        let anchor = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                project_root.join(path)
            }
        };

        let standalone = self
            .standalone
            .unwrap_or_else(|| DEFAULT_STANDALONE.to_owned());
        let namespace = NamespacePath::parse(&standalone)?;

        let output_file = self.outfile.unwrap_or_else(|| DEFAULT_OUTFILE.to_owned());
        if Path::new(&output_file).file_name().and_then(|n| n.to_str()) != Some(output_file.as_str()) {
            return Err(anyhow!(
                "Invalid outfile '{}': expected a plain file name",
                output_file
            ));
        }

        let extensions = self
            .extensions
            .unwrap_or_else(|| vec![".js".to_owned(), ".json".to_owned()]);
        if let Some(bad) = extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(anyhow!(
                "Invalid extension '{}': extensions start with '.'",
                bad
            ));
        }

        Ok(BuildConfig {
            entry: anchor(self.entry.unwrap_or_else(|| PathBuf::from(DEFAULT_ENTRY))),
            namespace,
            output_dir: anchor(self.outdir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTDIR))),
            output_file,
            extensions,
            external: self.external.unwrap_or_default(),
            browser_field: self.browser_field.unwrap_or(true),
        })
    }
}
