pub mod merge;
pub mod schema;

pub use merge::{DEFAULT_MAIN_AGENT, DEFAULT_MAIN_SESSION, DEFAULT_MAX_ACTIVE_RUNS};
pub use schema::*;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use crate::secrets::SecretsConfig;

/// File name looked up in the workspace and the global config directory.
pub const CONFIG_FILE_NAME: &str = "agentic-app.toml";

/// Supplies resolved configuration snapshots and persists secret edits.
///
/// Implementations are consulted on every run creation, so a run always
/// snapshots whatever configuration is current at that moment.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<AppConfig, ConfigError>;

    /// The secrets of the writable layer only, for editing.
    fn editable_secrets(&self) -> Result<SecretsConfig, ConfigError>;

    fn save_secrets(&self, secrets: &SecretsConfig) -> Result<(), ConfigError>;
}

/// In-memory configuration. Secret edits replace the held secrets.
pub struct StaticConfigSource {
    config: Mutex<AppConfig>,
}

impl StaticConfigSource {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        Ok(self.lock().clone())
    }

    fn editable_secrets(&self) -> Result<SecretsConfig, ConfigError> {
        Ok(self.lock().secrets.clone())
    }

    fn save_secrets(&self, secrets: &SecretsConfig) -> Result<(), ConfigError> {
        self.lock().secrets = secrets.clone();
        Ok(())
    }
}

/// Layered TOML configuration.
/// Precedence: overrides (CLI) > workspace or explicit file > global file > defaults.
///
/// Missing config files are handled gracefully (defaults apply). Secret edits
/// are written to the explicit file when given, else the workspace file.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    explicit_path: Option<PathBuf>,
    global_path: Option<PathBuf>,
    overrides: PartialConfig,
}

impl FileConfigSource {
    pub fn new(overrides: PartialConfig, explicit_path: Option<PathBuf>) -> Self {
        Self {
            explicit_path,
            global_path: global_config_path(),
            overrides,
        }
    }

    /// Build the source from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self::new(cli_to_partial(cli), cli.config.clone())
    }

    /// Replace (or disable, with `None`) the global config file location.
    pub fn with_global_path(mut self, path: Option<PathBuf>) -> Self {
        self.global_path = path;
        self
    }

    fn load_global(&self) -> PartialConfig {
        match &self.global_path {
            Some(p) => load_toml_file(p)
                .map(|f| f.to_partial())
                .unwrap_or_default(),
            None => {
                tracing::debug!("No global config directory");
                PartialConfig::default()
            }
        }
    }

    fn workspace_path(&self, global: &PartialConfig) -> PathBuf {
        self.overrides
            .workspace
            .clone()
            .or_else(|| global.workspace.clone())
            .unwrap_or_else(|| PathBuf::from("./workspace"))
    }

    /// The file that holds the workspace layer and receives secret edits.
    pub fn writable_path(&self) -> PathBuf {
        match &self.explicit_path {
            Some(p) => p.clone(),
            None => self.workspace_path(&self.load_global()).join(CONFIG_FILE_NAME),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let global = self.load_global();
        let file_path = match &self.explicit_path {
            Some(p) => p.clone(),
            None => self.workspace_path(&global).join(CONFIG_FILE_NAME),
        };
        let file = load_toml_file(&file_path)
            .map(|f| f.to_partial())
            .unwrap_or_default();

        Ok(self
            .overrides
            .clone()
            .with_fallback(file)
            .with_fallback(global)
            .finalize())
    }

    fn editable_secrets(&self) -> Result<SecretsConfig, ConfigError> {
        let file = read_config_file(&self.writable_path())?;
        Ok(file.and_then(|f| f.secrets).unwrap_or_default())
    }

    fn save_secrets(&self, secrets: &SecretsConfig) -> Result<(), ConfigError> {
        let path = self.writable_path();
        let mut file = read_config_file(&path)?.unwrap_or_default();
        file.secrets = if secrets.is_empty() {
            None
        } else {
            Some(secrets.clone())
        };

        let contents = toml::to_string_pretty(&file).map_err(|e| ConfigError::SerializeError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        tracing::info!("Saved secrets to {}", path.display());
        Ok(())
    }
}

/// Read and parse a config file strictly. `Ok(None)` when it does not exist.
fn read_config_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<ConfigFile>(&contents)
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::IoError(e)),
    }
}

/// Load a config file for layering. Missing files are silent; unreadable or
/// unparsable files are logged and skipped.
fn load_toml_file(path: &Path) -> Option<ConfigFile> {
    match read_config_file(path) {
        Ok(Some(file)) => {
            tracing::info!("Loaded config from {}", path.display());
            Some(file)
        }
        Ok(None) => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Config error: {}", e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/agentic-app/agentic-app.toml
/// macOS: ~/Library/Application Support/agentic-app/agentic-app.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agentic-app")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    let base = PartialConfig {
        workspace: cli.workspace.clone(),
        ..Default::default()
    };
    match &cli.command {
        Commands::Serve {
            max_active_runs,
            main_session,
        } => PartialConfig {
            max_active_runs: *max_active_runs,
            main_session: main_session.clone(),
            ..base
        },
        Commands::Config | Commands::Secrets { .. } => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn workspace_file_overrides_global_file() {
        let tmp = tempfile::tempdir().unwrap();
        let global = tmp.path().join("global.toml");
        write(
            &global,
            "[subagents]\nmax_active_runs = 7\n\n[tools.bundles]\nbrowser = false\n",
        );
        let workspace = tmp.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        write(
            &workspace.join(CONFIG_FILE_NAME),
            "[subagents]\nmax_active_runs = 2\n",
        );

        let source = FileConfigSource::new(
            PartialConfig {
                workspace: Some(workspace),
                ..Default::default()
            },
            None,
        )
        .with_global_path(Some(global));

        let config = source.load().unwrap();
        assert_eq!(config.app.subagents.max_active_runs, 2);
        assert!(!config.app.tools.browser);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        write(&path, "[subagents\nmax_active_runs = ");

        let source = FileConfigSource::new(PartialConfig::default(), Some(path))
            .with_global_path(None);
        let config = source.load().unwrap();
        assert_eq!(config.app.subagents.max_active_runs, DEFAULT_MAX_ACTIVE_RUNS);
    }

    #[test]
    fn save_secrets_preserves_other_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        write(&path, "[subagents]\nmax_active_runs = 4\n");

        let source = FileConfigSource::new(PartialConfig::default(), Some(path.clone()))
            .with_global_path(None);
        let mut secrets = source.editable_secrets().unwrap();
        assert!(secrets.is_empty());
        secrets.app.insert(
            "TOKEN".into(),
            crate::secrets::SecretEntry {
                value: Some("abc".into()),
                ..Default::default()
            },
        );
        source.save_secrets(&secrets).unwrap();

        let config = source.load().unwrap();
        assert_eq!(config.app.subagents.max_active_runs, 4);
        assert_eq!(config.secrets.app["TOKEN"].value.as_deref(), Some("abc"));
    }

    #[test]
    fn save_secrets_refuses_to_clobber_broken_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        write(&path, "not = [valid");

        let source = FileConfigSource::new(PartialConfig::default(), Some(path))
            .with_global_path(None);
        let result = source.save_secrets(&SecretsConfig::default());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
