use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TableError;
use crate::output::ReportFormat;
use crate::parsers::DEFAULT_MAX_FILE_SIZE;
use crate::tables::KnowledgeBase;

pub const CONFIG_ENV: &str = "PHARMAGUARD_CONFIG";
pub const TABLES_ENV: &str = "PHARMAGUARD_TABLES";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Runtime settings: built-in defaults, then a TOML file, then CLI flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding the three JSON tables; embedded tables when unset
    pub tables_dir: Option<PathBuf>,
    /// Worker threads, 0 = one per CPU
    pub threads: usize,
    pub output_dir: PathBuf,
    pub format: ReportFormat,
    /// Upper bound on decompressed input, in bytes
    pub max_file_size: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tables_dir: None,
            threads: 0,
            output_dir: PathBuf::from("./reports"),
            format: ReportFormat::Json,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            log_level: "warn".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when one is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => Self::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            bail!("max_file_size must be greater than zero");
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!(
                "log_level '{}' is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// The more verbose of the configured level and the one `-v` asks for
    pub fn log_level_for(&self, verbose: u8) -> &str {
        let requested = match verbose {
            0 => return &self.log_level,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        let rank = |level: &str| LOG_LEVELS.iter().position(|l| *l == level).unwrap_or(0);
        let configured = self.log_level.as_str();
        if rank(requested) > rank(configured) {
            requested
        } else {
            configured
        }
    }

    /// Load the tables this configuration points at
    pub fn load_knowledge_base(&self) -> Result<KnowledgeBase, TableError> {
        self.load_knowledge_base_from(None)
    }

    /// Load tables from `dir`, falling back to `tables_dir`, then the embedded set
    pub fn load_knowledge_base_from(&self, dir: Option<&Path>) -> Result<KnowledgeBase, TableError> {
        match dir.or(self.tables_dir.as_deref()) {
            Some(dir) => KnowledgeBase::load_dir(dir),
            None => KnowledgeBase::embedded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.max_file_size, 5 * 1024 * 1024);
        assert!(settings.thread_count() >= 1);
        assert!(settings.load_knowledge_base().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("pharmaguard.toml");
        fs::write(&path, "threads = 4\nformat = \"html\"\nlog_level = \"debug\"\n")?;

        let settings = Settings::load(Some(&path))?;
        assert_eq!(settings.threads, 4);
        assert_eq!(settings.thread_count(), 4);
        assert_eq!(settings.format, ReportFormat::Html);
        assert_eq!(settings.output_dir, PathBuf::from("./reports"));
        assert_eq!(settings.log_level_for(0), "debug");
        assert_eq!(settings.log_level_for(1), "debug");
        assert_eq!(settings.log_level_for(3), "trace");
        Ok(())
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Settings::from_toml("colour = true").is_err());
        assert!(Settings::from_toml("threads = \"many\"").is_err());

        let settings = Settings::from_toml("log_level = \"loud\"").unwrap();
        assert!(settings.validate().is_err());

        let settings = Settings::from_toml("max_file_size = 0").unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_verbosity_never_lowers_configured_level() {
        let quiet = Settings::default();
        assert_eq!(quiet.log_level_for(0), "warn");
        assert_eq!(quiet.log_level_for(1), "info");
        assert_eq!(quiet.log_level_for(2), "debug");

        let chatty = Settings {
            log_level: "debug".to_string(),
            ..Settings::default()
        };
        assert_eq!(chatty.log_level_for(1), "debug");

        let silent = Settings {
            log_level: "error".to_string(),
            ..Settings::default()
        };
        assert_eq!(silent.log_level_for(0), "error");
        assert_eq!(silent.log_level_for(1), "info");
    }

    #[test]
    fn test_table_source_precedence() -> Result<()> {
        let configured = TempDir::new()?;
        let settings = Settings {
            tables_dir: Some(configured.path().to_path_buf()),
            ..Settings::default()
        };

        // no explicit directory: the configured one is used, and it is empty
        assert!(matches!(
            settings.load_knowledge_base_from(None),
            Err(TableError::Io { ref path, .. }) if path.starts_with(configured.path())
        ));

        let explicit = TempDir::new()?;
        assert!(matches!(
            settings.load_knowledge_base_from(Some(explicit.path())),
            Err(TableError::Io { ref path, .. }) if path.starts_with(explicit.path())
        ));

        assert!(Settings::default().load_knowledge_base_from(None).is_ok());
        Ok(())
    }

    #[test]
    fn test_tables_dir_must_be_complete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let settings = Settings {
            tables_dir: Some(temp_dir.path().to_path_buf()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.load_knowledge_base(),
            Err(TableError::Io { .. })
        ));
        Ok(())
    }
}
