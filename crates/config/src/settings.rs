// Application settings
// Loaded from <config dir>/doctrack/config.toml

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding the settings file location.
pub const CONFIG_ENV: &str = "DOCTRACK_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub analysis: AnalysisSettings,
    pub exclude: ExcludeSettings,
    pub automation: AutomationSettings,
}

/// File locations. A leading `~` is expanded and relative paths are taken
/// from the settings file's directory; both are left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Accumulated dataset workbook
    pub database: String,
    /// Report template; empty = blank workbook
    pub template: String,
    pub output_dir: String,
    pub backup_dir: String,
    /// Where CSV exports land
    pub downloads_dir: String,
    /// CSV exports are moved here after intake
    pub processed_dir: String,
    /// Workbook the CSV intake appends to
    pub assignment_list: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            database: "医療文書データベース.xlsx".to_string(),
            template: String::new(),
            output_dir: "output".to_string(),
            backup_dir: "backup".to_string(),
            downloads_dir: "~/Downloads".to_string(),
            processed_dir: "processed".to_string(),
            assignment_list: "医療文書担当一覧.xlsm".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Report rows, comma-separated
    pub ordered_names: String,
    /// Report columns, comma-separated; may include 合計
    pub clinical_departments: String,
    /// Optional inclusive bounds, YYYY-MM-DD
    pub start_date: String,
    pub end_date: String,
    pub report_label: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            ordered_names: String::new(),
            clinical_departments: String::new(),
            start_date: String::new(),
            end_date: String::new(),
            report_label: "医療文書作成件数".to_string(),
        }
    }
}

/// Substring lists applied during CSV intake, comma-separated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeSettings {
    pub documents: String,
    pub doctors: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// Open finished reports / assignment lists in the default viewer
    pub open_report: bool,
    /// Blocking delay before the viewer is launched
    pub open_wait_seconds: u64,
    pub processed_retention_days: u32,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            open_report: true,
            open_wait_seconds: 3,
            processed_retention_days: 3,
        }
    }
}

impl Settings {
    /// Default settings file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doctrack")
            .join("config.toml")
    }

    /// Explicit path, else `DOCTRACK_CONFIG`, else the default path.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => Self::default_path(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(io_err)
    }

    pub fn staff_order(&self) -> Vec<String> {
        split_list(&self.analysis.ordered_names)
    }

    pub fn department_order(&self) -> Vec<String> {
        split_list(&self.analysis.clinical_departments)
    }

    pub fn excluded_documents(&self) -> Vec<String> {
        split_list(&self.exclude.documents)
    }

    pub fn excluded_doctors(&self) -> Vec<String> {
        split_list(&self.exclude.doctors)
    }

    /// Configured report bounds; blank entries are `None`.
    pub fn date_bounds(&self) -> (Option<&str>, Option<&str>) {
        (non_blank(&self.analysis.start_date), non_blank(&self.analysis.end_date))
    }

    pub fn template(&self) -> Option<&str> {
        non_blank(&self.paths.template)
    }
}

/// Comma-separated list, entries trimmed, blanks dropped.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
