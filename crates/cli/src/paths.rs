// Resolve the configured path strings into filesystem paths.

use std::path::{Path, PathBuf};

use doctrack_config::Settings;

/// Every location a pipeline touches, resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub database: PathBuf,
    pub template: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub assignment_list: PathBuf,
}

impl Paths {
    /// `base` is the directory relative entries hang off (the settings
    /// file's directory, or the working directory).
    pub fn resolve(settings: &Settings, base: &Path) -> Self {
        let p = &settings.paths;
        Self {
            database: resolve_path(&p.database, base),
            template: settings.template().map(|t| resolve_path(t, base)),
            output_dir: resolve_path(&p.output_dir, base),
            backup_dir: resolve_path(&p.backup_dir, base),
            downloads_dir: resolve_path(&p.downloads_dir, base),
            processed_dir: resolve_path(&p.processed_dir, base),
            assignment_list: resolve_path(&p.assignment_list, base),
        }
    }
}

/// Expand `~` and `$VARS`, then anchor relative paths at `base`.
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = match shellexpand::full(raw.trim()) {
        Ok(s) => s.into_owned(),
        Err(e) => {
            log::warn!("cannot expand '{}': {}", raw, e);
            shellexpand::tilde(raw.trim()).into_owned()
        }
    };
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Directory relative settings paths are anchored at.
pub fn settings_base(config_path: &Path) -> PathBuf {
    if config_path.exists() {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            return parent.to_path_buf();
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
