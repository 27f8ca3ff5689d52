// File housekeeping around the pipelines: backups, export discovery,
// processed-export moves and retention.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::IoError;

const SECONDS_PER_DAY: u64 = 86_400;

/// Create `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), IoError> {
    std::fs::create_dir_all(dir).map_err(|e| IoError::from_write(dir, e))
}

/// Copy `source` to `backup_dir/<prefix><file name>`, overwriting an older backup.
pub fn backup_file(source: &Path, backup_dir: &Path, prefix: &str) -> Result<PathBuf, IoError> {
    let name = source
        .file_name()
        .ok_or_else(|| IoError::write(source, "not a file path"))?
        .to_string_lossy();
    ensure_dir(backup_dir)?;
    let target = backup_dir.join(format!("{prefix}{name}"));
    std::fs::copy(source, &target).map_err(|e| IoError::from_write(&target, e))?;
    log::info!("backup written to {}", target.display());
    Ok(target)
}

/// Export files are named `<3-4 chars>_<14 chars>.csv`, e.g. `ABC_20250110093000.csv`.
pub fn is_export_name(name: &str) -> bool {
    let Some(stem) = name
        .strip_suffix(".csv")
        .or_else(|| name.strip_suffix(".CSV"))
    else {
        return false;
    };
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        [prefix, stamp] => {
            let prefix_len = prefix.chars().count();
            (3..=4).contains(&prefix_len) && stamp.chars().count() == 14
        }
        _ => false,
    }
}

/// Newest export in `dir` by modification time; `None` when there is none
/// (or the directory doesn't exist).
pub fn find_latest_export(dir: &Path) -> Result<Option<PathBuf>, IoError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IoError::from_read(dir, e)),
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_match = path
            .file_name()
            .map(|n| is_export_name(&n.to_string_lossy()))
            .unwrap_or(false);
        if !is_match || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, p)| p))
}

/// Move `file` into `dir`, keeping its name.
pub fn move_into(file: &Path, dir: &Path) -> Result<PathBuf, IoError> {
    let name = file
        .file_name()
        .ok_or_else(|| IoError::write(file, "not a file path"))?;
    ensure_dir(dir)?;
    let target = dir.join(name);
    if std::fs::rename(file, &target).is_err() {
        // Across filesystems rename fails; fall back to copy + remove
        std::fs::copy(file, &target).map_err(|e| IoError::from_write(&target, e))?;
        std::fs::remove_file(file).map_err(|e| IoError::from_write(file, e))?;
    }
    log::debug!("moved {} to {}", file.display(), target.display());
    Ok(target)
}

/// Delete `*.csv` files in `dir` last modified `retention_days` or more days ago.
///
/// Failures to delete a file are logged and skipped. Returns the number removed.
pub fn remove_stale_exports(dir: &Path, retention_days: u32) -> usize {
    remove_stale_exports_at(dir, retention_days, SystemTime::now())
}

fn remove_stale_exports_at(dir: &Path, retention_days: u32, now: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let max_age = Duration::from_secs(retention_days as u64 * SECONDS_PER_DAY);

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("could not delete {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        log::info!("removed {} processed exports older than {} days", removed, retention_days);
    }
    removed
}
