use std::fmt;
use std::path::{Path, PathBuf};

use doctrack_core::record::HeaderError;

/// Failures at the file boundary. Per-value problems never end up here.
#[derive(Debug)]
pub enum IoError {
    NotFound(PathBuf),
    Unreadable { path: PathBuf, reason: String },
    EmptySheet(PathBuf),
    Header { path: PathBuf, source: HeaderError },
    /// The file is held open by another program.
    Locked(PathBuf),
    Write { path: PathBuf, reason: String },
    Csv { path: PathBuf, reason: String },
}

impl IoError {
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p) | Self::EmptySheet(p) | Self::Locked(p) => p,
            Self::Unreadable { path, .. }
            | Self::Header { path, .. }
            | Self::Write { path, .. }
            | Self::Csv { path, .. } => path,
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl fmt::Display) -> Self {
        Self::Unreadable { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub(crate) fn write(path: &Path, reason: impl fmt::Display) -> Self {
        Self::Write { path: path.to_path_buf(), reason: reason.to_string() }
    }

    /// Classify an OS error raised while opening `path` for reading.
    pub(crate) fn from_read(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else if is_locked(&err) {
            Self::Locked(path.to_path_buf())
        } else {
            Self::unreadable(path, err)
        }
    }

    /// Classify an OS error raised while writing `path`.
    pub(crate) fn from_write(path: &Path, err: std::io::Error) -> Self {
        if is_locked(&err) {
            Self::Locked(path.to_path_buf())
        } else {
            Self::write(path, err)
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(p) => write!(f, "file not found: {}", p.display()),
            Self::Unreadable { path, reason } => {
                write!(f, "cannot read workbook {}: {}", path.display(), reason)
            }
            Self::EmptySheet(p) => write!(f, "{} has no header row", p.display()),
            Self::Header { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Locked(p) => write!(
                f,
                "{} is open in another program; close the file and retry",
                p.display()
            ),
            Self::Write { path, reason } => write!(f, "cannot write {}: {}", path.display(), reason),
            Self::Csv { path, reason } => write!(f, "cannot read CSV {}: {}", path.display(), reason),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Header { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Permission denied, or (on Windows) a sharing/lock violation.
pub(crate) fn is_locked(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_errors_are_classified() {
        let path = Path::new("db.xlsx");
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(IoError::from_read(path, missing), IoError::NotFound(_)));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(IoError::from_read(path, denied), IoError::Locked(_)));

        let other = std::io::Error::other("bad zip");
        assert!(matches!(IoError::from_read(path, other), IoError::Unreadable { .. }));
    }

    #[test]
    fn locked_message_tells_user_what_to_do() {
        let err = IoError::Locked(PathBuf::from("db.xlsx"));
        assert!(err.to_string().contains("close the file and retry"));
        assert_eq!(err.path(), Path::new("db.xlsx"));
    }
}
