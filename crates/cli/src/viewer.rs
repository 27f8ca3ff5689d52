// Hand a finished workbook to the desktop's default viewer.

use std::path::Path;
use std::time::Duration;

/// Wait `delay`, then open `path`. Failures are logged, never returned.
pub fn open_in_viewer(path: &Path, delay: Duration) {
    if !delay.is_zero() {
        log::debug!("waiting {:?} before opening {}", delay, path.display());
        std::thread::sleep(delay);
    }
    match open::that(path) {
        Ok(()) => log::info!("opened {}", path.display()),
        Err(e) => log::warn!("could not open {}: {}", path.display(), e),
    }
}
