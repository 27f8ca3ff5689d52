//! CLI Exit Code Registry
//!
//! Single source of truth for `doctrack` exit codes. Scripts and scheduled
//! tasks rely on them.
//!
//! | Code | Meaning                                           |
//! |------|---------------------------------------------------|
//! | 0    | Success                                           |
//! | 1    | Pipeline failure (no data, unreadable input, ...) |
//! | 2    | Usage or settings error                           |
//! | 3    | Input file or export not found                    |
//! | 4    | Target file is open in another program            |

use crate::pipeline::FailureKind;

/// Success - pipeline completed.
pub const EXIT_SUCCESS: u8 = 0;

/// Pipeline ran and reported failure.
pub const EXIT_FAILURE: u8 = 1;

/// Bad arguments or an unreadable settings file.
pub const EXIT_USAGE: u8 = 2;

/// Source workbook, database or CSV export missing.
pub const EXIT_NOT_FOUND: u8 = 3;

/// A workbook could not be read or replaced because another program holds it.
pub const EXIT_LOCKED: u8 = 4;

/// Map a pipeline failure to its exit code.
pub fn failure_exit_code(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::Failed => EXIT_FAILURE,
        FailureKind::NotFound => EXIT_NOT_FOUND,
        FailureKind::Locked => EXIT_LOCKED,
    }
}
