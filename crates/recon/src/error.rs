use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// The incoming dataset has no rows.
    EmptySource,
    /// The incoming dataset's header row matched none of the recognized fields.
    NoRecognizedColumns,
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySource => write!(f, "source sheet has no data rows"),
            Self::NoRecognizedColumns => {
                write!(f, "source sheet header matches none of the expected columns")
            }
        }
    }
}

impl std::error::Error for ReconError {}
