//! `doctrack` pipelines as a library, so front-ends other than the binary
//! can drive them.

pub mod exit_codes;
pub mod paths;
pub mod pipeline;
pub mod viewer;

pub use paths::Paths;
pub use pipeline::{
    run_import, run_intake, run_report, FailureKind, IntakeOptions, PipelineError, PipelineOutcome, ReportOptions,
};
