//! `doctrack-recon`: merge, clean and de-duplicate document datasets, and
//! tally them by staff and department.
//!
//! Pure engine crate: receives loaded datasets, returns cleaned records and
//! counts. No file access.

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod model;
pub mod schema;

pub use aggregate::{aggregate, Aggregation};
pub use engine::{dedupe, reconcile};
pub use error::ReconError;
pub use model::{DedupKey, ReconcileReport, Reconciled, SchemaCompatibility};
pub use schema::check_schema;
