use doctrack_core::Schema;

use crate::model::SchemaCompatibility;

/// Compare field sets; column order does not matter.
pub fn check_schema(source: &Schema, existing: &Schema) -> SchemaCompatibility {
    if source.same_fields(existing) {
        return SchemaCompatibility::Compatible;
    }
    SchemaCompatibility::IncompatibleUseSourceOnly {
        source_only: existing.missing(source.fields()),
        existing_only: source.missing(existing.fields()),
    }
}
