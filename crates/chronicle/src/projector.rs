//! Projection of source fields onto the shadow model.

use chronicle_db::{FieldAttribute, FieldDefinition};

/// Field metadata carried over to the shadow. Constraints (primary key,
/// uniqueness, nullability, defaults) are left behind so that historical
/// values are always accepted.
pub const CLONED_ATTRIBUTES: [FieldAttribute; 4] = [
    FieldAttribute::Type,
    FieldAttribute::Field,
    FieldAttribute::Get,
    FieldAttribute::Set,
];

/// Copy every source field not in `exclude`, keeping only
/// [`CLONED_ATTRIBUTES`].
pub fn project_fields(source: &[FieldDefinition], exclude: &[String]) -> Vec<FieldDefinition> {
    source
        .iter()
        .filter(|field| !exclude.iter().any(|excluded| *excluded == field.name))
        .map(|field| {
            let mut projected = FieldDefinition::blank(field.name.clone());
            for attribute in CLONED_ATTRIBUTES {
                projected.copy_attribute(field, attribute);
            }
            projected
        })
        .collect()
}
