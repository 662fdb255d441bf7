//! Assembly of the shadow model definition.

use crate::config::ResolvedOptions;
use crate::naming::ShadowNames;
use crate::projector::project_fields;
use chronicle_db::{AssociationOptions, DataType, FieldDefinition, Model, ModelDefinition};
use tracing::debug;

/// Surrogate id, operation type code and write timestamp.
pub fn reserved_fields(names: &ShadowNames) -> [FieldDefinition; 3] {
    [
        FieldDefinition::new(names.id_field.clone(), DataType::BigInt)
            .primary_key()
            .auto_increment(),
        FieldDefinition::new(names.type_field.clone(), DataType::Integer).not_null(),
        FieldDefinition::new(names.timestamp_field.clone(), DataType::Timestamp).not_null(),
    ]
}

/// Projected source fields followed by the reserved fields. A projected
/// field whose name collides with a reserved one is replaced.
pub fn shadow_definition(
    source: &Model,
    names: &ShadowNames,
    options: &ResolvedOptions,
) -> ModelDefinition {
    let mut fields = project_fields(source.fields(), &options.exclude);
    fields.retain(|field| !names.is_reserved(&field.name));
    fields.extend(reserved_fields(names));

    let mut definition = ModelDefinition::new(names.model_name.clone())
        .with_table_name(names.table_name.clone())
        .with_fields(fields)
        .with_timestamps(false);
    if let Some(schema) = &options.schema {
        definition = definition.with_schema(schema.clone());
    }
    definition
}

/// Declare every source association on the shadow as well, with
/// referential constraints set to `constraints`.
pub fn clone_associations(source: &Model, shadow: &Model, constraints: bool) {
    for association in source.associations() {
        debug!(
            source = %source.name(),
            shadow = %shadow.name(),
            target = %association.target.name,
            kind = %association.kind,
            "Cloning association"
        );
        shadow.associate_ref(
            association.kind,
            association.target,
            AssociationOptions {
                constraints,
                ..association.options
            },
        );
    }
}
