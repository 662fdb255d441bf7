//! Shadow model, table and reserved field names.

use crate::config::ResolvedOptions;
use crate::error::{Result, VersionError};
use chronicle_db::ModelDefinition;

const ID: &str = "id";
const TYPE: &str = "type";
const TIMESTAMP: &str = "timestamp";

/// Every name a shadow model is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowNames {
    /// `Capitalized(prefix) + Capitalized(source name)`
    pub model_name: String,
    /// `prefix _ table _ suffix`, empty segments dropped
    pub table_name: String,
    pub id_field: String,
    pub type_field: String,
    pub timestamp_field: String,
}

impl ShadowNames {
    pub fn resolve(source: &ModelDefinition, options: &ResolvedOptions) -> Self {
        let separator = if options.table_underscored { "_" } else { "" };
        let table_name = [options.prefix.as_str(), source.table(), options.suffix.as_str()]
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(separator);

        Self {
            model_name: format!("{}{}", capitalize(&options.prefix), capitalize(&source.name)),
            table_name,
            id_field: attribute_name(&options.attribute_prefix, ID, options.underscored),
            type_field: attribute_name(&options.attribute_prefix, TYPE, options.underscored),
            timestamp_field: attribute_name(&options.attribute_prefix, TIMESTAMP, options.underscored),
        }
    }

    /// The three reserved audit field names.
    pub fn reserved(&self) -> [&str; 3] {
        [
            self.id_field.as_str(),
            self.type_field.as_str(),
            self.timestamp_field.as_str(),
        ]
    }

    pub fn is_reserved(&self, field: &str) -> bool {
        self.reserved().contains(&field)
    }
}

/// At least one of prefix and suffix must be set.
pub fn validate(options: &ResolvedOptions) -> Result<()> {
    if options.prefix.is_empty() && options.suffix.is_empty() {
        return Err(VersionError::config(
            "prefix or suffix must be set in version options",
        ));
    }
    Ok(())
}

/// The separator stays with an empty prefix: `_id`, or `Id` in camel case.
fn attribute_name(prefix: &str, base: &str, underscored: bool) -> String {
    if underscored {
        format!("{}_{}", prefix, base)
    } else {
        format!("{}{}", prefix, capitalize(base))
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
