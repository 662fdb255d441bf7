//! Shared helpers for chronicle_db integration tests.

use chronicle_db::{DataType, Database, FieldDefinition, Model, ModelDefinition};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEST_FILTER: &str = "chronicle_db=info";

/// Install a fmt subscriber once per test binary. `RUST_LOG` overrides the filter.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// `task { id BIGINT pk autoincrement, title TEXT, status TEXT, points INTEGER }`
pub fn define_task(db: &Database) -> Model {
    let model = db
        .define(
            ModelDefinition::new("task").with_fields([
                FieldDefinition::new("id", DataType::BigInt)
                    .primary_key()
                    .auto_increment(),
                FieldDefinition::new("title", DataType::Text).not_null(),
                FieldDefinition::new("status", DataType::Text).default_value("open"),
                FieldDefinition::new("points", DataType::Integer),
            ]),
        )
        .unwrap();
    model.sync(true).unwrap();
    model
}
