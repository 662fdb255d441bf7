//! Shared helpers for chronicle integration tests.
#![allow(dead_code)]

use chronicle_db::{DataType, Database, FieldDefinition, Model, ModelDefinition, Record};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEST_FILTER: &str = "chronicle=debug,chronicle_db=info";

/// Install a fmt subscriber once per test binary. `RUST_LOG` overrides the filter.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a thread-local subscriber and return the chronicle warnings
/// it logged.
pub fn capture_warnings(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("chronicle=warn"))
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer
        .0
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn test_definition() -> ModelDefinition {
    ModelDefinition::new("test").with_fields([
        FieldDefinition::new("id", DataType::BigInt)
            .primary_key()
            .auto_increment(),
        FieldDefinition::new("name", DataType::Text)
            .not_null()
            .unique()
            .default_value("test defaultValue"),
        FieldDefinition::new("simple", DataType::Text),
    ])
}

/// The `test` source model, synced.
pub fn define_test_model(db: &Database) -> Model {
    let model = db.define(test_definition()).unwrap();
    model.sync(true).unwrap();
    model
}

pub fn named(name: &str) -> Record {
    Record::new().with("name", name)
}
