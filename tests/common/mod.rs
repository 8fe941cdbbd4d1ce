#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use as4_validate::{
    DirectoryStore, NamespaceRegistry, ReceiptValidator, SchemaContextCache, ValidationMode,
    ValidationOutcomePolicy,
};
use tempfile::TempDir;
use tokio::fs;

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn schemas_dir(&self) -> PathBuf {
        self.fixtures_dir.join("schemas")
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.fixtures_dir.join("messages")
    }

    pub fn message_path(&self, name: &str) -> PathBuf {
        self.messages_dir().join(name)
    }

    pub fn message(&self, name: &str) -> String {
        std::fs::read_to_string(self.message_path(name))
            .unwrap_or_else(|e| panic!("missing fixture {}: {}", name, e))
    }

    pub fn schema_cache(&self) -> SchemaContextCache {
        SchemaContextCache::from_store(Arc::new(DirectoryStore::new(self.schemas_dir())))
    }

    pub fn receipt_validator(&self, mode: ValidationMode) -> ReceiptValidator {
        ReceiptValidator::new(
            Arc::new(self.schema_cache()),
            Arc::new(NamespaceRegistry::as4()),
            ValidationOutcomePolicy::new(mode),
        )
    }
}

/// Copy the named message fixtures into a fresh temporary directory
pub async fn temp_message_dir(names: &[&str]) -> std::io::Result<TempDir> {
    let fixtures = TestFixtures::new();
    let temp_dir = TempDir::new()?;

    for name in names {
        fs::copy(fixtures.message_path(name), temp_dir.path().join(name)).await?;
    }

    Ok(temp_dir)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
