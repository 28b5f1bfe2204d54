mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::cli::Args;
use crate::error::StorageError;
use log::info;
use std::sync::Arc;

/// Client-local key/value storage, the equivalent of a browser's local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub fn create_store(args: &Args) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error + Send + Sync>> {
    match args.storage_type.to_lowercase().as_str() {
        "file" => {
            info!("Local storage file: {}", args.storage_path);
            Ok(Arc::new(FileStore::open(&args.storage_path)?))
        }
        "memory" => {
            info!("Local storage kept in memory, nothing survives exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(
            Box::new(
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Unsupported storage type: {}", other)
                )
            )
        ),
    }
}
