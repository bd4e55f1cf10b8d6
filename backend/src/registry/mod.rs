pub mod loader;

pub use loader::{RegistryFile, RegistryLoad, RegistryLoader};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry directory missing: {0}")]
    DirectoryMissing(PathBuf),
    #[error("no valid descriptors under {dir} ({skipped} skipped)")]
    NoValidDescriptors { dir: PathBuf, skipped: usize },
    #[error("failed to read registry: {0}")]
    Io(#[from] std::io::Error),
}
