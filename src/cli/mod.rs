pub mod changes;
pub mod query;
pub mod sign_in;
pub mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};

use folio::config::FolioConfig;
use folio::library::Library;

/// Open the configured library chain (parent first) and run the
/// asynchronous initialization phase on each level.
pub async fn open_library(config: &FolioConfig) -> Result<Arc<Library>> {
    let parent = match config.parent_settings() {
        Some(settings) => {
            let library =
                Library::open(settings, None).context("failed to open parent library")?;
            library.initialize().await;
            Some(Arc::new(library))
        }
        None => None,
    };

    let library =
        Library::open(config.library_settings(), parent).context("failed to open library")?;
    library.initialize().await;
    Ok(Arc::new(library))
}
