use shopmirror_core::models::SYNC_METADATA_STORE;
use shopmirror_core::MirrorConfig;

use crate::commands::common::open_offline_context;
use crate::error::CliError;

/// Empty a collection's cache and forget its sync timestamp so the next
/// sync refetches it.
pub async fn run_clear(config: &MirrorConfig, collection: &str) -> Result<(), CliError> {
    let context = open_offline_context(config).await?;
    context.registry().get(collection)?;

    let store = context.store();
    store.clear(collection).await?;
    store.delete(SYNC_METADATA_STORE, collection).await?;
    println!("Cleared '{collection}'");
    Ok(())
}
