use shopmirror_core::MirrorConfig;

use crate::commands::common::open_offline_context;
use crate::error::CliError;

pub async fn run_get(config: &MirrorConfig, collection: &str, id: &str) -> Result<(), CliError> {
    let context = open_offline_context(config).await?;
    context.registry().get(collection)?;

    let record = context
        .store()
        .record(collection, id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
