use shopmirror_core::{MirrorConfig, Record};

use crate::commands::common::{format_record_lines, open_offline_context};
use crate::error::CliError;

pub async fn run_list(
    config: &MirrorConfig,
    collection: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let context = open_offline_context(config).await?;
    context.registry().get(collection)?;
    let records = context.store().records(collection).await?;

    if as_json {
        let values = records
            .into_iter()
            .map(Record::into_value)
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No cached records in '{collection}'.");
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
