use shopmirror_core::util::unix_millis_now;
use shopmirror_core::MirrorConfig;

use crate::commands::common::{
    format_status_lines, open_offline_context, status_to_item, StatusItem,
};
use crate::error::CliError;

pub async fn run_status(config: &MirrorConfig, as_json: bool) -> Result<(), CliError> {
    let context = open_offline_context(config).await?;
    let statuses = context.sync_status().await?;

    if as_json {
        let items = statuses
            .iter()
            .map(status_to_item)
            .collect::<Vec<StatusItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for line in format_status_lines(&statuses, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}
