use shopmirror_core::MirrorConfig;

use crate::commands::common::{format_outcome, format_report_lines, open_online_context};
use crate::error::CliError;

pub async fn run_sync(
    config: &MirrorConfig,
    collection: Option<&str>,
    force: bool,
) -> Result<(), CliError> {
    let context = open_online_context(config).await?;

    if let Some(collection) = collection {
        let outcome = context.sync_collection(collection, force).await?;
        println!("{}", format_outcome(collection, outcome));
        return Ok(());
    }

    let report = context.sync_all(force).await;
    for line in format_report_lines(&report) {
        println!("{line}");
    }
    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::SyncFailed(report.failed.len()))
    }
}
