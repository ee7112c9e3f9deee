use shopmirror_core::MirrorConfig;

use crate::commands::common::{format_record_lines, open_online_context};
use crate::error::CliError;

/// Print the collection every time its cached view changes, until Ctrl-C.
pub async fn run_watch(config: &MirrorConfig, collection: &str) -> Result<(), CliError> {
    let context = open_online_context(config).await?;
    let mut query = context.use_collection(collection)?;
    context.start();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = query.changed() => {
                if !changed {
                    break;
                }
                let state = query.state();
                if state.is_loading {
                    continue;
                }
                let records = state.data.unwrap_or_default();
                println!(
                    "[{}] {collection}: {} record(s)",
                    chrono::Local::now().format("%H:%M:%S"),
                    records.len()
                );
                for line in format_record_lines(&records) {
                    println!("  {line}");
                }
            }
        }
    }

    context.shutdown().await;
    Ok(())
}
