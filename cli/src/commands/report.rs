use parallax_core::config::CheckpointConfig;
use parallax_core::error::CliError;
use parallax_plugins::FileCheckpointStore;

use crate::commands::cli::ReportArgs;
use crate::render::render_checkpoint;

pub async fn handle_report(args: ReportArgs) -> Result<i32, CliError> {
    let store = FileCheckpointStore::new(&args.dir, CheckpointConfig::default().max_snapshots);
    let checkpoint = match &args.session {
        Some(session) => store.load_latest(session).await?,
        None => store.load_most_recent().await?,
    };
    let Some(checkpoint) = checkpoint else {
        return Err(CliError::Command(format!(
            "no checkpoints found in {}",
            args.dir.display()
        )));
    };

    if args.json {
        println!(
            "{}",
            checkpoint
                .to_json()
                .map_err(|e| CliError::Command(e.to_string()))?
        );
    } else {
        print!("{}", render_checkpoint(&checkpoint));
    }
    Ok(0)
}
