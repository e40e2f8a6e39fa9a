use parallax_core::error::{CliError, SubmitError};
use parallax_core::executor::DependencyGraph;

use crate::commands::cli::ValidateArgs;
use crate::plan::LoadedPlan;

/// Submit-only check. Prints the execution stages of a valid plan.
pub fn handle_validate(args: ValidateArgs) -> Result<i32, CliError> {
    let loaded = LoadedPlan::load(&args.plan)?;
    let tasks = loaded.tasks();

    let graph = match DependencyGraph::submit(&tasks, loaded.edges()) {
        Ok(graph) => graph,
        Err(SubmitError::Cycle(cycle)) => {
            println!("cycle: {}", cycle.cycle.join(" -> "));
            return Err(SubmitError::Cycle(cycle).into());
        }
        Err(err) => return Err(err.into()),
    };

    println!("{}: {} tasks", args.plan.display(), graph.len());
    for (i, stage) in graph.stages().iter().enumerate() {
        println!("stage {}: {}", i + 1, stage.join(", "));
    }
    Ok(0)
}
