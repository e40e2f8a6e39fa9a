use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "parallax", version, about = "Run dependency-ordered task plans in parallel")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file. Defaults to ~/.parallax/config.toml, then ./parallax.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan.
    Run(RunArgs),
    /// Check a plan for duplicate ids, unknown dependencies and cycles.
    Validate(ValidateArgs),
    /// Show the latest checkpoint in a directory.
    Report(ReportArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Plan file (JSON).
    pub plan: PathBuf,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Write every event as JSONL to this path (`stdout:` for stdout).
    #[arg(long)]
    pub events_out: Option<String>,

    /// Skip tasks completed in this checkpoint file, or in the newest
    /// checkpoint of this directory.
    #[arg(long)]
    pub resume_from: Option<PathBuf>,

    /// Print the final report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ValidateArgs {
    pub plan: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ReportArgs {
    /// Checkpoint directory.
    pub dir: PathBuf,

    /// Session to show. Defaults to the most recent one.
    #[arg(long)]
    pub session: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_flags_parse() {
        let args = Args::try_parse_from([
            "parallax",
            "run",
            "plan.json",
            "--concurrency",
            "8",
            "--max-retries",
            "0",
            "--events-out",
            "stdout:",
        ])
        .unwrap();
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.plan, PathBuf::from("plan.json"));
        assert_eq!(run.concurrency, Some(8));
        assert_eq!(run.max_retries, Some(0));
        assert_eq!(run.events_out.as_deref(), Some("stdout:"));
        assert!(run.resume_from.is_none());
    }

    #[test]
    fn config_flag_is_global() {
        let args =
            Args::try_parse_from(["parallax", "validate", "p.json", "--config", "x.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["parallax"]).is_err());
    }
}
