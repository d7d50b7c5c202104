use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_MODELS_FILE, DEFAULT_WORKING_DIR_ROOT};

#[derive(Parser, Debug)]
#[command(
    name = "retrieval-experiment",
    version,
    about = "Runs the reduce-then-retrieve experiment as dependent cluster array jobs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prepare, submit both stages, wait and compile the results table.
    Run(RunArgs),
    /// Create a workspace and write the command lists without submitting.
    Prepare(PrepareArgs),
    /// Rebuild the results table of an existing workspace.
    Compile(CompileArgs),
    /// Report the state of an existing workspace from its run manifest.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    #[arg(long, default_value = DEFAULT_MODELS_FILE)]
    pub models_file: PathBuf,

    #[arg(long, default_value = DEFAULT_WORKING_DIR_ROOT)]
    pub working_dir_root: PathBuf,

    /// Explicit workspace path; must not exist yet.
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Address the scheduler sends job-status mail to.
    pub notify_address: String,

    #[command(flatten)]
    pub prepare: PrepareArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CompileArgs {
    #[arg(long)]
    pub workspace: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub workspace: PathBuf,
}
