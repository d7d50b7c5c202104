use anyhow::Result;
use tracing::info;

use crate::cli::PrepareArgs;
use crate::command_set::load_models;
use crate::config::ExperimentConfig;
use crate::pipeline::{self, PreparedRun};
use crate::workspace::Workspace;

pub fn run(args: PrepareArgs) -> Result<()> {
    let config = ExperimentConfig::load(args.config.as_deref())?;
    let prepared = prepare_workspace(&args, &config)?;

    info!(
        workspace = %prepared.workspace.root().display(),
        transform_commands = %prepared.transform_list.path,
        retrieval_commands = %prepared.retrieval_list.path,
        "prepare completed; nothing submitted"
    );
    Ok(())
}

/// Reads the model list before touching the filesystem so a bad list never
/// leaves an empty workspace behind.
pub(crate) fn prepare_workspace(
    args: &PrepareArgs,
    config: &ExperimentConfig,
) -> Result<PreparedRun> {
    let models = load_models(&args.models_file)?;
    let workspace = Workspace::create(args.workspace.clone(), &args.working_dir_root)?;
    pipeline::prepare(workspace, &args.models_file, models, config)
}
