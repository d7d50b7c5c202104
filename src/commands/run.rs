use anyhow::Result;
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::prepare::prepare_workspace;
use crate::config::ExperimentConfig;
use crate::pipeline;
use crate::scheduler::{Scheduler, SystemExecutor};

pub fn run(args: RunArgs) -> Result<()> {
    let config = ExperimentConfig::load(args.prepare.config.as_deref())?;
    let scheduler = Scheduler::new(SystemExecutor, config.scheduler.clone())?;

    let prepared = prepare_workspace(&args.prepare, &config)?;
    info!(
        run_id = %prepared.run_id,
        workspace = %prepared.workspace.root().display(),
        models = prepared.models.len(),
        "starting experiment"
    );

    let submitted = pipeline::submit(prepared, &scheduler, &args.notify_address)?;
    let waited = pipeline::wait(submitted, &scheduler)?;
    let completed = pipeline::compile(waited, &config)?;

    info!(
        results_table = %completed.results_table.display(),
        rows = completed.table.rows.len(),
        skipped_models = completed.table.skipped.len(),
        "experiment completed"
    );
    Ok(())
}
