use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::RunManifest;
use crate::util::read_json;
use crate::workspace::Workspace;

pub fn run(args: StatusArgs) -> Result<()> {
    let workspace = Workspace::open(args.workspace)?;
    let manifest_path = workspace.manifest_path();

    info!(workspace = %workspace.root().display(), "status requested");

    if !manifest_path.exists() {
        warn!(path = %manifest_path.display(), "run manifest missing");
        return Ok(());
    }

    let manifest: RunManifest = read_json(&manifest_path)?;
    info!(
        run_id = %manifest.run_id,
        status = manifest.status.as_str(),
        started_at = %manifest.started_at,
        updated_at = %manifest.updated_at,
        notify_address = %manifest.notify_address.as_deref().unwrap_or_default(),
        models = manifest.counts.models,
        transform_job_id = ?manifest.jobs.transform_job_id.map(|job| job.0),
        retrieval_job_id = ?manifest.jobs.retrieval_job_id.map(|job| job.0),
        wait_exit_status = ?manifest.jobs.wait_exit_status,
        "loaded run manifest"
    );

    report_artifact("transform command list", Path::new(&manifest.transform_commands.path));
    report_artifact("retrieval command list", Path::new(&manifest.retrieval_commands.path));
    match &manifest.results_table {
        Some(path) => {
            report_artifact("results table", Path::new(path));
            info!(
                rows = manifest.counts.result_rows,
                skipped_models = manifest.counts.skipped_models,
                "results compiled"
            );
        }
        None => info!("results not compiled yet"),
    }

    for skipped in &manifest.skipped_models {
        warn!(
            model = %skipped.model,
            path = %skipped.path,
            reason = %skipped.reason,
            "model skipped"
        );
    }

    Ok(())
}

fn report_artifact(label: &str, path: &Path) {
    if path.exists() {
        info!(artifact = label, path = %path.display(), "artifact present");
    } else {
        warn!(artifact = label, path = %path.display(), "artifact missing");
    }
}
