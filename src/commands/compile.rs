use std::path::PathBuf;

use anyhow::{Result, bail};
use indexmap::IndexMap;
use tracing::info;

use crate::cli::CompileArgs;
use crate::config::ExperimentConfig;
use crate::model::RunManifest;
use crate::pipeline::{compile_results, record_results, write_manifest};
use crate::util::read_json;
use crate::workspace::Workspace;

pub fn run(args: CompileArgs) -> Result<()> {
    let config = ExperimentConfig::load(args.config.as_deref())?;
    let workspace = Workspace::open(args.workspace)?;

    let mut manifest: RunManifest = read_json(&workspace.manifest_path())?;
    if manifest.models.is_empty() {
        bail!(
            "run manifest lists no models: {}",
            workspace.manifest_path().display()
        );
    }

    let result_paths = manifest
        .models
        .iter()
        .map(|model| {
            (
                model.name.clone(),
                PathBuf::from(&model.retrieval_output_dir).join(&config.results.result_file_name),
            )
        })
        .collect::<IndexMap<_, _>>();

    let (table, results_table) = compile_results(&workspace, &result_paths, &config)?;
    record_results(&mut manifest, &table, &results_table);
    write_manifest(&workspace, &manifest)?;

    info!(
        run_id = %manifest.run_id,
        results_table = %results_table.display(),
        rows = table.rows.len(),
        skipped_models = table.skipped.len(),
        "compile completed"
    );
    Ok(())
}
