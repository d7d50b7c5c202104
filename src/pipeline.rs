//! Run state threaded from one pipeline step to the next.
//!
//! Each step consumes the previous state and returns the next one:
//! [`prepare`] -> [`PreparedRun`], [`submit`] -> [`SubmittedRun`],
//! [`wait`] -> [`WaitedRun`], [`compile`] -> [`CompletedRun`]. The run
//! manifest is derived from whichever state is current and rewritten after
//! every step.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use tracing::info;

use crate::aggregate::{CompiledTable, ResultColumns, compile_table, write_results_table};
use crate::command_set::{
    StageTemplate, build_stage, model_inputs, stage_outputs, write_command_list,
};
use crate::config::ExperimentConfig;
use crate::model::{
    CommandListArtifact, CommandSet, JobId, ManifestModel, ModelSpec, RunCounts, RunJobs,
    RunManifest, RunStatus, Stage,
};
use crate::scheduler::{ArrayRequest, CommandExecutor, Scheduler};
use crate::template::{Context, TemplateRenderer};
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};
use crate::workspace::Workspace;

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_id: String,
    pub started_at: String,
    pub workspace: Workspace,
    pub models_file: PathBuf,
    pub models: Vec<ModelSpec>,
    pub transform: CommandSet,
    pub retrieval: CommandSet,
    pub transform_list: CommandListArtifact,
    pub retrieval_list: CommandListArtifact,
}

#[derive(Debug, Clone)]
pub struct SubmittedRun {
    pub prepared: PreparedRun,
    pub notify_address: String,
    pub transform_job: JobId,
    pub retrieval_job: JobId,
}

#[derive(Debug, Clone)]
pub struct WaitedRun {
    pub submitted: SubmittedRun,
    pub wait_exit_status: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub waited: WaitedRun,
    pub table: CompiledTable,
    pub results_table: PathBuf,
}

/// Renders both stages' commands and writes the command lists.
pub fn prepare(
    workspace: Workspace,
    models_file: &Path,
    models: Vec<ModelSpec>,
    config: &ExperimentConfig,
) -> Result<PreparedRun> {
    let renderer = TemplateRenderer::new()?;

    info!(models = models.len(), "preparing transform commands");
    let transform = build_stage(
        &renderer,
        model_inputs(&models),
        &StageTemplate {
            template: &config.transform_command_template,
            input_field: "trained_nn_folder",
            output_field: "output_folder",
            shared: Context::new().bind("dataset", config.dataset_path.as_str()),
        },
        &workspace.transformed_data_dir(),
        |name| format!("data_transformed_by_{name}"),
    )?;

    info!(models = models.len(), "preparing retrieval commands");
    let retrieval = build_stage(
        &renderer,
        stage_outputs(&transform),
        &StageTemplate {
            template: &config.retrieval_command_template,
            input_field: "reduced_data_folder",
            output_field: "output_folder",
            shared: Context::new(),
        },
        &workspace.retrieval_results_dir(),
        str::to_string,
    )?;

    let transform_list = persist_command_list(&workspace, Stage::Transform, &transform)?;
    let retrieval_list = persist_command_list(&workspace, Stage::Retrieval, &retrieval)?;

    let started = Utc::now();
    let prepared = PreparedRun {
        run_id: format!("run-{}", utc_compact_string(started)),
        started_at: started.to_rfc3339_opts(SecondsFormat::Secs, true),
        workspace,
        models_file: models_file.to_path_buf(),
        models,
        transform,
        retrieval,
        transform_list,
        retrieval_list,
    };
    write_manifest(&prepared.workspace, &prepared.manifest())?;

    info!(run_id = %prepared.run_id, "preparation complete, commands constructed");
    Ok(prepared)
}

/// Submits the transform array and the retrieval array that depends on it.
/// Both go out back to back; the scheduler sequences them.
pub fn submit<E: CommandExecutor>(
    prepared: PreparedRun,
    scheduler: &Scheduler<E>,
    notify_address: &str,
) -> Result<SubmittedRun> {
    let workspace = &prepared.workspace;

    let transform_logs = workspace.scheduler_log_dir(Stage::Transform);
    let transform_list = workspace.command_list_path(Stage::Transform);
    let transform = scheduler.submit_array(&ArrayRequest {
        stage: Stage::Transform,
        command_count: prepared.transform.len(),
        notify_address,
        stdout_dir: &transform_logs,
        stderr_dir: &transform_logs,
        command_list: &transform_list,
    })?;

    let retrieval_logs = workspace.scheduler_log_dir(Stage::Retrieval);
    let retrieval_list = workspace.command_list_path(Stage::Retrieval);
    let retrieval = scheduler.submit_array_depends_on(
        &ArrayRequest {
            stage: Stage::Retrieval,
            command_count: prepared.retrieval.len(),
            notify_address,
            stdout_dir: &retrieval_logs,
            stderr_dir: &retrieval_logs,
            command_list: &retrieval_list,
        },
        transform.job_id,
    )?;

    for submission in [&transform, &retrieval] {
        info!(
            job_id = %submission.job_id,
            response = %submission.outcome.stdout.trim(),
            "array job submitted"
        );
    }

    let submitted = SubmittedRun {
        prepared,
        notify_address: notify_address.to_string(),
        transform_job: transform.job_id,
        retrieval_job: retrieval.job_id,
    };
    write_manifest(&submitted.prepared.workspace, &submitted.manifest())?;
    Ok(submitted)
}

pub fn wait<E: CommandExecutor>(
    submitted: SubmittedRun,
    scheduler: &Scheduler<E>,
) -> Result<WaitedRun> {
    let outcome = scheduler.wait_for(submitted.retrieval_job)?;

    let waited = WaitedRun {
        submitted,
        wait_exit_status: outcome.exit_status,
    };
    write_manifest(&waited.submitted.prepared.workspace, &waited.manifest())?;
    Ok(waited)
}

pub fn compile(waited: WaitedRun, config: &ExperimentConfig) -> Result<CompletedRun> {
    let prepared = &waited.submitted.prepared;
    let result_paths = prepared
        .retrieval
        .iter()
        .map(|(name, command)| {
            (
                name.clone(),
                command.output_dir.join(&config.results.result_file_name),
            )
        })
        .collect::<IndexMap<_, _>>();

    let (table, results_table) = compile_results(&prepared.workspace, &result_paths, config)?;

    let completed = CompletedRun {
        waited,
        table,
        results_table,
    };
    write_manifest(
        &completed.waited.submitted.prepared.workspace,
        &completed.manifest(),
    )?;
    Ok(completed)
}

/// Prepare, submit, wait and compile in one go.
pub fn execute<E: CommandExecutor>(
    workspace: Workspace,
    models_file: &Path,
    models: Vec<ModelSpec>,
    config: &ExperimentConfig,
    scheduler: &Scheduler<E>,
    notify_address: &str,
) -> Result<CompletedRun> {
    let prepared = prepare(workspace, models_file, models, config)?;
    let submitted = submit(prepared, scheduler, notify_address)?;
    let waited = wait(submitted, scheduler)?;
    compile(waited, config)
}

/// Averages the result files found at `result_paths` and writes the combined
/// table into the workspace.
pub fn compile_results(
    workspace: &Workspace,
    result_paths: &IndexMap<String, PathBuf>,
    config: &ExperimentConfig,
) -> Result<(CompiledTable, PathBuf)> {
    info!(models = result_paths.len(), "compiling results");

    let table = compile_table(result_paths, &ResultColumns::from(&config.results));
    let path = workspace.results_table_path(&config.results.table_file_name);
    write_results_table(&path, &table.rows)?;

    info!(
        rows = table.rows.len(),
        skipped_models = table.skipped.len(),
        "results compiled"
    );
    Ok((table, path))
}

/// Applies a compiled table to a manifest.
pub fn record_results(manifest: &mut RunManifest, table: &CompiledTable, results_table: &Path) {
    manifest.status = RunStatus::Completed;
    manifest.results_table = Some(results_table.display().to_string());
    manifest.counts.result_rows = table.rows.len();
    manifest.counts.skipped_models = table.skipped.len();
    manifest.skipped_models = table.skipped.clone();
    manifest.warnings = table
        .skipped
        .iter()
        .map(|skip| format!("{}: {}", skip.model, skip.reason))
        .collect();
}

pub fn write_manifest(workspace: &Workspace, manifest: &RunManifest) -> Result<()> {
    let mut manifest = manifest.clone();
    manifest.updated_at = now_utc_string();
    write_json_pretty(&workspace.manifest_path(), &manifest)
}

fn persist_command_list(
    workspace: &Workspace,
    stage: Stage,
    commands: &CommandSet,
) -> Result<CommandListArtifact> {
    let path = workspace.command_list_path(stage);
    write_command_list(commands, &path)?;
    Ok(CommandListArtifact {
        path: path.display().to_string(),
        sha256: sha256_file(&path)?,
        command_count: commands.len(),
    })
}

impl PreparedRun {
    pub fn manifest(&self) -> RunManifest {
        let models = self
            .models
            .iter()
            .map(|model| ManifestModel {
                name: model.name.clone(),
                source_path: model.source_path.display().to_string(),
                transform_output_dir: self.transform[&model.name].output_dir.display().to_string(),
                retrieval_output_dir: self.retrieval[&model.name].output_dir.display().to_string(),
            })
            .collect::<Vec<_>>();

        RunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id: self.run_id.clone(),
            status: RunStatus::Prepared,
            started_at: self.started_at.clone(),
            updated_at: self.started_at.clone(),
            workspace: self.workspace.root().display().to_string(),
            models_file: self.models_file.display().to_string(),
            notify_address: None,
            counts: RunCounts {
                models: models.len(),
                ..RunCounts::default()
            },
            models,
            transform_commands: self.transform_list.clone(),
            retrieval_commands: self.retrieval_list.clone(),
            results_table: None,
            jobs: RunJobs::default(),
            skipped_models: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl SubmittedRun {
    pub fn manifest(&self) -> RunManifest {
        let mut manifest = self.prepared.manifest();
        manifest.status = RunStatus::Submitted;
        manifest.notify_address = Some(self.notify_address.clone());
        manifest.jobs.transform_job_id = Some(self.transform_job);
        manifest.jobs.retrieval_job_id = Some(self.retrieval_job);
        manifest
    }
}

impl WaitedRun {
    pub fn manifest(&self) -> RunManifest {
        let mut manifest = self.submitted.manifest();
        manifest.status = RunStatus::Waited;
        manifest.jobs.wait_exit_status = self.wait_exit_status;
        manifest
    }
}

impl CompletedRun {
    pub fn manifest(&self) -> RunManifest {
        let mut manifest = self.waited.manifest();
        record_results(&mut manifest, &self.table, &self.results_table);
        manifest
    }
}
