use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::util::read_json;

pub const DEFAULT_WORKING_DIR_ROOT: &str = "experiments";
pub const DEFAULT_MODELS_FILE: &str = "experiment_models.list";

const TRANSFORM_COMMAND_TEMPLATE: &str = "python scrna.py reduce {trained_nn_folder} \
--data={dataset} --out_folder={output_folder}";

const RETRIEVAL_COMMAND_TEMPLATE: &str =
    "python scrna.py retrieval {reduced_data_folder} --out_folder={output_folder}";

const TRANSFORM_SUBMIT_TEMPLATE: &str = "sbatch --array=0-{last_index} --mail-user {notify_address} \
--output {stdout_dir}/scrna_transform_array_%A_%a.out \
--error {stderr_dir}/scrna_transform_array_%A_%a.err \
--export=ALL,COMMAND_LIST={command_list} slurm_transform_array.sh";

const RETRIEVAL_SUBMIT_TEMPLATE: &str = "sbatch --array=0-{last_index} --mail-user {notify_address} \
--output {stdout_dir}/scrna_retrieval_array_%A_%a.out \
--error {stderr_dir}/scrna_retrieval_array_%A_%a.err \
-d afterok:{depends_on} \
--export=ALL,COMMAND_LIST={command_list} slurm_retrieval_array.sh";

const WAIT_TEMPLATE: &str =
    "srun -J waiter -d afterany:{depends_on} -p {partition} echo (done waiting)";

/// Experiment settings. Every field has a default, so a config file only
/// needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExperimentConfig {
    pub transform_command_template: String,
    pub retrieval_command_template: String,
    pub dataset_path: String,
    pub scheduler: SchedulerConfig,
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub transform_submit_template: String,
    pub retrieval_submit_template: String,
    pub wait_template: String,
    pub wait_partition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResultsConfig {
    /// File name looked up inside each model's retrieval output directory.
    pub result_file_name: String,
    pub category_column: String,
    pub score_column: String,
    pub table_file_name: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            transform_command_template: TRANSFORM_COMMAND_TEMPLATE.to_string(),
            retrieval_command_template: RETRIEVAL_COMMAND_TEMPLATE.to_string(),
            dataset_path: "data/integrate_imputing_dataset_kNN10_simgene_T.txt".to_string(),
            scheduler: SchedulerConfig::default(),
            results: ResultsConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transform_submit_template: TRANSFORM_SUBMIT_TEMPLATE.to_string(),
            retrieval_submit_template: RETRIEVAL_SUBMIT_TEMPLATE.to_string(),
            wait_template: WAIT_TEMPLATE.to_string(),
            wait_partition: "zbj1".to_string(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            result_file_name: "retrieval_summary.csv".to_string(),
            category_column: "celltype".to_string(),
            score_column: "mean average precision".to_string(),
            table_file_name: "full_results_table.csv".to_string(),
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let config: Self = read_json(path)?;
        info!(path = %path.display(), "loaded experiment config");
        Ok(config)
    }
}
