use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use tracing::info;

use crate::model::Stage;
use crate::util::{ensure_directory, workspace_stamp};

const TRANSFORMED_DATA_DIR: &str = "transformed_data";
const RETRIEVAL_RESULTS_DIR: &str = "retrieval_results";
const SCHEDULER_LOGS_DIR: &str = "scheduler_logs";
const MANIFEST_FILE: &str = "manifest.json";

/// Directory owning every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a fresh workspace at `path`, or under `working_dir_root`
    /// named after the current local time. Never reuses an existing
    /// directory.
    pub fn create(path: Option<PathBuf>, working_dir_root: &Path) -> Result<Self> {
        let root = path.unwrap_or_else(|| default_path(working_dir_root, Local::now()));

        if let Some(parent) = root.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        match fs::create_dir(&root) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                bail!("workspace already exists: {}", root.display());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create workspace: {}", root.display()));
            }
        }

        let workspace = Self { root };
        ensure_directory(&workspace.transformed_data_dir())?;
        ensure_directory(&workspace.retrieval_results_dir())?;
        ensure_directory(&workspace.scheduler_log_dir(Stage::Transform))?;
        ensure_directory(&workspace.scheduler_log_dir(Stage::Retrieval))?;

        info!(path = %workspace.root.display(), "created workspace");
        Ok(workspace)
    }

    /// Opens a workspace created by an earlier run.
    pub fn open(root: PathBuf) -> Result<Self> {
        if !root.is_dir() {
            bail!("workspace does not exist: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transformed_data_dir(&self) -> PathBuf {
        self.root.join(TRANSFORMED_DATA_DIR)
    }

    pub fn retrieval_results_dir(&self) -> PathBuf {
        self.root.join(RETRIEVAL_RESULTS_DIR)
    }

    /// Receives both stdout and stderr of the stage's array tasks.
    pub fn scheduler_log_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(SCHEDULER_LOGS_DIR).join(stage.as_str())
    }

    pub fn command_list_path(&self, stage: Stage) -> PathBuf {
        self.root.join(format!("{}_commands.list", stage.as_str()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn results_table_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

pub fn default_path(working_dir_root: &Path, now: DateTime<Local>) -> PathBuf {
    working_dir_root.join(workspace_stamp(now))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn default_path_is_timestamped_under_root() {
        let now = Local
            .with_ymd_and_hms(2025, 11, 2, 13, 4, 59)
            .single()
            .expect("unambiguous local time");
        assert_eq!(
            default_path(Path::new("experiments"), now),
            PathBuf::from("experiments/2025_11_02-13:04:59")
        );
    }

    #[test]
    fn create_lays_out_subdirectories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("nested").join("run");

        let workspace =
            Workspace::create(Some(root.clone()), dir.path()).expect("workspace should be created");

        assert_eq!(workspace.root(), root.as_path());
        assert!(workspace.transformed_data_dir().is_dir());
        assert!(workspace.retrieval_results_dir().is_dir());
        assert!(workspace.scheduler_log_dir(Stage::Transform).is_dir());
        assert!(workspace.scheduler_log_dir(Stage::Retrieval).is_dir());
        assert_eq!(
            workspace.command_list_path(Stage::Retrieval),
            root.join("retrieval_commands.list")
        );
    }

    #[test]
    fn create_refuses_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("run");
        fs::create_dir(&root).expect("pre-existing run dir");
        fs::write(root.join("marker"), "keep").expect("marker file");

        let err = Workspace::create(Some(root.clone()), dir.path())
            .expect_err("existing workspace must not be reused");
        assert!(err.to_string().contains("already exists"));
        assert!(root.join("marker").exists());
        assert!(!root.join(TRANSFORMED_DATA_DIR).exists());
    }

    #[test]
    fn create_without_path_uses_working_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let working_root = dir.path().join("experiments");

        let workspace = Workspace::create(None, &working_root).expect("workspace");
        assert_eq!(workspace.root().parent(), Some(working_root.as_path()));
    }

    #[test]
    fn open_requires_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(Workspace::open(dir.path().join("missing")).is_err());
        assert!(Workspace::open(dir.path().to_path_buf()).is_ok());
    }
}
