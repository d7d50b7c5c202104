//! Array-job submission, dependency chaining and the completion barrier.
//!
//! Every scheduler interaction goes through a [`CommandExecutor`], which runs
//! an argv to completion and reports an [`ExternalOutcome`]. Submission
//! templates are filled in two passes: run-level bindings first, job-level
//! bindings (`last_index`, `depends_on`) at submission time.

use std::path::Path;
use std::process::Command;

use anyhow::{Context as _, Result, bail};
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::model::{JobId, Stage};
use crate::template::{Context, TemplateRenderer};

/// What an external invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOutcome {
    pub argv: Vec<String>,
    /// `None` when the process was terminated by a signal.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExternalOutcome {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

pub trait CommandExecutor {
    /// Runs `argv` and blocks until it exits. Fails only when the process
    /// could not be started.
    fn execute(&self, argv: &[String]) -> Result<ExternalOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, argv: &[String]) -> Result<ExternalOutcome> {
        let Some((program, args)) = argv.split_first() else {
            bail!("cannot execute an empty command line");
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {program}"))?;

        Ok(ExternalOutcome {
            argv: argv.to_vec(),
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// A submitted array job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    pub outcome: ExternalOutcome,
}

#[derive(Debug, Clone)]
pub struct ArrayRequest<'a> {
    pub stage: Stage,
    pub command_count: usize,
    pub notify_address: &'a str,
    pub stdout_dir: &'a Path,
    pub stderr_dir: &'a Path,
    pub command_list: &'a Path,
}

/// Last whitespace-delimited token of scheduler output, if it is a job id.
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    stdout
        .split_whitespace()
        .next_back()
        .and_then(|token| token.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(JobId)
}

pub struct Scheduler<E> {
    executor: E,
    config: SchedulerConfig,
    renderer: TemplateRenderer,
}

impl<E: CommandExecutor> Scheduler<E> {
    pub fn new(executor: E, config: SchedulerConfig) -> Result<Self> {
        Ok(Self {
            executor,
            config,
            renderer: TemplateRenderer::new()?,
        })
    }

    #[cfg(test)]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn submit_array(&self, request: &ArrayRequest<'_>) -> Result<Submission> {
        self.submit(request, None)
    }

    /// Submits an array job that the scheduler holds until every task of
    /// `depends_on` finished successfully.
    pub fn submit_array_depends_on(
        &self,
        request: &ArrayRequest<'_>,
        depends_on: JobId,
    ) -> Result<Submission> {
        self.submit(request, Some(depends_on))
    }

    /// Blocks until `job_id` is no longer running. The outcome says nothing
    /// about whether its tasks succeeded.
    pub fn wait_for(&self, job_id: JobId) -> Result<ExternalOutcome> {
        let context = Context::new()
            .bind("depends_on", job_id.to_string())
            .bind("partition", self.config.wait_partition.as_str());
        let line = self
            .renderer
            .render(&self.config.wait_template, &context)
            .into_complete()
            .context("failed to render wait command")?;

        info!(job_id = %job_id, "waiting for job to finish");
        let outcome = self.executor.execute(&split_command_line(&line))?;

        if outcome.success() {
            info!(job_id = %job_id, "wait returned");
        } else {
            warn!(
                job_id = %job_id,
                command = %outcome.argv.join(" "),
                exit_status = ?outcome.exit_status,
                stderr = %outcome.stderr.trim(),
                "wait command exited unsuccessfully"
            );
        }

        Ok(outcome)
    }

    fn submit(&self, request: &ArrayRequest<'_>, depends_on: Option<JobId>) -> Result<Submission> {
        if request.command_count == 0 {
            bail!("{} stage has no commands to submit", request.stage);
        }

        let template = match request.stage {
            Stage::Transform => &self.config.transform_submit_template,
            Stage::Retrieval => &self.config.retrieval_submit_template,
        };

        let run_bindings = Context::new()
            .bind("notify_address", request.notify_address)
            .bind("stdout_dir", request.stdout_dir.display().to_string())
            .bind("stderr_dir", request.stderr_dir.display().to_string())
            .bind("command_list", request.command_list.display().to_string());
        let partial = self.renderer.render(template, &run_bindings);

        let mut job_bindings =
            Context::new().bind("last_index", (request.command_count - 1).to_string());
        if let Some(job_id) = depends_on {
            if !partial.unresolved().contains("depends_on") {
                bail!(
                    "{} submit template has no {{depends_on}} placeholder",
                    request.stage
                );
            }
            job_bindings = job_bindings.bind("depends_on", job_id.to_string());
        }

        let line = self
            .renderer
            .render(partial.as_template(), &job_bindings)
            .into_complete()
            .with_context(|| format!("failed to render {} submit command", request.stage))?;

        info!(
            stage = %request.stage,
            tasks = request.command_count,
            depends_on = ?depends_on.map(|job| job.0),
            "submitting array job"
        );
        let outcome = self.executor.execute(&split_command_line(&line))?;

        let Some(job_id) = parse_job_id(&outcome.stdout) else {
            bail!(
                "{} submission did not report a job id (exit status {:?}): stdout={:?} stderr={:?}",
                request.stage,
                outcome.exit_status,
                outcome.stdout.trim(),
                outcome.stderr.trim()
            );
        };

        if !outcome.success() {
            warn!(
                stage = %request.stage,
                exit_status = ?outcome.exit_status,
                "submission exited unsuccessfully but reported a job id"
            );
        }
        Ok(Submission { job_id, outcome })
    }
}

fn split_command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(ToOwned::to_owned).collect()
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedExecutor, outcome};
    use super::*;

    fn request<'a>(stage: Stage, command_count: usize) -> ArrayRequest<'a> {
        ArrayRequest {
            stage,
            command_count,
            notify_address: "someone@example.org",
            stdout_dir: Path::new("ws/scheduler_logs/transform"),
            stderr_dir: Path::new("ws/scheduler_logs/transform"),
            command_list: Path::new("ws/transform_commands.list"),
        }
    }

    #[test]
    fn parse_job_id_reads_trailing_integer() {
        assert_eq!(
            parse_job_id("Submitted batch job 481920\n"),
            Some(JobId(481920))
        );
        assert_eq!(parse_job_id("Submitted batch job\n"), None);
        assert_eq!(parse_job_id("481920 queued"), None);
        assert_eq!(parse_job_id(""), None);
        assert_eq!(parse_job_id("job 0"), None);
    }

    #[test]
    fn submit_array_renders_array_range_and_returns_job_id() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 0, "Submitted batch job 481920\n")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        let submission = scheduler
            .submit_array(&request(Stage::Transform, 3))
            .expect("submission should succeed");
        assert_eq!(submission.job_id, JobId(481920));

        let calls = scheduler.executor().calls();
        assert_eq!(calls.len(), 1);
        let argv = &calls[0];
        assert_eq!(argv[0], "sbatch");
        assert!(argv.contains(&"--array=0-2".to_string()));
        assert!(argv.contains(&"someone@example.org".to_string()));
        assert!(argv.contains(&"--export=ALL,COMMAND_LIST=ws/transform_commands.list".to_string()));
        assert!(!argv.iter().any(|arg| arg.contains("afterok")));
    }

    #[test]
    fn dependent_submission_declares_afterok_on_upstream_job() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 0, "Submitted batch job 481921\n")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        let submission = scheduler
            .submit_array_depends_on(&request(Stage::Retrieval, 2), JobId(481920))
            .expect("submission should succeed");
        assert_eq!(submission.job_id, JobId(481921));

        let argv = &scheduler.executor().calls()[0];
        assert!(argv.contains(&"afterok:481920".to_string()));
        assert!(argv.contains(&"--array=0-1".to_string()));
    }

    #[test]
    fn submission_without_trailing_job_id_fails() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 1, "sbatch: error: invalid partition\n")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        let err = scheduler
            .submit_array(&request(Stage::Transform, 1))
            .expect_err("unparseable output should fail");
        assert!(err.to_string().contains("did not report a job id"));
    }

    #[test]
    fn failed_exit_with_job_id_is_still_accepted() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 1, "Submitted batch job 9\n")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        let submission = scheduler
            .submit_array(&request(Stage::Transform, 1))
            .expect("reported job id should be accepted");
        assert_eq!(submission.job_id, JobId(9));
        assert!(!submission.outcome.success());
    }

    #[test]
    fn dependent_submission_requires_depends_on_placeholder() {
        let config = SchedulerConfig {
            retrieval_submit_template: "sbatch --array=0-{last_index} run.sh".to_string(),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 0, "Submitted batch job 7\n")),
            config,
        )
        .expect("scheduler");

        let err = scheduler
            .submit_array_depends_on(&request(Stage::Retrieval, 1), JobId(6))
            .expect_err("dependency must not be dropped");
        assert!(err.to_string().contains("depends_on"));
        assert!(scheduler.executor().calls().is_empty());
    }

    #[test]
    fn independent_submission_rejects_leftover_dependency_placeholder() {
        let config = SchedulerConfig {
            transform_submit_template: "sbatch -d afterok:{depends_on} run.sh".to_string(),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 0, "Submitted batch job 7\n")),
            config,
        )
        .expect("scheduler");

        assert!(scheduler.submit_array(&request(Stage::Transform, 1)).is_err());
        assert!(scheduler.executor().calls().is_empty());
    }

    #[test]
    fn empty_array_is_not_submitted() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 0, "Submitted batch job 7\n")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        assert!(scheduler.submit_array(&request(Stage::Transform, 0)).is_err());
        assert!(scheduler.executor().calls().is_empty());
    }

    #[test]
    fn wait_for_returns_even_when_wait_command_fails() {
        let scheduler = Scheduler::new(
            ScriptedExecutor::new(|argv| outcome(argv, 1, "")),
            SchedulerConfig::default(),
        )
        .expect("scheduler");

        let result = scheduler.wait_for(JobId(481921)).expect("wait should return");
        assert!(!result.success());

        let argv = &scheduler.executor().calls()[0];
        assert_eq!(argv[0], "srun");
        assert!(argv.contains(&"afterany:481921".to_string()));
        assert!(argv.contains(&"zbj1".to_string()));
    }

    #[test]
    fn system_executor_captures_exit_status_and_stdout() {
        let argv = vec!["echo".to_string(), "Submitted batch job 12".to_string()];
        let result = SystemExecutor.execute(&argv).expect("echo should run");
        assert!(result.success());
        assert_eq!(parse_job_id(&result.stdout), Some(JobId(12)));

        assert!(SystemExecutor.execute(&[]).is_err());
    }
}
