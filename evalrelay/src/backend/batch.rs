//! Batch job scheduler backend.
//!
//! Each solution becomes one job script rendered from a template file
//! (`$SOLUTION` is the JSON vector, `$MODEL` the optional model name). The
//! script is written to the work directory as `tmp_<YYYYMMDD>_<random>.sh`
//! and submitted with the submit command (`qsub ${SCRIPT}` by default). The
//! scheduler prints `<job_id>.<server>` and, once the job ends, leaves
//! `<script>.o<job_id>` and `<script>.e<job_id>` next to the script. The
//! output file holds the evaluation as `{"objective": .., "info": ..}`.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    BackendError, BatchJob, CommandRunner, CommandTemplate, EvaluationBackend, JobHandle,
    PollOutcome, ShellRunner,
};
use crate::recipient::Recipient;
use crate::solution::Solution;
use crate::store::Evaluation;
use crate::time::script_date;

/// Length of the random part of generated script names.
const SCRIPT_RANDOM_LEN: usize = 10;

/// Settings for [`BatchSchedulerBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Job family; part of the recipient name.
    pub family: String,
    /// Optional model substituted as `$MODEL`.
    pub model: Option<String>,
    /// Path to the job script template.
    pub script_template: PathBuf,
    /// Submit command; `$SCRIPT` is the script file name.
    pub submit_command: String,
    /// Directory scripts are written to and submitted from.
    pub work_dir: PathBuf,
}

/// Backend for a `qsub`-style batch scheduler.
#[derive(Debug)]
pub struct BatchSchedulerBackend<R: CommandRunner = ShellRunner> {
    runner: R,
    recipient: Recipient,
    template: CommandTemplate,
    submit: CommandTemplate,
    work_dir: PathBuf,
}

impl<R: CommandRunner> BatchSchedulerBackend<R> {
    /// Creates the backend, loading the script template and creating the
    /// work directory.
    pub fn new(config: BatchConfig, runner: R) -> Result<Self, BackendError> {
        let recipient = Recipient::batch(&config.family, config.model.as_deref())?;

        let text =
            std::fs::read_to_string(&config.script_template).map_err(|source| BackendError::Io {
                path: config.script_template.clone(),
                source,
            })?;
        let mut template = CommandTemplate::new(text);
        if let Some(model) = &config.model {
            template = template.bind(&[("MODEL", model)]);
        }

        std::fs::create_dir_all(&config.work_dir).map_err(|source| BackendError::Io {
            path: config.work_dir.clone(),
            source,
        })?;

        Ok(Self {
            runner,
            recipient,
            template,
            submit: CommandTemplate::new(config.submit_command),
            work_dir: config.work_dir,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn write_script(&self, item: &Solution) -> Result<PathBuf, BackendError> {
        let body = self.template.render(&[("SOLUTION", &item.payload())]);
        let io_err = |source: std::io::Error| BackendError::Io {
            path: self.work_dir.clone(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(&format!("tmp_{}_", script_date()))
            .suffix(".sh")
            .rand_bytes(SCRIPT_RANDOM_LEN)
            .tempfile_in(&self.work_dir)
            .map_err(io_err)?;
        file.write_all(body.as_bytes()).map_err(io_err)?;
        let (_, path) = file.keep().map_err(|e| io_err(e.error))?;
        Ok(path)
    }

    async fn submit_one(&self, item: &Solution) -> Result<BatchJob, BackendError> {
        let script = self.write_script(item)?;
        let file_name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let command = self.submit.render(&[("SCRIPT", &file_name)]);

        let result = self.runner.run(&command, Some(&self.work_dir)).await.and_then(|stdout| {
            parse_job_id(&stdout).ok_or_else(|| {
                BackendError::InvalidResponse(format!("no job id in submit output '{}'", stdout.trim()))
            })
        });

        match result {
            Ok(job_id) => Ok(BatchJob { job_id, script }),
            Err(e) => {
                remove_quietly(&script);
                Err(e)
            }
        }
    }
}

/// Extracts the job id: the submit output up to the first `.`.
fn parse_job_id(stdout: &str) -> Option<String> {
    let id = stdout.trim().split('.').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Expected output and error files of a job.
fn job_files(job: &BatchJob) -> (PathBuf, PathBuf) {
    let with_suffix = |kind: char| {
        let mut name = OsString::from(job.script.as_os_str());
        name.push(format!(".{}{}", kind, job.job_id));
        PathBuf::from(name)
    };
    (with_suffix('o'), with_suffix('e'))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove job file");
    }
}

impl<R: CommandRunner> EvaluationBackend for BatchSchedulerBackend<R> {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    fn requires_setup_lock(&self) -> bool {
        false
    }

    async fn submit(&self, items: &[Solution]) -> Result<Vec<JobHandle>, BackendError> {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let job = self.submit_one(item).await.inspect_err(|e| {
                warn!(
                    recipient = %self.recipient,
                    submitted = handles.len(),
                    error = %e,
                    "Batch submission failed"
                );
            })?;
            debug!(job_id = %job.job_id, script = %job.script.display(), "Job submitted");
            handles.push(JobHandle::Batch(job));
        }
        info!(recipient = %self.recipient, count = handles.len(), "Submitted jobs");
        Ok(handles)
    }

    async fn poll(&self, handles: &[JobHandle]) -> PollOutcome {
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle {
                JobHandle::Batch(job) => jobs.push(job),
                other => {
                    return PollOutcome::Failed(format!(
                        "batch backend cannot poll handle {}",
                        other
                    ))
                }
            }
        }

        let waiting = jobs
            .iter()
            .filter(|job| {
                let (out, err) = job_files(job);
                !(out.is_file() && err.is_file())
            })
            .count();
        if waiting > 0 {
            debug!(recipient = %self.recipient, waiting, total = jobs.len(), "Jobs still running");
            return PollOutcome::Pending;
        }

        let mut evaluations = BTreeMap::new();
        for job in &jobs {
            let (out, _) = job_files(job);
            let parsed = std::fs::read_to_string(&out)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<Evaluation>(text.trim()).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(evaluation) => {
                    evaluations.insert(JobHandle::Batch((*job).clone()), evaluation);
                }
                Err(e) => {
                    return PollOutcome::Failed(format!(
                        "cannot read evaluation from {}: {}",
                        out.display(),
                        e
                    ))
                }
            }
        }

        for job in &jobs {
            let (out, err) = job_files(job);
            for path in [&job.script, &out, &err] {
                remove_quietly(path);
            }
        }

        PollOutcome::Resolved(evaluations)
    }
}
