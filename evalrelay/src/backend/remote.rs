//! Remote optimization service backend.
//!
//! Solutions are sent one at a time with the configured send command; each
//! invocation prints a JSON document carrying the new solution id:
//!
//! ```json
//! {"insert_solutions_one": {"id": 1041}}
//! ```
//!
//! Polling runs the get command, which lists the user's most recent
//! solutions of the match (`SENDLISTSIZE` of them):
//!
//! ```json
//! {"solutions": [{"id": 1041, "objective": 0.3, "evaluation_error": null,
//!                 "scoring_error": null, "info": {}, "variable": [1, 2]}]}
//! ```
//!
//! A listed solution is finished once any of `objective`,
//! `evaluation_error` or `scoring_error` is set.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::{
    BackendError, CommandRunner, CommandTemplate, EvaluationBackend, JobHandle, PollOutcome,
    ShellRunner,
};
use crate::recipient::Recipient;
use crate::solution::Solution;
use crate::store::Evaluation;

/// Settings for [`RemoteApiBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Match the solutions are submitted to.
    pub match_id: String,
    /// Account name used to filter listed solutions.
    pub user_name: String,
    /// Send command; `$ID` and `$SOLUTION` are substituted.
    pub send_command: String,
    /// Get command; `$ID`, `$USERNAME` and `$SENDLISTSIZE` are substituted.
    pub get_command: String,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    insert_solutions_one: InsertedSolution,
}

#[derive(Debug, Deserialize)]
struct InsertedSolution {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    solutions: Vec<ListedSolution>,
}

#[derive(Debug, Deserialize)]
struct ListedSolution {
    id: i64,
    #[serde(default)]
    objective: Option<f64>,
    #[serde(default)]
    evaluation_error: Option<Value>,
    #[serde(default)]
    scoring_error: Option<Value>,
    #[serde(default)]
    info: Option<Value>,
}

impl ListedSolution {
    fn is_finished(&self) -> bool {
        self.objective.is_some() || self.evaluation_error.is_some() || self.scoring_error.is_some()
    }
}

/// Backend for the remote optimization service.
#[derive(Debug)]
pub struct RemoteApiBackend<R: CommandRunner = ShellRunner> {
    runner: R,
    recipient: Recipient,
    send: CommandTemplate,
    get: CommandTemplate,
}

impl<R: CommandRunner> RemoteApiBackend<R> {
    /// Creates the backend, binding the match id and user name into the
    /// command templates.
    pub fn new(config: RemoteConfig, runner: R) -> Result<Self, BackendError> {
        if config.match_id.trim().is_empty() {
            return Err(BackendError::Config("remote match_id is not set".to_string()));
        }
        if config.send_command.trim().is_empty() || config.get_command.trim().is_empty() {
            return Err(BackendError::Config(
                "remote send_command and get_command must both be set".to_string(),
            ));
        }

        let recipient = Recipient::remote(&config.match_id)?;
        let send = CommandTemplate::new(config.send_command).bind(&[("ID", &config.match_id)]);
        let get = CommandTemplate::new(config.get_command).bind(&[
            ("ID", &config.match_id),
            ("USERNAME", &config.user_name),
        ]);

        Ok(Self {
            runner,
            recipient,
            send,
            get,
        })
    }

    async fn submit_one(&self, item: &Solution) -> Result<i64, BackendError> {
        let fingerprint = item.fingerprint();
        let command = self.send.render(&[("SOLUTION", fingerprint.as_str())]);
        let stdout = self.runner.run(&command, None).await?;

        let response: InsertResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
            BackendError::InvalidResponse(format!("send output is not an insert result: {}", e))
        })?;
        Ok(response.insert_solutions_one.id)
    }
}

impl<R: CommandRunner> EvaluationBackend for RemoteApiBackend<R> {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    fn requires_setup_lock(&self) -> bool {
        true
    }

    async fn submit(&self, items: &[Solution]) -> Result<Vec<JobHandle>, BackendError> {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let id = self.submit_one(item).await.inspect_err(|e| {
                warn!(
                    recipient = %self.recipient,
                    submitted = handles.len(),
                    error = %e,
                    "Remote submission failed"
                );
            })?;
            debug!(recipient = %self.recipient, id, "Solution submitted");
            handles.push(JobHandle::Remote(id));
        }
        info!(recipient = %self.recipient, count = handles.len(), "Submitted solutions");
        Ok(handles)
    }

    async fn poll(&self, handles: &[JobHandle]) -> PollOutcome {
        let mut wanted = BTreeSet::new();
        for handle in handles {
            match handle {
                JobHandle::Remote(id) => {
                    wanted.insert(*id);
                }
                other => {
                    return PollOutcome::Failed(format!(
                        "remote backend cannot poll handle {}",
                        other
                    ))
                }
            }
        }

        let size = wanted.len().to_string();
        let command = self.get.render(&[("SENDLISTSIZE", &size)]);
        let stdout = match self.runner.run(&command, None).await {
            Ok(stdout) => stdout,
            Err(e) => return PollOutcome::Failed(e.to_string()),
        };
        let response: ListResponse = match serde_json::from_str(stdout.trim()) {
            Ok(response) => response,
            Err(e) => {
                return PollOutcome::Failed(format!("get output is not a solution list: {}", e))
            }
        };

        let finished: BTreeMap<i64, ListedSolution> = response
            .solutions
            .into_iter()
            .filter(ListedSolution::is_finished)
            .map(|s| (s.id, s))
            .collect();

        let finished_ids: BTreeSet<i64> = finished.keys().copied().collect();
        if finished_ids != wanted {
            debug!(
                recipient = %self.recipient,
                finished = finished_ids.intersection(&wanted).count(),
                outstanding = wanted.len(),
                "Evaluations pending"
            );
            return PollOutcome::Pending;
        }

        let evaluations = finished
            .into_values()
            .map(|s| {
                if s.objective.is_none() {
                    warn!(
                        id = s.id,
                        evaluation_error = ?s.evaluation_error,
                        scoring_error = ?s.scoring_error,
                        "Solution finished without an objective"
                    );
                }
                (JobHandle::Remote(s.id), Evaluation::new(s.objective, s.info))
            })
            .collect();
        PollOutcome::Resolved(evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockRunner;
    use serde_json::json;

    fn config() -> RemoteConfig {
        RemoteConfig {
            match_id: "7".to_string(),
            user_name: "alice".to_string(),
            send_command: "opt create solution --match ${ID} '$SOLUTION'".to_string(),
            get_command: "opt list solutions --match $ID --owner $USERNAME --limit $SENDLISTSIZE"
                .to_string(),
        }
    }

    fn sol(values: &[f64]) -> Solution {
        Solution::new(values.to_vec()).unwrap()
    }

    fn listed(id: i64, objective: Option<f64>) -> Value {
        json!({
            "id": id,
            "objective": objective,
            "evaluation_error": null,
            "scoring_error": null,
            "info": {"id": id},
            "variable": [id]
        })
    }

    #[tokio::test]
    async fn submit_substitutes_and_parses_ids() {
        let runner = MockRunner::new()
            .respond(r#"{"insert_solutions_one": {"id": 101}}"#)
            .respond(r#"{"insert_solutions_one": {"id": 102}}"#);
        let backend = RemoteApiBackend::new(config(), runner).unwrap();

        let handles = backend
            .submit(&[sol(&[1.0, 2.0]), sol(&[0.5])])
            .await
            .unwrap();

        assert_eq!(handles, vec![JobHandle::Remote(101), JobHandle::Remote(102)]);
        assert_eq!(
            backend.runner.commands(),
            vec![
                "opt create solution --match 7 '[1,2]'",
                "opt create solution --match 7 '[0.5]'"
            ]
        );
    }

    #[tokio::test]
    async fn submit_stops_at_first_failure() {
        let runner = MockRunner::new()
            .respond(r#"{"insert_solutions_one": {"id": 101}}"#)
            .fail("server unavailable");
        let backend = RemoteApiBackend::new(config(), runner).unwrap();

        let result = backend
            .submit(&[sol(&[1.0]), sol(&[2.0]), sol(&[3.0])])
            .await;
        assert!(matches!(result, Err(BackendError::CommandFailed { .. })));
        assert_eq!(backend.runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn submit_rejects_unexpected_output() {
        let runner = MockRunner::new().respond("Error: not logged in");
        let backend = RemoteApiBackend::new(config(), runner).unwrap();
        let result = backend.submit(&[sol(&[1.0])]).await;
        assert!(matches!(result, Err(BackendError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn poll_waits_for_every_submitted_id() {
        // Scenario C: two of three finished, then all three.
        let partial = json!({"solutions": [
            listed(3, Some(0.3)), listed(2, None), listed(1, Some(0.1))
        ]});
        let complete = json!({"solutions": [
            listed(3, Some(0.3)), listed(2, Some(0.2)), listed(1, Some(0.1))
        ]});
        let runner = MockRunner::new()
            .respond(partial.to_string())
            .respond(complete.to_string());
        let backend = RemoteApiBackend::new(config(), runner).unwrap();
        let handles = vec![JobHandle::Remote(2), JobHandle::Remote(1), JobHandle::Remote(3)];

        assert_eq!(backend.poll(&handles).await, PollOutcome::Pending);

        match backend.poll(&handles).await {
            PollOutcome::Resolved(map) => {
                let ids: Vec<_> = map.keys().cloned().collect();
                assert_eq!(
                    ids,
                    vec![JobHandle::Remote(1), JobHandle::Remote(2), JobHandle::Remote(3)]
                );
                assert_eq!(map[&JobHandle::Remote(2)].objective, Some(0.2));
                assert_eq!(map[&JobHandle::Remote(2)].info, Some(json!({"id": 2})));
            }
            other => panic!("expected resolved, got {:?}", other),
        }

        assert_eq!(
            backend.runner.commands()[0],
            "opt list solutions --match 7 --owner alice --limit 3"
        );
    }

    #[tokio::test]
    async fn errored_solutions_count_as_finished() {
        let mut errored = listed(5, None);
        errored["evaluation_error"] = json!("timeout");
        let runner = MockRunner::new().respond(json!({"solutions": [errored]}).to_string());
        let backend = RemoteApiBackend::new(config(), runner).unwrap();

        match backend.poll(&[JobHandle::Remote(5)]).await {
            PollOutcome::Resolved(map) => {
                assert_eq!(map[&JobHandle::Remote(5)].objective, None);
            }
            other => panic!("expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn foreign_ids_keep_polling_pending() {
        let runner = MockRunner::new().respond(
            json!({"solutions": [listed(1, Some(1.0)), listed(99, Some(9.9))]}).to_string(),
        );
        let backend = RemoteApiBackend::new(config(), runner).unwrap();
        assert_eq!(
            backend
                .poll(&[JobHandle::Remote(1), JobHandle::Remote(2)])
                .await,
            PollOutcome::Pending
        );
    }

    #[tokio::test]
    async fn command_failure_fails_the_poll() {
        let runner = MockRunner::new().fail("network down");
        let backend = RemoteApiBackend::new(config(), runner).unwrap();
        assert!(matches!(
            backend.poll(&[JobHandle::Remote(1)]).await,
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn rejects_missing_match_id() {
        let mut cfg = config();
        cfg.match_id = String::new();
        assert!(matches!(
            RemoteApiBackend::new(cfg, MockRunner::new()),
            Err(BackendError::Config(_))
        ));
    }
}
