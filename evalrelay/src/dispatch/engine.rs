//! The dispatch engine.
//!
//! One cycle walks the lifecycle below, recording every step in the status
//! log so that other processes (and the `status` command) can follow along:
//!
//! ```text
//! setup guard (remote only) → Waiting → Solution Sending
//!     → Previously Sent Solution                       (nothing new to send)
//!     → Solution Sending Error                         (submit failed)
//!     → Solution Sent → Evaluation Value Receiving
//!         → Evaluation Value Received
//!         → Evaluation Value Receiving Error           (poll failed, side record written)
//! ```
//!
//! Cancellation while waiting or polling records `Exited with Ctrl-C`.
//! Submission itself is never interrupted: once the backend has acknowledged
//! work, its handles always reach the store and, when needed, the side record.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{DispatchError, DispatchSettings};
use crate::backend::{BackendError, EvaluationBackend, JobHandle, PollOutcome};
use crate::guard::SetupGuard;
use crate::solution::{Fingerprint, Solution};
use crate::status::{DispatchState, StatusCursor, StatusLog};
use crate::store::{Evaluation, ResultRecord, ResultStore, UnresolvedFile, UnresolvedRecord};

/// Runs dispatch cycles against one backend.
pub struct DispatchEngine<B> {
    backend: B,
    store: ResultStore,
    status: StatusLog,
    unresolved: UnresolvedFile,
    lock_path: PathBuf,
    settings: DispatchSettings,
    cancel: CancellationToken,
}

impl<B: EvaluationBackend> DispatchEngine<B> {
    /// Creates an engine writing results for the backend's recipient into
    /// `results_dir`.
    pub fn new(
        backend: B,
        results_dir: &Path,
        status: StatusLog,
        unresolved: UnresolvedFile,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        let store = ResultStore::for_recipient(results_dir, backend.recipient());
        Self {
            backend,
            store,
            status,
            unresolved,
            lock_path: lock_path.into(),
            settings: DispatchSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses `token` to cancel running cycles.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn unresolved(&self) -> &UnresolvedFile {
        &self.unresolved
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Token that cancels this engine's cycles.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one full cycle for `items`.
    ///
    /// Returns one record per input position, in input order. Items whose
    /// evaluation is already cached are not sent again.
    pub async fn run_cycle(&self, items: &[Solution]) -> Result<Vec<ResultRecord>, DispatchError> {
        info!(
            backend = self.backend.name(),
            recipient = %self.backend.recipient(),
            items = items.len(),
            "Starting dispatch cycle"
        );

        self.hold_setup_guard().await?;

        let mut cursor = self.status.open(self.backend.recipient())?;
        self.status.append(&mut cursor, DispatchState::Waiting)?;
        self.wait_until_idle(&mut cursor).await?;
        self.status
            .set_state(&mut cursor, DispatchState::SolutionSending)?;

        let lookup = match self.store.lookup(items) {
            Ok(lookup) => lookup,
            Err(e) => {
                self.mark(&mut cursor, DispatchState::SolutionSendingError);
                return Err(e.into());
            }
        };

        let to_send = unique(&lookup.to_send);
        if to_send.is_empty() {
            self.status
                .set_state(&mut cursor, DispatchState::PreviouslySolution)?;
            info!(
                recipient = %self.backend.recipient(),
                "Every solution was sent before; returning cached results"
            );
            return Ok(merge(items, lookup.known, &HashMap::new()));
        }

        let handles = match self.backend.submit(&to_send).await {
            Ok(handles) => handles,
            Err(e) => {
                error!(recipient = %self.backend.recipient(), error = %e, "Submission failed");
                self.mark(&mut cursor, DispatchState::SolutionSendingError);
                return Err(DispatchError::Submission(e));
            }
        };
        if handles.len() != to_send.len() {
            self.mark(&mut cursor, DispatchState::SolutionSendingError);
            return Err(DispatchError::Submission(BackendError::InvalidResponse(
                format!(
                    "{} handles returned for {} solutions",
                    handles.len(),
                    to_send.len()
                ),
            )));
        }

        if let Err(e) = self.store.insert(&to_send) {
            return Err(self.abandon(&mut cursor, &to_send, &handles, e));
        }
        if let Err(e) = self.status.set_state(&mut cursor, DispatchState::SolutionSent) {
            return Err(self.abandon(&mut cursor, &to_send, &handles, e));
        }

        let evaluations = self.receive(&mut cursor, &to_send, &handles).await?;
        let fresh = self.store_evaluations(&mut cursor, &to_send, &handles, &evaluations)?;

        info!(
            recipient = %self.backend.recipient(),
            received = evaluations.len(),
            "Dispatch cycle complete"
        );
        Ok(merge(items, lookup.known, &fresh))
    }

    /// Resumes polling for the work left in the side record by an earlier
    /// failed cycle.
    ///
    /// Returns one record per side-record entry, in side-record order. The
    /// side record is deleted once everything has been received.
    pub async fn re_receive(&self) -> Result<Vec<ResultRecord>, DispatchError> {
        let record = self
            .unresolved
            .load()?
            .ok_or_else(|| DispatchError::MissingSideRecord(self.unresolved.path().to_path_buf()))?;
        if record.store_path != self.store.path() {
            return Err(DispatchError::SideRecordMismatch {
                expected: self.store.path().to_path_buf(),
                found: record.store_path,
            });
        }

        let items = record.items();
        let handles = record.handles();
        info!(
            recipient = %self.backend.recipient(),
            outstanding = handles.len(),
            "Resuming evaluation receipt"
        );

        let mut cursor = self.status.open(self.backend.recipient())?;
        self.status.append(&mut cursor, DispatchState::Waiting)?;
        self.wait_until_idle(&mut cursor).await?;

        let known = match self.store.lookup(&items) {
            Ok(lookup) => lookup.known,
            Err(e) => {
                self.mark(&mut cursor, DispatchState::EvaluationReceivingError);
                return Err(e.into());
            }
        };

        let evaluations = self.receive(&mut cursor, &items, &handles).await?;
        let fresh = self.store_evaluations(&mut cursor, &items, &handles, &evaluations)?;

        if let Err(e) = self.unresolved.remove() {
            warn!(path = %self.unresolved.path().display(), error = %e, "Failed to remove side record");
        }
        Ok(merge(&items, known, &fresh))
    }

    /// Takes and holds the setup guard for backends that need one.
    async fn hold_setup_guard(&self) -> Result<(), DispatchError> {
        if !self.backend.requires_setup_lock() {
            return Ok(());
        }

        let guard = SetupGuard::acquire(&self.lock_path, &self.cancel).await?;
        debug!(hold = ?self.settings.setup_hold, "Holding setup lock");
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(self.settings.setup_hold) => {}
        }
        drop(guard);
        Ok(())
    }

    /// Waits until the previous cycle of this recipient has finished.
    async fn wait_until_idle(&self, cursor: &mut StatusCursor) -> Result<(), DispatchError> {
        let recipient = cursor.recipient().clone();
        let started = Instant::now();
        let mut announced = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(cursor));
            }

            match self.status.is_idle(&recipient, cursor) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.mark(cursor, DispatchState::SolutionSendingError);
                    return Err(e.into());
                }
            }

            if !announced {
                info!(recipient = %recipient, "Waiting for the previous cycle to finish");
                announced = true;
            }

            if let Some(timeout) = self.settings.idle_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    warn!(recipient = %recipient, ?waited, "Gave up waiting for the previous cycle");
                    self.mark(cursor, DispatchState::SolutionSendingError);
                    return Err(DispatchError::IdleTimeout {
                        recipient: recipient.to_string(),
                        waited,
                    });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled(cursor)),
                _ = tokio::time::sleep(self.settings.idle_check_interval) => {}
            }
        }

        if announced {
            debug!(recipient = %recipient, waited = ?started.elapsed(), "Previous cycle finished");
        }
        Ok(())
    }

    /// Polls until every handle has an evaluation. Returns them aligned with
    /// `handles`.
    async fn receive(
        &self,
        cursor: &mut StatusCursor,
        items: &[Solution],
        handles: &[JobHandle],
    ) -> Result<Vec<Evaluation>, DispatchError> {
        if let Err(e) = self.status.set_state(cursor, DispatchState::EvaluationReceiving) {
            return Err(self.abandon(cursor, items, handles, e));
        }

        let mut attempts: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = self.save_side_record(items, handles);
                    return Err(self.cancelled(cursor));
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            attempts += 1;
            match self.backend.poll(handles).await {
                PollOutcome::Pending => {
                    trace!(attempts, outstanding = handles.len(), "Evaluations pending");
                }
                PollOutcome::Failed(reason) => {
                    return Err(self.poll_failed(cursor, items, handles, reason));
                }
                PollOutcome::Resolved(mut resolved) => {
                    let mut evaluations = Vec::with_capacity(handles.len());
                    for handle in handles {
                        match resolved.remove(handle) {
                            Some(evaluation) => evaluations.push(evaluation),
                            None => {
                                let reason = format!("no evaluation returned for {}", handle);
                                return Err(self.poll_failed(cursor, items, handles, reason));
                            }
                        }
                    }
                    debug!(attempts, received = evaluations.len(), "Evaluations received");
                    return Ok(evaluations);
                }
            }
        }
    }

    /// Persists received evaluations and closes the cycle's lifecycle row.
    fn store_evaluations(
        &self,
        cursor: &mut StatusCursor,
        items: &[Solution],
        handles: &[JobHandle],
        evaluations: &[Evaluation],
    ) -> Result<HashMap<Fingerprint, Evaluation>, DispatchError> {
        if let Err(e) = self.store.fill(items, evaluations) {
            return Err(self.abandon(cursor, items, handles, e));
        }
        self.status
            .set_state(cursor, DispatchState::EvaluationReceived)?;

        Ok(items
            .iter()
            .map(Solution::fingerprint)
            .zip(evaluations.iter().cloned())
            .collect())
    }

    fn poll_failed(
        &self,
        cursor: &mut StatusCursor,
        items: &[Solution],
        handles: &[JobHandle],
        reason: String,
    ) -> DispatchError {
        error!(recipient = %self.backend.recipient(), reason = %reason, "Polling failed");
        let saved = self.save_side_record(items, handles);
        self.mark(cursor, DispatchState::EvaluationReceivingError);
        match saved {
            Ok(()) => DispatchError::Poll {
                reason,
                side_record: self.unresolved.path().to_path_buf(),
            },
            Err(e) => e,
        }
    }

    /// Keeps submitted work recoverable after a failure that is not a poll
    /// failure: saves the side record, marks the row and returns `err`.
    fn abandon(
        &self,
        cursor: &mut StatusCursor,
        items: &[Solution],
        handles: &[JobHandle],
        err: impl Into<DispatchError>,
    ) -> DispatchError {
        let err = err.into();
        error!(recipient = %self.backend.recipient(), error = %err, "Dispatch cycle failed after submission");
        let _ = self.save_side_record(items, handles);
        self.mark(cursor, DispatchState::EvaluationReceivingError);
        err
    }

    fn save_side_record(&self, items: &[Solution], handles: &[JobHandle]) -> Result<(), DispatchError> {
        let record = UnresolvedRecord::new(self.store.path(), items, handles);
        match self.unresolved.save(&record) {
            Ok(()) => {
                info!(
                    path = %self.unresolved.path().display(),
                    outstanding = handles.len(),
                    "Saved outstanding evaluations for re-receive"
                );
                Ok(())
            }
            Err(e) => {
                error!(path = %self.unresolved.path().display(), error = %e, "Failed to save side record");
                Err(e.into())
            }
        }
    }

    fn cancelled(&self, cursor: &mut StatusCursor) -> DispatchError {
        warn!(recipient = %cursor.recipient(), "Dispatch cycle cancelled");
        self.mark(cursor, DispatchState::ExitedWithCancellation);
        DispatchError::Cancelled
    }

    /// Records a terminal state, logging rather than propagating failures.
    fn mark(&self, cursor: &mut StatusCursor, state: DispatchState) {
        if let Err(e) = self.status.set_state(cursor, state) {
            warn!(recipient = %cursor.recipient(), state = %state, error = %e, "Failed to record state");
        }
    }
}

/// Drops repeated solutions, keeping the first occurrence.
fn unique(items: &[Solution]) -> Vec<Solution> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.fingerprint()))
        .cloned()
        .collect()
}

/// Builds the per-position result list.
///
/// A position keeps its cached record when that record has an objective;
/// otherwise the fresh evaluation (if any) fills the record's empty fields.
fn merge(
    items: &[Solution],
    known: Vec<Option<ResultRecord>>,
    fresh: &HashMap<Fingerprint, Evaluation>,
) -> Vec<ResultRecord> {
    items
        .iter()
        .zip(known)
        .map(|(item, known)| match known {
            Some(record) if !record.is_pending() => record,
            known => {
                let fingerprint = item.fingerprint();
                let mut record =
                    known.unwrap_or_else(|| ResultRecord::placeholder(fingerprint.clone()));
                if let Some(evaluation) = fresh.get(&fingerprint) {
                    record.fill(evaluation);
                }
                record
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::Recipient;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    // ───────────────────────────────────────────────────────────────────────
    // Mock backend
    // ───────────────────────────────────────────────────────────────────────

    /// Backend whose evaluations are the sum of each solution's values.
    struct MockBackend {
        recipient: Recipient,
        setup_lock: bool,
        fail_submit: bool,
        always_pending: bool,
        /// Delay after acknowledging each item.
        submit_delay: Option<Duration>,
        /// Log other recipients write to while this backend submits.
        crowded_log: Option<StatusLog>,
        scripted: Mutex<VecDeque<PollOutcome>>,
        submitted: Mutex<Vec<Solution>>,
        by_id: Mutex<HashMap<i64, Solution>>,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                recipient: Recipient::remote("1").unwrap(),
                setup_lock: false,
                fail_submit: false,
                always_pending: false,
                submit_delay: None,
                crowded_log: None,
                scripted: Mutex::new(VecDeque::new()),
                submitted: Mutex::new(Vec::new()),
                by_id: Mutex::new(HashMap::new()),
            }
        }

        fn with_outcomes(self, outcomes: Vec<PollOutcome>) -> Self {
            *self.scripted.lock().unwrap() = outcomes.into();
            self
        }

        fn submitted(&self) -> Vec<Solution> {
            self.submitted.lock().unwrap().clone()
        }

        fn remember(&self, items: &[Solution]) {
            let mut by_id = self.by_id.lock().unwrap();
            for (i, item) in items.iter().enumerate() {
                by_id.insert(100 + i as i64, item.clone());
            }
        }
    }

    impl EvaluationBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn recipient(&self) -> &Recipient {
            &self.recipient
        }

        fn requires_setup_lock(&self) -> bool {
            self.setup_lock
        }

        async fn submit(&self, items: &[Solution]) -> Result<Vec<JobHandle>, BackendError> {
            if self.fail_submit {
                return Err(BackendError::InvalidResponse("rejected".to_string()));
            }
            let mut handles = Vec::new();
            for item in items {
                {
                    let mut by_id = self.by_id.lock().unwrap();
                    let id = 100 + by_id.len() as i64;
                    by_id.insert(id, item.clone());
                    self.submitted.lock().unwrap().push(item.clone());
                    handles.push(JobHandle::Remote(id));
                }
                if let Some(delay) = self.submit_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(log) = &self.crowded_log {
                let noisy: Recipient = "qsub_default".parse().unwrap();
                for _ in 0..3 {
                    let mut other = log.open(&noisy).unwrap();
                    log.append(&mut other, DispatchState::EvaluationReceived)
                        .unwrap();
                }
            }
            Ok(handles)
        }

        async fn poll(&self, handles: &[JobHandle]) -> PollOutcome {
            if self.always_pending {
                return PollOutcome::Pending;
            }
            if let Some(outcome) = self.scripted.lock().unwrap().pop_front() {
                return outcome;
            }
            let by_id = self.by_id.lock().unwrap();
            let mut resolved = BTreeMap::new();
            for handle in handles {
                let JobHandle::Remote(id) = handle else {
                    return PollOutcome::Failed("unexpected handle".to_string());
                };
                let Some(item) = by_id.get(id) else {
                    return PollOutcome::Failed(format!("unknown id {}", id));
                };
                let sum: f64 = item.values().iter().sum();
                resolved.insert(handle.clone(), Evaluation::new(Some(sum), None));
            }
            PollOutcome::Resolved(resolved)
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Helpers
    // ───────────────────────────────────────────────────────────────────────

    fn fast_settings() -> DispatchSettings {
        DispatchSettings {
            poll_interval: Duration::from_millis(5),
            idle_check_interval: Duration::from_millis(5),
            idle_timeout: None,
            setup_hold: Duration::ZERO,
        }
    }

    fn create_test_engine(dir: &TempDir, backend: MockBackend) -> DispatchEngine<MockBackend> {
        let status = StatusLog::new(dir.path().join("status.csv"), 100).unwrap();
        DispatchEngine::new(
            backend,
            &dir.path().join("results"),
            status,
            UnresolvedFile::new(dir.path().join("errors").join("UnReceiveData.json")),
            dir.path().join("opt.lock"),
        )
        .with_settings(fast_settings())
    }

    fn sol(values: &[f64]) -> Solution {
        Solution::new(values.to_vec()).unwrap()
    }

    fn objectives(records: &[ResultRecord]) -> Vec<Option<f64>> {
        records.iter().map(|r| r.objective).collect()
    }

    fn last_state(engine: &DispatchEngine<MockBackend>) -> Option<DispatchState> {
        engine.status().rows().unwrap().last().and_then(|row| row.state())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Cycles
    // ───────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_items_are_sent_then_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        let items = vec![sol(&[1.0, 2.0]), sol(&[3.0, 4.0])];

        let first = engine.run_cycle(&items).await.unwrap();
        assert_eq!(objectives(&first), vec![Some(3.0), Some(7.0)]);
        assert_eq!(last_state(&engine), Some(DispatchState::EvaluationReceived));

        let second = engine.run_cycle(&items).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(engine.backend().submitted().len(), 2);
        assert_eq!(last_state(&engine), Some(DispatchState::PreviouslySolution));
        assert_eq!(engine.status().rows().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_unknown_items_are_sent() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        engine
            .store()
            .fill(&[sol(&[1.0, 2.0])], &[Evaluation::new(Some(7.0), None)])
            .unwrap();

        let records = engine
            .run_cycle(&[sol(&[1.0, 2.0]), sol(&[3.0, 4.0])])
            .await
            .unwrap();

        assert_eq!(engine.backend().submitted(), vec![sol(&[3.0, 4.0])]);
        assert_eq!(objectives(&records), vec![Some(7.0), Some(7.0)]);
        assert_eq!(records[0].fingerprint.as_str(), "[1,2]");
        assert_eq!(records[1].fingerprint.as_str(), "[3,4]");
    }

    #[tokio::test]
    async fn repeated_items_are_sent_once() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        let items = vec![sol(&[1.0]), sol(&[2.0]), sol(&[1.0])];

        let records = engine.run_cycle(&items).await.unwrap();

        assert_eq!(engine.backend().submitted(), vec![sol(&[1.0]), sol(&[2.0])]);
        assert_eq!(objectives(&records), vec![Some(1.0), Some(2.0), Some(1.0)]);
    }

    #[tokio::test]
    async fn empty_input_is_previously_sent() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        assert!(engine.run_cycle(&[]).await.unwrap().is_empty());
        assert_eq!(last_state(&engine), Some(DispatchState::PreviouslySolution));
    }

    #[tokio::test]
    async fn submission_failure_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new();
        backend.fail_submit = true;
        let engine = create_test_engine(&dir, backend);

        let err = engine.run_cycle(&[sol(&[1.0])]).await.unwrap_err();

        assert!(matches!(err, DispatchError::Submission(_)));
        assert_eq!(last_state(&engine), Some(DispatchState::SolutionSendingError));
        assert!(engine.store().load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_failure_writes_side_record() {
        let dir = TempDir::new().unwrap();
        let backend = MockBackend::new().with_outcomes(vec![
            PollOutcome::Pending,
            PollOutcome::Failed("service unavailable".to_string()),
        ]);
        let engine = create_test_engine(&dir, backend);
        let items = vec![sol(&[1.0]), sol(&[2.0]), sol(&[3.0])];

        let err = engine.run_cycle(&items).await.unwrap_err();

        match err {
            DispatchError::Poll { reason, side_record } => {
                assert_eq!(reason, "service unavailable");
                assert_eq!(side_record, engine.unresolved().path());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            last_state(&engine),
            Some(DispatchState::EvaluationReceivingError)
        );

        let record = engine.unresolved().load().unwrap().unwrap();
        assert_eq!(record.store_path, engine.store().path());
        assert_eq!(record.items(), items);
        assert_eq!(
            record.handles(),
            vec![JobHandle::Remote(100), JobHandle::Remote(101), JobHandle::Remote(102)]
        );

        // Submitted items are registered as placeholders.
        let stored = engine.store().load().unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(ResultRecord::is_pending));
    }

    #[tokio::test]
    async fn re_receive_resumes_and_clears_side_record() {
        let dir = TempDir::new().unwrap();
        let failing = create_test_engine(
            &dir,
            MockBackend::new().with_outcomes(vec![PollOutcome::Failed("down".to_string())]),
        );
        let items = vec![sol(&[1.0, 1.0]), sol(&[2.0, 2.0])];
        assert!(failing.run_cycle(&items).await.is_err());

        let backend = MockBackend::new();
        backend.remember(&items);
        let engine = create_test_engine(&dir, backend);

        let records = engine.re_receive().await.unwrap();

        assert_eq!(objectives(&records), vec![Some(2.0), Some(4.0)]);
        assert!(!engine.unresolved().path().exists());
        assert_eq!(last_state(&engine), Some(DispatchState::EvaluationReceived));
        assert!(engine.backend().submitted().is_empty());

        let cached = engine.store().lookup(&items).unwrap();
        assert!(cached.to_send.is_empty());
    }

    #[tokio::test]
    async fn failed_re_receive_keeps_side_record() {
        let dir = TempDir::new().unwrap();
        let failing = create_test_engine(
            &dir,
            MockBackend::new().with_outcomes(vec![PollOutcome::Failed("down".to_string())]),
        );
        let items = vec![sol(&[1.0]), sol(&[2.0])];
        assert!(failing.run_cycle(&items).await.is_err());
        let saved = failing.unresolved().load().unwrap().unwrap();

        let backend = MockBackend::new()
            .with_outcomes(vec![PollOutcome::Failed("still down".to_string())]);
        backend.remember(&items);
        let engine = create_test_engine(&dir, backend);

        let err = engine.re_receive().await.unwrap_err();

        match err {
            DispatchError::Poll { reason, .. } => assert_eq!(reason, "still down"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            last_state(&engine),
            Some(DispatchState::EvaluationReceivingError)
        );
        assert_eq!(engine.status().rows().unwrap().len(), 2);

        let record = engine.unresolved().load().unwrap().unwrap();
        assert_eq!(record, saved);
        assert_eq!(record.items(), items);
        assert_eq!(
            record.handles(),
            vec![JobHandle::Remote(100), JobHandle::Remote(101)]
        );
        assert!(engine.store().load().unwrap().iter().all(ResultRecord::is_pending));
    }

    #[tokio::test]
    async fn re_receive_requires_side_record() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        assert!(matches!(
            engine.re_receive().await,
            Err(DispatchError::MissingSideRecord(_))
        ));
    }

    #[tokio::test]
    async fn re_receive_rejects_foreign_side_record() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());
        engine
            .unresolved()
            .save(&UnresolvedRecord::new(
                dir.path().join("results").join("resultFile_qsub_default.json"),
                &[sol(&[1.0])],
                &[JobHandle::Remote(1)],
            ))
            .unwrap();

        assert!(matches!(
            engine.re_receive().await,
            Err(DispatchError::SideRecordMismatch { .. })
        ));
        assert!(engine.unresolved().is_pending());
    }

    // ───────────────────────────────────────────────────────────────────────
    // Waiting and cancellation
    // ───────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn waits_for_previous_cycle_of_same_recipient() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());

        let log = engine.status().clone();
        let mut previous = log.open(engine.backend().recipient()).unwrap();
        log.append(&mut previous, DispatchState::EvaluationReceiving)
            .unwrap();

        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            log.set_state(&mut previous, DispatchState::EvaluationReceived)
                .unwrap();
        });

        let started = std::time::Instant::now();
        let records = engine.run_cycle(&[sol(&[5.0])]).await.unwrap();
        finisher.await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(objectives(&records), vec![Some(5.0)]);
    }

    #[tokio::test]
    async fn idle_timeout_gives_up() {
        let dir = TempDir::new().unwrap();
        let mut settings = fast_settings();
        settings.idle_timeout = Some(Duration::from_millis(30));
        let engine = create_test_engine(&dir, MockBackend::new()).with_settings(settings);

        let mut stuck = engine.status().open(engine.backend().recipient()).unwrap();
        engine
            .status()
            .append(&mut stuck, DispatchState::SolutionSent)
            .unwrap();

        let err = engine.run_cycle(&[sol(&[1.0])]).await.unwrap_err();

        assert!(matches!(err, DispatchError::IdleTimeout { .. }));
        assert_eq!(last_state(&engine), Some(DispatchState::SolutionSendingError));
        assert!(engine.backend().submitted().is_empty());
    }

    #[tokio::test]
    async fn cancellation_while_polling_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new();
        backend.always_pending = true;
        let engine = create_test_engine(&dir, backend);

        let token = engine.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let err = engine.run_cycle(&[sol(&[1.0])]).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(
            last_state(&engine),
            Some(DispatchState::ExitedWithCancellation)
        );
        assert!(engine.unresolved().is_pending());
    }

    #[tokio::test]
    async fn cancellation_during_submit_keeps_acknowledged_work() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new();
        backend.submit_delay = Some(Duration::from_millis(40));
        let engine = create_test_engine(&dir, backend);
        let items = vec![sol(&[1.0]), sol(&[2.0]), sol(&[3.0])];

        let token = engine.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            token.cancel();
        });

        let err = engine.run_cycle(&items).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(engine.backend().submitted(), items);
        assert_eq!(
            last_state(&engine),
            Some(DispatchState::ExitedWithCancellation)
        );

        let record = engine.unresolved().load().unwrap().unwrap();
        assert_eq!(record.items(), items);
        assert_eq!(engine.store().load().unwrap().len(), 3);

        // A later cycle finds the placeholders and sends nothing again.
        let next = create_test_engine(&dir, MockBackend::new());
        let records = next.run_cycle(&items).await.unwrap();
        assert!(next.backend().submitted().is_empty());
        assert!(records.iter().all(ResultRecord::is_pending));
    }

    #[tokio::test]
    async fn lost_status_row_after_submit_keeps_side_record() {
        let dir = TempDir::new().unwrap();
        let status = StatusLog::new(dir.path().join("status.csv"), 2).unwrap();
        let mut backend = MockBackend::new();
        backend.crowded_log = Some(status.clone());
        let engine = DispatchEngine::new(
            backend,
            &dir.path().join("results"),
            status,
            UnresolvedFile::new(dir.path().join("errors").join("UnReceiveData.json")),
            dir.path().join("opt.lock"),
        )
        .with_settings(fast_settings());

        let err = engine.run_cycle(&[sol(&[5.0])]).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Status(crate::status::StatusError::RowLost { .. })
        ));
        let record = engine.unresolved().load().unwrap().unwrap();
        assert_eq!(record.items(), vec![sol(&[5.0])]);
        assert_eq!(record.handles(), vec![JobHandle::Remote(100)]);
        let stored = engine.store().load().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_pending());
    }

    #[tokio::test]
    async fn cancellation_while_waiting_is_recorded() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir, MockBackend::new());

        let mut busy = engine.status().open(engine.backend().recipient()).unwrap();
        engine
            .status()
            .append(&mut busy, DispatchState::Waiting)
            .unwrap();

        let token = engine.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = engine.run_cycle(&[sol(&[1.0])]).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            last_state(&engine),
            Some(DispatchState::ExitedWithCancellation)
        );
        assert!(!engine.unresolved().is_pending());
    }

    #[tokio::test]
    async fn setup_lock_serializes_remote_submissions() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new();
        backend.setup_lock = true;
        let engine = create_test_engine(&dir, backend);

        let held = SetupGuard::acquire(&dir.path().join("opt.lock"), &CancellationToken::new())
            .await
            .unwrap();

        let batch = [sol(&[1.0])];
        let cycle = engine.run_cycle(&batch);
        tokio::pin!(cycle);
        let early = tokio::time::timeout(Duration::from_millis(80), &mut cycle).await;
        assert!(early.is_err(), "cycle must wait for the setup lock");
        assert!(engine.status().rows().unwrap().is_empty());

        drop(held);
        let records = cycle.await.unwrap();
        assert_eq!(objectives(&records), vec![Some(1.0)]);
    }

    #[test]
    fn merge_prefers_cached_objectives() {
        let a = sol(&[1.0]);
        let b = sol(&[2.0]);
        let c = sol(&[3.0]);
        let known = vec![
            Some(ResultRecord::resolved(a.fingerprint(), Evaluation::new(Some(10.0), None))),
            Some(ResultRecord::placeholder(b.fingerprint())),
            None,
        ];
        let fresh: HashMap<_, _> = [(c.fingerprint(), Evaluation::new(Some(30.0), None))]
            .into_iter()
            .collect();

        let merged = merge(&[a, b, c], known, &fresh);
        assert_eq!(objectives(&merged), vec![Some(10.0), None, Some(30.0)]);
    }
}
