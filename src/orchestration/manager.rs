//! Central registry for subagent runs.
//!
//! [`SubagentOrchestrator`] is the single source of truth for every spawned
//! subagent run. Runs form a forest keyed by requester session: a run's
//! `child_session_key` may itself request further runs, to any depth.
//!
//! **Concurrency model:** run records live in a `HashMap` behind
//! `Arc<Mutex<..>>`; the lock is only held for short synchronous sections and
//! never across an `.await`. Spawn admission is serialized per requester
//! session by an async gate held from the cap check until the accepted run is
//! recorded, so concurrent spawns against one parent cannot overshoot the cap.
//!
//! **Cancellation model:** each run holds a [`CancellationToken`] derived from
//! its parent's token (the app run's token, or the parent subagent's).
//! Terminating a run cancels its token, which cascades to anything spawned
//! beneath it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::executor::{SpawnExecutor, SpawnRequest};
use super::state::RunOutcome;
use super::types::{SpawnParams, SpawnResult, SubagentRun, now_ms};

/// Target selector matching every active run under a parent.
pub const TARGET_ALL: &str = "all";

/// Internal entry stored in the registry. Callers only ever see
/// [`SubagentRun`] clones.
struct SubagentEntry {
    run: SubagentRun,
    cancel_token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, SubagentEntry>,
    /// Run ids in creation order.
    order: Vec<String>,
}

impl Registry {
    /// Run ids of every descendant of `parent`, breadth-first, creation
    /// order within a level. Session cycles are walked once.
    fn descendant_ids(&self, parent: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([parent]);
        let mut queue: VecDeque<&str> = VecDeque::from([parent]);

        while let Some(session) = queue.pop_front() {
            for id in &self.order {
                let Some(entry) = self.entries.get(id) else {
                    continue;
                };
                if entry.run.requester_session_key != session {
                    continue;
                }
                out.push(id.clone());
                let child = entry.run.child_session_key.as_str();
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    fn count_active(&self, parent: &str) -> usize {
        self.descendant_ids(parent)
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.run.is_active())
            .count()
    }

    /// End a run if it is still active. Returns whether anything changed.
    fn end(&mut self, id: &str, outcome: RunOutcome, at: i64) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.run.ended_at.is_some() {
            return false;
        }
        // A run ended before it started still counts as having run, so its
        // derived state reflects the outcome rather than `queued`.
        if entry.run.started_at.is_none() {
            entry.run.started_at = Some(at);
        }
        entry.run.ended_at = Some(at);
        entry.run.outcome = Some(outcome);
        entry.cancel_token.cancel();
        true
    }

    /// End every active run under `parent`. Returns how many were ended.
    fn terminate_subtree(&mut self, parent: &str, reason: &str, at: i64) -> usize {
        let mut terminated = 0;
        for id in self.descendant_ids(parent) {
            let active = self.entries.get(&id).is_some_and(|e| e.run.is_active());
            if active && self.end(&id, RunOutcome::terminated(reason), at) {
                terminated += 1;
            }
        }
        terminated
    }

    fn find_active(&self, parent: &str, target: &str) -> Vec<SubagentRun> {
        let target = target.trim();
        self.descendant_ids(parent)
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| &e.run)
            .filter(|run| run.is_active())
            .filter(|run| {
                target == TARGET_ALL
                    || run.run_id == target
                    || run.child_session_key == target
                    || run.label.as_deref() == Some(target)
            })
            .cloned()
            .collect()
    }
}

/// Registry, admission control and termination for subagent runs.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SubagentOrchestrator {
    registry: Arc<Mutex<Registry>>,
    gates: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    executor: Arc<dyn SpawnExecutor>,
    root_cancel_token: CancellationToken,
}

impl SubagentOrchestrator {
    /// Create an orchestrator that delegates spawns to `executor`.
    ///
    /// Cancelling `root_cancel_token` cancels every run's token.
    pub fn new(executor: Arc<dyn SpawnExecutor>, root_cancel_token: CancellationToken) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            gates: Arc::new(Mutex::new(HashMap::new())),
            executor,
            root_cancel_token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate_for(&self, parent: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry(parent.to_string()).or_default().clone()
    }

    /// Drop `parent`'s gate once no other spawn holds or awaits it.
    ///
    /// Gates are only cloned out of the map under its lock, so a count of
    /// two (the map and `gate`) cannot grow while the lock is held.
    fn release_gate(&self, parent: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = Arc::strong_count(&gate) == 2
            && gates.get(parent).is_some_and(|g| Arc::ptr_eq(g, &gate));
        if idle {
            gates.remove(parent);
        }
    }

    /// Number of queued or running runs anywhere under `parent`.
    pub fn count_active(&self, parent: &str) -> usize {
        self.lock().count_active(parent)
    }

    /// Every run under `parent`, at any depth.
    pub fn list_descendants(&self, parent: &str) -> Vec<SubagentRun> {
        let registry = self.lock();
        registry
            .descendant_ids(parent)
            .iter()
            .filter_map(|id| registry.entries.get(id))
            .map(|e| e.run.clone())
            .collect()
    }

    /// Snapshot of one run. Returns `None` if not found.
    pub fn get(&self, run_id: &str) -> Option<SubagentRun> {
        self.lock().entries.get(run_id).map(|e| e.run.clone())
    }

    /// Admit and spawn a subagent under `parent`, subject to `cap`.
    ///
    /// `parent_token` is the cancellation token of the requesting app run. When
    /// absent, the token of the subagent that owns `parent` as its child
    /// session is used, falling back to the root token.
    pub async fn try_spawn(
        &self,
        parent: &str,
        params: SpawnParams,
        cap: usize,
        parent_token: Option<&CancellationToken>,
    ) -> SpawnResult {
        let gate = self.gate_for(parent);
        let result = {
            let _admission = gate.lock().await;
            self.spawn_admitted(parent, params, cap, parent_token).await
        };
        self.release_gate(parent, gate);
        result
    }

    async fn spawn_admitted(
        &self,
        parent: &str,
        params: SpawnParams,
        cap: usize,
        parent_token: Option<&CancellationToken>,
    ) -> SpawnResult {
        let (active, cancel) = {
            let registry = self.lock();
            let active = registry.count_active(parent);
            let base = parent_token.cloned().unwrap_or_else(|| {
                registry
                    .entries
                    .values()
                    .find(|e| e.run.child_session_key == parent)
                    .map(|e| e.cancel_token.clone())
                    .unwrap_or_else(|| self.root_cancel_token.clone())
            });
            (active, base.child_token())
        };

        if active >= cap {
            tracing::warn!(parent, active, cap, "Subagent spawn rejected: cap reached");
            return SpawnResult::forbidden(active, cap);
        }

        let request = SpawnRequest {
            requester_session_key: parent.to_string(),
            task: params.task,
            label: params.label,
            agent_id: params.agent_id,
            model: params.model,
            expects_completion_message: params.expects_completion_message,
            cancel: cancel.clone(),
        };

        let accepted = match self.executor.spawn(&request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(parent, error = %e, "Subagent spawn failed");
                return SpawnResult::Error {
                    error: format!("{e:#}"),
                };
            }
        };

        let run = SubagentRun {
            run_id: accepted.run_id.clone(),
            requester_session_key: parent.to_string(),
            child_session_key: accepted.child_session_key.clone(),
            task: request.task,
            label: request.label,
            model: request.model,
            agent_id: request.agent_id,
            created_at: now_ms(),
            started_at: None,
            ended_at: None,
            outcome: None,
        };

        {
            // Checked under the lock `terminate` takes: a parent stopped while
            // the executor was busy must not gain a run afterwards.
            let mut registry = self.lock();
            if cancel.is_cancelled() {
                tracing::warn!(parent, run_id = %run.run_id, "Parent cancelled during spawn; discarding run");
                return SpawnResult::Error {
                    error: format!("parent {parent} was stopped before the subagent was registered"),
                };
            }
            if registry.entries.contains_key(&run.run_id) {
                cancel.cancel();
                tracing::warn!(run_id = %run.run_id, "Executor returned a duplicate run id");
                return SpawnResult::Error {
                    error: format!("subagent run id already registered: {}", run.run_id),
                };
            }
            registry.order.push(run.run_id.clone());
            registry.entries.insert(
                run.run_id.clone(),
                SubagentEntry {
                    run,
                    cancel_token: cancel,
                },
            );
        }

        tracing::info!(
            parent,
            run_id = %accepted.run_id,
            child_session_key = %accepted.child_session_key,
            active = active + 1,
            cap,
            "Subagent spawned"
        );

        SpawnResult::Accepted {
            run_id: accepted.run_id,
            child_session_key: accepted.child_session_key,
        }
    }

    /// Record that a run began executing. Returns `false` if the run is
    /// unknown, already started, or already ended.
    pub fn mark_started(&self, run_id: &str) -> bool {
        let mut registry = self.lock();
        match registry.entries.get_mut(run_id) {
            Some(entry) if entry.run.started_at.is_none() && entry.run.ended_at.is_none() => {
                entry.run.started_at = Some(now_ms());
                tracing::debug!(run_id, "Subagent started");
                true
            }
            _ => false,
        }
    }

    /// Record how a run ended. The first end wins; later reports are ignored
    /// and return `false`.
    pub fn mark_ended(&self, run_id: &str, outcome: RunOutcome) -> bool {
        let status = outcome.status;
        let ended = self.lock().end(run_id, outcome, now_ms());
        if ended {
            tracing::info!(run_id, ?status, "Subagent ended");
        }
        ended
    }

    /// End every active run under `parent` with a `terminated` outcome.
    ///
    /// Returns how many runs were terminated; runs that already ended are
    /// left alone, so a repeated call returns 0.
    pub fn terminate(&self, parent: &str, reason: &str) -> usize {
        let terminated = self.lock().terminate_subtree(parent, reason, now_ms());
        if terminated > 0 {
            tracing::info!(parent, reason, terminated, "Subagents terminated");
        }
        terminated
    }

    /// Active runs under `parent` that `target` selects: `all`, a run id, a
    /// child session key, or a label.
    pub fn find_active(&self, parent: &str, target: &str) -> Vec<SubagentRun> {
        self.lock().find_active(parent, target)
    }

    /// Kill the runs `target` selects, plus everything beneath them.
    /// Returns the runs that were directly selected.
    pub fn kill(&self, parent: &str, target: &str, reason: &str) -> Vec<SubagentRun> {
        let selected = {
            let mut registry = self.lock();
            let now = now_ms();
            let selected = registry.find_active(parent, target);
            for run in &selected {
                registry.terminate_subtree(&run.child_session_key, reason, now);
                registry.end(&run.run_id, RunOutcome::terminated(reason), now);
            }
            selected
        };
        if !selected.is_empty() {
            tracing::info!(parent, target, killed = selected.len(), "Subagents killed");
        }
        selected
    }

    /// Return the total number of registered runs.
    pub fn total_count(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::executor::{DetachedSpawnExecutor, SpawnAccepted};
    use crate::orchestration::state::RunState;

    /// Helper to create an orchestrator backed by the detached executor.
    fn test_orchestrator() -> SubagentOrchestrator {
        SubagentOrchestrator::new(Arc::new(DetachedSpawnExecutor), CancellationToken::new())
    }

    fn params(task: &str) -> SpawnParams {
        SpawnParams {
            task: task.to_string(),
            ..Default::default()
        }
    }

    async fn spawn_ok(orch: &SubagentOrchestrator, parent: &str) -> (String, String) {
        match orch.try_spawn(parent, params("work"), 10, None).await {
            SpawnResult::Accepted {
                run_id,
                child_session_key,
            } => (run_id, child_session_key),
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_records_queued_run() {
        let orch = test_orchestrator();
        let (run_id, _) = spawn_ok(&orch, "agent:main").await;

        let run = orch.get(&run_id).unwrap();
        assert_eq!(run.state(), RunState::Queued);
        assert_eq!(run.requester_session_key, "agent:main");
        assert_eq!(orch.count_active("agent:main"), 1);
    }

    #[tokio::test]
    async fn spawn_at_cap_is_forbidden_and_records_nothing() {
        let orch = test_orchestrator();
        for _ in 0..2 {
            assert!(orch.try_spawn("p", params("t"), 2, None).await.is_accepted());
        }
        let result = orch.try_spawn("p", params("t"), 2, None).await;
        assert_eq!(result, SpawnResult::forbidden(2, 2));
        assert_eq!(orch.total_count(), 2);
    }

    #[tokio::test]
    async fn ended_runs_free_capacity() {
        let orch = test_orchestrator();
        let (run_id, _) = spawn_ok(&orch, "p").await;
        assert!(orch.mark_started(&run_id));
        assert!(orch.mark_ended(&run_id, RunOutcome::ok()));
        assert_eq!(orch.count_active("p"), 0);
        assert_eq!(orch.get(&run_id).unwrap().state(), RunState::Completed);

        // Second end report is ignored.
        assert!(!orch.mark_ended(&run_id, RunOutcome::error("late")));
        assert_eq!(orch.get(&run_id).unwrap().state(), RunState::Completed);
    }

    #[tokio::test]
    async fn descendants_include_nested_runs() {
        let orch = test_orchestrator();
        let (_, child_session) = spawn_ok(&orch, "root").await;
        let (grandchild, _) = spawn_ok(&orch, &child_session).await;
        spawn_ok(&orch, "other").await;

        let descendants = orch.list_descendants("root");
        assert_eq!(descendants.len(), 2);
        assert_eq!(descendants[1].run_id, grandchild);
        assert_eq!(orch.count_active("root"), 2);
        assert_eq!(orch.count_active(&child_session), 1);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let orch = test_orchestrator();
        let (first, _) = spawn_ok(&orch, "p").await;
        spawn_ok(&orch, "p").await;
        orch.mark_started(&first);

        assert_eq!(orch.terminate("p", "stop"), 2);
        assert_eq!(orch.terminate("p", "stop"), 0);
        for run in orch.list_descendants("p") {
            assert_eq!(run.state(), RunState::Failed);
            assert_eq!(run.outcome.unwrap().error.as_deref(), Some("stop"));
        }
    }

    #[tokio::test]
    async fn terminate_skips_finished_runs() {
        let orch = test_orchestrator();
        let (done, _) = spawn_ok(&orch, "p").await;
        orch.mark_started(&done);
        orch.mark_ended(&done, RunOutcome::from_raw("error", Some("request timed out")));
        spawn_ok(&orch, "p").await;

        assert_eq!(orch.terminate("p", "stop"), 1);
        assert_eq!(orch.get(&done).unwrap().state(), RunState::TimedOut);
    }

    #[tokio::test]
    async fn parent_token_cascades_to_spawned_runs() {
        let orch = test_orchestrator();
        let parent_token = CancellationToken::new();
        let captured = Arc::new(Mutex::new(None));

        struct Capture(Arc<Mutex<Option<CancellationToken>>>);
        #[async_trait::async_trait]
        impl SpawnExecutor for Capture {
            async fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnAccepted> {
                *self.0.lock().unwrap() = Some(request.cancel.clone());
                DetachedSpawnExecutor.spawn(request).await
            }
        }

        let orch = SubagentOrchestrator {
            executor: Arc::new(Capture(captured.clone())),
            ..orch
        };
        assert!(
            orch.try_spawn("p", params("t"), 1, Some(&parent_token))
                .await
                .is_accepted()
        );
        let token = captured.lock().unwrap().clone().unwrap();
        assert!(!token.is_cancelled());
        parent_token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn executor_failure_records_nothing() {
        struct Failing;
        #[async_trait::async_trait]
        impl SpawnExecutor for Failing {
            async fn spawn(&self, _request: &SpawnRequest) -> anyhow::Result<SpawnAccepted> {
                anyhow::bail!("gateway unreachable")
            }
        }

        let orch = SubagentOrchestrator::new(Arc::new(Failing), CancellationToken::new());
        let result = orch.try_spawn("p", params("t"), 3, None).await;
        assert_eq!(
            result,
            SpawnResult::Error {
                error: "gateway unreachable".into()
            }
        );
        assert_eq!(orch.total_count(), 0);
    }

    #[tokio::test]
    async fn kill_by_label_cascades() {
        let orch = test_orchestrator();
        let labelled = orch
            .try_spawn(
                "p",
                SpawnParams {
                    task: "t".into(),
                    label: Some("scout".into()),
                    ..Default::default()
                },
                5,
                None,
            )
            .await;
        let SpawnResult::Accepted {
            child_session_key, ..
        } = labelled
        else {
            panic!("expected accepted");
        };
        spawn_ok(&orch, &child_session_key).await;
        spawn_ok(&orch, "p").await;

        let killed = orch.kill("p", "scout", "killed");
        assert_eq!(killed.len(), 1);
        assert_eq!(orch.count_active(&child_session_key), 0);
        assert_eq!(orch.count_active("p"), 1);
    }

    #[tokio::test]
    async fn kill_unknown_target_is_empty() {
        let orch = test_orchestrator();
        spawn_ok(&orch, "p").await;
        assert!(orch.kill("p", "nobody", "killed").is_empty());
        assert_eq!(orch.count_active("p"), 1);
    }

    #[tokio::test]
    async fn concurrent_spawns_respect_cap() {
        let orch = test_orchestrator();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                orch.try_spawn("burst", params("t"), 3, None).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
        assert_eq!(orch.count_active("burst"), 3);
        assert!(orch.gates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gates_are_dropped_after_admission() {
        let orch = test_orchestrator();
        spawn_ok(&orch, "a").await;
        spawn_ok(&orch, "b").await;
        let _ = orch.try_spawn("a", params("t"), 1, None).await;
        assert!(orch.gates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn parent_cancelled_mid_spawn_records_nothing() {
        struct CancelsParent(CancellationToken);
        #[async_trait::async_trait]
        impl SpawnExecutor for CancelsParent {
            async fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnAccepted> {
                let accepted = DetachedSpawnExecutor.spawn(request).await;
                self.0.cancel();
                accepted
            }
        }

        let parent_token = CancellationToken::new();
        let orch = SubagentOrchestrator::new(
            Arc::new(CancelsParent(parent_token.clone())),
            CancellationToken::new(),
        );
        let result = orch.try_spawn("p", params("t"), 3, Some(&parent_token)).await;
        assert!(matches!(result, SpawnResult::Error { .. }), "{result:?}");
        assert_eq!(orch.total_count(), 0);
        assert_eq!(orch.count_active("p"), 0);
    }

    #[tokio::test]
    async fn kill_all_ends_nested_runs_once() {
        let orch = test_orchestrator();
        let (_, child_session) = spawn_ok(&orch, "p").await;
        let (grandchild, _) = spawn_ok(&orch, &child_session).await;

        let killed = orch.kill("p", TARGET_ALL, "killed");
        assert_eq!(killed.len(), 2);
        assert_eq!(orch.count_active("p"), 0);
        let outcome = orch.get(&grandchild).unwrap().outcome.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("killed"));
    }
}
