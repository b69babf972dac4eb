//! Subagent forest for dashboards.
//!
//! Rebuilt from a flat run list on every query; nothing is maintained
//! incrementally.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::state::RunState;
use super::types::SubagentRun;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub run_id: String,
    pub parent_session_key: String,
    pub session_key: String,
    /// 0 for direct children of the graph root.
    pub depth: usize,
    pub state: RunState,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub runtime_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentGraph {
    pub root_session_key: String,
    /// Depth-first: every node is followed by its own descendants.
    pub nodes: Vec<GraphNode>,
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

impl SubagentGraph {
    /// Direct children of the node whose session is `session_key`.
    pub fn children_of<'a>(&'a self, session_key: &'a str) -> impl Iterator<Item = &'a GraphNode> {
        self.nodes
            .iter()
            .filter(move |n| n.parent_session_key == session_key)
    }
}

/// Time a run has spent executing as of `now`. Never negative.
pub fn runtime_ms(run: &SubagentRun, now: i64) -> i64 {
    match (run.started_at, run.ended_at) {
        (Some(start), Some(end)) => (end - start).max(0),
        (Some(start), None) => (now - start).max(0),
        _ => 0,
    }
}

/// Build the forest rooted at `root` from `runs`.
///
/// Runs are grouped by requester session and walked depth-first from
/// `root`; runs not reachable from `root` are left out.
pub fn build_graph(root: &str, runs: &[SubagentRun], now: i64) -> SubagentGraph {
    let mut by_parent: HashMap<&str, Vec<&SubagentRun>> = HashMap::new();
    for run in runs {
        by_parent
            .entry(run.requester_session_key.as_str())
            .or_default()
            .push(run);
    }

    let mut nodes = Vec::with_capacity(runs.len());
    let mut visited: HashSet<&str> = HashSet::from([root]);
    // Children are pushed in reverse so they pop in creation order.
    let mut stack: Vec<(&SubagentRun, usize)> = by_parent
        .get(root)
        .map(|children| children.iter().rev().map(|r| (*r, 0)).collect())
        .unwrap_or_default();

    while let Some((run, depth)) = stack.pop() {
        nodes.push(GraphNode {
            run_id: run.run_id.clone(),
            parent_session_key: run.requester_session_key.clone(),
            session_key: run.child_session_key.clone(),
            depth,
            state: run.state(),
            task: run.task.clone(),
            label: run.label.clone(),
            model: run.model.clone(),
            runtime_ms: runtime_ms(run, now),
            started_at: run.started_at,
            ended_at: run.ended_at,
        });
        let child_session = run.child_session_key.as_str();
        if !visited.insert(child_session) {
            continue;
        }
        if let Some(children) = by_parent.get(child_session) {
            stack.extend(children.iter().rev().map(|r| (*r, depth + 1)));
        }
    }

    SubagentGraph {
        root_session_key: root.to_string(),
        nodes,
        timestamp: now,
    }
}
