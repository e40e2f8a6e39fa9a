use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{CycleError, SubmitError};
use crate::executor::types::{TaskId, TaskLike, TaskStatus};

#[derive(Debug, Clone)]
struct Node {
    id: TaskId,
    /// Indices this node depends on.
    deps: Vec<usize>,
    /// Indices that depend on this node.
    dependents: Vec<usize>,
    status: TaskStatus,
    retry_count: u32,
    /// Dependencies not yet Completed.
    remaining: usize,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl StatusCounts {
    pub fn unfinished(&self) -> usize {
        self.pending + self.ready + self.assigned + self.running
    }
}

/// Task dependency graph (DAG) stored as an index arena.
///
/// Node indices follow submission order, which keeps every query and the
/// checkpoint layout deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<TaskId, usize>,
}

impl DependencyGraph {
    /// Build and validate the graph.
    ///
    /// `edges` are `(from, to)` pairs meaning `to` depends on `from`; they are
    /// merged with each task's own dependency list.
    pub fn submit<T: TaskLike>(
        tasks: &[T],
        edges: &[(TaskId, TaskId)],
    ) -> Result<Self, SubmitError> {
        let mut nodes = Vec::with_capacity(tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if index.contains_key(task.id()) {
                return Err(SubmitError::DuplicateTaskId(task.id().to_string()));
            }
            index.insert(task.id().to_string(), nodes.len());
            nodes.push(Node {
                id: task.id().to_string(),
                deps: Vec::new(),
                dependents: Vec::new(),
                status: TaskStatus::Pending,
                retry_count: 0,
                remaining: 0,
            });
        }

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let declared = tasks.iter().flat_map(|task| {
            task.dependencies()
                .iter()
                .map(move |dep| (dep.as_str(), task.id()))
        });
        let explicit = edges.iter().map(|(from, to)| (from.as_str(), to.as_str()));

        for (from, to) in declared.chain(explicit) {
            let Some(&to_idx) = index.get(to) else {
                return Err(SubmitError::DependencyNotFound {
                    task_id: to.to_string(),
                    missing_dep: from.to_string(),
                });
            };
            let Some(&from_idx) = index.get(from) else {
                return Err(SubmitError::DependencyNotFound {
                    task_id: to.to_string(),
                    missing_dep: from.to_string(),
                });
            };
            if !seen.insert((from_idx, to_idx)) {
                continue;
            }
            nodes[to_idx].deps.push(from_idx);
            nodes[to_idx].remaining += 1;
            nodes[from_idx].dependents.push(to_idx);
        }

        let graph = Self { nodes, index };
        if let Some(cycle) = graph.detect_cycle() {
            return Err(CycleError { cycle }.into());
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.node(id).map(|n| n.status)
    }

    pub fn retry_count(&self, id: &str) -> Option<u32> {
        self.node(id).map(|n| n.retry_count)
    }

    pub fn dependencies(&self, id: &str) -> Vec<TaskId> {
        self.node(id)
            .map(|n| n.deps.iter().map(|&d| self.nodes[d].id.clone()).collect())
            .unwrap_or_default()
    }

    /// Pending tasks whose dependencies are all Completed, in submission order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.status == TaskStatus::Pending && n.remaining == 0)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Pending -> Ready. Returns false when the task is not eligible.
    pub fn mark_ready(&mut self, id: &str) -> bool {
        match self.node_mut(id) {
            Some(n) if n.status == TaskStatus::Pending && n.remaining == 0 => {
                n.status = TaskStatus::Ready;
                true
            }
            _ => false,
        }
    }

    /// Promote every eligible Pending task and return all Ready tasks, in
    /// submission order. Used once when a session starts.
    pub fn seed_ready(&mut self) -> Vec<TaskId> {
        self.nodes
            .iter_mut()
            .filter_map(|n| {
                if n.status == TaskStatus::Pending && n.remaining == 0 {
                    n.status = TaskStatus::Ready;
                }
                (n.status == TaskStatus::Ready).then(|| n.id.clone())
            })
            .collect()
    }

    /// Ready -> Assigned.
    pub fn mark_assigned(&mut self, id: &str) -> bool {
        self.transition(id, TaskStatus::Ready, TaskStatus::Assigned)
    }

    /// Assigned -> Running.
    pub fn mark_running(&mut self, id: &str) -> bool {
        self.transition(id, TaskStatus::Assigned, TaskStatus::Running)
    }

    /// In-flight task back to Ready (lock timeout or redistribution).
    pub fn requeue(&mut self, id: &str) -> bool {
        match self.node_mut(id) {
            Some(n) if n.status.is_in_flight() => {
                n.status = TaskStatus::Ready;
                true
            }
            _ => false,
        }
    }

    /// Bump the retry counter and return the new value.
    pub fn record_retry(&mut self, id: &str) -> u32 {
        match self.node_mut(id) {
            Some(n) => {
                n.retry_count += 1;
                n.retry_count
            }
            None => 0,
        }
    }

    /// Mark a task Completed and return the dependents that became Ready.
    ///
    /// Idempotent: completing an already Completed task returns nothing.
    pub fn mark_completed(&mut self, id: &str) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        if self.nodes[idx].status == TaskStatus::Completed {
            return Vec::new();
        }
        self.nodes[idx].status = TaskStatus::Completed;

        let mut newly_ready = Vec::new();
        for dep_idx in self.nodes[idx].dependents.clone() {
            let node = &mut self.nodes[dep_idx];
            node.remaining = node.remaining.saturating_sub(1);
            if node.remaining == 0 && node.status == TaskStatus::Pending {
                node.status = TaskStatus::Ready;
                newly_ready.push(node.id.clone());
            }
        }
        newly_ready
    }

    /// Mark a task Failed and every transitive dependent Blocked.
    ///
    /// Returns the ids that were newly blocked, nearest first.
    pub fn mark_failed(&mut self, id: &str) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.nodes[idx].status = TaskStatus::Failed;

        let mut blocked = Vec::new();
        let mut queue: VecDeque<usize> = self.nodes[idx].dependents.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            let node = &mut self.nodes[next];
            if node.status.is_terminal() {
                continue;
            }
            node.status = TaskStatus::Blocked;
            blocked.push(node.id.clone());
            queue.extend(node.dependents.iter().copied());
        }
        blocked
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for node in &self.nodes {
            match node.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Assigned => counts.assigned += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Blocked => counts.blocked += 1,
            }
        }
        counts
    }

    /// True once every task is Completed, Failed or Blocked.
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// `(id, status, retry_count)` in submission order.
    pub fn statuses(&self) -> impl Iterator<Item = (&str, TaskStatus, u32)> {
        self.nodes
            .iter()
            .map(|n| (n.id.as_str(), n.status, n.retry_count))
    }

    /// Kahn layering: tasks in the same stage have no path between them.
    pub fn stages(&self) -> Vec<Vec<TaskId>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut current: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut stages = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &idx in &current {
                for &dependent in &self.nodes[idx].dependents {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            stages.push(current.iter().map(|&i| self.nodes[i].id.clone()).collect());
            current = next;
        }
        stages
    }

    /// Every task after all of its dependencies; ties keep submission order.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(self.nodes[idx].id.clone());
            for &dependent in &self.nodes[idx].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }

    fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    fn transition(&mut self, id: &str, from: TaskStatus, to: TaskStatus) -> bool {
        match self.node_mut(id) {
            Some(n) if n.status == from => {
                n.status = to;
                true
            }
            _ => false,
        }
    }

    /// Detect circular dependencies using DFS with a recursion stack.
    ///
    /// Iterative so arbitrarily deep chains stay off the thread stack.
    /// O(V + E).
    fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        // (node, index of the next dependency to visit)
        let mut frames: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.nodes.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            on_stack[start] = true;
            frames.push((start, 0));

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(&dep) = self.nodes[node].deps.get(next) else {
                    on_stack[node] = false;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                if on_stack[dep] {
                    // Trim the path down to the cycle and close it.
                    let pos = frames.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<TaskId> = frames[pos..]
                        .iter()
                        .map(|&(n, _)| self.nodes[n].id.clone())
                        .collect();
                    cycle.push(self.nodes[dep].id.clone());
                    return Some(cycle);
                }
                if !visited[dep] {
                    visited[dep] = true;
                    on_stack[dep] = true;
                    frames.push((dep, 0));
                }
            }
        }
        None
    }
}
