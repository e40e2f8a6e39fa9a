//! Plain-text tables for reports and checkpoints.

use std::fmt::Write;

use parallax_core::{Checkpoint, SessionReport, SessionStatus, TaskStatus};

pub fn task_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Ready => "ready",
        TaskStatus::Assigned => "assigned",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Blocked => "blocked",
    }
}

pub fn session_status(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Initializing => "initializing",
        SessionStatus::Running => "running",
        SessionStatus::Paused => "paused",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
    }
}

fn id_width<'a>(ids: impl Iterator<Item = &'a String>) -> usize {
    ids.map(|id| id.chars().count()).max().unwrap_or(0).max(4)
}

fn one_line(s: &str) -> String {
    const MAX: usize = 80;
    let first = s.lines().next().unwrap_or("");
    if first.chars().count() <= MAX {
        return first.to_string();
    }
    let mut out: String = first.chars().take(MAX).collect();
    out.push_str("...");
    out
}

pub fn render_report(report: &SessionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "session {} {} in {}ms",
        report.session_id,
        session_status(report.status),
        report.wall_clock_duration_ms
    );
    if let Some(reason) = &report.failure {
        let _ = writeln!(out, "reason: {reason}");
    }

    let width = id_width(report.outcomes.keys());
    let _ = writeln!(out, "{:<width$}  {:<10}  {:>7}  {:>9}  detail", "task", "status", "retries", "ms");
    for (id, outcome) in &report.outcomes {
        let ms = outcome
            .duration_ms
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let detail = match (&outcome.blocked_by, &outcome.error) {
            (Some(root), _) => format!("blocked by {root}"),
            (None, Some(err)) if outcome.status != TaskStatus::Completed => one_line(err),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {:>7}  {:>9}  {}",
            id,
            task_status(outcome.status),
            outcome.retry_count,
            ms,
            detail
        );
    }

    let _ = write!(
        out,
        "completed {}, failed {}, blocked {}",
        report.completed_count, report.failed_count, report.blocked_count
    );
    if report.unfinished_count > 0 {
        let _ = write!(out, ", unfinished {}", report.unfinished_count);
    }
    let _ = writeln!(out, "; lock contention {}", report.lock_contention_events);
    out
}

pub fn render_checkpoint(cp: &Checkpoint) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "session {} checkpoint #{} ({}) taken {}",
        cp.session_id,
        cp.seq,
        session_status(cp.status),
        cp.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let width = id_width(cp.tasks.iter().map(|t| &t.id));
    let _ = writeln!(out, "{:<width$}  {:<10}  retries", "task", "status");
    for task in &cp.tasks {
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {}",
            task.id,
            task_status(task.status),
            task.retry_count
        );
    }

    if !cp.locks.is_empty() {
        let _ = writeln!(out, "held locks:");
        for lock in &cp.locks {
            let _ = writeln!(out, "  {} {:?} {:?}", lock.path.display(), lock.mode, lock.holders);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::state::TaskCheckpoint;
    use parallax_core::TaskOutcome;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn outcome(status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            status,
            retry_count: 0,
            duration_ms: None,
            error: None,
            output: None,
            blocked_by: None,
        }
    }

    #[test]
    fn report_lists_every_task_with_detail() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "build".to_string(),
            TaskOutcome {
                duration_ms: Some(42),
                ..outcome(TaskStatus::Completed)
            },
        );
        outcomes.insert(
            "lint".to_string(),
            TaskOutcome {
                retry_count: 2,
                error: Some("task failed: exit status 1\nmore".into()),
                ..outcome(TaskStatus::Failed)
            },
        );
        outcomes.insert(
            "ship".to_string(),
            TaskOutcome {
                blocked_by: Some("lint".into()),
                ..outcome(TaskStatus::Blocked)
            },
        );
        let report = SessionReport {
            session_id: "s1".into(),
            status: SessionStatus::Completed,
            failure: None,
            completed_count: 1,
            failed_count: 1,
            blocked_count: 1,
            unfinished_count: 0,
            lock_contention_events: 3,
            wall_clock_duration_ms: 900,
            completed: vec!["build".into()],
            failed: vec!["lint".into()],
            blocked: vec!["ship".into()],
            unfinished: Vec::new(),
            outcomes,
        };

        let text = render_report(&report);
        assert!(text.starts_with("session s1 completed in 900ms\n"));
        let build: Vec<&str> = text
            .lines()
            .find(|l| l.starts_with("build"))
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(build, vec!["build", "completed", "0", "42"]);
        assert!(text.contains("task failed: exit status 1\n"));
        assert!(!text.contains("more"));
        assert!(text.contains("blocked by lint"));
        assert!(text.ends_with("completed 1, failed 1, blocked 1; lock contention 3\n"));
    }

    #[test]
    fn checkpoint_lists_tasks() {
        let cp = Checkpoint::new(
            "s2",
            4,
            SessionStatus::Paused,
            vec![TaskCheckpoint {
                id: "a".into(),
                status: TaskStatus::Ready,
                retry_count: 1,
            }],
            Vec::new(),
        );
        let text = render_checkpoint(&cp);
        assert!(text.starts_with("session s2 checkpoint #4 (paused)"));
        let row: Vec<&str> = text.lines().nth(2).unwrap().split_whitespace().collect();
        assert_eq!(row, vec!["a", "ready", "1"]);
        assert!(!text.contains("held locks"));
    }
}
