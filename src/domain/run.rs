//! Run and iteration records
//!
//! A Run is one end-to-end attempt to produce a working application from a
//! project description. It owns its iterations, which are strictly sequential.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::id::{generate_iteration_id, generate_run_id, now_ms};

/// Progress status shared by iterations, agents and tool calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    /// Check if no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Some iteration's end-to-end tests passed
    Success,
    /// The iteration cap was reached without a passing test run
    Exhausted,
    /// A collaborator raised an error and the run was aborted
    Failed(String),
    /// The observer went away; noticed at an iteration boundary
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Exhausted => "exhausted",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// One generate-then-test pass within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: String,
    /// 1-based
    pub number: u32,
    pub status: Status,
}

impl Iteration {
    pub fn new(run_id: &str, number: u32) -> Self {
        Self {
            id: generate_iteration_id(run_id, number),
            number,
            status: Status::Pending,
        }
    }
}

/// The run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project_name: String,
    pub description: String,
    pub working_dir: PathBuf,
    /// Number of the current (or last) iteration; 0 before the first starts
    pub iteration: u32,
    pub max_iterations: u32,
    pub feedback: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    /// Create a run rooted at `projects_dir/<run_id>`
    pub fn new(
        project_name: impl Into<String>,
        description: impl Into<String>,
        projects_dir: &std::path::Path,
        max_iterations: u32,
    ) -> Self {
        let id = generate_run_id();
        let now = now_ms() as i64;
        Self {
            working_dir: projects_dir.join(&id),
            id,
            project_name: project_name.into(),
            description: description.into(),
            iteration: 0,
            max_iterations: max_iterations.max(1),
            feedback: None,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Start the next iteration. Fails once the cap is reached or the run is over.
    pub fn begin_iteration(&mut self) -> Option<Iteration> {
        if self.outcome.is_some() || self.iteration >= self.max_iterations {
            return None;
        }
        self.iteration += 1;
        self.touch();
        let mut iteration = Iteration::new(&self.id, self.iteration);
        iteration.status = Status::InProgress;
        Some(iteration)
    }

    pub fn is_last_iteration(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.touch();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = now_ms() as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(Status::InProgress.to_string(), "in_progress");
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
    }

    #[test]
    fn test_run_working_dir_under_projects_dir() {
        let run = Run::new("recipes", "A recipe site", Path::new("/tmp/projects"), 3);
        assert_eq!(run.working_dir, Path::new("/tmp/projects").join(&run.id));
        assert_eq!(run.iteration, 0);
        assert!(!run.is_finished());
    }

    #[test]
    fn test_iterations_are_contiguous_and_capped() {
        let mut run = Run::new("p", "d", Path::new("/tmp"), 3);
        let numbers: Vec<u32> = std::iter::from_fn(|| run.begin_iteration())
            .map(|it| it.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(run.is_last_iteration());
    }

    #[test]
    fn test_zero_cap_is_clamped_to_one() {
        let mut run = Run::new("p", "d", Path::new("/tmp"), 0);
        assert_eq!(run.max_iterations, 1);
        assert!(run.begin_iteration().is_some());
        assert!(run.begin_iteration().is_none());
    }

    #[test]
    fn test_finished_run_starts_no_iteration() {
        let mut run = Run::new("p", "d", Path::new("/tmp"), 5);
        run.begin_iteration();
        run.finish(RunOutcome::Success);
        assert!(run.begin_iteration().is_none());
        assert_eq!(run.iteration, 1);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RunOutcome::Success.label(), "success");
        assert_eq!(RunOutcome::Failed("boom".into()).label(), "failed");
        assert!(!RunOutcome::Exhausted.is_success());
    }
}
