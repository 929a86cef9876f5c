//! Displayable status derived from a `ResearchProgress` snapshot.
//!
//! Pure projection; it holds no state between snapshots.

use std::fmt;

use serde::Serialize;

use crate::models::{ResearchProgress, ResearchStep};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    /// 0–100.
    pub percent: u8,
    pub label: String,
    pub detail: Option<String>,
    pub finished: bool,
}

impl ProgressStatus {
    pub fn from_progress(progress: &ResearchProgress) -> Self {
        let step = progress.current_step;
        let finished = matches!(step, Some(ResearchStep::Complete | ResearchStep::Failed));

        let percent = if finished {
            100
        } else if progress.total_queries == 0 {
            0
        } else {
            let ratio = progress.completed_queries.min(progress.total_queries) as f64 / progress.total_queries as f64;
            (ratio * 100.0).floor() as u8
        };

        let label = match step {
            Some(step @ (ResearchStep::GeneratingQueries | ResearchStep::Searching)) => format!(
                "{} (round {}/{}, {}/{} queries)",
                step.label(),
                progress.current_depth,
                progress.total_depth,
                progress.completed_queries,
                progress.total_queries
            ),
            Some(step) => step.label().to_string(),
            None => "Waiting to start".to_string(),
        };

        let detail = match (step, &progress.current_query) {
            (Some(ResearchStep::Searching), Some(q)) => Some(format!(
                "query {} of {} for this concept: {q}",
                progress.current_breadth, progress.total_breadth
            )),
            _ => None,
        };

        Self { percent, label, detail, finished }
    }
}

impl From<&ResearchProgress> for ProgressStatus {
    fn from(progress: &ResearchProgress) -> Self {
        Self::from_progress(progress)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>3}%] {}", self.percent, self.label)?;
        if let Some(detail) = &self.detail {
            write!(f, " | {detail}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(step: ResearchStep, completed: usize, total: usize) -> ResearchProgress {
        ResearchProgress {
            current_depth: 1,
            total_depth: 2,
            current_breadth: 2,
            total_breadth: 3,
            completed_queries: completed,
            total_queries: total,
            current_step: Some(step),
            current_query: Some("peri-implantitis treatment".to_string()),
        }
    }

    #[test]
    fn test_percent_tracks_completed_queries() {
        let status = ProgressStatus::from(&snapshot(ResearchStep::Searching, 3, 12));
        assert_eq!(status.percent, 25);
        assert!(!status.finished);
        assert_eq!(
            status.to_string(),
            "[ 25%] Searching literature (round 1/2, 3/12 queries) | \
             query 2 of 3 for this concept: peri-implantitis treatment"
        );
    }

    #[test]
    fn test_terminal_steps_are_complete() {
        let status = ProgressStatus::from(&snapshot(ResearchStep::Failed, 1, 12));
        assert_eq!(status.percent, 100);
        assert!(status.finished);
        assert_eq!(status.label, "Research complete (synthesis unavailable)");
        assert!(status.detail.is_none());
    }

    #[test]
    fn test_synthesis_failure_renders_as_completed_run() {
        let status = ProgressStatus::from(&snapshot(ResearchStep::Failed, 12, 12));
        assert_eq!(status.to_string(), "[100%] Research complete (synthesis unavailable)");
        assert!(!status.to_string().contains("failed"));
    }

    #[test]
    fn test_zero_total_and_no_step() {
        let status = ProgressStatus::from(&ResearchProgress::default());
        assert_eq!(status.percent, 0);
        assert_eq!(status.label, "Waiting to start");
    }
}
