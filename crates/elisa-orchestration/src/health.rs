//! Session health scoring.
//!
//! After the testing phase the orchestrator grades the session from the test
//! pass-rate and the task completion rate and emits one summary event. The
//! weighting favors tests: a build whose tasks all "completed" but whose
//! behavior fails is worse than the reverse.

use indexmap::IndexMap;

use elisa_types::{HealthBreakdown, Task, TaskStatus};

use crate::runner::TestReport;

/// Health score and grade for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    /// Score in [0, 100].
    pub health_score: f64,
    /// Letter grade A-F.
    pub grade: String,
    /// Counts behind the score.
    pub breakdown: HealthBreakdown,
}

/// Compute the session health summary.
pub fn summarize(tasks: &IndexMap<String, Task>, report: &TestReport) -> HealthSummary {
    let tests_passed = report.cases.iter().filter(|c| c.passed).count();
    let tests_failed = report.cases.len() - tests_passed;
    let tasks_completed = tasks.values().filter(|t| t.status == TaskStatus::Completed).count();
    let tasks_failed = tasks
        .values()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
        .count();

    let test_rate = if report.cases.is_empty() {
        1.0
    } else {
        tests_passed as f64 / report.cases.len() as f64
    };
    let task_total = tasks_completed + tasks_failed;
    let task_rate = if task_total == 0 { 1.0 } else { tasks_completed as f64 / task_total as f64 };

    let health_score = (0.6 * test_rate + 0.4 * task_rate) * 100.0;
    let grade = match health_score {
        s if s >= 90.0 => "A",
        s if s >= 80.0 => "B",
        s if s >= 70.0 => "C",
        s if s >= 60.0 => "D",
        _ => "F",
    };

    HealthSummary {
        health_score,
        grade: grade.to_string(),
        breakdown: HealthBreakdown { tests_passed, tests_failed, tasks_completed, tasks_failed },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestCaseResult;

    fn completed_task(id: &str) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            description: id.into(),
            status: TaskStatus::Completed,
            agent: "amy".into(),
            acceptance_criteria: vec![],
            dependencies: vec![],
            summary: None,
            retries: 0,
        }
    }

    #[test]
    fn all_green_scores_an_a() {
        let tasks: IndexMap<String, Task> =
            [("t1".to_string(), completed_task("t1"))].into_iter().collect();
        let report = TestReport {
            cases: vec![TestCaseResult {
                test_name: "loads".into(),
                passed: true,
                details: String::new(),
            }],
            coverage: None,
        };
        let summary = summarize(&tasks, &report);
        assert_eq!(summary.grade, "A");
        assert_eq!(summary.health_score, 100.0);
        assert_eq!(summary.breakdown.tests_passed, 1);
    }

    #[test]
    fn failing_tests_drag_the_grade_down() {
        let tasks: IndexMap<String, Task> =
            [("t1".to_string(), completed_task("t1"))].into_iter().collect();
        let report = TestReport {
            cases: vec![
                TestCaseResult { test_name: "a".into(), passed: false, details: String::new() },
                TestCaseResult { test_name: "b".into(), passed: false, details: String::new() },
            ],
            coverage: None,
        };
        let summary = summarize(&tasks, &report);
        assert_eq!(summary.grade, "F");
        assert_eq!(summary.breakdown.tests_failed, 2);
    }

    #[test]
    fn no_tests_scores_on_tasks_alone() {
        let mut failed = completed_task("t2");
        failed.status = TaskStatus::Failed;
        let tasks: IndexMap<String, Task> =
            [("t1".to_string(), completed_task("t1")), ("t2".to_string(), failed)]
                .into_iter()
                .collect();
        let summary = summarize(&tasks, &TestReport::default());
        assert_eq!(summary.breakdown.tasks_failed, 1);
        assert_eq!(summary.grade, "B");
    }
}
