//! Run report assembly and rendering.
//!
//! The collector merges per-question traces into summary numbers and
//! per-difficulty breakdowns. Traces are sorted by difficulty rank so the
//! report is identical regardless of completion interleaving.

use crate::critic_loop::QuestionTrace;
use chrono::{DateTime, Utc};
use dagprobe_core::DifficultyLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-line numbers for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    /// Mean DAG execution wall time over successfully executed questions.
    pub avg_execution_time_ms: f64,
    /// Total critic-loop iterations across all questions.
    pub total_iterations: u32,
    pub timestamp: DateTime<Utc>,
    pub dataset_name: String,
}

/// Pass/fail counts for one difficulty bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultyStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
}

/// The persisted result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub difficulty_breakdown: BTreeMap<String, DifficultyStats>,
    pub question_traces: Vec<QuestionTrace>,
}

impl RunReport {
    /// Build the report from collected traces.
    ///
    /// Accepts traces in any order; sorting by difficulty rank makes the
    /// output independent of fan-out interleaving.
    pub fn collect(dataset_name: impl Into<String>, mut traces: Vec<QuestionTrace>) -> Self {
        traces.sort_by_key(|t| t.question.difficulty_rank);

        let total = traces.len();
        let passed = traces.iter().filter(|t| t.passed()).count();
        let failed = total - passed;
        let total_iterations: u32 = traces.iter().map(|t| t.iterations).sum();

        let successful_times: Vec<f64> = traces
            .iter()
            .filter_map(|t| t.execution_result.as_ref())
            .filter(|r| r.success)
            .map(|r| r.execution_time_ms)
            .collect();
        let avg_execution_time_ms = if successful_times.is_empty() {
            0.0
        } else {
            successful_times.iter().sum::<f64>() / successful_times.len() as f64
        };

        let mut difficulty_breakdown: BTreeMap<String, DifficultyStats> = BTreeMap::new();
        for level in [
            DifficultyLevel::Easy,
            DifficultyLevel::Medium,
            DifficultyLevel::Hard,
        ] {
            let bucket: Vec<&QuestionTrace> = traces
                .iter()
                .filter(|t| t.question.difficulty_level == level)
                .collect();
            if bucket.is_empty() {
                continue;
            }
            let bucket_passed = bucket.iter().filter(|t| t.passed()).count();
            difficulty_breakdown.insert(
                level.to_string(),
                DifficultyStats {
                    total: bucket.len(),
                    passed: bucket_passed,
                    failed: bucket.len() - bucket_passed,
                    pass_rate: ratio(bucket_passed, bucket.len()),
                },
            );
        }

        Self {
            summary: RunSummary {
                total,
                passed,
                failed,
                pass_rate: ratio(passed, total),
                avg_execution_time_ms,
                total_iterations,
                timestamp: Utc::now(),
                dataset_name: dataset_name.into(),
            },
            difficulty_breakdown,
            question_traces: traces,
        }
    }

    /// Question ids that passed.
    pub fn completed_question_ids(&self) -> Vec<String> {
        self.question_traces
            .iter()
            .filter(|t| t.passed())
            .map(|t| t.question.id.clone())
            .collect()
    }

    /// Question ids that gave up or failed execution.
    pub fn failed_question_ids(&self) -> Vec<String> {
        self.question_traces
            .iter()
            .filter(|t| !t.passed())
            .map(|t| t.question.id.clone())
            .collect()
    }

    /// Render a self-contained HTML page for the report.
    pub fn render_html(&self) -> String {
        let mut rows = String::new();
        for (level, stats) in &self.difficulty_breakdown {
            rows.push_str(&format!(
                "<tr><td>{level}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.0}%</td></tr>\n",
                stats.total,
                stats.passed,
                stats.failed,
                stats.pass_rate * 100.0
            ));
        }

        let mut sections = String::new();
        for trace in &self.question_traces {
            let status = if trace.passed() { "passed" } else { "failed" };
            let answer = trace
                .execution_result
                .as_ref()
                .and_then(|r| r.final_answer.as_ref())
                .map(|v| escape_html(&v.to_string()))
                .unwrap_or_else(|| "&mdash;".to_string());
            sections.push_str(&format!(
                r#"<section class="{status}">
<h3>[{rank}] {text}</h3>
<p>difficulty: {level} &middot; iterations: {iters} &middot; status: {status}</p>
<p>final answer: <code>{answer}</code></p>
</section>
"#,
                rank = trace.question.difficulty_rank,
                text = escape_html(&trace.question.text),
                level = trace.question.difficulty_level,
                iters = trace.iterations,
            ));
        }

        format!(
            r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>dagprobe report: {name}</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 0.3rem 0.8rem; }}
section {{ border-left: 4px solid #ccc; padding-left: 1rem; margin: 1rem 0; }}
section.passed {{ border-color: #2a2; }}
section.failed {{ border-color: #c33; }}
</style></head><body>
<h1>dagprobe report &mdash; {name}</h1>
<p>{timestamp} &middot; {passed}/{total} passed ({rate:.0}%) &middot; avg execution {avg:.1} ms &middot; {iters} total iterations</p>
<table><tr><th>difficulty</th><th>total</th><th>passed</th><th>failed</th><th>pass rate</th></tr>
{rows}</table>
{sections}
</body></html>
"#,
            name = escape_html(&self.summary.dataset_name),
            timestamp = self.summary.timestamp.to_rfc3339(),
            passed = self.summary.passed,
            total = self.summary.total,
            rate = self.summary.pass_rate * 100.0,
            avg = self.summary.avg_execution_time_ms,
            iters = self.summary.total_iterations,
        )
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagprobe_core::{ExecutionResult, Question};

    fn trace(id: &str, rank: u32, level: DifficultyLevel, passed: Option<f64>) -> QuestionTrace {
        let mut t = QuestionTrace::new(Question {
            id: id.to_string(),
            text: format!("question {id}"),
            difficulty_rank: rank,
            difficulty_level: level,
            reasoning: String::new(),
            relevant_data_keys: vec![],
        });
        t.iterations = 1;
        if let Some(time) = passed {
            t.execution_result = Some(ExecutionResult {
                question_id: id.to_string(),
                success: true,
                final_answer: Some(serde_json::json!(1)),
                node_results: vec![],
                error: None,
                execution_time_ms: time,
            });
        }
        t
    }

    #[test]
    fn test_collect_counts_and_rates() {
        let report = RunReport::collect(
            "orders",
            vec![
                trace("q2", 2, DifficultyLevel::Medium, None),
                trace("q1", 1, DifficultyLevel::Easy, Some(4.0)),
                trace("q3", 3, DifficultyLevel::Hard, Some(8.0)),
            ],
        );
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert!((report.summary.pass_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.summary.avg_execution_time_ms, 6.0);
        assert_eq!(report.summary.total_iterations, 3);
        // |completed| + |failed| == |questions|
        assert_eq!(
            report.completed_question_ids().len() + report.failed_question_ids().len(),
            report.summary.total
        );
    }

    #[test]
    fn test_collect_is_order_independent() {
        let traces = vec![
            trace("q1", 1, DifficultyLevel::Easy, Some(1.0)),
            trace("q2", 2, DifficultyLevel::Medium, None),
            trace("q3", 3, DifficultyLevel::Hard, Some(2.0)),
        ];
        let mut reversed = traces.clone();
        reversed.reverse();

        let a = RunReport::collect("d", traces);
        let b = RunReport::collect("d", reversed);
        assert_eq!(a.question_traces, b.question_traces);
        assert_eq!(a.difficulty_breakdown, b.difficulty_breakdown);
    }

    #[test]
    fn test_difficulty_breakdown() {
        let report = RunReport::collect(
            "d",
            vec![
                trace("q1", 1, DifficultyLevel::Easy, Some(1.0)),
                trace("q2", 2, DifficultyLevel::Easy, None),
                trace("q3", 3, DifficultyLevel::Hard, None),
            ],
        );
        let easy = &report.difficulty_breakdown["easy"];
        assert_eq!(easy.total, 2);
        assert_eq!(easy.passed, 1);
        assert_eq!(easy.pass_rate, 0.5);
        assert!(!report.difficulty_breakdown.contains_key("medium"));
    }

    #[test]
    fn test_report_round_trip() {
        let report = RunReport::collect(
            "d",
            vec![trace("q1", 1, DifficultyLevel::Easy, Some(1.0))],
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }

    #[test]
    fn test_html_contains_summary() {
        let report = RunReport::collect(
            "orders <ledger>",
            vec![trace("q1", 1, DifficultyLevel::Easy, Some(1.0))],
        );
        let html = report.render_html();
        assert!(html.contains("orders &lt;ledger&gt;"));
        assert!(html.contains("1/1 passed"));
        assert!(html.contains("question q1"));
    }
}
