//! Terminal rendering of the final invocation report.

use console::style;
use ferrite_core::run::{InvocationReport, JobRunStatus, WorkflowStatus};

pub fn print_report(report: &InvocationReport) {
    println!();
    let mark = match report.status {
        WorkflowStatus::Success => style("✓ passed").green().bold(),
        WorkflowStatus::Failed => style("✗ failed").red().bold(),
    };
    println!(
        "{} invocation {} on {} ({} ms)",
        mark,
        report.id,
        style(&report.branch).bold(),
        report.duration_ms
    );

    for workflow in &report.workflows {
        let mark = match workflow.status {
            WorkflowStatus::Success => style("✓").green(),
            WorkflowStatus::Failed => style("✗").red(),
        };
        println!("  {} workflow {}", mark, style(&workflow.workflow).bold());
        for run in &workflow.runs {
            let (mark, detail) = match run.status {
                JobRunStatus::Success => (style("✓").green(), String::new()),
                JobRunStatus::Failed => (
                    style("✗").red(),
                    run.reason.map(|r| format!(" ({})", r)).unwrap_or_default(),
                ),
                JobRunStatus::Skipped => (
                    style("-").dim(),
                    run.reason.map(|r| format!(" ({})", r)).unwrap_or_default(),
                ),
                _ => (style("?").yellow(), String::new()),
            };
            let duration = run
                .duration_ms
                .map(|ms| format!(" [{} ms]", ms))
                .unwrap_or_default();
            println!("    {} {}{}{}", mark, run.job, detail, duration);
        }
    }
}
