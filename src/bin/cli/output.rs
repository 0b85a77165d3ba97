//! Thin report emitters: console summary, JSON, and markdown.
//!
//! The full rendering layer lives outside this crate; these emitters cover
//! the CLI surface only.

use anyhow::bail;
use console::style;

use heimdall_rs::storage::service::StorageEvent;
use heimdall_rs::storage::WaitOutcome;
use heimdall_rs::Report;

/// Run the named reporters against one report.
pub fn emit_report(report: &Report, reporters: &[String]) -> anyhow::Result<()> {
    for reporter in reporters {
        match reporter.as_str() {
            "console" => print_console(report),
            "json" => println!("{}", serde_json::to_string_pretty(report)?),
            "markdown" => print!("{}", render_markdown(report)),
            other => bail!("unknown reporter '{other}' (expected console, json, or markdown)"),
        }
    }
    Ok(())
}

/// Styled console summary.
fn print_console(report: &Report) {
    let meta = &report.metadata;
    println!();
    println!(
        "{} {} steps ({} unique) across {} suite(s), {} job(s)",
        style("run:").bold(),
        meta.total_steps,
        meta.unique_steps,
        meta.suites.len(),
        meta.jobs.len()
    );

    let regressions = report.regressions.len();
    let regression_label = if regressions > 0 {
        style(format!("{regressions} regression(s)")).red().bold()
    } else {
        style("0 regressions".to_string()).green()
    };
    println!(
        "{} {}, {} new, {} ok, {} drifting",
        style("findings:").bold(),
        regression_label,
        report.new_steps.len(),
        report.ok.len(),
        report.trends.len()
    );

    for regression in &report.regressions {
        println!(
            "  {} {} {:.0} ms (baseline {:.0} ms, {:+.1}%)",
            style("regressed").red(),
            regression.step_text,
            regression.duration,
            regression.baseline_average,
            regression.percentage
        );
    }
    for drift in &report.trends {
        println!(
            "  {} {} trending +{:.0} ms over {} samples",
            style("drifting").yellow(),
            drift.step_text,
            drift.detail.trend,
            drift.detail.window
        );
    }
    for suite_regression in &report.suite_regressions {
        println!(
            "  {} suite {} averages {:.0} ms vs {:.0} ms historically ({:+.1}%)",
            style("suite regressed").red(),
            suite_regression.suite,
            suite_regression.current_average,
            suite_regression.historical_average,
            suite_regression.percentage
        );
    }

    let health = meta.overall_health;
    let health_label = if health >= 85.0 {
        style(format!("{health:.0}/100")).green()
    } else if health >= 50.0 {
        style(format!("{health:.0}/100")).yellow()
    } else {
        style(format!("{health:.0}/100")).red()
    };
    println!("{} {}", style("overall health:").bold(), health_label);

    for recommendation in &report.recommendations {
        println!(
            "  {} [{:?}] {}",
            style("→").dim(),
            recommendation.priority,
            recommendation.message
        );
    }
    println!();
}

/// Markdown summary table.
fn render_markdown(report: &Report) -> String {
    let mut out = String::new();
    let meta = &report.metadata;

    out.push_str("# Performance Report\n\n");
    out.push_str(&format!(
        "- **Steps**: {} ({} unique)\n- **Regressions**: {}\n- **New steps**: {}\n- **Drifting**: {}\n- **Overall health**: {:.0}/100\n\n",
        meta.total_steps,
        meta.unique_steps,
        report.regressions.len(),
        report.new_steps.len(),
        report.trends.len(),
        meta.overall_health
    ));

    if !report.regressions.is_empty() {
        out.push_str("## Regressions\n\n");
        out.push_str("| Step | Duration | Baseline | Slowdown |\n");
        out.push_str("|------|----------|----------|----------|\n");
        for regression in &report.regressions {
            out.push_str(&format!(
                "| {} | {:.0} ms | {:.0} ms | {:+.1}% |\n",
                regression.step_text,
                regression.duration,
                regression.baseline_average,
                regression.percentage
            ));
        }
        out.push('\n');
    }

    out.push_str("## Suites\n\n");
    out.push_str("| Suite | Steps | Avg | Regressions | Health | Category |\n");
    out.push_str("|-------|-------|-----|-------------|--------|----------|\n");
    for suite in report.suites.values() {
        out.push_str(&format!(
            "| {} | {} | {:.0} ms | {} | {:.0} | {:?} |\n",
            suite.suite,
            suite.total_steps,
            suite.avg_duration,
            suite.regressions,
            suite.health_score,
            suite.category
        ));
    }
    out.push('\n');
    out
}

/// Surface storage-service fallback events to the operator.
pub fn print_storage_events(events: &[StorageEvent]) {
    for event in events {
        match event {
            StorageEvent::FallbackEngaged { operation, reason } => {
                eprintln!(
                    "{} {operation} fell back to the filesystem adapter: {reason}",
                    style("warning:").yellow().bold()
                );
            }
        }
    }
}

/// Surface the multi-job wait outcome to the operator.
pub fn print_wait_outcome(outcome: Option<&WaitOutcome>) {
    let Some(outcome) = outcome else { return };
    if outcome.timed_out {
        eprintln!(
            "{} job wait timed out after {} ms; continuing with partial results",
            style("warning:").yellow().bold(),
            outcome.wait_time.as_millis()
        );
        for snapshot in &outcome.job_statuses {
            if !snapshot.status.is_finished() {
                eprintln!("  job {} still {:?}", snapshot.job_id, snapshot.status);
            }
        }
    } else {
        println!(
            "All {} job(s) finished after {} ms",
            outcome.job_statuses.len(),
            outcome.wait_time.as_millis()
        );
    }
}
