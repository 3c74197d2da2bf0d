use anyhow::Result;
use kiln::{Phase, Summary};

use crate::cli::Cli;

pub fn cmd_build(cli: &Cli, only: &[Phase]) -> Result<()> {
    let config = super::load_config(cli)?;
    let runtime = super::runtime()?;

    let summary = runtime.block_on(async {
        let pipeline = super::pipeline(config).await?;
        let summary = pipeline.build_all(only).await?;
        anyhow::Ok(summary)
    })?;

    if cli.json {
        let output = serde_json::json!({
            "event": "build_complete",
            "success": summary.is_success(),
            "phases": summary.phases,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        print!("{}", render_summary(&summary));
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    for phase in &summary.phases {
        let report = &phase.report;
        let icon = if report.is_success() { "✓" } else { "✗" };
        out.push_str(&format!(
            "{} {:<8} {} written, {} skipped, {} deleted",
            icon,
            phase.phase,
            report.written.len(),
            report.skipped.len(),
            report.deleted.len()
        ));
        if !report.failures.is_empty() {
            out.push_str(&format!(", {} failed", report.failures.len()));
        }
        out.push('\n');
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        out.push('\n');
        for (phase, failure) in failures {
            out.push_str(&format!(
                "  [{}] {} ({}): {}\n",
                phase,
                failure.path.display(),
                failure.stage,
                failure.message
            ));
        }
    }
    out
}
