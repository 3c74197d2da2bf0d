use anyhow::Result;

use crate::cli::Cli;

pub fn cmd_index(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli)?;
    config.validate()?;

    let report = kiln::styles::generate_all(&config.styles.index);

    if cli.json {
        let output = serde_json::json!({
            "event": "index_complete",
            "success": report.is_success(),
            "written": report.written,
            "unchanged": report.skipped,
            "failures": report.failures,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        for path in &report.written {
            println!("✓ wrote {}", path.display());
        }
        for path in &report.skipped {
            println!("  unchanged {}", path.display());
        }
        for failure in &report.failures {
            eprintln!("✗ {}: {}", failure.path.display(), failure.message);
        }
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
