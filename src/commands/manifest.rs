use anyhow::Result;

use crate::cli::Cli;

pub fn cmd_manifest(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli)?;
    let manifest_path = config.images.manifest.clone();
    let runtime = super::runtime()?;

    let count = runtime.block_on(async {
        let pipeline = super::pipeline(config).await?;
        let count = pipeline.regenerate_manifest().await?;
        anyhow::Ok(count)
    })?;

    if cli.json {
        let output = serde_json::json!({
            "event": "manifest_regenerated",
            "path": manifest_path.display().to_string(),
            "images": count,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "✓ Recorded {} image(s) in {}",
            count,
            manifest_path.display()
        );
    }
    Ok(())
}
