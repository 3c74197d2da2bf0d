use anyhow::Result;
use kiln::WatchEvent;

use crate::cli::Cli;

pub fn cmd_watch(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli)?;
    let json = cli.json;
    let runtime = super::runtime()?;

    // Set up Ctrl+C handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .expect("Error setting Ctrl+C handler");

    runtime.block_on(async {
        let pipeline = super::pipeline(config).await?;
        kiln::watch(&pipeline, shutdown_rx, |event| {
            if json {
                println!("{}", event.to_json());
            } else {
                let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
                let rendered = render_watch_event(&timestamp, &event);
                match event {
                    WatchEvent::Error { .. } => eprint!("{rendered}"),
                    _ => print!("{rendered}"),
                }
            }
        })
        .await?;
        anyhow::Ok(())
    })
}

fn render_watch_event(timestamp: &str, event: &WatchEvent) -> String {
    let body = match event {
        WatchEvent::WatchStarted { roots } => format!("Watching {}", roots.join(", ")),
        WatchEvent::InitialBuild {
            written,
            deleted,
            failures,
        } => format!(
            "Initial build: {} written, {} deleted, {} failed",
            written, deleted, failures
        ),
        WatchEvent::Ready => "Ready, waiting for changes (Ctrl+C to stop)".to_string(),
        WatchEvent::FileChanged { path, kind } => format!("{} {}", kind, path),
        WatchEvent::Error { message } => format!("Error: {}", message),
        WatchEvent::Shutdown => "Stopped".to_string(),
    };
    format!("[{}] {}\n", timestamp, body)
}
