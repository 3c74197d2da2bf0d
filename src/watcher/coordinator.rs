//! The watch loop
//!
//! notify delivers events on its own thread; they are forwarded into a
//! channel and consumed by a single loop that hands each change to the
//! pipeline. Rebuild work runs on the scheduler, never inside the loop.

use std::path::PathBuf;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch as signal};

use crate::error::{KilnError, KilnResult};
use crate::pipeline::Pipeline;

use super::event::{change_events, WatchEvent};

/// Build everything once, then rebuild incrementally until `shutdown` flips.
///
/// The watcher is registered before the initial build, so edits made while
/// it runs are handled once it finishes. Work already scheduled when shutdown
/// arrives is allowed to finish.
pub async fn watch(
    pipeline: &Pipeline,
    mut shutdown: signal::Receiver<bool>,
    event_callback: impl Fn(WatchEvent),
) -> KilnResult<()> {
    let roots = pipeline.watch_roots();
    if pipeline.config().images.enabled {
        pipeline.images().ensure_roots().await?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        },
        Config::default(),
    )
    .map_err(|e| KilnError::Watch(e.to_string()))?;

    let watched = register(&mut watcher, &roots)?;
    if watched.is_empty() {
        tracing::warn!("no source directory exists, nothing to watch");
    }
    event_callback(WatchEvent::WatchStarted {
        roots: watched.iter().map(|r| r.display().to_string()).collect(),
    });

    let summary = pipeline.build_all(&[]).await?;
    event_callback(WatchEvent::initial_build(&summary));
    event_callback(WatchEvent::Ready);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = rx.recv() => {
                let event = match received {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "file watcher error");
                        event_callback(WatchEvent::Error { message: e.to_string() });
                        continue;
                    }
                    None => break,
                };
                for change in change_events(&event) {
                    let tickets = pipeline.handle_change(&change);
                    if !tickets.is_empty() {
                        event_callback(WatchEvent::file_changed(&change));
                    }
                }
            }
        }
    }

    drop(watcher);
    pipeline.settle().await;
    event_callback(WatchEvent::Shutdown);
    Ok(())
}

fn register(watcher: &mut RecommendedWatcher, roots: &[PathBuf]) -> KilnResult<Vec<PathBuf>> {
    let mut watched = Vec::new();
    for root in roots {
        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "not watching missing directory");
            continue;
        }
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| KilnError::Watch(format!("{}: {}", root.display(), e)))?;
        tracing::debug!(path = %root.display(), "watching");
        watched.push(root.clone());
    }
    Ok(watched)
}
