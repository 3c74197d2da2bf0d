//! Image churn: conversion, skipping, deletion and manifest upkeep.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use kiln::{ChangeEvent, ChangeKind, Phase};

use crate::common::{RecordingTools, TestProject};

fn all_formats(project: &TestProject) -> kiln::Config {
    let mut config = project.config();
    config.images.avif.enabled = true;
    config.images.webp.enabled = true;
    config
}

#[tokio::test]
async fn manifest_tracks_exactly_the_origin_images() {
    let project = TestProject::new();
    project.write("htdocs/assets/images/_origin/a.png", "a");
    project.write("htdocs/assets/images/_origin/nested/b.jpeg", "b");
    project.write("htdocs/assets/images/_origin/readme.txt", "");
    project.write(
        ".image-meta.json",
        r#"{"gone.png": {"mtimeMs": 1.0}}"#,
    );
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    pipeline.build_all(&[Phase::Images]).await.unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&project.read(".image-meta.json")).unwrap();
    let keys: Vec<&String> = manifest.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["a.png", "nested/b.jpeg"]);
    assert!(manifest["a.png"]["mtimeMs"].is_number());
}

#[tokio::test]
async fn unchanged_images_are_never_transcoded_again() {
    let project = TestProject::new();
    project.write("htdocs/assets/images/_origin/a.png", "a");
    project.write("htdocs/assets/images/_origin/b.jpg", "b");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline_with(all_formats(&project), &tools).await;
    pipeline.build_all(&[Phase::Images]).await.unwrap();
    assert_eq!(tools.transcode_count(), 6);

    tools.clear();
    pipeline.build_all(&[Phase::Images]).await.unwrap();
    assert_eq!(tools.transcode_count(), 0);

    // a fresh process reads the persisted manifest
    let restarted = project.pipeline_with(all_formats(&project), &tools).await;
    restarted.build_all(&[Phase::Images]).await.unwrap();
    assert_eq!(tools.transcode_count(), 0);
}

#[tokio::test]
async fn touched_image_is_converted_again() {
    let project = TestProject::new();
    let a = project.write("htdocs/assets/images/_origin/a.png", "a");
    project.write("htdocs/assets/images/_origin/b.png", "b");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Images]).await.unwrap();

    let later = SystemTime::now() + Duration::from_secs(60);
    filetime::set_file_mtime(&a, FileTime::from_system_time(later)).unwrap();
    tools.clear();
    pipeline.build_all(&[Phase::Images]).await.unwrap();

    assert_eq!(tools.transcode_count(), 1);
}

#[tokio::test]
async fn corrupt_manifest_means_convert_everything_once() {
    let project = TestProject::new();
    project.write("htdocs/assets/images/_origin/a.png", "a");
    project.write(".image-meta.json", "{ not json");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    let summary = pipeline.build_all(&[Phase::Images]).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(tools.transcode_count(), 1);
    let manifest: serde_json::Value =
        serde_json::from_str(&project.read(".image-meta.json")).unwrap();
    assert!(manifest.get("a.png").is_some());
}

#[tokio::test]
async fn deleted_image_takes_derivatives_dirs_and_entry_along() {
    let project = TestProject::new();
    project.write("htdocs/assets/images/_origin/keep.png", "k");
    project.write("htdocs/assets/images/_origin/deep/er/gone.jpg", "g");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline_with(all_formats(&project), &tools).await;
    pipeline.build_all(&[Phase::Images]).await.unwrap();

    let gone = project.remove("htdocs/assets/images/_origin/deep/er/gone.jpg");
    let _ = pipeline.handle_change(&ChangeEvent::new(gone, ChangeKind::Removed));
    pipeline.settle().await;

    for format in ["avif", "webp", "compression"] {
        let root = format!("htdocs/assets/images/{}", format);
        assert!(!project.exists(&format!("{}/deep", root)), "{} dirs pruned", format);
        assert!(project.exists(&root), "{} root kept", format);
    }
    assert!(project.exists("htdocs/assets/images/webp/keep.webp"));
    let manifest = project.read(".image-meta.json");
    assert!(!manifest.contains("gone.jpg"));
    assert!(manifest.contains("keep.png"));
}

#[tokio::test]
async fn regenerated_manifest_prevents_conversions() {
    let project = TestProject::new();
    project.write("htdocs/assets/images/_origin/a.png", "a");
    project.write("htdocs/assets/images/compression/a.png", "already converted");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    assert_eq!(pipeline.regenerate_manifest().await.unwrap(), 1);
    pipeline.build_all(&[Phase::Images]).await.unwrap();

    assert_eq!(tools.transcode_count(), 0);
    assert_eq!(
        project.read("htdocs/assets/images/compression/a.png"),
        "already converted"
    );
}

#[tokio::test]
async fn full_scan_and_image_event_never_convert_the_same_image_twice() {
    let project = TestProject::new();
    let hero = project.write("htdocs/assets/images/_origin/top/hero.png", "h");
    project.write("htdocs/assets/images/_origin/old/gone.png", "g");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Images]).await.unwrap();
    tools.clear();
    tools.set_delay(Duration::from_millis(100));

    let later = SystemTime::now() + Duration::from_secs(60);
    filetime::set_file_mtime(&hero, FileTime::from_system_time(later)).unwrap();
    std::fs::remove_dir_all(project.path("htdocs/assets/images/_origin/old")).unwrap();
    let _ = pipeline.handle_change(&ChangeEvent::new(hero, ChangeKind::Modified));
    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/assets/images/_origin/old"),
        ChangeKind::Removed,
    ));
    pipeline.settle().await;

    assert_eq!(tools.peak_runs_per_file(), 1);
    assert_eq!(tools.transcode_count(), 1);
    assert!(!project.exists("htdocs/assets/images/compression/old"));
    assert!(project.exists("htdocs/assets/images/compression/top/hero.png"));
}
