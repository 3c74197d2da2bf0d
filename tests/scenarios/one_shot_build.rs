//! Full builds from a cold or stale output tree.

use std::sync::Arc;

use kiln::{ChangeEvent, ChangeKind, Phase};

use crate::common::{RecordingTools, TestProject};

fn seed(project: &TestProject) {
    project.write("htdocs/src/js/entry/top.js", "import '../utils/dom.js';");
    project.write("htdocs/src/js/entry/about.js", "");
    project.write("htdocs/src/js/utils/dom.js", "");
    project.write("htdocs/src/scss/global/_reset.scss", "");
    project.write("htdocs/src/scss/helpers/_clearfix.scss", "");
    project.write("htdocs/src/scss/pages/top.scss", "");
    project.write("htdocs/assets/images/_origin/top/hero.jpg", "jpg");
}

#[tokio::test]
async fn cold_build_produces_every_output() {
    let project = TestProject::new();
    seed(&project);
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    let summary = pipeline.build_all(&[]).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(project.files_under("htdocs/dist/js"), vec!["about.js", "top.js"]);
    assert_eq!(
        project.files_under("htdocs/dist/css"),
        vec!["common.css", "common.css.map", "top.css", "top.css.map"]
    );
    assert!(project.exists("htdocs/assets/images/compression/top/hero.jpg"));
    assert!(project.read("htdocs/src/scss/common.scss").contains("@use './global/_reset.scss';"));
}

#[tokio::test]
async fn second_build_changes_nothing() {
    let project = TestProject::new();
    seed(&project);
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[]).await.unwrap();
    let index_before = std::fs::metadata(project.path("htdocs/src/scss/common.scss"))
        .unwrap()
        .modified()
        .unwrap();
    let dist_before = project.files_under("htdocs");
    let manifest_before = project.read(".image-meta.json");
    let manifest_mtime_before = std::fs::metadata(project.path(".image-meta.json"))
        .unwrap()
        .modified()
        .unwrap();

    tools.clear();
    let summary = pipeline.build_all(&[]).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(project.files_under("htdocs"), dist_before);
    assert_eq!(project.read(".image-meta.json"), manifest_before);
    let manifest_mtime_after = std::fs::metadata(project.path(".image-meta.json"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(manifest_mtime_before, manifest_mtime_after);
    assert_eq!(tools.transcode_count(), 0);
    let index_after = std::fs::metadata(project.path("htdocs/src/scss/common.scss"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(index_before, index_after);
    for phase in &summary.phases {
        assert!(phase.report.deleted.is_empty(), "{} deleted files", phase.phase);
    }
}

#[tokio::test]
async fn stale_outputs_are_removed_and_foreign_files_kept() {
    let project = TestProject::new();
    seed(&project);
    project.write("htdocs/dist/js/legacy.js", "");
    project.write("htdocs/dist/js/vendor/jquery.js", "");
    project.write("htdocs/dist/js/notes.txt", "");
    project.write("htdocs/dist/css/removed.css", "");
    project.write("htdocs/dist/css/nested/removed.css.map", "");
    project.write("htdocs/dist/css/fonts/icons.woff2", "");
    project.write("htdocs/assets/images/webp/orphan.webp", "");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    pipeline.build_all(&[]).await.unwrap();

    assert!(!project.exists("htdocs/dist/js/legacy.js"));
    assert!(project.exists("htdocs/dist/js/vendor/jquery.js"));
    assert!(project.exists("htdocs/dist/js/notes.txt"));
    assert!(!project.exists("htdocs/dist/css/removed.css"));
    assert!(!project.exists("htdocs/dist/css/nested"));
    assert!(project.exists("htdocs/dist/css/fonts/icons.woff2"));
    // webp is disabled by default, so nothing under its root is expected
    assert!(!project.exists("htdocs/assets/images/webp/orphan.webp"));
}

#[tokio::test]
async fn failing_file_does_not_stop_its_siblings() {
    let project = TestProject::new();
    seed(&project);
    let broken = project.write("htdocs/src/scss/pages/broken.scss", "");
    let tools = Arc::new(RecordingTools::new());
    tools.fail_on(&broken);
    let pipeline = project.pipeline(&tools).await;

    let summary = pipeline.build_all(&[Phase::Styles]).await.unwrap();

    assert!(!summary.is_success());
    let failures: Vec<_> = summary.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Phase::Styles);
    assert_eq!(failures[0].1.path, broken);
    assert!(project.exists("htdocs/dist/css/top.css"));
}

#[tokio::test]
async fn renamed_entry_replaces_its_bundle() {
    let project = TestProject::new();
    seed(&project);
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Scripts]).await.unwrap();

    let old = project.remove("htdocs/src/js/entry/about.js");
    let new = project.write("htdocs/src/js/entry/company.js", "");
    let _ = pipeline.handle_change(&ChangeEvent::new(old, ChangeKind::Removed));
    let _ = pipeline.handle_change(&ChangeEvent::new(new, ChangeKind::Added));
    pipeline.settle().await;

    assert_eq!(
        project.files_under("htdocs/dist/js"),
        vec!["company.js", "top.js"]
    );
}
