//! Edits under watch: each change rebuilds the smallest affected target.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use kiln::config::PartialChangePolicy;
use kiln::{ChangeEvent, ChangeKind, Phase};

use crate::common::{RecordingTools, TestProject};

fn scripts_project() -> TestProject {
    let project = TestProject::new();
    project.write("htdocs/src/js/entry/top.js", "");
    project.write("htdocs/src/js/entry/about.js", "");
    project.write("htdocs/src/js/pages/top.js", "");
    project.write("htdocs/src/js/utils/dom.js", "");
    project
}

#[tokio::test]
async fn entry_edit_rebuilds_only_that_entry() {
    let project = scripts_project();
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Scripts]).await.unwrap();
    let about = project.path("htdocs/dist/js/about.js");
    std::fs::write(&about, "built earlier").unwrap();
    let earlier = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    filetime::set_file_mtime(&about, earlier).unwrap();
    tools.clear();

    let ticket = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/js/entry/top.js"),
        ChangeKind::Modified,
    ));
    futures::future::join_all(ticket).await;

    assert_eq!(tools.bundled_names(), vec![vec!["top".to_string()]]);
    assert_eq!(project.read("htdocs/dist/js/about.js"), "built earlier");
    let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&about).unwrap());
    assert_eq!(mtime, earlier);
}

#[tokio::test]
async fn named_dependency_rebuilds_its_entry() {
    let project = scripts_project();
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/js/pages/top.js"),
        ChangeKind::Modified,
    ));
    pipeline.settle().await;

    assert_eq!(tools.bundled_names(), vec![vec!["top".to_string()]]);
}

#[tokio::test]
async fn shared_dependency_rebuilds_all_entries() {
    let project = scripts_project();
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;

    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/js/utils/dom.js"),
        ChangeKind::Modified,
    ));
    pipeline.settle().await;

    assert_eq!(
        tools.bundled_names(),
        vec![vec!["about".to_string(), "top".to_string()]]
    );
}

#[tokio::test]
async fn rapid_events_coalesce_into_one_run() {
    let project = scripts_project();
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    let top = project.path("htdocs/src/js/entry/top.js");

    for _ in 0..10 {
        let _ = pipeline.handle_change(&ChangeEvent::new(top.clone(), ChangeKind::Modified));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    pipeline.settle().await;

    assert_eq!(tools.bundled_names().len(), 1);
}

#[tokio::test]
async fn partial_under_owning_index_recompiles_only_that_index() {
    let project = TestProject::new();
    project.write("htdocs/src/scss/global/_reset.scss", "");
    project.write("htdocs/src/scss/pages/top.scss", "");
    project.write("htdocs/src/scss/pages/about.scss", "");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Styles]).await.unwrap();
    tools.clear();

    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/scss/global/_reset.scss"),
        ChangeKind::Modified,
    ));
    pipeline.settle().await;

    assert_eq!(tools.compiled(), vec![project.path("htdocs/src/scss/common.scss")]);
}

#[tokio::test]
async fn partial_under_all_indexes_policy_recompiles_everything() {
    let project = TestProject::new();
    project.write("htdocs/src/scss/global/_reset.scss", "");
    project.write("htdocs/src/scss/pages/top.scss", "");
    let tools = Arc::new(RecordingTools::new());
    let mut config = project.config();
    config.styles.index[0].partial_change = PartialChangePolicy::AllIndexes;
    let pipeline = project.pipeline_with(config, &tools).await;
    pipeline.build_all(&[Phase::Styles]).await.unwrap();
    tools.clear();

    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/scss/global/_reset.scss"),
        ChangeKind::Modified,
    ));
    pipeline.settle().await;

    assert_eq!(
        tools.compiled(),
        vec![
            project.path("htdocs/src/scss/common.scss"),
            project.path("htdocs/src/scss/pages/top.scss"),
        ]
    );
}

#[tokio::test]
async fn foundation_partial_recompiles_everything() {
    let project = TestProject::new();
    project.write("htdocs/src/scss/foundation/variables/_colors.scss", "");
    project.write("htdocs/src/scss/pages/top.scss", "");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Styles]).await.unwrap();
    tools.clear();

    let _ = pipeline.handle_change(&ChangeEvent::new(
        project.path("htdocs/src/scss/foundation/variables/_colors.scss"),
        ChangeKind::Modified,
    ));
    pipeline.settle().await;

    assert_eq!(tools.compiled().len(), 2);
}

#[tokio::test]
async fn new_partial_lands_in_the_generated_index() {
    let project = TestProject::new();
    project.write("htdocs/src/scss/global/_reset.scss", "");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Styles]).await.unwrap();

    let added = project.write("htdocs/src/scss/global/_typography.scss", "");
    let _ = pipeline.handle_change(&ChangeEvent::new(added, ChangeKind::Added));
    pipeline.settle().await;

    let index = project.read("htdocs/src/scss/common.scss");
    let reset = index.find("_reset.scss").unwrap();
    let typography = index.find("_typography.scss").unwrap();
    assert!(reset < typography);
}

#[tokio::test]
async fn post_processing_never_overlaps_a_compile_of_the_same_file() {
    let project = TestProject::new();
    let top = project.write("htdocs/src/scss/pages/top.scss", "");
    let tools = Arc::new(RecordingTools::new());
    let pipeline = project.pipeline(&tools).await;
    pipeline.build_all(&[Phase::Styles]).await.unwrap();
    tools.set_delay(Duration::from_millis(100));

    let _ = pipeline.handle_change(&ChangeEvent::new(top.clone(), ChangeKind::Modified));
    // lands while the first compile's post-processing is due
    tokio::time::sleep(Duration::from_millis(130)).await;
    let _ = pipeline.handle_change(&ChangeEvent::new(top, ChangeKind::Modified));
    pipeline.settle().await;

    assert_eq!(tools.peak_runs_per_file(), 1);
    assert!(project.exists("htdocs/dist/css/top.css"));
}
