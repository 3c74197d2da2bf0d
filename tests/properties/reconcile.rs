//! Reconciliation deletes exactly the claimed files nobody expects.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use kiln::reconcile::{reconcile, ExpectedOutputs, ReconcileScope};
use proptest::prelude::*;

fn output_name() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["", "pages/", "pages/deep/", "vendor/"]),
        "[a-e]{1,3}",
        prop::sample::select(vec![".css", ".css.map", ".txt"]),
    )
        .prop_map(|(dir, stem, ext)| format!("{}{}{}", dir, stem, ext))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn deletes_present_minus_expected(
        present in prop::collection::btree_set(output_name(), 0..12),
        expected in prop::collection::btree_set(output_name(), 0..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dist/css");
        fs::create_dir_all(&root).unwrap();
        for name in &present {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }
        let outside = dir.path().join("dist/stray.css");
        fs::write(&outside, "").unwrap();

        let expected_paths: ExpectedOutputs = expected.iter().map(|n| root.join(n)).collect();
        let scope = ReconcileScope::recursive(&root).with_suffixes(&[".css", ".css.map"]);
        let report = reconcile(&scope, &expected_paths);

        let claimed = |n: &&String| n.ends_with(".css") || n.ends_with(".css.map");
        let should_delete: BTreeSet<PathBuf> = present
            .iter()
            .filter(claimed)
            .filter(|n| !expected.contains(*n))
            .map(|n| root.join(n))
            .collect();
        let deleted: BTreeSet<PathBuf> = report.deleted.iter().cloned().collect();

        prop_assert_eq!(&deleted, &should_delete);
        prop_assert!(report.failed.is_empty());
        for name in &present {
            let path = root.join(name);
            prop_assert_eq!(path.exists(), !should_delete.contains(&path));
        }
        prop_assert!(outside.exists());
    }

    #[test]
    fn second_pass_is_clean(
        present in prop::collection::btree_set(output_name(), 0..12),
        expected in prop::collection::btree_set(output_name(), 0..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dist/css");
        fs::create_dir_all(&root).unwrap();
        for name in &present {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }

        let expected_paths: ExpectedOutputs = expected.iter().map(|n| root.join(n)).collect();
        let scope = ReconcileScope::recursive(&root).with_suffixes(&[".css", ".css.map"]);
        reconcile(&scope, &expected_paths);
        let again = reconcile(&scope, &expected_paths);

        prop_assert!(again.deleted.is_empty());
        prop_assert!(again.failed.is_empty());
    }
}
