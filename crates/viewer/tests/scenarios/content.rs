//! Lazy fetching, filtering and update notifications

use crate::common::{path, settle, Model, TestContent};
use canopy_core::TreePath;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use viewer::{ContentReply, ElementFilter, TreeViewer, UpdateListener, ViewerConfig, ViewerError, ALL_LEVELS};

fn viewer_for(content: &Arc<TestContent>, config: ViewerConfig) -> TreeViewer<&'static str> {
    TreeViewer::new(content.clone(), config)
}

fn children_of(viewer: &TreeViewer<&'static str>, parent: &[&'static str]) -> Vec<&'static str> {
    viewer
        .tree()
        .children(&path(parent))
        .into_iter()
        .map(|(_, element)| element)
        .collect()
}

fn hide_b(_: &TreePath<&'static str>, element: &&'static str) -> bool {
    *element != "b"
}

#[derive(Default)]
struct UpdateCounter {
    begins: AtomicUsize,
    completes: AtomicUsize,
    started: AtomicUsize,
}

impl UpdateListener<&'static str> for UpdateCounter {
    fn updates_begin(&self) {
        self.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn updates_complete(&self) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }

    fn update_started(&self, _update: &scheduler::PendingUpdate<&'static str>) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_initial_fetch_materializes_top_level() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    let root = TreePath::root();
    assert_eq!(viewer.tree().child_count(&root), Some(3));
    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
    assert_eq!(viewer.tree().has_children(&path(&["a"])), Some(true));
    assert_eq!(viewer.tree().has_children(&path(&["b"])), Some(false));
    assert!(!viewer.tree().is_expanded(&path(&["a"])));
    assert!(viewer.tree().children(&path(&["a"])).is_empty());
}

#[test]
fn test_expand_fetches_children() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
    assert_eq!(
        viewer.tree().visible_paths(),
        vec![
            path(&["a"]),
            path(&["a", "a1"]),
            path(&["a", "a2"]),
            path(&["b"]),
            path(&["c"]),
        ]
    );
}

#[test]
fn test_expand_leaf_is_a_no_op() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    viewer.expand(&path(&["b"])).unwrap();
    settle(&mut viewer);
    assert!(!viewer.tree().is_expanded(&path(&["b"])));
}

#[test]
fn test_operations_require_materialized_path() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    assert!(matches!(
        viewer.expand(&path(&["a"])),
        Err(ViewerError::NoInput)
    ));

    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert!(matches!(
        viewer.expand(&path(&["a", "a1"])),
        Err(ViewerError::PathNotMaterialized(_))
    ));
}

#[test]
fn test_filter_hides_and_translates_indexes() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    let filter: Arc<dyn ElementFilter<&'static str>> = Arc::new(hide_b);
    viewer.add_filter(filter).unwrap();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    let root = TreePath::root();
    assert_eq!(children_of(&viewer, &[]), vec!["a", "c"]);
    assert_eq!(viewer.tree().child_count(&root), Some(2));
    assert_eq!(viewer.model_to_view_index(&root, 1), None);
    assert_eq!(viewer.model_to_view_index(&root, 2), Some(1));
    assert_eq!(viewer.view_to_model_index(&root, 1), 2);
    assert_eq!(viewer.view_to_model_count(&root, 2), 3);
    assert_eq!(viewer.model_to_view_count(&root, 3), 2);
    assert_eq!(viewer.transform().filtered_children(&root), &[1]);

    viewer.clear_filters().unwrap();
    settle(&mut viewer);
    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
    assert!(viewer.transform().is_empty());
}

#[test]
fn test_adding_filter_keeps_expansion() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);

    let filter: Arc<dyn ElementFilter<&'static str>> = Arc::new(hide_b);
    viewer.add_filter(filter).unwrap();
    settle(&mut viewer);

    assert_eq!(children_of(&viewer, &[]), vec!["a", "c"]);
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
}

#[test]
fn test_auto_expand_all_levels() {
    let content = TestContent::new(Model::sample());
    let config = ViewerConfig {
        auto_expand_level: ALL_LEVELS,
        ..ViewerConfig::default()
    };
    let mut viewer = viewer_for(&content, config);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert!(viewer.tree().is_expanded(&path(&["c"])));
    // a childless node never stays expanded
    assert!(!viewer.tree().is_expanded(&path(&["b"])));
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
    assert_eq!(children_of(&viewer, &["c"]), vec!["c1"]);
}

#[test]
fn test_zero_batch_size_still_fills_children() {
    let content = TestContent::new(Model::sample());
    let config = ViewerConfig {
        children_batch_size: 0,
        ..ViewerConfig::default()
    };
    let mut viewer = viewer_for(&content, config);
    assert_eq!(viewer.config().children_batch_size, 1);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
}

#[test]
fn test_late_reply_after_refresh_is_ignored() {
    let content = TestContent::deferred(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();

    let stale = content.take_requests();
    assert_eq!(stale.len(), 1);
    viewer.refresh().unwrap();
    assert!(stale[0].is_canceled());

    for request in stale {
        request.done(Ok(ContentReply::ChildCount(7)));
    }
    viewer.process_pending();
    assert_eq!(viewer.tree().child_count(&TreePath::root()), None);

    content.answer_until_quiet(&mut viewer, |_| true);
    settle(&mut viewer);
    assert_eq!(viewer.tree().child_count(&TreePath::root()), Some(3));
    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
}

#[test]
fn test_children_wait_for_parent_count() {
    let content = TestContent::deferred(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    content.answer_until_quiet(&mut viewer, |_| true);

    viewer.expand(&path(&["a"])).unwrap();
    // only the count of `a` goes out; its children wait for it
    let held = content.take_requests();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].kind(), scheduler::UpdateKind::ChildCount);
    assert_eq!(held[0].element_path(), &path(&["a"]));
    for request in held {
        content.answer(request);
    }
    content.answer_until_quiet(&mut viewer, |_| true);
    settle(&mut viewer);
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
}

#[test]
fn test_update_listener_sees_balanced_sequences() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    let counter = Arc::new(UpdateCounter::default());
    viewer.add_update_listener(counter.clone());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    let begins = counter.begins.load(Ordering::SeqCst);
    assert!(begins >= 1);
    assert_eq!(begins, counter.completes.load(Ordering::SeqCst));
    assert!(counter.started.load(Ordering::SeqCst) >= 4);
}

#[test]
fn test_dispose_rejects_further_operations() {
    let content = TestContent::new(Model::sample());
    let mut viewer = viewer_for(&content, ViewerConfig::default());
    viewer.set_input("root").unwrap();
    viewer.dispose();

    assert!(viewer.is_disposed());
    assert!(viewer.input().is_none());
    assert!(matches!(viewer.refresh(), Err(ViewerError::Disposed)));
    // replies still queued are dropped
    viewer.process_pending();
    assert!(viewer.is_idle());
}
