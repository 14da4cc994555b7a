//! Model deltas applied to a settled view

use crate::common::{path, settle, Model, Path, TestContent};
use canopy_core::{DeltaFlags, ModelDelta, TreePath};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use viewer::{
    ElementFilter, ModelChangedListener, ModelProxy, ModelProxyFactory, SelectionPolicy,
    TreeViewer, ViewerConfig, ViewerHandle,
};

fn settled_viewer(content: &Arc<TestContent>) -> TreeViewer<&'static str> {
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer
}

fn top_level(viewer: &TreeViewer<&'static str>) -> Vec<&'static str> {
    viewer
        .tree()
        .children(&TreePath::root())
        .into_iter()
        .map(|(_, element)| element)
        .collect()
}

fn root_delta(child_count: usize) -> ModelDelta<&'static str> {
    ModelDelta::new("root", DeltaFlags::NO_CHANGE).with_child_count(child_count)
}

#[test]
fn test_remove_drops_view_slot() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    content.edit(|model| model.set_children("root", vec!["a", "c"]));
    let mut delta = root_delta(2);
    delta.add_indexed_node("b", 1, DeltaFlags::REMOVED, None);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert_eq!(top_level(&viewer), vec!["a", "c"]);
    assert_eq!(viewer.tree().child_count(&TreePath::root()), Some(2));
    assert!(!viewer.tree().contains(&path(&["b"])));
}

#[test]
fn test_remove_without_index_finds_element() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);

    content.edit(|model| model.set_children("root", vec!["b", "c"]));
    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.add_node("a", DeltaFlags::REMOVED);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert_eq!(top_level(&viewer), vec!["b", "c"]);
    assert!(!viewer.tree().contains(&path(&["a", "a1"])));
}

#[test]
fn test_insert_shifts_later_children() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    content.edit(|model| model.set_children("root", vec!["a", "new", "b", "c"]));
    let mut delta = root_delta(4);
    delta.add_indexed_node("new", 1, DeltaFlags::INSERTED, None);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert_eq!(top_level(&viewer), vec!["a", "new", "b", "c"]);
    assert_eq!(viewer.tree().has_children(&path(&["new"])), Some(false));
}

#[test]
fn test_add_at_end_extends_count() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    content.edit(|model| model.set_children("root", vec!["a", "b", "c", "d"]));
    let mut delta = root_delta(4);
    delta.add_indexed_node("d", 3, DeltaFlags::ADDED, None);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert_eq!(viewer.tree().child_count(&TreePath::root()), Some(4));
    assert_eq!(top_level(&viewer), vec!["a", "b", "c", "d"]);
}

#[test]
fn test_content_change_refetches_subtree() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);

    content.edit(|model| model.set_children("a", vec!["a1", "a2", "a3"]));
    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.add_indexed_node("a", 0, DeltaFlags::CONTENT, None);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    let children: Vec<_> = viewer
        .tree()
        .children(&path(&["a"]))
        .into_iter()
        .map(|(_, element)| element)
        .collect();
    assert_eq!(children, vec!["a1", "a2", "a3"]);
}

fn hide_hidden(_: &TreePath<&'static str>, element: &&'static str) -> bool {
    *element != "hidden"
}

#[test]
fn test_replace_with_filtered_element() {
    let content = TestContent::new(Model::sample());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    let filter: Arc<dyn ElementFilter<&'static str>> = Arc::new(hide_hidden);
    viewer.add_filter(filter).unwrap();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    content.edit(|model| model.set_children("root", vec!["a", "hidden", "c"]));
    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.push_child(
        ModelDelta::new("b", DeltaFlags::REPLACED)
            .with_index(1)
            .with_replacement("hidden"),
    );
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    let root = TreePath::root();
    assert_eq!(top_level(&viewer), vec!["a", "c"]);
    assert_eq!(viewer.transform().filtered_element(&root, 1), Some(&"hidden"));
    assert_eq!(viewer.view_to_model_index(&root, 1), 2);

    // and back out of the filter
    content.edit(|model| model.set_children("root", vec!["a", "b", "c"]));
    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.push_child(
        ModelDelta::new("hidden", DeltaFlags::REPLACED)
            .with_index(1)
            .with_replacement("b"),
    );
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);
    assert_eq!(top_level(&viewer), vec!["a", "b", "c"]);
    assert!(viewer.transform().is_empty());
}

#[test]
fn test_expand_delta_materializes_path() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    let mut delta = root_delta(3);
    delta.add_indexed_node("a", 0, DeltaFlags::EXPAND, Some(2));
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(viewer.tree().child_count(&path(&["a"])), Some(2));
    assert_eq!(viewer.tree().child(&path(&["a"]), 1), Some(&"a2"));
}

#[test]
fn test_reveal_delta_sets_top_item() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    let mut delta = root_delta(3);
    delta
        .add_indexed_node("a", 0, DeltaFlags::NO_CHANGE, Some(2))
        .add_indexed_node("a2", 1, DeltaFlags::REVEAL, None);
    viewer.model_changed(delta).unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(viewer.tree().top_item(), Some(&path(&["a", "a2"])));
}

struct KeepSelection;

impl SelectionPolicy<&'static str> for KeepSelection {
    fn overrides(&self, _current: &[Path], _candidate: &[Path]) -> bool {
        false
    }
}

#[test]
fn test_selection_policy_veto_and_force() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);
    viewer.set_selection_policy(Arc::new(KeepSelection));
    viewer.set_selection(vec![path(&["a"])]).unwrap();

    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.add_indexed_node("c", 2, DeltaFlags::SELECT, None);
    viewer.model_changed(delta).unwrap();
    assert_eq!(viewer.tree().selection(), &[path(&["a"])]);

    let mut delta = ModelDelta::new("root", DeltaFlags::NO_CHANGE);
    delta.add_indexed_node("c", 2, DeltaFlags::SELECT | DeltaFlags::FORCE, None);
    viewer.model_changed(delta).unwrap();
    assert_eq!(viewer.tree().selection(), &[path(&["c"])]);
}

#[test]
fn test_delta_for_other_input_is_ignored() {
    let content = TestContent::new(Model::sample());
    let mut viewer = settled_viewer(&content);

    let mut delta = ModelDelta::new("other", DeltaFlags::NO_CHANGE).with_child_count(2);
    delta.add_indexed_node("a", 0, DeltaFlags::REMOVED, None);
    viewer.model_changed(delta).unwrap();
    assert_eq!(top_level(&viewer), vec!["a", "b", "c"]);
}

#[derive(Default)]
struct DeltaLog {
    seen: Mutex<Vec<String>>,
}

impl ModelChangedListener<&'static str> for DeltaLog {
    fn model_changed(&self, delta: &ModelDelta<&'static str>) {
        self.seen.lock().push(delta.flags.to_string());
    }
}

/// Shared view of what the proxy went through
#[derive(Default)]
struct ProxyWatch {
    handle: Mutex<Option<ViewerHandle<&'static str>>>,
    disposed: AtomicBool,
}

struct RootProxy {
    watch: Arc<ProxyWatch>,
}

impl ModelProxy<&'static str> for RootProxy {
    fn installed(&mut self, handle: ViewerHandle<&'static str>) {
        *self.watch.handle.lock() = Some(handle);
    }

    fn dispose(&mut self) {
        self.watch.disposed.store(true, Ordering::SeqCst);
    }
}

struct RootProxyFactory {
    watch: Arc<ProxyWatch>,
}

impl ModelProxyFactory<&'static str> for RootProxyFactory {
    fn create(
        &self,
        _input: &&'static str,
        path: &Path,
    ) -> Option<Box<dyn ModelProxy<&'static str>>> {
        if !path.is_empty() {
            return None;
        }
        Some(Box::new(RootProxy {
            watch: self.watch.clone(),
        }))
    }
}

#[test]
fn test_proxy_posts_from_another_thread() {
    let content = TestContent::new(Model::sample());
    let watch = Arc::new(ProxyWatch::default());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    viewer.set_proxy_factory(Arc::new(RootProxyFactory {
        watch: watch.clone(),
    }));
    let log = Arc::new(DeltaLog::default());
    viewer.add_model_changed_listener(log.clone());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert_eq!(viewer.proxy_paths(), vec![TreePath::root()]);

    let handle = watch.handle.lock().clone().expect("proxy installed");
    content.edit(|model| model.set_children("root", vec!["a", "b"]));
    let poster = std::thread::spawn(move || {
        let mut delta = root_delta(2);
        delta.add_indexed_node("c", 2, DeltaFlags::REMOVED, None);
        handle.post_delta(delta)
    });
    assert!(poster.join().unwrap());
    settle(&mut viewer);

    assert_eq!(top_level(&viewer), vec!["a", "b"]);
    assert_eq!(log.seen.lock().len(), 1);

    viewer.dispose();
    assert!(watch.disposed.load(Ordering::SeqCst));
    assert!(viewer.proxy_paths().is_empty());

    let handle = watch.handle.lock().clone().expect("proxy installed");
    drop(viewer);
    assert!(!handle.post_delta(ModelDelta::new("root", DeltaFlags::CONTENT)));
}

#[test]
fn test_uninstall_delta_disposes_proxy() {
    let content = TestContent::new(Model::sample());
    let watch = Arc::new(ProxyWatch::default());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    viewer.set_proxy_factory(Arc::new(RootProxyFactory {
        watch: watch.clone(),
    }));
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    viewer
        .model_changed(ModelDelta::new("root", DeltaFlags::UNINSTALL))
        .unwrap();
    assert!(watch.disposed.load(Ordering::SeqCst));
    assert!(viewer.proxy_paths().is_empty());
}
