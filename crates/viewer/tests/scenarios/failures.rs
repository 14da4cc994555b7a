//! Provider failures leave the view consistent and notifications paired

use crate::common::{path, settle, Model, StateEvents, TestContent, TestTokens};
use scheduler::UpdateKind;
use viewer::{TreeViewer, ViewerConfig};

fn children_of(viewer: &TreeViewer<&'static str>, parent: &[&'static str]) -> Vec<&'static str> {
    viewer
        .tree()
        .children(&path(parent))
        .into_iter()
        .map(|(_, element)| element)
        .collect()
}

#[test]
fn test_failed_content_updates_leave_tree_usable() {
    let content = TestContent::new(Model::sample());
    content.fail_when(|kind, path| kind == UpdateKind::HasChildren && path.len() == 1);
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
    assert_eq!(viewer.tree().has_children(&path(&["a"])), None);
    assert!(viewer.is_idle());

    // an unknown has-children state does not block expansion
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(children_of(&viewer, &["a"]), vec!["a1", "a2"]);
}

#[test]
fn test_failed_encoding_drops_saved_state() {
    let content = TestContent::new(Model::sample());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    let tokens = TestTokens::new();
    let events = StateEvents::new();
    tokens.fail_encoding_of("a");
    viewer.set_token_provider(tokens.clone());
    viewer.add_state_listener(events.clone());

    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_selection(vec![path(&["a", "a2"])]).unwrap();

    let mark = events.events().len();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);
    assert_eq!(
        events.events()[mark..],
        [
            "save_begins:root",
            "save_complete:root",
            "restore_begins:other",
            "restore_complete:other",
        ]
    );
    assert_eq!(viewer.saved_state_count(), 0);

    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert_eq!(
        events.events()[mark..],
        ["restore_begins:root", "restore_complete:root"]
    );
    assert!(!viewer.is_restoring());
    assert!(!viewer.tree().is_expanded(&path(&["a"])));
    assert!(viewer.tree().selection().is_empty());
}

#[test]
fn test_failed_comparisons_restore_nothing() {
    let content = TestContent::new(Model::sample());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    let tokens = TestTokens::new();
    let events = StateEvents::new();
    viewer.set_token_provider(tokens.clone());
    viewer.add_state_listener(events.clone());

    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_selection(vec![path(&["a", "a2"])]).unwrap();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);
    assert_eq!(viewer.saved_state_count(), 1);

    tokens.set_failing_compares(true);
    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert!(tokens.compares() > 0);
    assert_eq!(
        events.events()[mark..],
        ["restore_begins:root", "restore_complete:root"]
    );
    assert!(!viewer.is_restoring());
    assert_eq!(children_of(&viewer, &[]), vec!["a", "b", "c"]);
    assert!(!viewer.tree().is_expanded(&path(&["a"])));
    assert!(viewer.tree().selection().is_empty());
}
