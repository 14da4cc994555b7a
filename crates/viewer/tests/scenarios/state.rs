//! Saving and restoring expansion, selection and reveal across inputs

use crate::common::{path, settle, Model, StateEvents, TestContent, TestTokens};
use canopy_core::TreePath;
use scheduler::UpdateKind;
use std::sync::Arc;
use viewer::{TreeViewer, ViewerConfig};

fn stateful_viewer(
    content: &Arc<TestContent>,
) -> (TreeViewer<&'static str>, Arc<TestTokens>, Arc<StateEvents>) {
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    let tokens = TestTokens::new();
    let events = StateEvents::new();
    viewer.set_token_provider(tokens.clone());
    viewer.add_state_listener(events.clone());
    (viewer, tokens, events)
}

/// Events recorded after the first `skip`
fn events_since(events: &StateEvents, skip: usize) -> Vec<String> {
    events.events().into_iter().skip(skip).collect()
}

#[test]
fn test_state_survives_input_round_trip() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, tokens, events) = stateful_viewer(&content);

    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert_eq!(
        events.events(),
        vec!["restore_begins:root", "restore_complete:root"]
    );
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_selection(vec![path(&["a", "a2"])]).unwrap();

    let mark = events.events().len();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);
    assert_eq!(
        events_since(&events, mark),
        vec![
            "save_begins:root",
            "save_complete:root",
            "restore_begins:other",
            "restore_complete:other",
        ]
    );
    assert_eq!(viewer.saved_state_count(), 1);
    assert!(tokens.encodes() >= 3);
    assert!(viewer.tree().selection().is_empty());

    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(viewer.tree().child(&path(&["a"]), 1), Some(&"a2"));
    assert_eq!(viewer.tree().selection(), &[path(&["a", "a2"])]);
    assert!(!viewer.is_restoring());
    // the cache entry is consumed by the restore
    assert_eq!(viewer.saved_state_count(), 0);
    assert!(tokens.compares() > 0);
}

#[test]
fn test_nothing_saved_for_untouched_tree() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);

    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    assert!(!events.contains("save_begins:root"));
    assert_eq!(viewer.saved_state_count(), 0);
}

#[test]
fn test_expansion_survives_refresh() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);

    let mark = events.events().len();
    content.edit(|model| model.set_children("a", vec!["a1", "a2", "a3"]));
    viewer.refresh().unwrap();
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(viewer.tree().child_count(&path(&["a"])), Some(3));
    assert!(!viewer.tree().is_expanded(&path(&["c"])));
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}

#[test]
fn test_expansion_survives_refresh_without_tokens() {
    let content = TestContent::new(Model::sample());
    let mut viewer = TreeViewer::new(content.clone(), ViewerConfig::default());
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["c"])).unwrap();
    settle(&mut viewer);

    viewer.refresh().unwrap();
    settle(&mut viewer);
    assert!(viewer.tree().is_expanded(&path(&["c"])));
    assert_eq!(viewer.tree().child(&path(&["c"]), 0), Some(&"c1"));
}

#[test]
fn test_reveal_is_restored() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.reveal(&path(&["a", "a2"])).unwrap();

    viewer.set_input("other").unwrap();
    settle(&mut viewer);
    assert_eq!(viewer.tree().top_item(), None);

    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    assert_eq!(viewer.tree().top_item(), Some(&path(&["a", "a2"])));
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}

#[test]
fn test_user_collapse_cancels_restored_expansion() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    content.set_deferred(true);
    viewer.set_input("root").unwrap();
    let a = path(&["a"]);
    content.answer_until_quiet(&mut viewer, |request| request.element_path() != &a);
    assert!(viewer.tree().contains(&a));
    assert!(viewer.is_restoring());

    viewer.collapse(&a).unwrap();
    content.set_deferred(false);
    content.answer_until_quiet(&mut viewer, |_| true);
    settle(&mut viewer);

    assert!(!viewer.tree().is_expanded(&a));
    assert!(viewer.tree().children(&a).is_empty());
    assert!(!viewer.is_restoring());
    assert_eq!(
        events.events().last().map(String::as_str),
        Some("restore_complete:root")
    );
}

#[test]
fn test_saved_state_for_removed_element_is_dropped() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    content.edit(|model| model.set_children("root", vec!["b", "c"]));
    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert!(!viewer.tree().contains(&path(&["a"])));
    assert!(!viewer.is_restoring());
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}

#[test]
fn test_state_cache_is_bounded() {
    let content = TestContent::new(Model::new(&[
        ("one", &["x"]),
        ("two", &["x"]),
        ("three", &["x"]),
        ("x", &["y"]),
    ]));
    let config = ViewerConfig {
        state_cache_capacity: 2,
        ..ViewerConfig::default()
    };
    let mut viewer = TreeViewer::new(content.clone(), config);
    viewer.set_token_provider(TestTokens::new());

    for input in ["one", "two", "three"] {
        viewer.set_input(input).unwrap();
        settle(&mut viewer);
        viewer.expand(&path(&["x"])).unwrap();
        settle(&mut viewer);
    }
    viewer.set_input("one").unwrap();
    settle(&mut viewer);
    assert_eq!(viewer.saved_state_count(), 2);
    // "one" was evicted first, so nothing comes back for it
    assert!(!viewer.tree().is_expanded(&path(&["x"])));
    assert_eq!(viewer.tree().child_count(&TreePath::root()), Some(1));
}

#[test]
fn test_refresh_during_restore_merges_into_pending_state() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.set_selection(vec![path(&["a", "a2"])]).unwrap();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    content.set_deferred(true);
    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    let a = path(&["a"]);
    content.answer_until_quiet(&mut viewer, |request| {
        !(request.kind() == UpdateKind::HasChildren && request.element_path() == &a)
    });
    assert!(viewer.tree().contains(&a));
    assert!(viewer.is_restoring());

    // user state and the still pending restore both survive the refresh
    viewer.expand(&path(&["c"])).unwrap();
    viewer.refresh().unwrap();
    assert!(viewer.is_restoring());
    content.set_deferred(false);
    content.answer_until_quiet(&mut viewer, |_| true);
    settle(&mut viewer);

    assert!(viewer.tree().is_expanded(&a));
    assert!(viewer.tree().is_expanded(&path(&["c"])));
    assert_eq!(viewer.tree().child(&path(&["c"]), 0), Some(&"c1"));
    assert_eq!(viewer.tree().selection(), &[path(&["a", "a2"])]);
    assert!(!viewer.is_restoring());
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}

#[test]
fn test_reveal_beyond_new_child_count_is_dropped() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, _tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.reveal(&path(&["c"])).unwrap();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    content.edit(|model| model.set_children("root", vec!["a"]));
    content.clear_log();
    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert_eq!(viewer.tree().top_item(), None);
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert!(!viewer.is_restoring());
    // the stale slot is never asked for
    assert!(!content.log().iter().any(|(kind, at)| {
        at.is_empty() && matches!(kind, UpdateKind::Children { offset: 2, .. })
    }));
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}

#[test]
fn test_reveal_of_replaced_element_is_dropped() {
    let content = TestContent::new(Model::sample());
    let (mut viewer, tokens, events) = stateful_viewer(&content);
    viewer.set_input("root").unwrap();
    settle(&mut viewer);
    viewer.expand(&path(&["a"])).unwrap();
    settle(&mut viewer);
    viewer.reveal(&path(&["c"])).unwrap();
    viewer.set_input("other").unwrap();
    settle(&mut viewer);

    // `z` now sits where the revealed `c` was
    content.edit(|model| model.set_children("root", vec!["a", "b", "z"]));
    let mark = events.events().len();
    viewer.set_input("root").unwrap();
    settle(&mut viewer);

    assert!(tokens.compares() > 0);
    assert!(viewer.tree().contains(&path(&["z"])));
    assert_eq!(viewer.tree().top_item(), None);
    assert!(viewer.tree().is_expanded(&path(&["a"])));
    assert!(!viewer.is_restoring());
    assert_eq!(
        events_since(&events, mark),
        vec!["restore_begins:root", "restore_complete:root"]
    );
}
