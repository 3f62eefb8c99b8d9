mod common;

use assert_matches::assert_matches;

use scenery_forge::selector::{SceneSelector, SelectionMode, best_in_cell, group_by_cell};

use common::item;

fn ids(items: &[scenery_forge::domain::CatalogItem]) -> Vec<&str> {
    items.iter().map(|item| item.id.as_str()).collect()
}

#[test]
fn clearest_item_wins_each_cell() {
    let items = vec![
        item("t1", "2025-07-01T00:00:00Z", Some(2.0), Some("10SEG")),
        item("t2", "2025-07-06T00:00:00Z", Some(10.0), Some("10SEG")),
        item("t3", "2025-07-11T00:00:00Z", Some(5.0), Some("10SEG")),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["t1"]);
    assert_eq!(selection.mode, SelectionMode::PerCell { cells: 1 });
}

#[test]
fn cloud_tie_prefers_earliest_capture() {
    let items = vec![
        item("late", "2025-08-20T00:00:00Z", Some(2.0), Some("10SEG")),
        item("early", "2025-07-02T00:00:00Z", Some(2.0), Some("10SEG")),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["early"]);
}

#[test]
fn one_item_per_cell_ordered_by_cell_key() {
    let items = vec![
        item("b1", "2025-07-01T00:00:00Z", Some(8.0), Some("10SFG")),
        item("a1", "2025-07-01T00:00:00Z", Some(3.0), Some("10SEG")),
        item("b2", "2025-07-03T00:00:00Z", Some(1.0), Some("10SFG")),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["a1", "b2"]);
    assert_eq!(selection.mode, SelectionMode::PerCell { cells: 2 });
}

#[test]
fn missing_cloud_cover_ranks_last() {
    let items = vec![
        item("unknown", "2025-07-01T00:00:00Z", None, Some("10SEG")),
        item("cloudy", "2025-07-09T00:00:00Z", Some(90.0), Some("10SEG")),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["cloudy"]);
}

#[test]
fn keyless_items_fall_back_to_clearest_time_group() {
    let items = vec![
        item("a-1", "2025-07-01T10:00:00Z", Some(1.0), None),
        item("a-2", "2025-07-01T10:00:00Z", Some(3.0), None),
        item("b-1", "2025-07-04T10:00:00Z", Some(0.5), None),
        item("b-2", "2025-07-04T10:00:00Z", Some(0.5), None),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["b-1", "b-2"]);
    assert_matches!(
        selection.mode,
        SelectionMode::TimeGroup { ref datetime, mean_cloud }
            if datetime == "2025-07-04T10:00:00Z" && mean_cloud == 0.5
    );
}

#[test]
fn time_group_tie_prefers_earliest() {
    let items = vec![
        item("later", "2025-09-01T00:00:00Z", Some(2.0), None),
        item("sooner", "2025-06-15T00:00:00Z", Some(2.0), None),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["sooner"]);
}

#[test]
fn keyless_items_are_dropped_when_any_item_has_a_cell() {
    let items = vec![
        item("keyed", "2025-07-01T00:00:00Z", Some(9.0), Some("10SEG")),
        item("keyless", "2025-07-02T00:00:00Z", Some(0.0), None),
    ];
    let selection = SceneSelector::select(&items).unwrap();
    assert_eq!(ids(&selection.items), vec!["keyed"]);
}

#[test]
fn untimed_items_are_never_selected() {
    let mut untimed = item("untimed", "2025-07-01T00:00:00Z", Some(0.0), Some("10SEG"));
    untimed.acquired = None;
    let timed = item("timed", "2025-07-02T00:00:00Z", Some(4.0), Some("10SEG"));
    let items = vec![untimed, timed];
    let groups = group_by_cell(&items);
    let best = best_in_cell(&groups["10SEG"]).unwrap();
    assert_eq!(best.id, "timed");
}

#[test]
fn empty_results_select_nothing() {
    assert!(SceneSelector::select(&[]).is_none());
}
