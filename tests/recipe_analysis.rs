// tests/recipe_analysis.rs
// Column lineage laws of recipe analysis, checked on the built-in operations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridline::operations::{
    ColumnMoveOperation, ColumnRemovalOperation, ColumnRenameOperation, Operation, Recipe,
    RecipeError, RowFlagOperation,
};
use gridline::registry::Registries;

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn recipes() -> Vec<Recipe> {
    let ops = |ops: Vec<Arc<dyn Operation>>| Recipe::new(ops);
    vec![
        ops(vec![Arc::new(ColumnRenameOperation::new("foo", "foo2"))]),
        ops(vec![
            Arc::new(ColumnRenameOperation::new("foo", "tmp")),
            Arc::new(RowFlagOperation::where_equals(true, "tmp", "x")),
            Arc::new(ColumnRenameOperation::new("tmp", "bar")),
            Arc::new(ColumnRemovalOperation::new("baz")),
        ]),
        ops(vec![
            Arc::new(ColumnMoveOperation::new("a", 2)),
            Arc::new(ColumnRenameOperation::new("b", "c")),
            Arc::new(ColumnRemovalOperation::new("c")),
        ]),
    ]
}

#[test]
fn required_and_new_columns_are_disjoint() {
    for recipe in recipes() {
        let analysis = recipe.analyze().unwrap();
        assert!(analysis.required_columns.is_disjoint(&analysis.new_columns));
        assert!(analysis.internal_columns.is_disjoint(&analysis.new_columns));
    }
}

#[test]
fn renaming_commutes_with_analysis() {
    let renames: BTreeMap<String, String> = [("foo", "qux"), ("tmp", "scratch"), ("a", "alpha"), ("c", "gamma")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let map = |names: &BTreeSet<String>| -> BTreeSet<String> {
        names
            .iter()
            .map(|n| renames.get(n).cloned().unwrap_or_else(|| n.clone()))
            .collect()
    };

    for recipe in recipes() {
        let original = recipe.analyze().unwrap();
        let renamed = recipe.rename_columns(&renames).unwrap().analyze().unwrap();
        assert_eq!(renamed.required_columns, map(&original.required_columns));
        assert_eq!(renamed.new_columns, map(&original.new_columns));
        assert_eq!(renamed.internal_columns, map(&original.internal_columns));
    }
}

#[test]
fn collision_avoidance_keeps_existing_columns_intact() {
    let recipe = Recipe::new(vec![
        Arc::new(ColumnRenameOperation::new("foo", "tmp")),
        Arc::new(ColumnRenameOperation::new("tmp", "bar")),
    ]);
    assert_eq!(recipe.analyze().unwrap().internal_columns, set(&["tmp"]));

    // `tmp_2` is taken by the grid, so the next free suffix is used.
    let existing = set(&["foo", "tmp", "tmp_2"]);
    let rewritten = recipe.avoid_internal_column_collisions(&existing).unwrap();
    let analysis = rewritten.analyze().unwrap();
    assert_eq!(analysis.internal_columns, set(&["tmp_3"]));
    assert!(analysis.internal_columns.is_disjoint(&existing));
    assert_eq!(analysis.required_columns, set(&["foo"]));
    assert_eq!(analysis.new_columns, set(&["bar"]));

    // Nothing to do without a collision.
    let untouched = recipe.avoid_internal_column_collisions(&set(&["foo"])).unwrap();
    assert_eq!(untouched.to_json().unwrap(), recipe.to_json().unwrap());
}

#[test]
fn conflicts_name_the_operation() {
    let recipe = Recipe::new(vec![
        Arc::new(ColumnRemovalOperation::new("foo")),
        Arc::new(ColumnRenameOperation::new("bar", "baz")),
        Arc::new(ColumnMoveOperation::new("foo", 0)),
    ]);
    match recipe.analyze() {
        Err(RecipeError::ColumnRemoved { index, op_id, column }) => {
            assert_eq!(index, 2);
            assert_eq!(op_id, "core/column-move");
            assert_eq!(column, "foo");
        }
        other => panic!("expected a removed-column conflict, got {:?}", other),
    }
}

#[test]
fn recipe_json_round_trip_through_registry() {
    let registries = Registries::builtin();
    let recipe = recipes().remove(1);
    let json = recipe.to_json().unwrap();
    let parsed = Recipe::from_value(json.clone(), &registries.operations).unwrap();
    parsed.validate().unwrap();
    assert_eq!(parsed.to_json().unwrap(), json);
    assert_eq!(parsed.analyze().unwrap(), recipe.analyze().unwrap());
}
