use credit_scoring_core::config::PreprocessConfig;
use credit_scoring_core::preprocess::ImputationValue;
use credit_scoring_core::{Column, FeatureMatrix, Preprocessor, Table};
use proptest::prelude::*;

fn reference() -> Table {
    Table::new(vec![
        Column::numeric("A", vec![Some(1.0), Some(2.0), None, Some(4.0)]),
        Column::categorical(
            "B",
            ["x", "y", "x", "z"].iter().map(|s| Some(s.to_string())).collect(),
        ),
    ])
    .unwrap()
}

fn fitted() -> Preprocessor {
    let mut preprocessor = Preprocessor::new(PreprocessConfig::default());
    preprocessor.fit(&reference()).unwrap();
    preprocessor
}

fn bits(matrix: &FeatureMatrix) -> Vec<Vec<u64>> {
    matrix
        .rows()
        .iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect())
        .collect()
}

#[derive(Debug, Clone)]
struct Incoming {
    a: Option<Vec<Option<f64>>>,
    b: Option<Vec<Option<String>>>,
    extra: Option<Vec<Option<f64>>>,
}

impl Incoming {
    fn table(&self) -> Table {
        let mut columns = Vec::new();
        if let Some(a) = &self.a {
            columns.push(Column::numeric("A", a.clone()));
        }
        if let Some(b) = &self.b {
            columns.push(Column::categorical("B", b.clone()));
        }
        if let Some(extra) = &self.extra {
            columns.push(Column::numeric("EXTRA", extra.clone()));
        }
        Table::new(columns).unwrap()
    }
}

fn incoming() -> impl Strategy<Value = Incoming> {
    fn numeric(rows: usize) -> impl Strategy<Value = Vec<Option<f64>>> {
        prop::collection::vec(prop::option::of(-1e6f64..1e6), rows)
    }

    (1usize..12).prop_flat_map(|rows| {
        let level = prop::sample::select(vec!["x", "y", "z", "q", "Unknown", "w"]);
        let categorical = prop::collection::vec(
            prop::option::of(level.prop_map(str::to_string)),
            rows,
        );
        (
            prop::option::of(numeric(rows)),
            prop::option::of(categorical),
            prop::option::of(numeric(rows)),
        )
            .prop_map(|(a, b, extra)| Incoming { a, b, extra })
    })
}

proptest! {
    #[test]
    fn test_transform_columns_always_match_fitted_columns(input in incoming()) {
        let preprocessor = fitted();
        let table = input.table();
        let matrix = preprocessor.transform(&table).unwrap();

        prop_assert_eq!(matrix.columns(), preprocessor.final_columns().unwrap());
        prop_assert_eq!(matrix.n_rows(), table.n_rows());
        prop_assert!(matrix.rows().iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transform_is_deterministic(input in incoming()) {
        let preprocessor = fitted();
        let table = input.table();
        let first = preprocessor.transform(&table).unwrap();
        let second = preprocessor.transform(&table).unwrap();
        prop_assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_indicators_are_binary(input in incoming()) {
        let preprocessor = fitted();
        let matrix = preprocessor.transform(&input.table()).unwrap();
        for name in ["B_y", "B_z"] {
            let values = matrix.column_values(name).unwrap();
            prop_assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
        }
    }
}

#[test]
fn test_unseen_category_and_missing_numeric_end_to_end() {
    let preprocessor = fitted();
    let columns = preprocessor.final_columns().unwrap().to_vec();
    assert_eq!(columns, vec!["A", "B_y", "B_z"]);

    let row = Table::new(vec![
        Column::numeric("A", vec![None]),
        Column::categorical("B", vec![Some("q".into())]),
    ])
    .unwrap();
    let matrix = preprocessor.transform(&row).unwrap();

    let a = matrix.row(0).unwrap()[0];
    assert!((a - 7.0 / 3.0).abs() < 1e-12);
    assert_eq!(&matrix.row(0).unwrap()[1..], &[0.0, 0.0]);
}

#[test]
fn test_fit_state_is_independent_of_held_out_rows() {
    let preprocessor = fitted();
    let before = preprocessor.state().unwrap().clone();

    let held_out = Table::new(vec![
        Column::numeric("A", vec![Some(100.0), None]),
        Column::categorical("B", vec![Some("y".into()), Some("new".into())]),
    ])
    .unwrap();
    // same two rows followed by unrelated ones
    let grown = Table::new(vec![
        Column::numeric("A", vec![Some(100.0), None, Some(1e9), Some(-5.0)]),
        Column::categorical(
            "B",
            vec![Some("y".into()), Some("new".into()), Some("other".into()), None],
        ),
    ])
    .unwrap();

    let small = preprocessor.transform(&held_out).unwrap();
    let large = preprocessor.transform(&grown).unwrap();

    assert_eq!(preprocessor.state().unwrap(), &before);
    assert_eq!(small.rows(), &large.rows()[..2]);
    assert_eq!(
        before.imputation_values.get("A"),
        Some(&ImputationValue::Number(7.0 / 3.0))
    );
}
