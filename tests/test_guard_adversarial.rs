use adinsight::catalog::SchemaCatalog;
use adinsight::error::RejectionReason;
use adinsight::guard::{QueryGuard, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT};
use adinsight::query::{AggregationSpec, CandidateQuery, FilterOp, FilterPredicate};
use polars::prelude::*;

fn catalog() -> SchemaCatalog {
    let df = df![
        "platform" => ["google", "meta"],
        "campaign" => ["brand", "promo"],
        "date" => ["2024-01-01", "2024-01-02"],
        "spend" => [100.0, 50.0],
        "clicks" => [10i64, 5],
    ]
    .unwrap();
    SchemaCatalog::from_frame(&df).unwrap()
}

fn well_formed() -> CandidateQuery {
    CandidateQuery {
        operation: "select".to_string(),
        dimensions: vec!["platform".to_string()],
        group_by: vec!["platform".to_string()],
        aggregations: vec![AggregationSpec {
            function: "sum".to_string(),
            metric: "spend".to_string(),
            alias: None,
        }],
        filters: vec![FilterPredicate {
            column: "campaign".to_string(),
            operator: FilterOp::Eq,
            value: serde_json::json!("brand"),
        }],
        ..Default::default()
    }
}

/// Soundness: every candidate carrying a disallowed operation keyword is
/// rejected as UnsafeOperation; a ValidatedQuery is never produced.
#[test]
fn mutation_operations_are_always_unsafe() {
    let guard = QueryGuard::new();
    let catalog = catalog();
    for operation in [
        "DROP", "drop", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "MERGE",
        "GRANT", "select; drop table campaigns",
    ] {
        let candidate = CandidateQuery {
            operation: operation.to_string(),
            ..well_formed()
        };
        match guard.validate(&candidate, &catalog) {
            Err(RejectionReason::UnsafeOperation { .. }) => {}
            other => panic!("operation '{}' must be unsafe, got {:?}", operation, other),
        }
    }
}

#[test]
fn statement_markers_in_identifiers_are_unsafe() {
    let guard = QueryGuard::new();
    let catalog = catalog();

    let mut in_group_by = well_formed();
    in_group_by.group_by = vec!["platform; truncate campaigns".to_string()];
    assert!(matches!(
        guard.validate(&in_group_by, &catalog),
        Err(RejectionReason::UnsafeOperation { .. })
    ));

    let mut in_alias = well_formed();
    in_alias.aggregations[0].alias = Some("total -- drop".to_string());
    assert!(matches!(
        guard.validate(&in_alias, &catalog),
        Err(RejectionReason::UnsafeOperation { .. })
    ));
}

/// Filter values are data, not identifiers: a value mentioning a keyword is
/// fine as long as it type-checks. Values never reach an interpreter.
#[test]
fn keyword_in_filter_value_is_not_unsafe() {
    let guard = QueryGuard::new();
    let mut candidate = well_formed();
    candidate.filters[0].value = serde_json::json!("drop week promo");
    assert!(guard.validate(&candidate, &catalog()).is_ok());
}

#[test]
fn every_referenced_column_must_exist() {
    let guard = QueryGuard::new();
    let catalog = catalog();

    let mut bad_filter = well_formed();
    bad_filter.filters[0].column = "region".to_string();
    assert_eq!(
        guard.validate(&bad_filter, &catalog).unwrap_err(),
        RejectionReason::UnknownColumn {
            name: "region".to_string()
        }
    );

    let mut bad_agg = well_formed();
    bad_agg.aggregations[0].metric = "revenue".to_string();
    assert_eq!(
        guard.validate(&bad_agg, &catalog).unwrap_err(),
        RejectionReason::UnknownColumn {
            name: "revenue".to_string()
        }
    );
}

#[test]
fn aggregations_outside_allow_list_are_rejected() {
    let guard = QueryGuard::new();
    let catalog = catalog();
    for function in ["median", "stddev", "variance", "percentile_95", "first"] {
        let mut candidate = well_formed();
        candidate.aggregations[0].function = function.to_string();
        assert!(
            matches!(
                guard.validate(&candidate, &catalog),
                Err(RejectionReason::UnsupportedAggregation { .. })
            ),
            "function '{}' must be unsupported",
            function
        );
    }
    for function in ["sum", "avg", "average", "count", "min", "max"] {
        let mut candidate = well_formed();
        candidate.aggregations[0].function = function.to_string();
        assert!(
            guard.validate(&candidate, &catalog).is_ok(),
            "function '{}' is on the allow-list",
            function
        );
    }
}

#[test]
fn oversized_limits_are_capped_not_rejected() {
    let guard = QueryGuard::new();
    let catalog = catalog();

    let mut candidate = well_formed();
    candidate.limit = Some(MAX_ROW_LIMIT * 10);
    let validated = guard.validate(&candidate, &catalog).unwrap();
    assert_eq!(validated.limit(), MAX_ROW_LIMIT);

    candidate.limit = None;
    assert_eq!(
        guard.validate(&candidate, &catalog).unwrap().limit(),
        DEFAULT_ROW_LIMIT
    );

    candidate.limit = Some(25);
    assert_eq!(guard.validate(&candidate, &catalog).unwrap().limit(), 25);
}

#[test]
fn filter_values_are_type_checked() {
    let guard = QueryGuard::new();
    let catalog = catalog();

    // number against a text dimension
    let mut candidate = well_formed();
    candidate.filters[0].value = serde_json::json!(42);
    assert!(matches!(
        guard.validate(&candidate, &catalog),
        Err(RejectionReason::TypeMismatch { .. })
    ));

    // text against a numeric metric
    let mut candidate = well_formed();
    candidate.filters = vec![FilterPredicate {
        column: "spend".to_string(),
        operator: FilterOp::Gte,
        value: serde_json::json!("high"),
    }];
    assert!(matches!(
        guard.validate(&candidate, &catalog),
        Err(RejectionReason::TypeMismatch { .. })
    ));

    // in-lists are checked element-wise
    let mut candidate = well_formed();
    candidate.filters = vec![FilterPredicate {
        column: "platform".to_string(),
        operator: FilterOp::In,
        value: serde_json::json!(["google", 7]),
    }];
    assert!(matches!(
        guard.validate(&candidate, &catalog),
        Err(RejectionReason::TypeMismatch { .. })
    ));

    // a non-ISO date string is a mismatch against a date column
    let mut candidate = well_formed();
    candidate.filters = vec![FilterPredicate {
        column: "date".to_string(),
        operator: FilterOp::Gte,
        value: serde_json::json!("last tuesday"),
    }];
    assert!(matches!(
        guard.validate(&candidate, &catalog),
        Err(RejectionReason::TypeMismatch { .. })
    ));
}

/// Completeness: a candidate referencing only known columns, allow-listed
/// aggregations, and read-only operations validates, and the validated query
/// equals the input modulo row-limit clamping.
#[test]
fn well_formed_candidates_pass_unchanged() {
    let guard = QueryGuard::new();
    let catalog = catalog();

    let candidate = well_formed();
    let validated = guard.validate(&candidate, &catalog).unwrap();
    assert_eq!(validated.candidate(), &candidate);
    assert_eq!(validated.aggregations()[0].alias, "sum_spend");
}

/// The guard is a pure function: same candidate, same catalog, same verdict.
#[test]
fn validation_is_deterministic() {
    let guard = QueryGuard::new();
    let catalog = catalog();
    let candidate = well_formed();
    for _ in 0..3 {
        assert!(guard.validate(&candidate, &catalog).is_ok());
    }
}
