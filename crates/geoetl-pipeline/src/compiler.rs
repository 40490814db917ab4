//! Turns a [`PipelineConfig`] into one SELECT statement.
//!
//! All checks run before anything is rendered, so a rejected config never
//! reaches a database.

use geoetl_core::types::PipelineConfig;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{PipelineError, Result};
use crate::sanitize::{check_expression, check_identifier, check_operator};

/// Compile a pipeline config into SQL for `dialect`.
///
/// Both supported dialects accept the same subset, so the rendered text does
/// not currently vary by dialect.
pub fn compile(config: &PipelineConfig, dialect: Dialect) -> Result<String> {
    if config.base_table.is_empty() {
        return Err(PipelineError::Config("base_table is required".to_string()));
    }
    check_identifier("base_table", &config.base_table)?;
    if config.mappings.is_empty() {
        return Err(PipelineError::Config(
            "at least one column mapping is required".to_string(),
        ));
    }

    let mut selects = Vec::with_capacity(config.mappings.len());
    for (i, mapping) in config.mappings.iter().enumerate() {
        check_identifier(&format!("mappings[{i}].target_column"), &mapping.target_column)?;
        check_expression(&format!("mappings[{i}].expression"), &mapping.expression)?;
        selects.push(format!("{} AS {}", mapping.expression, mapping.target_column));
    }

    let mut joins = Vec::with_capacity(config.joins.len());
    for (i, join) in config.joins.iter().enumerate() {
        check_identifier(&format!("joins[{i}].table"), &join.table)?;
        check_identifier(&format!("joins[{i}].on_source"), &join.on_source)?;
        check_identifier(&format!("joins[{i}].on_target"), &join.on_target)?;

        let kind = if join.kind.to_uppercase() == "INNER" {
            "INNER JOIN"
        } else {
            "LEFT JOIN"
        };
        joins.push(format!(
            "{kind} {} ON {} = {}",
            join.table, join.on_source, join.on_target
        ));
    }

    let mut conditions = Vec::with_capacity(config.filters.len());
    for (i, filter) in config.filters.iter().enumerate() {
        check_identifier(&format!("filters[{i}].column"), &filter.column)?;
        let op = check_operator(&format!("filters[{i}].operator"), &filter.operator)?;
        let value = filter.value.replace('\'', "''");
        check_expression(&format!("filters[{i}].value"), &value)?;
        conditions.push(format!("{} {op} '{value}'", filter.column));
    }

    let mut sql = format!(
        "SELECT\n    {}\nFROM {}",
        selects.join(",\n    "),
        config.base_table
    );
    if !joins.is_empty() {
        sql.push('\n');
        sql.push_str(&joins.join("\n"));
    }
    if !conditions.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    if let Some(limit) = config.limit.filter(|l| *l > 0) {
        sql.push_str(&format!("\nLIMIT {limit}"));
    }

    debug!(%dialect, base_table = %config.base_table, "pipeline compiled");
    Ok(sql)
}

/// Compile straight from a stored pipeline document.
pub fn compile_document(document: &serde_json::Value, dialect: Dialect) -> Result<String> {
    let config: PipelineConfig = serde::Deserialize::deserialize(document)
        .map_err(|e| PipelineError::Config(format!("invalid pipeline config: {e}")))?;
    compile(&config, dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoetl_core::types::{ColumnMapping, FilterConfig, JoinConfig};
    use serde_json::json;

    fn mapping(target: &str, expr: &str) -> ColumnMapping {
        ColumnMapping {
            target_column: target.into(),
            expression: expr.into(),
        }
    }

    fn users_config() -> PipelineConfig {
        PipelineConfig {
            base_table: "users".into(),
            mappings: vec![
                mapping("id", "users.id"),
                mapping("full_address", "CONCAT(users.address, ', ', users.city)"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn basic_select() {
        let sql = compile(&users_config(), Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "SELECT\n    users.id AS id,\n    CONCAT(users.address, ', ', users.city) AS full_address\nFROM users"
        );
    }

    #[test]
    fn joins_in_order_and_limit_last() {
        let config = PipelineConfig {
            base_table: "orders".into(),
            joins: vec![
                JoinConfig {
                    kind: "INNER".into(),
                    table: "users".into(),
                    on_source: "orders.user_id".into(),
                    on_target: "users.id".into(),
                },
                JoinConfig {
                    kind: "LEFT".into(),
                    table: "locations".into(),
                    on_source: "users.location_id".into(),
                    on_target: "locations.id".into(),
                },
            ],
            mappings: vec![
                mapping("order_id", "orders.id"),
                mapping("user_name", "users.name"),
                mapping("lat", "locations.latitude"),
            ],
            limit: Some(50),
            ..Default::default()
        };
        let sql = compile(&config, Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "SELECT\n    orders.id AS order_id,\n    users.name AS user_name,\n    locations.latitude AS lat\n\
             FROM orders\n\
             INNER JOIN users ON orders.user_id = users.id\n\
             LEFT JOIN locations ON users.location_id = locations.id\n\
             LIMIT 50"
        );
    }

    #[test]
    fn unknown_join_kind_defaults_to_left() {
        let mut config = users_config();
        config.joins.push(JoinConfig {
            kind: "full outer".into(),
            table: "cities".into(),
            on_source: "users.city_id".into(),
            on_target: "cities.id".into(),
        });
        let sql = compile(&config, Dialect::MySql).unwrap();
        assert!(sql.contains("\nLEFT JOIN cities ON users.city_id = cities.id"));

        config.joins[0].kind = "inner".into();
        let sql = compile(&config, Dialect::MySql).unwrap();
        assert!(sql.contains("\nINNER JOIN cities"));
    }

    #[test]
    fn filters_are_anded_and_quotes_doubled() {
        let mut config = users_config();
        config.filters = vec![
            FilterConfig {
                column: "users.country".into(),
                operator: " = ".into(),
                value: "Cote d'Ivoire".into(),
            },
            FilterConfig {
                column: "users.city".into(),
                operator: "ilike".into(),
                value: "%abidjan%".into(),
            },
        ];
        config.limit = Some(0);
        let sql = compile(&config, Dialect::Postgres).unwrap();
        assert!(sql.ends_with(
            "\nFROM users\nWHERE users.country = 'Cote d''Ivoire' AND users.city ILIKE '%abidjan%'"
        ));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn missing_base_table_is_config_error() {
        let mut config = users_config();
        config.base_table.clear();
        let err = compile(&config, Dialect::Postgres).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("base_table is required"));
    }

    #[test]
    fn empty_mappings_is_config_error() {
        let mut config = users_config();
        config.mappings.clear();
        let err = compile(&config, Dialect::Postgres).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn injected_expression_names_the_field() {
        for expr in ["users.id; DROP TABLE users", "users.id -- x", "DROP TABLE users"] {
            let mut config = users_config();
            config.mappings[1].expression = expr.into();
            match compile(&config, Dialect::Postgres).unwrap_err() {
                PipelineError::Validation { field, .. } => {
                    assert_eq!(field, "mappings[1].expression")
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn bad_identifiers_rejected() {
        let mut config = users_config();
        config.base_table = "users u".into();
        assert_eq!(
            compile(&config, Dialect::Postgres).unwrap_err().code(),
            "VALIDATION_ERROR"
        );

        let mut config = users_config();
        config.mappings[0].target_column = "id, password".into();
        assert!(compile(&config, Dialect::Postgres).is_err());

        let mut config = users_config();
        config.joins.push(JoinConfig {
            kind: "LEFT".into(),
            table: "t".into(),
            on_source: "1=1 OR x".into(),
            on_target: "t.id".into(),
        });
        match compile(&config, Dialect::Postgres).unwrap_err() {
            PipelineError::Validation { field, .. } => assert_eq!(field, "joins[0].on_source"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_operator_and_value_rejected() {
        let mut config = users_config();
        config.filters.push(FilterConfig {
            column: "users.id".into(),
            operator: "<>".into(),
            value: "1".into(),
        });
        assert!(compile(&config, Dialect::Postgres).is_err());

        config.filters[0].operator = "=".into();
        config.filters[0].value = "1' UNION SELECT 1".into();
        match compile(&config, Dialect::Postgres).unwrap_err() {
            PipelineError::Validation { field, .. } => assert_eq!(field, "filters[0].value"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn document_entry_point() {
        let doc = json!({
            "base_table": "stores",
            "mappings": [{"target_column": "id", "expression": "stores.id"}],
            "limit": 5,
            "cron": "0 * * * *",
            "cron_active": true
        });
        let sql = compile_document(&doc, Dialect::MySql).unwrap();
        assert_eq!(sql, "SELECT\n    stores.id AS id\nFROM stores\nLIMIT 5");

        let err = compile_document(&json!({"mappings": "nope"}), Dialect::MySql).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
