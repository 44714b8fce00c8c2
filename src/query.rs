use mssql_client::{Client, Ready, Row as MssqlRow, SqlValue, ToSql};
use tracing::{debug, instrument, trace};

use crate::client::Row;
use crate::error::{CursorError, Result};
use crate::params::{rewrite_placeholders, Params, QueryParam};

// ── Parameter conversion ──────────────────────────────────────

/// Convert a bound parameter to a boxed ToSql value.
pub fn param_to_boxed(param: &QueryParam) -> Result<Box<dyn ToSql + Sync>> {
    let invalid = |what: &str, e: &dyn std::fmt::Display| {
        CursorError::Binding(format!("Invalid {what} for parameter {}: {e}", param.name))
    };

    match &param.value {
        serde_json::Value::Null => Ok(Box::new(Option::<String>::None)),
        serde_json::Value::Bool(b) => Ok(Box::new(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match param.param_type.as_deref() {
                    Some("tinyint") => u8::try_from(i)
                        .map(|v| Box::new(v) as Box<dyn ToSql + Sync>)
                        .map_err(|e| invalid("tinyint", &e)),
                    Some("smallint") => i16::try_from(i)
                        .map(|v| Box::new(v) as Box<dyn ToSql + Sync>)
                        .map_err(|e| invalid("smallint", &e)),
                    Some("int") => i32::try_from(i)
                        .map(|v| Box::new(v) as Box<dyn ToSql + Sync>)
                        .map_err(|e| invalid("int", &e)),
                    Some("bigint") => Ok(Box::new(i)),
                    Some("float") | Some("real") => Ok(Box::new(i as f64)),
                    _ => match i32::try_from(i) {
                        Ok(small) => Ok(Box::new(small)),
                        Err(_) => Ok(Box::new(i)),
                    },
                }
            } else if let Some(f) = n.as_f64() {
                Ok(Box::new(f))
            } else {
                Err(CursorError::Binding(format!("Unsupported number: {n}")))
            }
        }
        serde_json::Value::String(s) => match param.param_type.as_deref() {
            Some("uniqueidentifier") => {
                let uuid: uuid::Uuid = s.parse().map_err(|e| invalid("UUID", &e))?;
                Ok(Box::new(uuid))
            }
            Some("date") => {
                let d: chrono::NaiveDate = s.parse().map_err(|e| invalid("date", &e))?;
                Ok(Box::new(d))
            }
            Some("time") => {
                let t: chrono::NaiveTime = s.parse().map_err(|e| invalid("time", &e))?;
                Ok(Box::new(t))
            }
            Some("datetime" | "datetime2") => {
                let dt = parse_datetime(s)
                    .ok_or_else(|| invalid("datetime", &s))?;
                Ok(Box::new(dt))
            }
            Some("datetimeoffset") => {
                let dt: chrono::DateTime<chrono::FixedOffset> =
                    s.parse().map_err(|e| invalid("datetimeoffset", &e))?;
                Ok(Box::new(dt))
            }
            Some("varbinary") => {
                let bytes =
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                        .map_err(|e| invalid("base64", &e))?;
                Ok(Box::new(bytes))
            }
            _ => Ok(Box::new(s.clone())),
        },
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Ok(Box::new(param.value.to_string()))
        }
    }
}

fn parse_datetime(s: &str) -> Option<chrono::NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Box parameter values in marker order, as produced by
/// [`rewrite_placeholders`]. A parameter used twice is boxed twice.
fn build_param_boxes(params: &Params, order: &[usize]) -> Result<Vec<Box<dyn ToSql + Sync>>> {
    let slice = params.as_slice();
    order
        .iter()
        .map(|&idx| param_to_boxed(&slice[idx]))
        .collect()
}

// ── Row conversion ────────────────────────────────────────────

/// Convert a single driver value to JSON.
pub fn sql_value_to_json(value: Option<SqlValue>) -> serde_json::Value {
    match value {
        None | Some(SqlValue::Null) => serde_json::Value::Null,
        Some(SqlValue::Bool(b)) => serde_json::Value::Bool(b),
        Some(SqlValue::TinyInt(n)) => serde_json::json!(n),
        Some(SqlValue::SmallInt(n)) => serde_json::json!(n),
        Some(SqlValue::Int(n)) => serde_json::json!(n),
        Some(SqlValue::BigInt(n)) => {
            // Outside ±2^53 a double cannot hold it exactly
            if (-(1i64 << 53)..=(1i64 << 53)).contains(&n) {
                serde_json::json!(n)
            } else {
                serde_json::Value::String(n.to_string())
            }
        }
        Some(SqlValue::Float(n)) => serde_json::json!(n),
        Some(SqlValue::Double(n)) => serde_json::json!(n),
        Some(SqlValue::String(s)) => serde_json::Value::String(s),
        Some(SqlValue::Binary(bytes)) => serde_json::Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &bytes,
        )),
        Some(SqlValue::Uuid(u)) => serde_json::Value::String(u.to_string()),
        Some(SqlValue::Date(d)) => serde_json::Value::String(d.to_string()),
        Some(SqlValue::Time(t)) => serde_json::Value::String(t.to_string()),
        Some(SqlValue::DateTime(dt)) => serde_json::Value::String(dt.to_string()),
        Some(SqlValue::DateTimeOffset(dt)) => serde_json::Value::String(dt.to_rfc3339()),
        Some(SqlValue::Xml(s)) => serde_json::Value::String(s),
        Some(other) => serde_json::Value::String(format!("{other:?}")),
    }
}

/// Convert a driver row to a column-name keyed map.
pub fn row_to_map(row: &MssqlRow) -> Row {
    let mut map = Row::new();
    for col in row.columns() {
        map.insert(col.name.clone(), sql_value_to_json(row.get_raw(col.index)));
    }
    map
}

// ── Query execution ───────────────────────────────────────────

fn log_sql(sql: &str) -> &str {
    match sql.char_indices().nth(100) {
        Some((end, _)) => &sql[..end],
        None => sql,
    }
}

/// Execute a query and buffer all of its rows.
#[instrument(level = "debug", skip_all)]
pub async fn execute_rows(
    client: &mut Client<Ready>,
    sql: &str,
    params: &Params,
) -> Result<Vec<Row>> {
    let (rewritten_sql, order) = rewrite_placeholders(sql, params)?;
    let owned_values = build_param_boxes(params, &order)?;
    let param_refs: Vec<&(dyn ToSql + Sync)> = owned_values
        .iter()
        .map(|v| &**v as &(dyn ToSql + Sync))
        .collect();

    debug!(sql = log_sql(&rewritten_sql), params = param_refs.len(), "executing query");
    let stream = client
        .query(&rewritten_sql, &param_refs)
        .await
        .map_err(CursorError::from)?;

    let mut rows = Vec::new();
    for result in stream {
        let row: MssqlRow = result.map_err(CursorError::from)?;
        rows.push(row_to_map(&row));
    }
    trace!(rows = rows.len(), "query buffered");
    Ok(rows)
}

/// Execute a query and return the first column of its first row.
#[instrument(level = "debug", skip_all)]
pub async fn execute_scalar(
    client: &mut Client<Ready>,
    sql: &str,
    params: &Params,
) -> Result<serde_json::Value> {
    let (rewritten_sql, order) = rewrite_placeholders(sql, params)?;
    let owned_values = build_param_boxes(params, &order)?;
    let param_refs: Vec<&(dyn ToSql + Sync)> = owned_values
        .iter()
        .map(|v| &**v as &(dyn ToSql + Sync))
        .collect();

    debug!(sql = log_sql(&rewritten_sql), "executing scalar query");
    let stream = client
        .query(&rewritten_sql, &param_refs)
        .await
        .map_err(CursorError::from)?;

    let mut first = None;
    for result in stream {
        let row: MssqlRow = result.map_err(CursorError::from)?;
        if first.is_none() {
            first = Some(sql_value_to_json(row.get_raw(0)));
        }
    }
    Ok(first.unwrap_or(serde_json::Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn typed(value: serde_json::Value, ty: &str) -> QueryParam {
        QueryParam {
            name: "p".to_string(),
            value,
            param_type: Some(ty.to_string()),
        }
    }

    #[test]
    fn untyped_values_convert() {
        for value in [json!(null), json!(true), json!(5), json!(1.5), json!("x"), json!([1, 2])] {
            assert!(param_to_boxed(&QueryParam::new("p", value)).is_ok());
        }
    }

    #[test]
    fn typed_values_convert() {
        assert!(param_to_boxed(&typed(json!("2024-02-29"), "date")).is_ok());
        assert!(param_to_boxed(&typed(json!("2024-02-29 10:11:12.5"), "datetime2")).is_ok());
        assert!(param_to_boxed(&typed(json!("2024-02-29T10:11:12+02:00"), "datetime")).is_ok());
        assert!(param_to_boxed(&typed(
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8"),
            "uniqueidentifier"
        ))
        .is_ok());
        assert!(param_to_boxed(&typed(json!("AAEC"), "varbinary")).is_ok());
        assert!(param_to_boxed(&typed(json!(255), "tinyint")).is_ok());
    }

    #[test]
    fn invalid_typed_values_are_binding_errors() {
        for param in [
            typed(json!("not-a-date"), "date"),
            typed(json!("nope"), "uniqueidentifier"),
            typed(json!("!!"), "varbinary"),
            typed(json!(300), "tinyint"),
            typed(json!("yesterday"), "datetime2"),
        ] {
            let err = param_to_boxed(&param).err().unwrap();
            assert!(matches!(err, CursorError::Binding(_)), "{:?}", param);
        }
    }

    #[test]
    fn repeated_marker_boxes_twice() {
        let params = Params::new().bind("x", 1);
        let boxes = build_param_boxes(&params, &[0, 0]).unwrap();
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn bigint_outside_safe_range_is_string() {
        assert_eq!(sql_value_to_json(Some(SqlValue::BigInt(1 << 53))), json!(1i64 << 53));
        assert_eq!(
            sql_value_to_json(Some(SqlValue::BigInt(i64::MAX))),
            json!(i64::MAX.to_string())
        );
        assert_eq!(sql_value_to_json(None), json!(null));
    }

    #[test]
    fn log_sql_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        assert_eq!(log_sql(&long).chars().count(), 100);
        assert_eq!(log_sql("SELECT 1"), "SELECT 1");
    }
}
