//! Shorthand normalization for structured where input
//!
//! Tool layers hand over conditions as a JSON object mapping field names to
//! compact values. The rules are deterministic and total:
//!
//! ```text
//! {"Status": "Done"}                    Status = Done
//! {"Status": 3}                         Status = 3
//! {"name": "~review"}                   name contains "review"
//! {"name": "\\~literal"}                name = "~literal"
//! {"created": ">7d"}                    created > 7d
//! {"Status": ["Open", "Blocked"]}       Status = Open OR Status = Blocked
//! {"created": {"after": "2024-01-01"}}  created > 2024-01-01
//! {"Priority": {"exists": false}}       Priority is empty
//! {"or": [{"Status": "Done"}, {"Priority": "High"}]}
//! ```
//!
//! Any string that does not match a shorthand pattern is an equality test on
//! the raw string.

use crate::query::ast::{Operator, QueryValue, WhereClause, WhereEntry, WhereGroup};
use crate::query::dates::looks_like_date;
use crate::query::error::{QueryError, QueryResult};
use serde_json::{Map, Value};

/// Date comparison prefixes, longest first
const DATE_PREFIXES: [(&str, Operator); 4] = [
    (">=", Operator::Gte),
    ("<=", Operator::Lte),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

/// Normalize JSON where input into where entries.
///
/// An object uses the shorthand forms above; an array is read as explicit
/// clauses and groups; `null` means no conditions.
pub fn where_from_json(value: &Value) -> QueryResult<Vec<WhereEntry>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|e| QueryError::validation(format!("invalid where clause list: {}", e))),
        Value::Object(map) => where_from_map(map),
        other => Err(QueryError::validation(format!(
            "where must be an object or a list, got {}",
            other
        ))),
    }
}

/// Normalize one `field: value` pair
pub fn parse_shorthand(field: &str, value: &Value) -> QueryResult<Vec<WhereEntry>> {
    match value {
        Value::Array(items) => {
            let clauses = items
                .iter()
                .map(|item| {
                    scalar_value(item)
                        .map(|v| WhereEntry::from(WhereClause::eq(field, v)))
                        .ok_or_else(|| {
                            QueryError::validation(format!(
                                "list values for '{}' must be strings, numbers or booleans",
                                field
                            ))
                        })
                })
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(vec![WhereGroup::or(clauses).into()])
        }
        Value::Object(ops) => operator_clauses(field, ops),
        Value::String(s) => Ok(vec![shorthand_text(field, s).into()]),
        Value::Null => Ok(vec![WhereClause::is_empty(field).into()]),
        scalar => match scalar_value(scalar) {
            Some(v) => Ok(vec![WhereClause::eq(field, v).into()]),
            None => Err(QueryError::validation(format!(
                "unsupported value for '{}'",
                field
            ))),
        },
    }
}

/// Apply the string shorthand rules to a single value
pub fn shorthand_text(field: &str, raw: &str) -> WhereClause {
    if let Some(rest) = raw.strip_prefix("\\~") {
        return WhereClause::eq(field, format!("~{}", rest));
    }

    if let Some(rest) = raw.strip_prefix('~') {
        return WhereClause::contains(field, rest);
    }

    for (prefix, op) in DATE_PREFIXES {
        if let Some(rest) = raw.strip_prefix(prefix) {
            let token = rest.trim();
            if looks_like_date(token) {
                return WhereClause::new(field, op, token);
            }
            break;
        }
    }

    WhereClause::eq(field, raw)
}

fn where_from_map(map: &Map<String, Value>) -> QueryResult<Vec<WhereEntry>> {
    let mut entries = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            "and" | "or" => entries.push(group_from_list(key, value)?.into()),
            field => entries.extend(parse_shorthand(field, value)?),
        }
    }

    Ok(entries)
}

fn group_from_list(kind: &str, value: &Value) -> QueryResult<WhereGroup> {
    let Value::Array(items) = value else {
        return Err(QueryError::validation(format!(
            "'{}' expects a list of conditions",
            kind
        )));
    };

    let mut clauses = Vec::with_capacity(items.len());
    for item in items {
        let mut nested = where_from_json(item)?;
        match nested.len() {
            0 => {}
            1 => clauses.append(&mut nested),
            _ => clauses.push(WhereGroup::and(nested).into()),
        }
    }

    Ok(if kind == "or" {
        WhereGroup::or(clauses)
    } else {
        WhereGroup::and(clauses)
    })
}

fn operator_clauses(field: &str, ops: &Map<String, Value>) -> QueryResult<Vec<WhereEntry>> {
    let mut entries = Vec::with_capacity(ops.len());

    for (key, value) in ops {
        let entry: WhereEntry = match key.as_str() {
            "exists" => match value.as_bool() {
                Some(true) => WhereClause::exists(field).into(),
                Some(false) => WhereClause::is_empty(field).into(),
                None => return Err(flag_error(field, key)),
            },
            "is_empty" => match value.as_bool() {
                Some(true) => WhereClause::is_empty(field).into(),
                Some(false) => WhereClause::exists(field).into(),
                None => return Err(flag_error(field, key)),
            },
            "not" => {
                let Value::Object(inner) = value else {
                    return Err(QueryError::validation(format!(
                        "'not' on '{}' expects an operator object",
                        field
                    )));
                };
                let mut negated = operator_clauses(field, inner)?;
                if negated.len() == 1 {
                    match negated.remove(0) {
                        WhereEntry::Clause(c) => c.negate().into(),
                        WhereEntry::Group(g) => g.negate().into(),
                    }
                } else {
                    WhereGroup::and(negated).negate().into()
                }
            }
            other => {
                let op = match other {
                    "after" => Operator::Gt,
                    "before" => Operator::Lt,
                    word => Operator::parse(word)?,
                };
                let v = scalar_value(value).ok_or_else(|| {
                    QueryError::validation(format!(
                        "'{}' on '{}' expects a string, number or boolean",
                        other, field
                    ))
                })?;
                WhereClause::new(field, op, v).into()
            }
        };
        entries.push(entry);
    }

    Ok(entries)
}

fn scalar_value(value: &Value) -> Option<QueryValue> {
    match value {
        Value::String(s) => Some(QueryValue::Text(s.clone())),
        Value::Bool(b) => Some(QueryValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(QueryValue::Integer)
            .or_else(|| n.as_f64().map(QueryValue::Float)),
        _ => None,
    }
}

fn flag_error(field: &str, key: &str) -> QueryError {
    QueryError::validation(format!("'{}' on '{}' expects true or false", key, field))
}
