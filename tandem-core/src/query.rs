use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction for an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Top-level field equality filter.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Opaque pagination cursor: the order-by value of the last item on the
/// previous page plus its document id as a tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub order_value: Value,
    pub doc_id: String,
}

/// A collection query understood by the persistence gateway: equality
/// filters, one optional order-by, a limit, and cursor continuation.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// Total order over JSON scalars used for order-by and cursor comparison:
/// numbers compare numerically, strings lexicographically; everything else
/// compares equal.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cmp::Ordering;

    #[test]
    fn test_builder_accumulates_filters() {
        let q = Query::collection("ridePosts")
            .where_eq("status", "open")
            .where_eq("destinationCampus", "burnaby")
            .order_by("windowStart", Direction::Desc)
            .limit(10);
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn test_numeric_compare_is_numeric_not_lexical() {
        assert_eq!(compare_values(&json!(9), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2.5)), Ordering::Equal);
    }

    #[test]
    fn test_string_compare_is_lexical() {
        assert_eq!(compare_values(&json!("a"), &json!("b")), Ordering::Less);
    }
}
