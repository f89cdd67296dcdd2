//! List filters in the document API's JSON query syntax.

use serde::Serialize;
use serde_json::Value;

/// A single list filter.
///
/// Serializes to the JSON form the REST API expects in `queries[]`, e.g.
/// `{"method":"equal","attribute":"storeNumber","values":["4521"]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Query {
    Equal { attribute: String, values: Vec<Value> },
    OrderAsc { attribute: String },
    OrderDesc { attribute: String },
    Limit { values: [u32; 1] },
    Offset { values: [u32; 1] },
}

impl Query {
    pub fn equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Equal {
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    pub fn order_asc(attribute: impl Into<String>) -> Self {
        Query::OrderAsc {
            attribute: attribute.into(),
        }
    }

    pub fn order_desc(attribute: impl Into<String>) -> Self {
        Query::OrderDesc {
            attribute: attribute.into(),
        }
    }

    pub fn limit(limit: u32) -> Self {
        Query::Limit { values: [limit] }
    }

    pub fn offset(offset: u32) -> Self {
        Query::Offset { values: [offset] }
    }

    /// Encode for a `queries[]` URL parameter.
    pub fn to_param(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is a paging query (`limit`/`offset`).
    pub fn is_paging(&self) -> bool {
        matches!(self, Query::Limit { .. } | Query::Offset { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_equal_encoding() {
        let q = Query::equal("storeNumber", "4521");
        assert_eq!(
            q.to_param().unwrap(),
            r#"{"method":"equal","attribute":"storeNumber","values":["4521"]}"#
        );
    }

    #[test]
    fn test_order_and_paging_encoding() {
        assert_eq!(
            Query::order_asc("order").to_param().unwrap(),
            r#"{"method":"orderAsc","attribute":"order"}"#
        );
        assert_eq!(
            Query::limit(100).to_param().unwrap(),
            r#"{"method":"limit","values":[100]}"#
        );
        assert_eq!(
            Query::offset(200).to_param().unwrap(),
            r#"{"method":"offset","values":[200]}"#
        );
        assert!(Query::limit(1).is_paging());
        assert!(!Query::order_desc("count").is_paging());
    }
}
