use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// A single field value inside a market data message
///
/// Upstream feeds deliver loosely typed field bundles, so values are kept as a
/// small closed set rather than raw JSON. Decimal is used for anything
/// price-like to avoid float rounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum FieldValue {
    /// Whole-number field (sizes, counts)
    Integer(i64),
    /// Exact decimal field (prices, rates)
    Decimal(Decimal),
    /// Free-text field (market phase, error detail)
    Text(String),
}

impl FieldValue {
    /// Numeric view of the field, if it has one
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Integer(v) => Some(Decimal::from(*v)),
            FieldValue::Decimal(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// An unordered bundle of named fields, the unit of data flowing through the
/// broker (raw from the feed, normalized towards clients)
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Field embedded by the upstream feed in a snapshot image when the session
/// is not permissioned for the instrument. Its value carries the denial text.
pub const PERMISSION_DENIED_FIELD: &str = "permission_denied";

/// Extracts the denial text if the image carries the permission sentinel
pub fn permission_denied_message(fields: &FieldMap) -> Option<String> {
    fields.get(PERMISSION_DENIED_FIELD).map(|v| match v {
        FieldValue::Text(msg) => msg.clone(),
        other => format!("{:?}", other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_as_decimal_conversions() {
        assert_eq!(FieldValue::Integer(42).as_decimal(), Some(dec!(42)));
        assert_eq!(FieldValue::Decimal(dec!(1.25)).as_decimal(), Some(dec!(1.25)));
        assert_eq!(FieldValue::Text("EURUSD".to_string()).as_decimal(), None);
    }

    #[test]
    fn test_permission_denied_extraction() {
        let mut fields = FieldMap::new();
        assert_eq!(permission_denied_message(&fields), None);

        fields.insert(
            PERMISSION_DENIED_FIELD.to_string(),
            FieldValue::Text("no entitlement for EURUSD".to_string()),
        );
        assert_eq!(
            permission_denied_message(&fields).as_deref(),
            Some("no entitlement for EURUSD")
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut fields = FieldMap::new();
        fields.insert("bid".to_string(), FieldValue::Decimal(dec!(2650.50)));
        fields.insert("bid_size".to_string(), FieldValue::Integer(100));
        fields.insert("phase".to_string(), FieldValue::Text("OPEN".to_string()));

        let json = serde_json::to_string(&fields).unwrap();
        let back: FieldMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("bid_size"), Some(&FieldValue::Integer(100)));
        assert_eq!(back.get("phase"), Some(&FieldValue::Text("OPEN".to_string())));
    }
}
