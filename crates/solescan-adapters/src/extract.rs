//! Ordered-candidate field extraction shared by all adapters.
//!
//! Upstream sources spell the same concept under inconsistent keys. Every
//! lookup takes an ordered candidate list and returns the first present
//! value, or an explicit absent marker. Missing numerics stay `None`.

use serde_json::Value;

/// Walk a nested path of object keys.
pub fn pluck<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

/// First candidate key holding a non-empty string. Bare numbers stringify,
/// which covers sources that send numeric ids.
pub fn first_str(value: &Value, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|key| {
        value.get(*key).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}

/// First candidate key holding a number; numeric strings are accepted.
pub fn first_f64(value: &Value, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .find_map(|key| value.get(*key).and_then(value_as_f64))
}

/// First candidate key holding an integer; numeric strings are accepted.
pub fn first_i64(value: &Value, candidates: &[&str]) -> Option<i64> {
    candidates.iter().find_map(|key| {
        value.get(*key).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidates_are_tried_in_order() {
        let value = json!({"avg_price": 120.0, "historical_average": 110.0});
        assert_eq!(
            first_f64(&value, &["historical_average", "avg_price"]),
            Some(110.0)
        );
        assert_eq!(
            first_f64(&value, &["avg_price", "historical_average"]),
            Some(120.0)
        );
    }

    #[test]
    fn absent_numerics_stay_absent_not_zero() {
        let value = json!({"lowestAsk": null});
        assert_eq!(first_f64(&value, &["lowestAsk", "lowest_ask"]), None);
        assert_eq!(first_i64(&value, &["sales_last_72h"]), None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let value = json!({"last_sale": "89.50", "sales_last_72h": "12"});
        assert_eq!(first_f64(&value, &["last_sale"]), Some(89.5));
        assert_eq!(first_i64(&value, &["sales_last_72h"]), Some(12));
    }

    #[test]
    fn strings_trim_and_reject_blanks() {
        let value = json!({"styleId": "  DD1391-100 ", "brand": "   "});
        assert_eq!(
            first_str(&value, &["styleId"]),
            Some("DD1391-100".to_string())
        );
        assert_eq!(first_str(&value, &["brand"]), None);
        assert_eq!(first_str(&value, &["id", "uuid"]), None);
    }

    #[test]
    fn pluck_walks_nested_objects() {
        let value = json!({"productAttributes": {"retailPrice": 110.0}});
        let attrs = pluck(&value, &["productAttributes"]).expect("attrs");
        assert_eq!(first_f64(attrs, &["retailPrice"]), Some(110.0));
        assert!(pluck(&value, &["productAttributes", "missing"]).is_none());
    }
}
