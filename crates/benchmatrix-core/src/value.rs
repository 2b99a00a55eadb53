//! Values exchanged with generated code.
//!
//! JSON and TOML cannot express everything a JavaScript function can take
//! or return (`NaN`, `±Infinity`, `undefined`, bigints). Both formats use a
//! small tagged object for those: `{"$special": "NaN"}`,
//! `{"$special": "bigint", "value": "123"}`, and so on. TOML additionally
//! accepts its native `nan` / `inf` / `-inf` floats.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SPECIAL_KEY: &str = "$special";

/// A value passed to or returned from generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(String),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Something that has no data representation (a function, a symbol, a
    /// circular reference). Carries its kind for diagnostics only.
    Opaque(String),
}

impl Value {
    /// Convert from the JSON wire form.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(special) = map.get(SPECIAL_KEY).and_then(|v| v.as_str()) {
                    let payload = map.get("value").and_then(|v| v.as_str());
                    return decode_special(special, payload);
                }
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Convert to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Undefined => json!({ "$special": "undefined" }),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.is_nan() => json!({ "$special": "NaN" }),
            Value::Number(n) if n.is_infinite() && *n > 0.0 => json!({ "$special": "Infinity" }),
            Value::Number(n) if n.is_infinite() => json!({ "$special": "-Infinity" }),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::BigInt(digits) => json!({ "$special": "bigint", "value": digits }),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Opaque(kind) => json!({ "$special": kind }),
        }
    }

    /// Convert from a TOML value in a scoring spec.
    pub fn from_toml(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i as f64),
            toml::Value::Float(f) => Value::Number(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_toml).collect())
            }
            toml::Value::Table(table) => {
                if let Some(special) = table.get(SPECIAL_KEY).and_then(|v| v.as_str()) {
                    let payload = table.get("value").and_then(|v| v.as_str());
                    return decode_special(special, payload);
                }
                Value::Object(
                    table
                        .into_iter()
                        .map(|(k, v)| (k, Value::from_toml(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

fn decode_special(tag: &str, payload: Option<&str>) -> Value {
    match tag {
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "-Infinity" => Value::Number(f64::NEG_INFINITY),
        "undefined" => Value::Undefined,
        "null" => Value::Null,
        "bigint" => Value::BigInt(payload.unwrap_or("0").to_string()),
        other => Value::Opaque(other.to_string()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Number(n) if n.is_nan() => f.write_str("NaN"),
            Value::Number(n) if n.is_infinite() && *n > 0.0 => f.write_str("Infinity"),
            Value::Number(n) if n.is_infinite() => f.write_str("-Infinity"),
            Value::BigInt(digits) => write!(f, "{digits}n"),
            Value::Opaque(kind) => write!(f, "[{kind}]"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_numbers_survive_json() {
        for n in [f64::INFINITY, f64::NEG_INFINITY] {
            let back = Value::from_json(Value::Number(n).to_json());
            assert_eq!(back, Value::Number(n));
        }
        let nan = Value::from_json(Value::Number(f64::NAN).to_json());
        assert!(nan.as_f64().unwrap().is_nan());
    }

    #[test]
    fn undefined_and_bigint_tags() {
        let json = serde_json::json!([{"$special": "undefined"}, {"$special": "bigint", "value": "9007199254740993"}]);
        assert_eq!(
            Value::from_json(json),
            Value::Array(vec![Value::Undefined, Value::BigInt("9007199254740993".into())])
        );
    }

    #[test]
    fn unknown_special_is_opaque() {
        let v = Value::from_json(serde_json::json!({"$special": "function"}));
        assert_eq!(v, Value::Opaque("function".into()));
        assert_eq!(v.to_string(), "[function]");
    }

    #[test]
    fn toml_native_floats_and_tables() {
        let doc: toml::Table = toml::from_str(
            r#"
a = inf
b = -inf
c = 3
d = { "$special" = "null" }
e = { x = 1, y = [true, "s"] }
"#,
        )
        .unwrap();
        let get = |k: &str| Value::from_toml(doc[k].clone());
        assert_eq!(get("a"), Value::Number(f64::INFINITY));
        assert_eq!(get("b"), Value::Number(f64::NEG_INFINITY));
        assert_eq!(get("c"), Value::Number(3.0));
        assert_eq!(get("d"), Value::Null);
        match get("e") {
            Value::Object(map) => {
                assert_eq!(map["x"], Value::Number(1.0));
                assert_eq!(
                    map["y"],
                    Value::Array(vec![Value::Bool(true), Value::String("s".into())])
                );
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn display_is_js_like() {
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::String("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }
}
