//! `-D key=value` settings forwarded to the device with a program.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid define '{0}': the key must not be empty")]
pub struct DefineError(pub String);

/// Ordered JSON object built from define flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defines(Map<String, Value>);

impl Defines {
    /// Parse define flags. Returns `None` when no flags were given.
    ///
    /// `key=value` keeps the JSON type of `value` when it parses as JSON and
    /// falls back to a string otherwise; a bare `key` means `true`. Later
    /// flags override earlier ones.
    pub fn parse<I, S>(flags: I) -> Result<Option<Self>, DefineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Map::new();
        for flag in flags {
            let flag = flag.as_ref();
            let (key, value) = match flag.split_once('=') {
                Some((key, raw)) => (key.trim(), parse_value(raw)),
                None => (flag.trim(), Value::Bool(true)),
            };
            if key.is_empty() {
                return Err(DefineError(flag.to_string()));
            }
            map.insert(key.to_string(), value);
        }
        Ok((!map.is_empty()).then_some(Self(map)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Compact JSON text, as sent to the device.
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_flags_means_no_defines() {
        assert_eq!(Defines::parse(Vec::<String>::new()).unwrap(), None);
    }

    #[test]
    fn values_keep_json_types() {
        let defines = Defines::parse(["count=3", "debug", "ratio=0.5", "name=sensor", "on=false"])
            .unwrap()
            .unwrap();
        assert_eq!(defines.get("count"), Some(&json!(3)));
        assert_eq!(defines.get("debug"), Some(&json!(true)));
        assert_eq!(defines.get("ratio"), Some(&json!(0.5)));
        assert_eq!(defines.get("name"), Some(&json!("sensor")));
        assert_eq!(defines.get("on"), Some(&json!(false)));
    }

    #[test]
    fn later_flags_win_and_json_is_compact() {
        let defines = Defines::parse(["level=1", "level=2", "tag=\"x y\""])
            .unwrap()
            .unwrap();
        let parsed: Value = serde_json::from_str(&defines.to_json()).unwrap();
        assert_eq!(parsed, json!({"level": 2, "tag": "x y"}));
        assert_eq!(defines.to_json(), r#"{"level":2,"tag":"x y"}"#);
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(
            Defines::parse(["=5"]).unwrap_err(),
            DefineError("=5".to_string())
        );
    }
}
