use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TlValue {
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<TlValue>),
    Map(BTreeMap<String, TlValue>),
}

impl TlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Only scalar values may be substituted into step text.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Number(_) | Self::String(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<&str> for TlValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

pub fn value_to_text(value: &TlValue) -> String {
    match value {
        TlValue::Bool(value) => value.to_string(),
        TlValue::Number(value) => {
            if value.fract().abs() < f64::EPSILON {
                (*value as i64).to_string()
            } else {
                value.to_string()
            }
        }
        TlValue::String(value) => value.clone(),
        TlValue::Array(_) | TlValue::Map(_) => format!("{:?}", value),
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn scalar_classification() {
        assert!(TlValue::Bool(true).is_scalar());
        assert!(TlValue::Number(1.5).is_scalar());
        assert!(TlValue::from("x").is_scalar());
        assert!(!TlValue::Array(vec![]).is_scalar());
        assert!(!TlValue::Map(BTreeMap::new()).is_scalar());
    }

    #[test]
    fn text_rendering_drops_integral_fraction() {
        assert_eq!(value_to_text(&TlValue::Number(3.0)), "3");
        assert_eq!(value_to_text(&TlValue::Number(3.5)), "3.5");
        assert_eq!(value_to_text(&TlValue::Bool(false)), "false");
        assert_eq!(value_to_text(&TlValue::from("hi")), "hi");
    }

    #[test]
    fn accessors_cover_mismatches() {
        assert_eq!(TlValue::from("a").as_str(), Some("a"));
        assert_eq!(TlValue::Number(2.0).as_str(), None);
        assert_eq!(TlValue::Number(2.0).as_number(), Some(2.0));
        assert_eq!(TlValue::from("a").as_number(), None);
        assert_eq!(TlValue::Array(vec![]).type_name(), "array");
    }
}
