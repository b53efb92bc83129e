// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Typed attribute values and their conversion from attribute bags and text.

use crate::dataset::AttributeBag;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt::Display;

/// Value of an attribute as carried by CVAT records.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

/// Inferred type of an attribute, used when building task label schemas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Boolean,
    Numeric,
    Categorical,
    Null,
}

impl AttributeValue {
    /// Recovers a typed value from XML or REST text.
    ///
    /// Integers are tried first, then finite floats, then `true`/`false` in
    /// any case and `None` as null. Anything else, `nan` and `inf` included,
    /// stays text.
    pub fn parse(text: &str) -> AttributeValue {
        if let Ok(value) = text.parse::<i64>() {
            return AttributeValue::Integer(value);
        }

        if let Ok(value) = text.parse::<f64>()
            && value.is_finite()
        {
            return AttributeValue::Real(value);
        }

        if text.eq_ignore_ascii_case("true") {
            return AttributeValue::Boolean(true);
        }

        if text.eq_ignore_ascii_case("false") {
            return AttributeValue::Boolean(false);
        }

        if text == "None" {
            return AttributeValue::Null;
        }

        AttributeValue::Text(text.to_owned())
    }

    /// Converts a bag value, returning `None` for types CVAT cannot hold
    /// such as nulls, arrays and objects.
    pub fn from_json(value: &Value) -> Option<AttributeValue> {
        match value {
            Value::Bool(b) => Some(AttributeValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(AttributeValue::Integer(i)),
                None => n.as_f64().map(AttributeValue::Real),
            },
            Value::String(s) => Some(AttributeValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Boolean(b) => Value::Bool(*b),
            AttributeValue::Integer(i) => Value::Number((*i).into()),
            AttributeValue::Real(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            AttributeValue::Text(s) => Value::String(s.clone()),
            AttributeValue::Null => Value::Null,
        }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Integer(_) | AttributeValue::Real(_) => AttributeKind::Numeric,
            AttributeValue::Text(_) => AttributeKind::Categorical,
            AttributeValue::Null => AttributeKind::Null,
        }
    }

    /// Interprets the value as a flag; numbers are true when non-zero.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            AttributeValue::Integer(i) => Some(*i != 0),
            AttributeValue::Real(f) => Some(*f != 0.0),
            AttributeValue::Text(_) | AttributeValue::Null => None,
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            // Keep a decimal point so the value parses back as a float.
            AttributeValue::Real(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            AttributeValue::Real(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::Null => write!(f, "None"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Attribute {
            name: name.into(),
            value,
        }
    }
}

/// Flags CVAT stores on the shape element itself rather than as attributes.
pub const SHAPE_FLAGS: [&str; 3] = ["occluded", "outside", "keyframe"];

/// Reads a shape flag out of an attribute bag.
pub fn flag_from_bag(bag: &AttributeBag, name: &str) -> Option<bool> {
    bag.get(name)
        .and_then(AttributeValue::from_json)
        .and_then(|value| value.as_flag())
}

/// Converts a bag to CVAT attributes, dropping the names in `skip` and any
/// value of an unsupported type.
pub fn attributes_from_bag(bag: &AttributeBag, skip: &[&str]) -> Vec<Attribute> {
    bag.iter()
        .filter(|(name, _)| !skip.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            AttributeValue::from_json(value).map(|value| Attribute::new(name.clone(), value))
        })
        .collect()
}

/// Builds the attribute bag of a label from CVAT attributes and flags.
pub fn bag_from_attributes(
    attributes: &[Attribute],
    flags: &[(&str, Option<bool>)],
) -> AttributeBag {
    let mut bag: AttributeBag = attributes
        .iter()
        .map(|attr| (attr.name.clone(), attr.value.to_json()))
        .collect();

    for (name, flag) in flags {
        if let Some(flag) = flag {
            bag.insert((*name).to_owned(), Value::Bool(*flag));
        }
    }

    bag
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_recovers_types() {
        assert_eq!(AttributeValue::parse("12"), AttributeValue::Integer(12));
        assert_eq!(AttributeValue::parse("-0.25"), AttributeValue::Real(-0.25));
        assert_eq!(AttributeValue::parse("TRUE"), AttributeValue::Boolean(true));
        assert_eq!(
            AttributeValue::parse("False"),
            AttributeValue::Boolean(false)
        );
        assert_eq!(AttributeValue::parse("None"), AttributeValue::Null);
        assert_eq!(
            AttributeValue::parse("sedan"),
            AttributeValue::Text("sedan".to_string())
        );
        assert_eq!(
            AttributeValue::parse("12abc"),
            AttributeValue::Text("12abc".to_string())
        );
    }

    #[test]
    fn test_non_finite_text_stays_text() {
        for text in ["nan", "NaN", "inf", "-Infinity"] {
            assert_eq!(
                AttributeValue::parse(text),
                AttributeValue::Text(text.to_string())
            );
            assert_eq!(AttributeValue::parse(text).to_json(), json!(text));
        }
    }

    #[test]
    fn test_display_parses_back() {
        for value in [
            AttributeValue::Boolean(true),
            AttributeValue::Integer(3),
            AttributeValue::Real(2.0),
            AttributeValue::Real(0.5),
            AttributeValue::Null,
        ] {
            assert_eq!(AttributeValue::parse(&value.to_string()), value);
        }
    }

    #[test]
    fn test_unsupported_bag_values_are_dropped() {
        let mut bag = AttributeBag::new();
        bag.insert("occluded".to_string(), json!(true));
        bag.insert("color".to_string(), json!("red"));
        bag.insert("score".to_string(), json!(0.75));
        bag.insert("history".to_string(), json!([1, 2]));
        bag.insert("extra".to_string(), json!({"a": 1}));
        bag.insert("missing".to_string(), Value::Null);

        let attributes = attributes_from_bag(&bag, &SHAPE_FLAGS);
        let names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["color", "score"]);
        assert_eq!(flag_from_bag(&bag, "occluded"), Some(true));
        assert_eq!(flag_from_bag(&bag, "outside"), None);
    }

    #[test]
    fn test_bag_from_attributes_adds_flags() {
        let make = AttributeValue::Text("vw".to_string());
        let attributes = vec![Attribute::new("make", make)];
        let bag = bag_from_attributes(&attributes, &[("occluded", Some(false)), ("outside", None)]);
        assert_eq!(bag.get("make"), Some(&json!("vw")));
        assert_eq!(bag.get("occluded"), Some(&json!(false)));
        assert!(!bag.contains_key("outside"));
    }
}
