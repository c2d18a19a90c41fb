use std::collections::BTreeMap;

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use tl_core::{RunError, TlValue};

/// Source name attached to a compiled expression block so evaluation errors
/// carry the provenance frame of the function (or step) that owns the block.
pub(crate) fn code_block_symbol(func_name: &str) -> String {
    let mut out = String::with_capacity(func_name.len());
    for ch in func_name.chars() {
        if ch.is_whitespace() {
            out.push('_');
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
            out.push(ch);
        }
    }
    format!("CodeBlock_for_{}", out)
}

/// Default persistent variable name for an imported package: each `-x` pair
/// becomes the uppercase letter, remaining hyphens are dropped.
pub(crate) fn package_var_name(package_name: &str) -> String {
    let mut out = String::with_capacity(package_name.len());
    let mut upper_next = false;
    for ch in package_name.chars() {
        if ch == '-' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn value_to_dynamic(value: &TlValue) -> Dynamic {
    match value {
        TlValue::Bool(value) => Dynamic::from_bool(*value),
        TlValue::Number(value) => Dynamic::from_float(*value as FLOAT),
        TlValue::String(value) => Dynamic::from(value.clone()),
        TlValue::Array(values) => {
            let mut array = Array::new();
            for value in values {
                array.push(value_to_dynamic(value));
            }
            Dynamic::from_array(array)
        }
        TlValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.clone().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Unit maps to `None`: a block whose final statement produces no value has
/// no return value to bind.
pub(crate) fn dynamic_to_value(value: Dynamic) -> Result<Option<TlValue>, RunError> {
    if value.is_unit() {
        return Ok(None);
    }
    if value.is::<bool>() {
        return Ok(Some(TlValue::Bool(value.cast::<bool>())));
    }
    if value.is::<INT>() {
        return Ok(Some(TlValue::Number(value.cast::<INT>() as f64)));
    }
    if value.is::<FLOAT>() {
        return Ok(Some(TlValue::Number(value.cast::<FLOAT>())));
    }
    if value.is::<ImmutableString>() {
        return Ok(Some(TlValue::String(
            value.cast::<ImmutableString>().to_string(),
        )));
    }
    if value.is::<char>() {
        return Ok(Some(TlValue::String(value.cast::<char>().to_string())));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            match dynamic_to_value(item)? {
                Some(value) => out.push(value),
                None => out.push(TlValue::String(String::new())),
            }
        }
        return Ok(Some(TlValue::Array(out)));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            if let Some(value) = dynamic_to_value(value)? {
                out.insert(key.to_string(), value);
            }
        }
        return Ok(Some(TlValue::Map(out)));
    }

    Err(RunError::new(
        "VALUE_UNSUPPORTED",
        format!("Unsupported expression value type \"{}\".", value.type_name()),
    ))
}

#[cfg(test)]
mod rhai_bridge_tests {
    use super::*;

    #[test]
    fn code_block_symbol_keeps_identifier_chars_only() {
        assert_eq!(code_block_symbol("Greet {{name}}"), "CodeBlock_for_Greet_name");
        assert_eq!(code_block_symbol(""), "CodeBlock_for_");
        assert_eq!(
            code_block_symbol("Click  'Big Red Button'"),
            "CodeBlock_for_Click__Big_Red_Button"
        );
    }

    #[test]
    fn package_var_name_camel_cases_dashes() {
        assert_eq!(package_var_name("selenium-webdriver"), "seleniumWebdriver");
        assert_eq!(package_var_name("a-b-c"), "aBC");
        assert_eq!(package_var_name("plain"), "plain");
        assert_eq!(package_var_name("trailing-"), "trailing");
    }

    #[test]
    fn value_round_trips_through_dynamic() {
        let value = TlValue::Map(BTreeMap::from([
            ("a".to_string(), TlValue::Number(1.0)),
            (
                "b".to_string(),
                TlValue::Array(vec![TlValue::Bool(false), TlValue::from("x")]),
            ),
        ]));
        let roundtrip = dynamic_to_value(value_to_dynamic(&value))
            .expect("conversion should pass")
            .expect("value should be present");
        assert_eq!(roundtrip, value);
    }

    #[test]
    fn unit_maps_to_none_and_ints_to_numbers() {
        assert_eq!(dynamic_to_value(Dynamic::UNIT).expect("unit"), None);
        assert_eq!(
            dynamic_to_value(Dynamic::from(3 as INT)).expect("int"),
            Some(TlValue::Number(3.0))
        );
        assert_eq!(
            dynamic_to_value(Dynamic::from('c')).expect("char"),
            Some(TlValue::from("c"))
        );
    }
}
