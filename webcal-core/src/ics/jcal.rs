//! jCal (`application/calendar+json`, RFC 7265) reader.

use serde_json::Value;

use crate::error::{WebcalError, WebcalResult};
use crate::ics::value::{ValueKind, format_recur, format_scalar};
use crate::ics::{Component, Parameter, Property};

/// Parse a jCal document into a `VCALENDAR` component tree.
pub fn parse_jcal(content: &str) -> WebcalResult<Component> {
    let document: Value =
        serde_json::from_str(content).map_err(|e| WebcalError::JcalParse(e.to_string()))?;

    let root = component_from_json(&document)?;
    if !root.is("VCALENDAR") {
        return Err(WebcalError::JcalParse(format!(
            "Expected a vcalendar root, found '{}'",
            root.name.to_ascii_lowercase()
        )));
    }

    Ok(root)
}

fn component_from_json(value: &Value) -> WebcalResult<Component> {
    let [name, properties, components] = value.as_array().map(Vec::as_slice).unwrap_or_default()
    else {
        return Err(WebcalError::JcalParse(
            "Component must be a [name, properties, components] array".into(),
        ));
    };

    let name = name
        .as_str()
        .ok_or_else(|| WebcalError::JcalParse("Component name must be a string".into()))?;

    let mut component = Component::new(name);
    component.properties = as_array(properties, "properties")?
        .iter()
        .map(property_from_json)
        .collect::<WebcalResult<_>>()?;
    component.components = as_array(components, "components")?
        .iter()
        .map(component_from_json)
        .collect::<WebcalResult<_>>()?;

    Ok(component)
}

fn property_from_json(value: &Value) -> WebcalResult<Property> {
    let parts = value.as_array().map(Vec::as_slice).unwrap_or_default();
    let [name, params, kind, values @ ..] = parts else {
        return Err(WebcalError::JcalParse(
            "Property must be a [name, params, type, value...] array".into(),
        ));
    };

    let name = name
        .as_str()
        .ok_or_else(|| WebcalError::JcalParse("Property name must be a string".into()))?;
    let kind = ValueKind::from_name(
        kind.as_str()
            .ok_or_else(|| WebcalError::JcalParse(format!("Type of '{name}' must be a string")))?,
    );

    let mut property = Property::new(name, "");

    if let Some(params) = params.as_object() {
        for (key, value) in params {
            property.params.push(Parameter::new(key, &param_value(value)));
        }
    }
    if let Some(value_param) = kind.value_param()
        && property.param("VALUE").is_none()
    {
        property.params.push(Parameter::new("VALUE", value_param));
    }

    property.value = values
        .iter()
        .map(|v| value_to_text(kind, v))
        .collect::<Vec<_>>()
        .join(",");

    Ok(property)
}

fn value_to_text(kind: ValueKind, value: &Value) -> String {
    match value {
        Value::String(s) => format_scalar(kind, s),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Number(n) => n.to_string(),
        // Structured values (REQUEST-STATUS, GEO) are `;`-separated
        Value::Array(items) => items
            .iter()
            .map(|item| value_to_text(kind, item))
            .collect::<Vec<_>>()
            .join(";"),
        Value::Object(map) if kind == ValueKind::Recur => {
            let parts: Vec<(String, Vec<String>)> = map
                .iter()
                .map(|(key, value)| (key.clone(), recur_values(value)))
                .collect();
            format_recur(&parts)
        }
        Value::Object(_) | Value::Null => String::new(),
    }
}

fn recur_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().flat_map(recur_values).collect(),
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(param_value)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn as_array<'a>(value: &'a Value, what: &str) -> WebcalResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| WebcalError::JcalParse(format!("Component {what} must be an array")))
}
