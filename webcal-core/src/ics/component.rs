//! Owned iCalendar component tree and its canonical text form.

use std::fmt;

/// Maximum line length in octets before folding (RFC 5545 §3.1).
const FOLD_LIMIT: usize = 75;

/// A property parameter such as `TZID=Europe/Berlin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

impl Parameter {
    pub fn new(name: &str, value: &str) -> Self {
        Parameter {
            name: name.to_ascii_uppercase(),
            value: value.to_string(),
        }
    }
}

/// A single content line: `NAME;PARAM=VALUE:value`.
///
/// The value is kept in its serialized (escaped) form, so writing a parsed
/// property back out reproduces the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<Parameter>,
    pub value: String,
}

impl Property {
    pub fn new(name: &str, value: &str) -> Self {
        Property {
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            value: value.to_string(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.push(Parameter::new(name, value));
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    fn write_line(&self, out: &mut String) {
        let mut line = String::with_capacity(self.name.len() + self.value.len() + 1);
        line.push_str(&self.name);
        for param in &self.params {
            line.push(';');
            line.push_str(&param.name);
            line.push('=');
            line.push_str(&quote_param_value(&param.value));
        }
        line.push(':');
        line.push_str(&self.value);
        fold_into(&line, out);
    }
}

/// A component (`VCALENDAR`, `VEVENT`, `VALARM`, ...) with nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    pub fn new(name: &str) -> Self {
        Component {
            name: name.to_ascii_uppercase(),
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn find_prop(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn props<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of the UID property, if present and non-empty.
    pub fn uid(&self) -> Option<&str> {
        self.find_prop("UID")
            .map(|p| p.value.trim())
            .filter(|uid| !uid.is_empty())
    }

    pub fn push_prop(&mut self, property: Property) {
        self.properties.push(property);
    }

    /// Remove every property with the given name, here and in all children.
    pub fn remove_props_recursive(&mut self, name: &str) {
        self.properties.retain(|p| !p.name.eq_ignore_ascii_case(name));
        for child in &mut self.components {
            child.remove_props_recursive(name);
        }
    }

    /// Remove every direct child component with the given name.
    pub fn remove_components(&mut self, name: &str) {
        self.components.retain(|c| !c.is(name));
    }

    fn write(&self, out: &mut String) {
        out.push_str("BEGIN:");
        out.push_str(&self.name);
        out.push_str("\r\n");
        for prop in &self.properties {
            prop.write_line(out);
        }
        for child in &self.components {
            child.write(out);
        }
        out.push_str("END:");
        out.push_str(&self.name);
        out.push_str("\r\n");
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write(&mut out);
        f.write_str(&out)
    }
}

/// Parameter values containing `:`, `;` or `,` must be quoted.
fn quote_param_value(value: &str) -> String {
    if value.starts_with('"') || !value.contains([':', ';', ',']) {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', ""))
    }
}

/// Append `line` to `out`, folding at 75 octets without splitting UTF-8 sequences.
fn fold_into(line: &str, out: &mut String) {
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > FOLD_LIMIT {
            out.push_str("\r\n ");
            // the leading space of a continuation line counts towards its length
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
}
