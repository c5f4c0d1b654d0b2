//! Argument templates and the proxy calling convention
//!
//! A command's `cmd` entry is a format string naming the fields a call must
//! supply, e.g. `"&2 Q71={tx} Q72={ty}"`. The proxy binds positional and
//! keyword arguments against the template before anything touches the wire;
//! the dispatcher re-validates the decoded fields and renders the device
//! command string for the bound handler.

use serde_json::{Map, Value};

use crate::error::{CallError, HandlerFailure};

/// Parsed form of a command's argument template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    raw: String,
    fields: Vec<String>,
}

impl ArgTemplate {
    /// Parse a template string.
    ///
    /// Placeholders are `{name}` with identifier names; `{{` and `}}`
    /// escape literal braces. Empty names, non-identifier names, repeated
    /// fields and unbalanced braces are rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut fields: Vec<String> = Vec::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        continue;
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err("unterminated placeholder".to_string()),
                        }
                    }
                    if !is_identifier(&name) {
                        return Err(format!("invalid placeholder name '{name}'"));
                    }
                    if fields.iter().any(|f| f == &name) {
                        return Err(format!("field '{name}' appears more than once"));
                    }
                    fields.push(name);
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                    } else {
                        return Err("unmatched '}'".to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            fields,
        })
    }

    /// The ordered field names this template requires.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The original template text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Substitute bound values into the template.
    ///
    /// All fields are known to be present once decoding succeeded, so
    /// rendering is total. Strings render bare, other scalars via their
    /// JSON form, composites as compact JSON.
    pub fn render(&self, values: &Map<String, Value>) -> String {
        let mut out = String::with_capacity(self.raw.len());
        let mut chars = self.raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        out.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        name.push(c);
                    }
                    match values.get(&name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => {}
                    }
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                    }
                    out.push('}');
                }
                _ => out.push(c),
            }
        }

        out
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Positional and keyword arguments collected for one proxy call
#[derive(Debug, Clone, Default)]
pub struct ArgSet {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl ArgSet {
    /// An empty argument set, for commands without a template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    /// Bind this argument set against a command's template.
    ///
    /// Positional arguments fill template fields in order, keywords fill by
    /// name; every field must end up bound exactly once. Commands without a
    /// template accept only an empty set.
    pub(crate) fn bind(
        &self,
        template: Option<&ArgTemplate>,
        command: &str,
    ) -> Result<Value, CallError> {
        let invalid = |detail: String| CallError::InvalidArguments {
            command: command.to_string(),
            detail,
        };

        let Some(template) = template else {
            if self.positional.is_empty() && self.keyword.is_empty() {
                return Ok(Value::Null);
            }
            return Err(invalid("command takes no arguments".to_string()));
        };

        let fields = template.fields();
        if self.positional.len() > fields.len() {
            return Err(invalid(format!(
                "takes at most {} positional arguments, got {}",
                fields.len(),
                self.positional.len()
            )));
        }

        let mut bound: Map<String, Value> = Map::new();
        for (field, value) in fields.iter().zip(self.positional.iter()) {
            bound.insert(field.clone(), value.clone());
        }

        for (name, value) in &self.keyword {
            if !fields.iter().any(|f| f == name) {
                return Err(invalid(format!("unknown argument '{name}'")));
            }
            if bound.contains_key(name) {
                return Err(invalid(format!("argument '{name}' given more than once")));
            }
            bound.insert(name.clone(), value.clone());
        }

        if let Some(missing) = fields.iter().find(|f| !bound.contains_key(*f)) {
            return Err(invalid(format!("missing argument '{missing}'")));
        }

        Ok(Value::Object(bound))
    }
}

/// Decoded arguments handed to a bound handler method
#[derive(Debug, Clone)]
pub struct ArgValues {
    values: Map<String, Value>,
    rendered: Option<String>,
}

impl ArgValues {
    /// Validate a call's argument payload against the command's template.
    ///
    /// Returns a human-readable detail string on mismatch; the dispatcher
    /// turns that into an `invalid_arguments` error reply.
    pub(crate) fn decode(
        args: &Value,
        template: Option<&ArgTemplate>,
    ) -> Result<Self, String> {
        let Some(template) = template else {
            let empty = match args {
                Value::Null => true,
                Value::Object(map) => map.is_empty(),
                _ => false,
            };
            if !empty {
                return Err("command takes no arguments".to_string());
            }
            return Ok(Self {
                values: Map::new(),
                rendered: None,
            });
        };

        let Value::Object(map) = args else {
            return Err("arguments must be an object of named fields".to_string());
        };

        for field in template.fields() {
            if !map.contains_key(field) {
                return Err(format!("missing argument '{field}'"));
            }
        }
        for name in map.keys() {
            if !template.fields().iter().any(|f| f == name) {
                return Err(format!("unknown argument '{name}'"));
            }
        }

        let rendered = template.render(map);
        Ok(Self {
            values: map.clone(),
            rendered: Some(rendered),
        })
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether the call carried no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The device command string rendered from the template, when the
    /// command has one.
    pub fn rendered(&self) -> Option<&str> {
        self.rendered.as_deref()
    }

    /// A required string field.
    pub fn str(&self, name: &str) -> Result<&str, HandlerFailure> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerFailure::new(format!("argument '{name}' must be a string")))
    }

    /// A required unsigned integer field.
    pub fn u64(&self, name: &str) -> Result<u64, HandlerFailure> {
        self.get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                HandlerFailure::new(format!("argument '{name}' must be a non-negative integer"))
            })
    }

    /// A required float field.
    pub fn f64(&self, name: &str) -> Result<f64, HandlerFailure> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerFailure::new(format!("argument '{name}' must be a number")))
    }

    /// A required object field.
    pub fn object(&self, name: &str) -> Result<&Map<String, Value>, HandlerFailure> {
        self.get(name)
            .and_then(Value::as_object)
            .ok_or_else(|| HandlerFailure::new(format!("argument '{name}' must be an object")))
    }
}
