//! Command schema loading
//!
//! A schema is the single source of truth for one service's command set.
//! The source format is a human-editable JSON document keyed by command
//! name; each entry carries a description, an optional argument template,
//! and optional handler/response method overrides. Loaded once, validated
//! completely, immutable thereafter, and shared read-only by every
//! proxy/dispatcher pair built from it.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::template::ArgTemplate;
use crate::error::{SchemaError, SchemaResult};

/// Raw command entry as written in a schema document
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    /// Human description of the command
    pub description: String,
    /// Argument template; commands without one take no arguments
    #[serde(default)]
    pub cmd: Option<String>,
    /// Handler method override; defaults to the command name
    #[serde(default)]
    pub device_method: Option<String>,
    /// Response method override; defaults to `<name>_response`
    #[serde(default)]
    pub response: Option<String>,
    /// Documentation of the return value; not interpreted
    #[serde(default)]
    pub returns: Option<String>,
    /// Declared argument names; when present, the template may only
    /// reference these
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// One validated command entry
#[derive(Debug, Clone)]
pub struct CommandEntry {
    /// Command name, unique within the schema
    pub name: String,
    /// Human description
    pub description: String,
    /// Parsed argument template, if the command takes arguments
    pub template: Option<ArgTemplate>,
    /// Handler method this command binds to
    pub device_method: String,
    /// Response-formatting method name
    pub response: String,
    /// Return-value documentation
    pub returns: Option<String>,
}

/// An immutable, validated command set
#[derive(Debug, Clone)]
pub struct CommandSchema {
    entries: Vec<CommandEntry>,
    index: HashMap<String, usize>,
}

impl CommandSchema {
    /// Parse and validate a schema document.
    pub fn load(source: &str) -> SchemaResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(source);
        let raw = RawSchema::deserialize(&mut deserializer)?;
        deserializer.end()?;
        Self::from_specs(raw.0)
    }

    /// Load a schema document from a file.
    pub fn load_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let mut source = String::new();
        File::open(path)?.read_to_string(&mut source)?;
        Self::load(&source)
    }

    fn from_specs(specs: Vec<(String, CommandSpec)>) -> SchemaResult<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for (name, spec) in specs {
            if name.is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if index.contains_key(&name) {
                return Err(SchemaError::DuplicateCommand(name));
            }

            let template = match &spec.cmd {
                Some(raw) => {
                    let template =
                        ArgTemplate::parse(raw).map_err(|detail| SchemaError::BadTemplate {
                            command: name.clone(),
                            detail,
                        })?;
                    if let Some(declared) = &spec.args {
                        for field in template.fields() {
                            if !declared.iter().any(|a| a == field) {
                                return Err(SchemaError::UndeclaredField {
                                    command: name.clone(),
                                    field: field.clone(),
                                });
                            }
                        }
                    }
                    Some(template)
                }
                None => None,
            };

            let entry = CommandEntry {
                device_method: spec.device_method.unwrap_or_else(|| name.clone()),
                response: spec.response.unwrap_or_else(|| format!("{name}_response")),
                description: spec.description,
                returns: spec.returns,
                template,
                name: name.clone(),
            };

            index.insert(name, entries.len());
            entries.push(entry);
        }

        Ok(Self { entries, index })
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Iterate over entries in document order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }

    /// The command names in document order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of commands in the schema.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema has no commands.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// serde_json silently keeps the last of duplicated object keys, so the
// document is deserialized through a map visitor that preserves every
// entry and its order; duplicates are rejected in `from_specs`.
struct RawSchema(Vec<(String, CommandSpec)>);

impl<'de> Deserialize<'de> for RawSchema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RawSchemaVisitor;

        impl<'de> Visitor<'de> for RawSchemaVisitor {
            type Value = RawSchema;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of command name to command spec")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut specs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, spec)) = map.next_entry::<String, CommandSpec>()? {
                    specs.push((name, spec));
                }
                Ok(RawSchema(specs))
            }
        }

        deserializer.deserialize_map(RawSchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = r#"
    {
        "ping": { "description": "Liveness check" },
        "echo": { "description": "Echo a message", "cmd": "{msg}" },
        "move_abs": {
            "description": "Absolute move",
            "cmd": "&2 Q71={tx} Q72={ty}",
            "device_method": "move_absolute",
            "returns": "completion code"
        }
    }
    "#;

    #[test]
    fn loads_entries_in_document_order() {
        let schema = CommandSchema::load(DEMO).unwrap();
        assert_eq!(schema.names(), ["ping", "echo", "move_abs"]);
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn defaults_follow_the_convention() {
        let schema = CommandSchema::load(DEMO).unwrap();
        let ping = schema.get("ping").unwrap();
        assert_eq!(ping.device_method, "ping");
        assert_eq!(ping.response, "ping_response");
        assert!(ping.template.is_none());

        let move_abs = schema.get("move_abs").unwrap();
        assert_eq!(move_abs.device_method, "move_absolute");
        assert_eq!(
            move_abs.template.as_ref().unwrap().fields(),
            ["tx", "ty"]
        );
    }

    #[test]
    fn rejects_duplicate_command_names() {
        let source = r#"{
            "ping": { "description": "one" },
            "ping": { "description": "two" }
        }"#;
        assert!(matches!(
            CommandSchema::load(source),
            Err(SchemaError::DuplicateCommand(name)) if name == "ping"
        ));
    }

    #[test]
    fn rejects_bad_templates() {
        let source = r#"{ "echo": { "description": "broken", "cmd": "{msg" } }"#;
        assert!(matches!(
            CommandSchema::load(source),
            Err(SchemaError::BadTemplate { command, .. }) if command == "echo"
        ));
    }

    #[test]
    fn rejects_template_fields_outside_declared_args() {
        let source = r#"{
            "set": {
                "description": "setter",
                "cmd": "{channel} {value}",
                "args": ["channel"]
            }
        }"#;
        assert!(matches!(
            CommandSchema::load(source),
            Err(SchemaError::UndeclaredField { field, .. }) if field == "value"
        ));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            CommandSchema::load("[1, 2, 3]"),
            Err(SchemaError::Syntax(_))
        ));
        assert!(matches!(
            CommandSchema::load("{ not json"),
            Err(SchemaError::Syntax(_))
        ));
    }
}
