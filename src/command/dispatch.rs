//! Server-side command dispatch
//!
//! A [`HandlerTable`] is the fixed, named set of methods a service exposes,
//! registered once at startup. [`Dispatcher::bind`] resolves every schema
//! entry against the table up front, so a missing method is a startup
//! failure and never a call-time surprise. Per-call failures become error
//! replies; nothing a handler does can take down the receive loop.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::schema::CommandSchema;
use super::template::ArgValues;
use crate::channel::{
    CallEnvelope, ConnectionId, EnvelopeHandler, ErrorReply, ReplyEnvelope, KIND_HANDLER_FAILURE,
    KIND_INTERNAL_ERROR,
};
use crate::error::{BindingError, HandlerFailure};

/// A bound handler method
pub type HandlerFn = Box<dyn Fn(ArgValues) -> Result<Value, HandlerFailure> + Send + Sync>;

/// Lookup table from method name to handler closure
#[derive(Default)]
pub struct HandlerTable {
    methods: HashMap<String, HandlerFn>,
}

impl HandlerTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, builder style. A repeated name replaces the
    /// earlier registration.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ArgValues) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    /// Register a method in place.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(ArgValues) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(handler));
    }

    /// Whether a method with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&HandlerFn> {
        self.methods.get(name)
    }
}

/// A schema bound to a handler table
pub struct Dispatcher {
    schema: Arc<CommandSchema>,
    table: HandlerTable,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("schema", &self.schema)
            .field("methods", &self.table.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    /// Bind `schema` to `table`, resolving every command's handler method.
    ///
    /// Fails fast with [`BindingError`] if any method is missing; this is
    /// a startup error, raised before any call is served.
    pub fn bind(schema: Arc<CommandSchema>, table: HandlerTable) -> Result<Self, BindingError> {
        for entry in schema.commands() {
            if !table.contains(&entry.device_method) {
                return Err(BindingError::MissingMethod {
                    command: entry.name.clone(),
                    method: entry.device_method.clone(),
                });
            }
        }
        Ok(Self { schema, table })
    }

    /// The schema this dispatcher was bound from.
    pub fn schema(&self) -> &CommandSchema {
        &self.schema
    }

    /// Process one call and produce its reply.
    pub fn dispatch(&self, call: &CallEnvelope) -> ReplyEnvelope {
        let Some(entry) = self.schema.get(&call.command) else {
            return ReplyEnvelope::failure(call.token, ErrorReply::unknown_command(&call.command));
        };

        let values = match ArgValues::decode(&call.args, entry.template.as_ref()) {
            Ok(values) => values,
            Err(detail) => {
                return ReplyEnvelope::failure(call.token, ErrorReply::invalid_arguments(detail));
            }
        };

        // Bind-time validation guarantees the method exists; the fallback
        // reply keeps the loop alive even if that guarantee is broken.
        let Some(handler) = self.table.get(&entry.device_method) else {
            return ReplyEnvelope::failure(
                call.token,
                ErrorReply::new(
                    KIND_INTERNAL_ERROR,
                    format!("method '{}' vanished from the handler table", entry.device_method),
                ),
            );
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(values)));
        match outcome {
            Ok(Ok(result)) => ReplyEnvelope::success(call.token, result),
            Ok(Err(failure)) => {
                tracing::debug!(command = %call.command, error = %failure, "handler failed");
                let kind = failure
                    .kind
                    .unwrap_or_else(|| KIND_HANDLER_FAILURE.to_string());
                ReplyEnvelope::failure(call.token, ErrorReply::new(kind, failure.message))
            }
            Err(_) => {
                tracing::error!(command = %call.command, "handler panicked");
                ReplyEnvelope::failure(
                    call.token,
                    ErrorReply::new(KIND_HANDLER_FAILURE, "handler panicked"),
                )
            }
        }
    }
}

impl EnvelopeHandler for Dispatcher {
    fn handle(&self, _connection: ConnectionId, call: CallEnvelope) -> ReplyEnvelope {
        self.dispatch(&call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_schema() -> Arc<CommandSchema> {
        Arc::new(
            CommandSchema::load(
                r#"{
                    "ping": { "description": "liveness" },
                    "echo": { "description": "echo", "cmd": "{msg}" }
                }"#,
            )
            .unwrap(),
        )
    }

    fn demo_table() -> HandlerTable {
        HandlerTable::new()
            .method("ping", |_args| Ok(json!("pong")))
            .method("echo", |args| Ok(json!({ "msg": args.str("msg")? })))
    }

    #[test]
    fn missing_method_fails_at_bind_time() {
        let table = HandlerTable::new().method("ping", |_args| Ok(Value::Null));
        let err = Dispatcher::bind(demo_schema(), table).unwrap_err();
        assert!(matches!(
            err,
            BindingError::MissingMethod { command, method }
                if command == "echo" && method == "echo"
        ));
    }

    #[test]
    fn unknown_command_yields_typed_error_reply() {
        let dispatcher = Dispatcher::bind(demo_schema(), demo_table()).unwrap();
        let call = CallEnvelope::new("warp", Value::Null);
        let reply = dispatcher.dispatch(&call);
        assert_eq!(reply.token, call.token);
        assert_eq!(
            reply.error.unwrap().kind,
            crate::channel::KIND_UNKNOWN_COMMAND
        );
    }

    #[test]
    fn invalid_arguments_are_rejected_before_the_handler() {
        let dispatcher = Dispatcher::bind(demo_schema(), demo_table()).unwrap();
        let call = CallEnvelope::new("echo", json!({"wrong": 1}));
        let reply = dispatcher.dispatch(&call);
        assert_eq!(
            reply.error.unwrap().kind,
            crate::channel::KIND_INVALID_ARGUMENTS
        );
    }

    #[test]
    fn handler_failure_becomes_an_error_reply() {
        let schema = demo_schema();
        let table = HandlerTable::new()
            .method("ping", |_args| {
                Err(HandlerFailure::new("device not connected"))
            })
            .method("echo", |_args| Ok(Value::Null));
        let dispatcher = Dispatcher::bind(schema, table).unwrap();
        let reply = dispatcher.dispatch(&CallEnvelope::new("ping", Value::Null));
        let error = reply.error.unwrap();
        assert_eq!(error.kind, KIND_HANDLER_FAILURE);
        assert_eq!(error.message, "device not connected");
    }

    #[test]
    fn handler_panic_is_contained() {
        let schema = demo_schema();
        let table = HandlerTable::new()
            .method("ping", |_args| panic!("boom"))
            .method("echo", |_args| Ok(Value::Null));
        let dispatcher = Dispatcher::bind(schema, table).unwrap();
        let reply = dispatcher.dispatch(&CallEnvelope::new("ping", Value::Null));
        assert_eq!(reply.error.unwrap().kind, KIND_HANDLER_FAILURE);

        // The dispatcher keeps serving after a panic.
        let reply = dispatcher.dispatch(&CallEnvelope::new("echo", json!({"msg": "x"})));
        assert!(!reply.is_error());
    }
}
