//! # Schema Compiler
//!
//! Compiles Protobuf message descriptors into JSON-schema documents describing the JSON
//! accepted (and produced) by the [`crate::DynamicInvoker`].
//!
//! ## Mapping
//!
//! * Messages become `{"type": "object", "properties": {..}, "required": [..]}`. Every field
//!   without presence tracking is required.
//! * Oneof groups become a single property named after the group holding
//!   `{"oneOf": [..]}`, one alternative per member requiring exactly that member.
//! * Repeated fields wrap their element as `{"type": "array", "items": ..}` and maps become
//!   `{"type": "object", "additionalProperties": <value>}`.
//! * Well-known types get hand written schemas (timestamps and durations are strings, wrappers
//!   are their unwrapped scalar, and so on).
//!
//! ## Recursion
//!
//! A message that is already being compiled further up the current path compiles to
//! `{"$ref": "#/definitions/<full name>"}`. The path is an immutable chain of ancestors
//! threaded through the recursion, so sibling branches never see each other's entries.
//!
//! Completed object schemas are memoized by full name, except those containing a `$ref`: a
//! placeholder only makes sense under the ancestors it was produced for. An entry is only
//! served for the descriptor it was compiled from. A type of the same name coming from
//! another pool, as after a rediscovery, is compiled again and replaces the entry.
use crate::descriptors::comments::Documented;
use crate::registry::TypeRegistry;
use parking_lot::RwLock;
use prost_reflect::{EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

pub const DEFINITIONS_PREFIX: &str = "#/definitions/";

const ANY_DESCRIPTION: &str = "Any contains an arbitrary serialized protocol buffer message";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Message type '{0}' is not registered")]
    UnknownType(String),
    #[error("Field '{field}' uses an unsupported kind: {kind}")]
    UnsupportedKind { field: String, kind: String },
}

/// Stateless apart from its memo, so one instance can be shared across the whole catalog.
#[derive(Debug)]
pub struct SchemaCompiler {
    cache: RwLock<HashMap<String, (MessageDescriptor, Value)>>,
    include_comments: bool,
}

impl Default for SchemaCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled subtree and whether it contains a cycle placeholder.
struct Compiled {
    schema: Value,
    has_ref: bool,
}

impl Compiled {
    fn plain(schema: Value) -> Self {
        Self {
            schema,
            has_ref: false,
        }
    }
}

/// The messages currently being compiled, innermost first.
#[derive(Clone, Copy)]
struct Ancestors<'a> {
    name: &'a str,
    parent: Option<&'a Ancestors<'a>>,
}

fn on_path(chain: Option<&Ancestors<'_>>, name: &str) -> bool {
    let mut current = chain;
    while let Some(node) = current {
        if node.name == name {
            return true;
        }
        current = node.parent;
    }
    false
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            include_comments: true,
        }
    }

    /// Whether comments become `description` entries. Enabled by default.
    pub fn with_comments(mut self, include_comments: bool) -> Self {
        self.include_comments = include_comments;
        self
    }

    /// Compiles `message` into a JSON schema.
    pub fn compile(&self, message: &MessageDescriptor) -> Value {
        self.message_schema(message, None).schema
    }

    /// Looks `name` up in `registry` and compiles it.
    pub fn compile_by_name(
        &self,
        registry: &TypeRegistry,
        name: &str,
    ) -> Result<Value, SchemaError> {
        let message = registry
            .message(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?;

        Ok(self.compile(&message))
    }

    /// Compiles a single field on its own, as if its message were the only ancestor.
    pub fn compile_field(&self, field: &FieldDescriptor) -> Result<Value, SchemaError> {
        let parent = field.parent_message();
        let chain = Ancestors {
            name: parent.full_name(),
            parent: None,
        };

        self.field_schema(field, &chain).map(|c| c.schema)
    }

    /// Number of memoized message schemas.
    pub fn cached_types(&self) -> usize {
        self.cache.read().len()
    }

    /// Drops every memoized schema.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    fn message_schema(
        &self,
        message: &MessageDescriptor,
        ancestors: Option<&Ancestors<'_>>,
    ) -> Compiled {
        if let Some(schema) = well_known_schema(message) {
            return Compiled::plain(schema);
        }

        let name = message.full_name();

        if on_path(ancestors, name) {
            tracing::debug!(message_type = name, "Found circular reference, using $ref");
            return Compiled {
                schema: json!({ "$ref": format!("{DEFINITIONS_PREFIX}{name}") }),
                has_ref: true,
            };
        }

        let cached = self
            .cache
            .read()
            .get(name)
            .filter(|(compiled_from, _)| compiled_from == message)
            .map(|(_, schema)| schema.clone());
        if let Some(schema) = cached {
            return Compiled::plain(schema);
        }

        let chain = Ancestors {
            name,
            parent: ancestors,
        };

        let mut has_ref = false;
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in message.fields() {
            if field
                .containing_oneof()
                .is_some_and(|oneof| !oneof.is_synthetic())
            {
                continue;
            }

            match self.field_schema(&field, &chain) {
                Ok(compiled) => {
                    has_ref |= compiled.has_ref;
                    properties.insert(field.name().to_string(), compiled.schema);

                    if !field.supports_presence() {
                        required.push(Value::from(field.name()));
                    }
                }
                Err(err) => {
                    tracing::warn!(message_type = name, field = field.name(), error = %err, "Skipping field");
                }
            }
        }

        for oneof in message.oneofs().filter(|oneof| !oneof.is_synthetic()) {
            let mut alternatives = Vec::new();

            for field in oneof.fields() {
                match self.field_schema(&field, &chain) {
                    Ok(compiled) => {
                        has_ref |= compiled.has_ref;
                        alternatives.push(json!({
                            "type": "object",
                            "properties": { field.name(): compiled.schema },
                            "required": [field.name()],
                        }));
                    }
                    Err(err) => {
                        tracing::warn!(message_type = name, field = field.name(), error = %err, "Skipping oneof member");
                    }
                }
            }

            let mut group = Map::new();
            group.insert("oneOf".into(), Value::Array(alternatives));
            self.describe(&mut group, oneof.comments());

            properties.insert(oneof.name().to_string(), Value::Object(group));
        }

        let mut schema = Map::new();
        schema.insert("type".into(), "object".into());
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        self.describe(&mut schema, message.comments());

        let schema = Value::Object(schema);

        if !has_ref {
            self.cache
                .write()
                .insert(name.to_string(), (message.clone(), schema.clone()));
        }

        Compiled { schema, has_ref }
    }

    fn field_schema(
        &self,
        field: &FieldDescriptor,
        chain: &Ancestors<'_>,
    ) -> Result<Compiled, SchemaError> {
        if field.is_group() {
            return Err(SchemaError::UnsupportedKind {
                field: field.full_name().to_string(),
                kind: "group".into(),
            });
        }

        let mut compiled = if field.is_map() {
            let entry = field
                .kind()
                .as_message()
                .cloned()
                .ok_or_else(|| SchemaError::UnsupportedKind {
                    field: field.full_name().to_string(),
                    kind: "map without entry message".into(),
                })?;

            // JSON object keys are always strings, the key schema is not surfaced.
            let _key = self.kind_schema(&entry.map_entry_key_field(), chain)?;
            let value = self.kind_schema(&entry.map_entry_value_field(), chain)?;

            Compiled {
                schema: json!({ "type": "object", "additionalProperties": value.schema }),
                has_ref: value.has_ref,
            }
        } else if field.is_list() {
            let items = self.kind_schema(field, chain)?;

            Compiled {
                schema: json!({ "type": "array", "items": items.schema }),
                has_ref: items.has_ref,
            }
        } else {
            self.kind_schema(field, chain)?
        };

        if let Value::Object(schema) = &mut compiled.schema {
            self.describe(schema, field.comments());
        }

        Ok(compiled)
    }

    fn kind_schema(
        &self,
        field: &FieldDescriptor,
        chain: &Ancestors<'_>,
    ) -> Result<Compiled, SchemaError> {
        match field.kind() {
            Kind::Message(message) => Ok(self.message_schema(&message, Some(chain))),
            Kind::Enum(enumeration) => Ok(Compiled::plain(self.enum_schema(&enumeration))),
            kind => scalar_schema(&kind).map(Compiled::plain).ok_or_else(|| {
                SchemaError::UnsupportedKind {
                    field: field.full_name().to_string(),
                    kind: format!("{kind:?}"),
                }
            }),
        }
    }

    fn enum_schema(&self, enumeration: &EnumDescriptor) -> Value {
        let names: Vec<Value> = enumeration.values().map(|v| Value::from(v.name())).collect();

        let mut schema = Map::new();
        schema.insert("type".into(), "string".into());
        schema.insert("enum".into(), Value::Array(names));

        if self.include_comments {
            let descriptions: Map<String, Value> = enumeration
                .values()
                .filter_map(|v| {
                    let comment = v.comments();
                    (!comment.is_empty()).then(|| (v.name().to_string(), Value::from(comment)))
                })
                .collect();

            if !descriptions.is_empty() {
                schema.insert("enumDescriptions".into(), Value::Object(descriptions));
            }
        }

        self.describe(&mut schema, enumeration.comments());

        Value::Object(schema)
    }

    fn describe(&self, schema: &mut Map<String, Value>, comment: String) {
        if self.include_comments && !comment.is_empty() {
            schema.insert("description".into(), Value::String(comment));
        }
    }
}

/// Fixed table for the non-message, non-enum kinds.
fn scalar_schema(kind: &Kind) -> Option<Value> {
    let schema = match kind {
        Kind::Bool => json!({ "type": "boolean" }),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => json!({ "type": "integer", "format": "int32" }),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => json!({ "type": "integer", "format": "int64" }),
        Kind::Uint32 | Kind::Fixed32 => {
            json!({ "type": "integer", "format": "uint32", "minimum": 0 })
        }
        Kind::Uint64 | Kind::Fixed64 => {
            json!({ "type": "integer", "format": "uint64", "minimum": 0 })
        }
        Kind::Float => json!({ "type": "number", "format": "float" }),
        Kind::Double => json!({ "type": "number", "format": "double" }),
        Kind::String => json!({ "type": "string" }),
        Kind::Bytes => json!({ "type": "string", "format": "byte" }),
        Kind::Message(_) | Kind::Enum(_) => return None,
    };

    Some(schema)
}

/// Hand written schemas for the `google.protobuf` types with a special JSON mapping.
fn well_known_schema(message: &MessageDescriptor) -> Option<Value> {
    let schema = match message.full_name() {
        "google.protobuf.Any" => json!({ "type": "object", "description": ANY_DESCRIPTION }),
        "google.protobuf.Timestamp" => json!({ "type": "string", "format": "date-time" }),
        "google.protobuf.Duration" => json!({ "type": "string", "format": "duration" }),
        "google.protobuf.Struct" => json!({ "type": "object" }),
        "google.protobuf.Value" => json!({}),
        "google.protobuf.ListValue" => json!({ "type": "array" }),
        "google.protobuf.DoubleValue"
        | "google.protobuf.FloatValue"
        | "google.protobuf.Int64Value"
        | "google.protobuf.UInt64Value"
        | "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value"
        | "google.protobuf.BoolValue"
        | "google.protobuf.StringValue"
        | "google.protobuf.BytesValue" => {
            let value = message.get_field_by_name("value")?;
            return scalar_schema(&value.kind());
        }
        _ => return None,
    };

    Some(schema)
}
