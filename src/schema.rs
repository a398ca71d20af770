//! Runtime-loaded telemetry schema.
//!
//! The schema is a `.proto` text resource describing the telemetry message and
//! its enumerations. It is compiled once with `protox` into process-scoped
//! state; payloads are then decoded as `prost_reflect::DynamicMessage` and
//! flattened into a [`DynamicRecord`] keyed by the configured field naming.

use once_cell::sync::OnceCell;
use prost_reflect::{
    DescriptorPool, DynamicMessage, EnumDescriptor, Kind, MapKey, MessageDescriptor, Value,
};
use protox::Compiler;
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Schema shipped with the crate.
pub const BUNDLED_SCHEMA: &str = include_str!("../schema/dashcam.proto");

const BUNDLED_NAME: &str = "dashcam.proto";

static SCHEMA: OnceCell<Schema> = OnceCell::new();

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("schema has not been loaded")]
    NotLoaded,
    #[error("schema is already loaded")]
    AlreadyLoaded,
    #[error("compiling schema: {0}")]
    Compile(#[from] protox::Error),
    #[error("schema does not declare message '{0}'")]
    MissingMessage(String),
    #[error("reading schema: {0}")]
    Io(#[from] std::io::Error),
}

/// Naming convention given to decoded field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldNaming {
    /// Names as declared, e.g. `vehicle_speed_mps`.
    #[serde(rename = "snake_case")]
    SnakeCase,
    /// JSON names, e.g. `vehicleSpeedMps`.
    #[default]
    #[serde(rename = "camelCase")]
    CamelCase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Message type payloads decode as, short or fully qualified.
    pub message: String,
    pub naming: FieldNaming,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            message: "SeiMetadata".to_string(),
            naming: FieldNaming::default(),
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DynamicValue {
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Enum { number: i32, name: Option<String> },
    String(String),
    Bytes(Vec<u8>),
    List(Vec<DynamicValue>),
    Message(DynamicRecord),
    Map(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynamicValue::Double(v) => Some(*v),
            DynamicValue::Int(v) => Some(*v as f64),
            DynamicValue::UInt(v) => Some(*v as f64),
            DynamicValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            DynamicValue::Enum { number, .. } => Some(*number as f64),
            DynamicValue::List(items) => items.last().and_then(|v| v.as_f64()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DynamicValue::Int(v) => Some(*v),
            DynamicValue::UInt(v) => i64::try_from(*v).ok(),
            DynamicValue::Enum { number, .. } => Some(*number as i64),
            DynamicValue::Bool(v) => Some(*v as i64),
            DynamicValue::Double(v) => Some(*v as i64),
            DynamicValue::List(items) => items.last().and_then(|v| v.as_i64()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DynamicValue::UInt(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(v) => Some(*v),
            DynamicValue::List(items) => items.last().and_then(|v| v.as_bool()),
            other => other.as_i64().map(|v| v != 0),
        }
    }
}

/// Field name -> value, for one decoded payload. Fields left at their proto3
/// default are missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DynamicRecord {
    fields: BTreeMap<String, DynamicValue>,
}

impl DynamicRecord {
    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.fields.get(name)
    }

    /// First present value among `names`.
    pub fn get_any(&self, names: &[&str]) -> Option<&DynamicValue> {
        names.iter().find_map(|n| self.fields.get(*n))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: DynamicValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Serves one in-memory `.proto` source under `name`.
struct SourceResolver {
    name: String,
    text: String,
}

impl FileResolver for SourceResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        (path == Path::new(&self.name)).then(|| self.name.clone())
    }

    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == self.name {
            File::from_source(name, &self.text)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    pool: DescriptorPool,
    message: MessageDescriptor,
    options: SchemaOptions,
}

impl Schema {
    pub fn parse(text: &str, options: SchemaOptions) -> Result<Self, SchemaError> {
        Self::compile(BUNDLED_NAME, text, options)
    }

    /// Compile `text` as the file `name`. Imports of the well-known types
    /// resolve; any other import fails.
    pub fn compile(name: &str, text: &str, options: SchemaOptions) -> Result<Self, SchemaError> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(SourceResolver {
            name: name.to_string(),
            text: text.to_string(),
        });
        resolver.add(GoogleFileResolver::new());

        let mut compiler = Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);
        compiler.open_file(name)?;
        let pool = compiler.descriptor_pool();

        let message = pool
            .get_message_by_name(&options.message)
            .or_else(|| pool.all_messages().find(|m| m.name() == options.message))
            .ok_or_else(|| SchemaError::MissingMessage(options.message.clone()))?;

        debug!(
            message = %message.full_name(),
            fields = message.fields().len(),
            enums = pool.all_enums().len(),
            "compiled schema"
        );
        Ok(Self {
            pool,
            message,
            options,
        })
    }

    pub fn bundled(options: SchemaOptions) -> Result<Self, SchemaError> {
        Self::parse(BUNDLED_SCHEMA, options)
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn message(&self) -> &MessageDescriptor {
        &self.message
    }

    /// Enum declared inside the root message, else anywhere in the schema,
    /// looked up by its short name.
    pub fn message_enum(&self, short_name: &str) -> Option<EnumDescriptor> {
        self.message
            .child_enums()
            .find(|e| e.name() == short_name)
            .or_else(|| self.pool.all_enums().find(|e| e.name() == short_name))
    }

    /// Decode one serialized message. Unknown fields are skipped.
    pub fn decode(&self, buf: &[u8]) -> Result<DynamicRecord, prost::DecodeError> {
        let msg = DynamicMessage::decode(self.message.clone(), buf)?;
        Ok(self.record(&msg))
    }

    fn record(&self, msg: &DynamicMessage) -> DynamicRecord {
        let mut record = DynamicRecord::default();
        for (field, value) in msg.fields() {
            let name = match self.options.naming {
                FieldNaming::SnakeCase => field.name(),
                FieldNaming::CamelCase => field.json_name(),
            };
            record.insert(name, self.convert(&field.kind(), value));
        }
        record
    }

    fn convert(&self, kind: &Kind, value: &Value) -> DynamicValue {
        match value {
            Value::Bool(v) => DynamicValue::Bool(*v),
            Value::I32(v) => DynamicValue::Int(*v as i64),
            Value::I64(v) => DynamicValue::Int(*v),
            Value::U32(v) => DynamicValue::UInt(*v as u64),
            Value::U64(v) => DynamicValue::UInt(*v),
            Value::F32(v) => DynamicValue::Double(*v as f64),
            Value::F64(v) => DynamicValue::Double(*v),
            Value::String(s) => DynamicValue::String(s.clone()),
            Value::Bytes(b) => DynamicValue::Bytes(b.to_vec()),
            Value::EnumNumber(number) => DynamicValue::Enum {
                number: *number,
                name: match kind {
                    Kind::Enum(e) => e.get_value(*number).map(|v| v.name().to_string()),
                    _ => None,
                },
            },
            Value::Message(m) => DynamicValue::Message(self.record(m)),
            Value::List(items) => {
                DynamicValue::List(items.iter().map(|v| self.convert(kind, v)).collect())
            }
            Value::Map(entries) => {
                // map fields report the synthetic entry message as their kind
                let value_kind = match kind {
                    Kind::Message(entry) => entry.map_entry_value_field().kind(),
                    other => other.clone(),
                };
                DynamicValue::Map(
                    entries
                        .iter()
                        .map(|(k, v)| (map_key(k), self.convert(&value_kind, v)))
                        .collect(),
                )
            }
        }
    }
}

fn map_key(key: &MapKey) -> String {
    match key {
        MapKey::Bool(v) => v.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(v) => v.clone(),
    }
}

/// Compile `text` and install it as the process schema. Fails if a schema is
/// already installed.
pub fn load_schema(text: &str, options: SchemaOptions) -> Result<&'static Schema, SchemaError> {
    install(Schema::parse(text, options)?)
}

pub fn load_schema_from_path(
    path: impl AsRef<Path>,
    options: SchemaOptions,
) -> Result<&'static Schema, SchemaError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| BUNDLED_NAME.to_string());
    install(Schema::compile(&name, &text, options)?)
}

fn install(schema: Schema) -> Result<&'static Schema, SchemaError> {
    SCHEMA.set(schema).map_err(|_| SchemaError::AlreadyLoaded)?;
    schema_ref()
}

/// Install the bundled schema unless one is already present.
pub fn ensure_schema_loaded() -> Result<&'static Schema, SchemaError> {
    SCHEMA.get_or_try_init(|| Schema::bundled(SchemaOptions::default()))
}

/// The installed schema.
pub fn schema() -> Result<&'static Schema, SchemaError> {
    schema_ref()
}

fn schema_ref() -> Result<&'static Schema, SchemaError> {
    SCHEMA.get().ok_or(SchemaError::NotLoaded)
}

pub fn is_schema_loaded() -> bool {
    SCHEMA.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::encoding::{WireType, encode_key, encode_varint};

    #[test]
    fn bundled_schema_declares_telemetry_fields() {
        let schema = Schema::bundled(SchemaOptions::default()).unwrap();
        let msg = schema.message();
        assert_eq!(msg.full_name(), "SeiMetadata");
        assert_eq!(msg.fields().len(), 16);
        let gear = msg.get_field(2).unwrap();
        assert!(matches!(gear.kind(), Kind::Enum(e) if e.full_name() == "SeiMetadata.Gear"));
        assert_eq!(gear.json_name(), "gearState");
        let ap = schema.message_enum("AutopilotState").unwrap();
        assert_eq!(ap.get_value(2).unwrap().name(), "AUTOSTEER");
    }

    #[test]
    fn json_names_capitalize_after_underscores() {
        let schema = Schema::bundled(SchemaOptions::default()).unwrap();
        let accel_x = schema.message().get_field(14).unwrap();
        assert_eq!(accel_x.json_name(), "linearAccelerationMps2X");
        assert_eq!(schema.message().get_field(3).unwrap().json_name(), "frameSeqNo");
    }

    #[test]
    fn malformed_text_fails_to_compile() {
        let err = Schema::parse(
            "syntax = \"proto3\";\nmessage SeiMetadata {\n  int32 x = ;\n}",
            SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Compile(_)), "{err}");
    }

    #[test]
    fn enum_values_outside_i32_are_rejected() {
        let text = "syntax = \"proto3\";\n\
                    enum Wide { ZERO = 0; HUGE = 2147483648; }\n\
                    message SeiMetadata { Wide w = 1; }";
        let err = Schema::parse(text, SchemaOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::Compile(_)), "{err}");
    }

    #[test]
    fn missing_root_message() {
        let err = Schema::parse(
            "syntax = \"proto3\"; message Other { bool x = 1; }",
            SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::MissingMessage(_)));
    }

    #[test]
    fn decodes_with_selected_naming_and_skips_unknown() {
        let opts = SchemaOptions {
            naming: FieldNaming::SnakeCase,
            ..SchemaOptions::default()
        };
        let schema = Schema::bundled(opts).unwrap();

        let mut buf = Vec::new();
        encode_key(4, WireType::ThirtyTwoBit, &mut buf);
        buf.extend_from_slice(&12.5f32.to_le_bytes());
        encode_key(99, WireType::Varint, &mut buf);
        encode_varint(7, &mut buf);
        encode_key(10, WireType::Varint, &mut buf);
        encode_varint(3, &mut buf);

        let rec = schema.decode(&buf).unwrap();
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.get("vehicle_speed_mps"), Some(&DynamicValue::Double(12.5)));
        assert_eq!(
            rec.get("autopilot_state"),
            Some(&DynamicValue::Enum {
                number: 3,
                name: Some("TACC".into())
            })
        );
    }

    #[test]
    fn nested_messages_and_maps_decode() {
        let text = "syntax = \"proto3\";\n\
                    message Inner { int32 a = 1; }\n\
                    message SeiMetadata { Inner inner = 1; map<string, int32> counts = 2; }";
        let schema = Schema::parse(text, SchemaOptions::default()).unwrap();

        let mut buf = Vec::new();
        encode_key(1, WireType::LengthDelimited, &mut buf);
        buf.extend_from_slice(&[2, 0x08, 0x05]);
        encode_key(2, WireType::LengthDelimited, &mut buf);
        buf.extend_from_slice(&[5, 0x0A, 0x01, b'k', 0x10, 0x07]);

        let rec = schema.decode(&buf).unwrap();
        let mut inner = DynamicRecord::default();
        inner.insert("a", DynamicValue::Int(5));
        assert_eq!(rec.get("inner"), Some(&DynamicValue::Message(inner)));
        let counts = BTreeMap::from([("k".to_string(), DynamicValue::Int(7))]);
        assert_eq!(rec.get("counts"), Some(&DynamicValue::Map(counts)));
    }

    #[test]
    fn wrong_wire_type_is_an_error() {
        let schema = Schema::bundled(SchemaOptions::default()).unwrap();
        let mut buf = Vec::new();
        encode_key(11, WireType::Varint, &mut buf);
        encode_varint(1, &mut buf);
        assert!(schema.decode(&buf).is_err());
    }

    #[test]
    fn truncated_double_is_an_error() {
        let schema = Schema::bundled(SchemaOptions::default()).unwrap();
        let mut buf = Vec::new();
        encode_key(11, WireType::SixtyFourBit, &mut buf);
        buf.extend_from_slice(&[0, 0, 0]);
        assert!(schema.decode(&buf).is_err());
    }
}
