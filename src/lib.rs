pub mod boxes;
pub mod config;
pub mod decoder;
pub mod emulation;
pub mod error;
pub mod index;
pub mod known_boxes;
pub mod nal;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod track;
pub mod util;
pub mod worker;

pub use boxes::{BoxHeader, ContainerBox, FourCC};
pub use config::TelemetryConfig;
pub use decoder::decode_sei;
pub use emulation::strip_emulation_prevention;
pub use error::{Error, Result};
pub use index::{RouteStats, TelemetryIndex, TimedRecord};
pub use nal::{BitstreamUnit, UnitKind, UnitScanner};
pub use parser::{ParseError, find_box, read_box_header};
pub use pipeline::{CancelToken, ParseSummary, TelemetryFile, parse_telemetry};
pub use record::{AutopilotState, Gear, TelemetryRecord};
pub use schema::{Schema, SchemaError, ensure_schema_loaded, load_schema};
pub use track::{TrackConfig, read_track_config};
pub use worker::{InlineBackend, ParseBackend, ParseSession, ThreadedBackend};
