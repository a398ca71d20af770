//! Metadata-unit payload -> [`TelemetryRecord`].

use crate::emulation::strip_emulation_prevention;
use crate::record::TelemetryRecord;
use crate::schema::{self, Schema, SchemaError};
use tracing::trace;

/// Unit header, SEI payload type and SEI payload size.
const PREAMBLE_LEN: usize = 3;
const MARKER: u8 = 0x42;
const DISCRIMINATOR: u8 = 0x69;

/// Decode an already-stripped metadata payload with the process schema.
///
/// `Ok(None)` means the unit carries no telemetry (too short, no
/// discriminator, or a payload the schema cannot decode). The only error is
/// a missing schema.
pub fn decode_sei(stripped: &[u8]) -> Result<Option<TelemetryRecord>, SchemaError> {
    let schema = schema::schema()?;
    Ok(decode_sei_with(schema, stripped))
}

pub fn decode_sei_with(schema: &Schema, stripped: &[u8]) -> Option<TelemetryRecord> {
    if stripped.len() < 4 {
        return None;
    }
    let mut i = PREAMBLE_LEN;
    while i < stripped.len() && stripped[i] == MARKER {
        i += 1;
    }
    if i + 1 >= stripped.len() || stripped[i] != DISCRIMINATOR {
        trace!(len = stripped.len(), "metadata unit without telemetry discriminator");
        return None;
    }

    // last byte is the trailing terminator
    let body = &stripped[i + 1..stripped.len() - 1];
    match schema.decode(body) {
        Ok(rec) => Some(TelemetryRecord::from_dynamic(&rec)),
        Err(e) => {
            trace!(error = %e, "skipping undecodable metadata unit");
            None
        }
    }
}

/// Strip emulation-prevention bytes from a raw metadata unit, then decode it.
pub fn decode_metadata_unit(schema: &Schema, raw: &[u8]) -> Option<TelemetryRecord> {
    decode_sei_with(schema, &strip_emulation_prevention(raw))
}
