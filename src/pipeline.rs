//! One in-memory file through the whole chain: box navigation, unit scan,
//! escape stripping, schema decode and indexing.

use crate::boxes::ContainerBox;
use crate::config::TelemetryConfig;
use crate::decoder::decode_metadata_unit;
use crate::error::{Error, Result};
use crate::index::TelemetryIndex;
use crate::nal::{FrameAssembler, UnitKind, UnitScanner};
use crate::parser::{self, ParseError};
use crate::record::TelemetryRecord;
use crate::schema::Schema;
use crate::track::{TrackConfig, read_track_config};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Shared flag a running parse checks between units.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub units_scanned: usize,
    pub bytes_scanned: usize,
    pub total_bytes: usize,
    pub records: usize,
}

impl Progress {
    /// Scanned share of the media-data region, 0.0..=1.0.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_scanned as f64 / self.total_bytes as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseSummary {
    pub has_telemetry: bool,
    pub record_count: usize,
    pub track_config: Option<TrackConfig>,
    /// Seconds; taken from the caller when known, else from the track.
    pub video_duration: Option<f64>,
    /// Metadata units that did not decode to a record.
    pub skipped_units: usize,
}

#[derive(Debug)]
pub struct ParseOutput {
    pub summary: ParseSummary,
    pub index: TelemetryIndex,
}

/// Whole-file buffer with a lazily computed, cached track configuration.
#[derive(Debug)]
pub struct TelemetryFile {
    data: Vec<u8>,
    config: OnceCell<TrackConfig>,
}

impl TelemetryFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            config: OnceCell::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Computed on first call; later calls return the cached value.
    pub fn track_config(&self) -> std::result::Result<&TrackConfig, ParseError> {
        self.config.get_or_try_init(|| read_track_config(&self.data))
    }

    pub fn media_data_box(&self) -> std::result::Result<ContainerBox, ParseError> {
        parser::find_box(&self.data, 0, self.data.len(), "mdat")
    }

    pub fn media_data(&self) -> std::result::Result<&[u8], ParseError> {
        Ok(self.media_data_box()?.payload(&self.data))
    }

    pub fn units(&self) -> std::result::Result<UnitScanner<'_>, ParseError> {
        Ok(UnitScanner::new(self.media_data()?))
    }

    /// Playback-mode frames. Parameter sets are seeded from the track
    /// configuration when it can be read.
    pub fn frames(&self) -> std::result::Result<FrameAssembler<'_>, ParseError> {
        let region = self.media_data()?;
        Ok(FrameAssembler::new(region, self.track_config().ok()))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Bulk-mode extraction: decode every metadata unit in `region`, in order.
/// Units that do not decode are counted and skipped.
pub fn extract_records(
    schema: &Schema,
    region: &[u8],
    progress_interval: usize,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<(Vec<TelemetryRecord>, usize)> {
    let interval = progress_interval.max(1);
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut units = 0usize;
    let mut scanner = UnitScanner::new(region);

    while let Some(unit) = scanner.next() {
        if cancel.is_cancelled() {
            debug!(units, "parse cancelled");
            return Err(Error::Cancelled);
        }
        units += 1;
        if unit.kind == UnitKind::Metadata {
            match decode_metadata_unit(schema, &unit.payload) {
                Some(rec) => records.push(rec),
                None => skipped += 1,
            }
        }
        if units % interval == 0 {
            on_progress(Progress {
                units_scanned: units,
                bytes_scanned: scanner.position(),
                total_bytes: region.len(),
                records: records.len(),
            });
        }
    }

    on_progress(Progress {
        units_scanned: units,
        bytes_scanned: region.len(),
        total_bytes: region.len(),
        records: records.len(),
    });
    Ok((records, skipped))
}

/// Run the full pipeline over `file`. Structural container errors are
/// returned; bitstream truncation and undecodable units are not errors.
pub fn parse_telemetry(
    file: &TelemetryFile,
    schema: &Schema,
    options: &TelemetryConfig,
    video_duration: Option<f64>,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<ParseOutput> {
    let config = file.track_config()?.clone();
    let region = file.media_data()?;

    let (records, skipped_units) =
        extract_records(schema, region, options.progress_interval, cancel, on_progress)?;

    let video_duration = video_duration.or_else(|| {
        Some(config.duration_seconds()).filter(|d| *d > 0.0)
    });
    let mut index = TelemetryIndex::new();
    let record_count =
        index.build_with(records, Some(&config), video_duration, &options.index_options());

    info!(
        records = record_count,
        skipped = skipped_units,
        frame_rate = index.frame_rate(),
        "parsed telemetry"
    );

    Ok(ParseOutput {
        summary: ParseSummary {
            has_telemetry: record_count > 0,
            record_count,
            track_config: Some(config),
            video_duration,
            skipped_units,
        },
        index,
    })
}
