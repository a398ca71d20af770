//! Time index over decoded telemetry and the queries playback runs against it.

use crate::record::{RegenThresholds, TelemetryRecord};
use crate::track::TrackConfig;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    /// Used when the track has no usable frame durations.
    pub default_frame_rate: f64,
    pub regen: RegenThresholds,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            default_frame_rate: DEFAULT_FRAME_RATE,
            regen: RegenThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedRecord {
    /// Seconds from the start of this file.
    pub timestamp: f64,
    #[serde(flatten)]
    pub record: TelemetryRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutePoint {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RouteStats {
    pub record_count: usize,
    pub duration_seconds: f64,
    pub max_speed_mph: f64,
    pub avg_speed_mph: f64,
    /// Share of records with any automation engaged, 0..=100.
    pub autopilot_percent: f64,
    pub regen_percent: f64,
    pub gps_points: usize,
}

/// Entries are kept in timestamp order; timestamps are strictly increasing
/// because they derive from record position.
#[derive(Debug, Clone, Default)]
pub struct TelemetryIndex {
    entries: Vec<TimedRecord>,
    frame_rate: f64,
    video_duration: Option<f64>,
}

impl TelemetryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(
        &mut self,
        records: Vec<TelemetryRecord>,
        config: Option<&TrackConfig>,
        video_duration: Option<f64>,
    ) -> usize {
        self.build_with(records, config, video_duration, &IndexOptions::default())
    }

    /// Replace the index contents with `records`, the record at position `i`
    /// landing at `i / frame_rate` seconds. Sequence counters inside the
    /// records are ignored for timing.
    pub fn build_with(
        &mut self,
        records: Vec<TelemetryRecord>,
        config: Option<&TrackConfig>,
        video_duration: Option<f64>,
        opts: &IndexOptions,
    ) -> usize {
        self.entries.clear();
        self.video_duration = video_duration;
        self.frame_rate = config
            .and_then(TrackConfig::frame_rate)
            .filter(|f| f.is_finite())
            .unwrap_or(if opts.default_frame_rate > 0.0 {
                opts.default_frame_rate
            } else {
                DEFAULT_FRAME_RATE
            });

        self.entries.reserve(records.len());
        for (i, mut record) in records.into_iter().enumerate() {
            record.regen_braking = opts.regen.classify(&record);
            self.entries.push(TimedRecord {
                timestamp: i as f64 / self.frame_rate,
                record,
            });
        }

        debug!(
            entries = self.entries.len(),
            frame_rate = self.frame_rate,
            video_duration = ?self.video_duration,
            "built telemetry index"
        );
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.video_duration = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_telemetry(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn video_duration(&self) -> Option<f64> {
        self.video_duration
    }

    /// Entry nearest to `t` seconds. Equidistant candidates resolve to the
    /// earlier one; queries outside the indexed span return the first or last
    /// entry.
    pub fn entry_at(&self, t: f64) -> Option<&TimedRecord> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.entries.partition_point(|e| e.timestamp < t);
        if idx == 0 {
            return self.entries.first();
        }
        if idx == self.entries.len() {
            return self.entries.last();
        }
        let before = &self.entries[idx - 1];
        let after = &self.entries[idx];
        if after.timestamp - t < t - before.timestamp {
            Some(after)
        } else {
            Some(before)
        }
    }

    pub fn telemetry_at(&self, t: f64) -> Option<&TelemetryRecord> {
        self.entry_at(t).map(|e| &e.record)
    }

    pub fn all(&self) -> &[TimedRecord] {
        &self.entries
    }

    /// Valid GPS positions in playback order.
    pub fn route(&self) -> Vec<RoutePoint> {
        self.entries
            .iter()
            .filter_map(|e| {
                e.record.gps.position().map(|(latitude, longitude)| RoutePoint {
                    timestamp: e.timestamp,
                    latitude,
                    longitude,
                    heading: e.record.gps.heading,
                })
            })
            .collect()
    }

    pub fn stats(&self) -> RouteStats {
        let n = self.entries.len();
        if n == 0 {
            return RouteStats::default();
        }
        let mut max_speed = 0.0f64;
        let mut sum_speed = 0.0;
        let mut engaged = 0usize;
        let mut regen = 0usize;
        let mut gps = 0usize;
        for e in &self.entries {
            let r = &e.record;
            max_speed = max_speed.max(r.speed.mph);
            sum_speed += r.speed.mph;
            engaged += r.autopilot.is_engaged() as usize;
            regen += r.regen_braking as usize;
            gps += r.has_valid_gps() as usize;
        }
        RouteStats {
            record_count: n,
            duration_seconds: self.entries[n - 1].timestamp,
            max_speed_mph: max_speed,
            avg_speed_mph: sum_speed / n as f64,
            autopilot_percent: engaged as f64 * 100.0 / n as f64,
            regen_percent: regen as f64 * 100.0 / n as f64,
            gps_points: gps,
        }
    }
}
