//! Video track configuration: dimensions, codec parameter sets, time scale
//! and per-sample frame durations.

use crate::boxes::ContainerBox;
use crate::known_boxes::KnownBox;
use crate::parser::{BoxIter, ParseError, Result, be_u16, be_u32, find_box};
use serde::Serialize;
use tracing::debug;

/// Upper bound on expanded stts samples; a corrupt run count must not
/// turn into a multi-gigabyte allocation.
const MAX_SAMPLES: u64 = 1 << 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackConfig {
    pub width: u16,
    pub height: u16,
    /// RFC 6381 style codec string, e.g. `avc1.64001f`.
    pub codec_id: String,
    #[serde(serialize_with = "crate::util::serialize_hex")]
    pub sps: Vec<u8>,
    #[serde(serialize_with = "crate::util::serialize_hex")]
    pub pps: Vec<u8>,
    pub time_scale: u32,
    pub frame_durations_ms: Vec<f64>,
}

impl TrackConfig {
    pub fn sample_count(&self) -> usize {
        self.frame_durations_ms.len()
    }

    pub fn mean_frame_duration_ms(&self) -> Option<f64> {
        if self.frame_durations_ms.is_empty() {
            return None;
        }
        let total: f64 = self.frame_durations_ms.iter().sum();
        Some(total / self.frame_durations_ms.len() as f64)
    }

    /// Average frame rate, `None` when there are no durations or their mean
    /// is not positive.
    pub fn frame_rate(&self) -> Option<f64> {
        self.mean_frame_duration_ms()
            .filter(|mean| *mean > 0.0)
            .map(|mean| 1000.0 / mean)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_durations_ms.iter().sum::<f64>() / 1000.0
    }
}

fn require(data: &[u8], start: usize, end: usize, name: &str) -> Result<ContainerBox> {
    find_box(data, start, end, name).map_err(|e| match e {
        ParseError::BoxNotFound { .. } => {
            ParseError::MalformedContainer(format!("required box '{name}' is missing"))
        }
        other => other,
    })
}

/// Handler type of a `trak` (e.g. `vide`), if it has a readable `hdlr`.
fn handler_type(data: &[u8], trak: &ContainerBox) -> Option<[u8; 4]> {
    let mdia = find_box(data, trak.start, trak.end, "mdia").ok()?;
    let hdlr = find_box(data, mdia.start, mdia.end, "hdlr").ok()?;
    // version/flags (4) + pre_defined (4)
    let at = hdlr.start + 8;
    if at + 4 > hdlr.end {
        return None;
    }
    Some([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Pick the first video track, falling back to the first track of any kind.
fn select_track(data: &[u8], moov: &ContainerBox) -> Result<ContainerBox> {
    let mut first = None;
    for entry in BoxIter::new(data, moov.start, moov.end) {
        let b = entry?;
        if KnownBox::from(b.typ) != KnownBox::Trak {
            continue;
        }
        if handler_type(data, &b).as_ref() == Some(b"vide") {
            return Ok(b);
        }
        first.get_or_insert(b);
    }
    first.ok_or_else(|| ParseError::MalformedContainer("required box 'trak' is missing".into()))
}

/// Read the configuration of the video track of a whole in-memory file.
pub fn read_track_config(data: &[u8]) -> Result<TrackConfig> {
    let moov = require(data, 0, data.len(), "moov")?;
    let trak = select_track(data, &moov)?;
    let mdia = require(data, trak.start, trak.end, "mdia")?;
    let minf = require(data, mdia.start, mdia.end, "minf")?;
    let stbl = require(data, minf.start, minf.end, "stbl")?;
    let stsd = require(data, stbl.start, stbl.end, "stsd")?;

    let entries_at = stsd.start + KnownBox::Stsd.child_offset().unwrap_or(8);
    let entry = find_box(data, entries_at, stsd.end, "avc1")
        .or_else(|_| require(data, entries_at, stsd.end, "avc3"))?;
    let width = be_u16(data, entry.start + 24, "sample entry width")?;
    let height = be_u16(data, entry.start + 26, "sample entry height")?;

    let children_at = entry.start + KnownBox::Avc1.child_offset().unwrap_or(78);
    if children_at > entry.end {
        return Err(ParseError::Truncated {
            what: "visual sample entry",
            offset: entry.start,
        });
    }
    let avcc = require(data, children_at, entry.end, "avcC")?;
    let (codec_id, sps, pps) = parse_avcc(avcc.payload(data))?;

    let mdhd = require(data, mdia.start, mdia.end, "mdhd")?;
    let time_scale = parse_mdhd_timescale(mdhd.payload(data))?;

    let stts = require(data, stbl.start, stbl.end, "stts")?;
    let frame_durations_ms = expand_stts(stts.payload(data), time_scale)?;

    debug!(
        width,
        height,
        codec = %codec_id,
        time_scale,
        samples = frame_durations_ms.len(),
        "read track configuration"
    );

    Ok(TrackConfig {
        width,
        height,
        codec_id,
        sps,
        pps,
        time_scale,
        frame_durations_ms,
    })
}

/// Codec string plus the first SPS and PPS from an `avcC` payload.
pub fn parse_avcc(avcc: &[u8]) -> Result<(String, Vec<u8>, Vec<u8>)> {
    if avcc.len() < 7 {
        return Err(ParseError::Truncated {
            what: "avcC record",
            offset: 0,
        });
    }
    let codec_id = format!("avc1.{}", hex::encode(&avcc[1..4]));

    if avcc[5] & 0x1F == 0 {
        return Err(ParseError::MalformedContainer("avcC carries no SPS".into()));
    }
    let mut p = 6;
    let sps_len = be_u16(avcc, p, "SPS length")? as usize;
    let sps = avcc
        .get(p + 2..p + 2 + sps_len)
        .ok_or(ParseError::Truncated {
            what: "SPS",
            offset: p + 2,
        })?
        .to_vec();

    // skip numOfPictureParameterSets
    p += 2 + sps_len + 1;
    let pps_len = be_u16(avcc, p, "PPS length")? as usize;
    let pps = avcc
        .get(p + 2..p + 2 + pps_len)
        .ok_or(ParseError::Truncated {
            what: "PPS",
            offset: p + 2,
        })?
        .to_vec();

    Ok((codec_id, sps, pps))
}

/// Time scale from an `mdhd` payload; the field moves with the version byte.
pub fn parse_mdhd_timescale(mdhd: &[u8]) -> Result<u32> {
    let version = *mdhd.first().ok_or(ParseError::Truncated {
        what: "mdhd version",
        offset: 0,
    })?;
    let at = if version == 1 { 20 } else { 12 };
    let time_scale = be_u32(mdhd, at, "mdhd timescale")?;
    if time_scale == 0 {
        return Err(ParseError::MalformedContainer("mdhd timescale is zero".into()));
    }
    Ok(time_scale)
}

/// Expand the (count, delta) runs of an `stts` payload into one duration
/// in milliseconds per sample.
pub fn expand_stts(stts: &[u8], time_scale: u32) -> Result<Vec<f64>> {
    let entry_count = be_u32(stts, 4, "stts entry count")? as usize;
    let required = 8 + entry_count.saturating_mul(8);
    if required > stts.len() {
        return Err(ParseError::Truncated {
            what: "stts entries",
            offset: stts.len(),
        });
    }

    let mut runs = Vec::with_capacity(entry_count);
    let mut total = 0u64;
    for i in 0..entry_count {
        let at = 8 + i * 8;
        let count = be_u32(stts, at, "stts sample count")?;
        let delta = be_u32(stts, at + 4, "stts sample delta")?;
        total += count as u64;
        runs.push((count, delta));
    }
    if total > MAX_SAMPLES {
        return Err(ParseError::MalformedContainer(format!(
            "stts declares {total} samples"
        )));
    }

    let mut durations = Vec::with_capacity(total as usize);
    for (count, delta) in runs {
        let ms = delta as f64 / time_scale as f64 * 1000.0;
        durations.extend(std::iter::repeat_n(ms, count as usize));
    }
    Ok(durations)
}
