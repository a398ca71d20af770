//! Length-prefixed bitstream units inside the media-data region.
//!
//! Every unit is a 4-byte big-endian length followed by that many bytes; the
//! low 5 bits of the first payload byte carry the unit type.

use crate::track::TrackConfig;
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Non-IDR slice.
    Delta,
    /// IDR slice.
    Key,
    /// Supplemental enhancement information; carries telemetry.
    Metadata,
    Sps,
    Pps,
    Other(u8),
}

impl UnitKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => UnitKind::Delta,
            5 => UnitKind::Key,
            6 => UnitKind::Metadata,
            7 => UnitKind::Sps,
            8 => UnitKind::Pps,
            other => UnitKind::Other(other),
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(self, UnitKind::Key | UnitKind::Delta)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, UnitKind::Sps | UnitKind::Pps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstreamUnit {
    /// Offset of the length prefix, relative to the scanned region.
    pub offset: usize,
    pub length: usize,
    pub type_code: u8,
    pub kind: UnitKind,
    pub payload: Vec<u8>,
}

/// Lazily walks a region unit by unit. A unit whose declared length runs past
/// the region ends the scan silently.
pub struct UnitScanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> UnitScanner<'a> {
    pub fn new(region: &'a [u8]) -> Self {
        Self { data: region, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn region_len(&self) -> usize {
        self.data.len()
    }
}

impl Iterator for UnitScanner<'_> {
    type Item = BitstreamUnit;

    fn next(&mut self) -> Option<BitstreamUnit> {
        loop {
            let remaining = self.data.len().saturating_sub(self.pos);
            if remaining < 4 {
                if remaining > 0 {
                    trace!(offset = self.pos, remaining, "dropping trailing bytes");
                }
                return None;
            }
            let offset = self.pos;
            let length = BigEndian::read_u32(&self.data[offset..offset + 4]) as usize;
            let start = offset + 4;
            if length > self.data.len() - start {
                warn!(offset, length, available = self.data.len() - start, "truncated unit, stopping scan");
                self.pos = self.data.len();
                return None;
            }
            self.pos = start + length;
            // no type byte to classify
            if length == 0 {
                trace!(offset, "skipping empty unit");
                continue;
            }

            let payload = self.data[start..start + length].to_vec();
            let type_code = payload[0] & 0x1F;
            trace!(offset, length, type_code, "unit");

            return Some(BitstreamUnit {
                offset,
                length,
                type_code,
                kind: UnitKind::from_code(type_code),
                payload,
            });
        }
    }
}

/// Bulk mode: every metadata unit payload in order, frame units ignored.
pub fn collect_metadata_units(region: &[u8]) -> Vec<Vec<u8>> {
    UnitScanner::new(region)
        .filter(|u| u.kind == UnitKind::Metadata)
        .map(|u| u.payload)
        .collect()
}

/// One decodable picture plus the state needed to feed it to a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub index: usize,
    pub keyframe: bool,
    pub data: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    /// The metadata unit that directly preceded this frame, if any.
    pub metadata: Option<Vec<u8>>,
    pub duration_ms: Option<f64>,
}

/// Playback mode: folds units into frames, carrying the most recent
/// parameter sets forward and attaching at most one pending metadata unit.
pub struct FrameAssembler<'a> {
    units: UnitScanner<'a>,
    config: Option<&'a TrackConfig>,
    sps: Vec<u8>,
    pps: Vec<u8>,
    pending: Option<Vec<u8>>,
    index: usize,
}

impl<'a> FrameAssembler<'a> {
    pub fn new(region: &'a [u8], config: Option<&'a TrackConfig>) -> Self {
        let (sps, pps) = config
            .map(|c| (c.sps.clone(), c.pps.clone()))
            .unwrap_or_default();
        Self {
            units: UnitScanner::new(region),
            config,
            sps,
            pps,
            pending: None,
            index: 0,
        }
    }
}

impl Iterator for FrameAssembler<'_> {
    type Item = VideoFrame;

    fn next(&mut self) -> Option<VideoFrame> {
        for unit in self.units.by_ref() {
            match unit.kind {
                UnitKind::Sps => self.sps = unit.payload,
                UnitKind::Pps => self.pps = unit.payload,
                UnitKind::Metadata => {
                    if self.pending.replace(unit.payload).is_some() {
                        trace!(offset = unit.offset, "replacing unclaimed metadata unit");
                    }
                }
                UnitKind::Key | UnitKind::Delta => {
                    let index = self.index;
                    self.index += 1;
                    return Some(VideoFrame {
                        index,
                        keyframe: unit.kind == UnitKind::Key,
                        data: unit.payload,
                        sps: self.sps.clone(),
                        pps: self.pps.clone(),
                        metadata: self.pending.take(),
                        duration_ms: self
                            .config
                            .and_then(|c| c.frame_durations_ms.get(index).copied()),
                    });
                }
                UnitKind::Other(_) => {}
            }
        }
        None
    }
}
