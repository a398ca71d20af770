use crate::boxes::FourCC;
use crate::parser::{BoxIter, Result};
use serde::Serialize;

/// Typed view over the boxes a dashcam recording is made of.
///
/// Anything not in this list becomes `KnownBox::Unknown(fourcc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBox {
    // top-level
    Ftyp,
    Moov,
    Mdat,
    Free,
    Skip,
    Udta,

    // moov / trak
    Mvhd,
    Trak,
    Tkhd,
    Edts,
    Elst,
    Mdia,

    // mdia / minf
    Mdhd,
    Hdlr,
    Minf,
    Vmhd,
    Dinf,
    Dref,
    Stbl,

    // stbl
    Stsd,
    Stts,
    Ctts,
    Stsc,
    Stsz,
    Stco,
    Co64,
    Stss,

    // sample entries and codec configuration
    Avc1,
    Avc3,
    Avcc,
    Pasp,
    Btrt,

    Unknown(FourCC),
}

impl From<FourCC> for KnownBox {
    fn from(cc: FourCC) -> Self {
        match &cc.0 {
            b"ftyp" => KnownBox::Ftyp,
            b"moov" => KnownBox::Moov,
            b"mdat" => KnownBox::Mdat,
            b"free" => KnownBox::Free,
            b"skip" => KnownBox::Skip,
            b"udta" => KnownBox::Udta,
            b"mvhd" => KnownBox::Mvhd,
            b"trak" => KnownBox::Trak,
            b"tkhd" => KnownBox::Tkhd,
            b"edts" => KnownBox::Edts,
            b"elst" => KnownBox::Elst,
            b"mdia" => KnownBox::Mdia,
            b"mdhd" => KnownBox::Mdhd,
            b"hdlr" => KnownBox::Hdlr,
            b"minf" => KnownBox::Minf,
            b"vmhd" => KnownBox::Vmhd,
            b"dinf" => KnownBox::Dinf,
            b"dref" => KnownBox::Dref,
            b"stbl" => KnownBox::Stbl,
            b"stsd" => KnownBox::Stsd,
            b"stts" => KnownBox::Stts,
            b"ctts" => KnownBox::Ctts,
            b"stsc" => KnownBox::Stsc,
            b"stsz" => KnownBox::Stsz,
            b"stco" => KnownBox::Stco,
            b"co64" => KnownBox::Co64,
            b"stss" => KnownBox::Stss,
            b"avc1" => KnownBox::Avc1,
            b"avc3" => KnownBox::Avc3,
            b"avcC" => KnownBox::Avcc,
            b"pasp" => KnownBox::Pasp,
            b"btrt" => KnownBox::Btrt,
            _ => KnownBox::Unknown(cc),
        }
    }
}

impl KnownBox {
    pub fn full_name(&self) -> &'static str {
        match self {
            KnownBox::Ftyp => "File Type Box",
            KnownBox::Moov => "Movie Box",
            KnownBox::Mdat => "Media Data Box",
            KnownBox::Free => "Free Space Box",
            KnownBox::Skip => "Skip Box",
            KnownBox::Udta => "User Data Box",
            KnownBox::Mvhd => "Movie Header Box",
            KnownBox::Trak => "Track Box",
            KnownBox::Tkhd => "Track Header Box",
            KnownBox::Edts => "Edit Box",
            KnownBox::Elst => "Edit List Box",
            KnownBox::Mdia => "Media Box",
            KnownBox::Mdhd => "Media Header Box",
            KnownBox::Hdlr => "Handler Reference Box",
            KnownBox::Minf => "Media Information Box",
            KnownBox::Vmhd => "Video Media Header Box",
            KnownBox::Dinf => "Data Information Box",
            KnownBox::Dref => "Data Reference Box",
            KnownBox::Stbl => "Sample Table Box",
            KnownBox::Stsd => "Sample Description Box",
            KnownBox::Stts => "Decoding Time to Sample Box",
            KnownBox::Ctts => "Composition Time to Sample Box",
            KnownBox::Stsc => "Sample To Chunk Box",
            KnownBox::Stsz => "Sample Size Box",
            KnownBox::Stco => "Chunk Offset Box",
            KnownBox::Co64 => "64-bit Chunk Offset Box",
            KnownBox::Stss => "Sync Sample Box",
            KnownBox::Avc1 | KnownBox::Avc3 => "AVC Sample Entry",
            KnownBox::Avcc => "AVC Configuration Box",
            KnownBox::Pasp => "Pixel Aspect Ratio Box",
            KnownBox::Btrt => "Bit Rate Box",
            KnownBox::Unknown(_) => "Unknown Box",
        }
    }

    /// Offset of the first child box inside this box's payload, for boxes
    /// that carry children. Sample description and sample entries have a
    /// fixed-layout prefix before their children.
    pub fn child_offset(&self) -> Option<usize> {
        match self {
            KnownBox::Moov
            | KnownBox::Trak
            | KnownBox::Edts
            | KnownBox::Mdia
            | KnownBox::Minf
            | KnownBox::Dinf
            | KnownBox::Stbl
            | KnownBox::Udta => Some(0),
            // version/flags + entry_count
            KnownBox::Stsd => Some(8),
            // VisualSampleEntry fixed fields
            KnownBox::Avc1 | KnownBox::Avc3 => Some(78),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.child_offset().is_some()
    }
}

/// One box in a listing of the tree, with its children when it has any.
#[derive(Debug, Clone, Serialize)]
pub struct BoxNode {
    pub typ: FourCC,
    pub full_name: &'static str,
    pub payload_offset: usize,
    pub payload_size: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BoxNode>,
}

/// Walk `start..end`, descending into known containers up to `max_depth`.
pub fn box_tree(data: &[u8], start: usize, end: usize, max_depth: usize) -> Result<Vec<BoxNode>> {
    let mut out = Vec::new();
    for entry in BoxIter::new(data, start, end) {
        let b = entry?;
        let kind = KnownBox::from(b.typ);
        let children = match kind.child_offset() {
            Some(off) if max_depth > 0 && b.start + off <= b.end => {
                box_tree(data, b.start + off, b.end, max_depth - 1)?
            }
            _ => Vec::new(),
        };
        out.push(BoxNode {
            typ: b.typ,
            full_name: kind.full_name(),
            payload_offset: b.start,
            payload_size: b.size,
            children,
        });
    }
    Ok(out)
}
