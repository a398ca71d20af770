use crate::boxes::{BoxHeader, ContainerBox, FourCC};
use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("box '{name}' not found in range {start}..{end}")]
    BoxNotFound {
        name: String,
        start: usize,
        end: usize,
    },
    #[error("invalid size {size} for box '{name}' at offset {offset}")]
    InvalidSize {
        name: String,
        offset: usize,
        size: u64,
    },
    #[error("truncated {what} at offset {offset}")]
    Truncated { what: &'static str, offset: usize },
    #[error("malformed container: {0}")]
    MalformedContainer(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Big-endian u16 at `at`, bounds-checked.
pub fn be_u16(data: &[u8], at: usize, what: &'static str) -> Result<u16> {
    data.get(at..at + 2)
        .map(BigEndian::read_u16)
        .ok_or(ParseError::Truncated { what, offset: at })
}

pub fn be_u32(data: &[u8], at: usize, what: &'static str) -> Result<u32> {
    data.get(at..at + 4)
        .map(BigEndian::read_u32)
        .ok_or(ParseError::Truncated { what, offset: at })
}

pub fn be_u64(data: &[u8], at: usize, what: &'static str) -> Result<u64> {
    data.get(at..at + 8)
        .map(BigEndian::read_u64)
        .ok_or(ParseError::Truncated { what, offset: at })
}

/// Read the header of the box starting at `pos`. `limit` is the end of the
/// enclosing range; the header itself must fit inside it.
pub fn read_box_header(data: &[u8], pos: usize, limit: usize) -> Result<BoxHeader> {
    let limit = limit.min(data.len());
    if pos + 8 > limit {
        return Err(ParseError::Truncated {
            what: "box header",
            offset: pos,
        });
    }
    let size32 = BigEndian::read_u32(&data[pos..pos + 4]);
    let typ = FourCC([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);

    let (size, header_size) = if size32 == 1 {
        if pos + 16 > limit {
            return Err(ParseError::Truncated {
                what: "extended box size",
                offset: pos + 8,
            });
        }
        (BigEndian::read_u64(&data[pos + 8..pos + 16]), 16)
    } else {
        (size32 as u64, 8)
    };

    if size != 0 && size < header_size {
        return Err(ParseError::InvalidSize {
            name: typ.to_string(),
            offset: pos,
            size,
        });
    }

    Ok(BoxHeader {
        typ,
        size,
        header_size,
        start: pos,
    })
}

/// Iterates the boxes directly inside `start..end` (no recursion).
///
/// A box whose declared size overruns `end` is clamped to `end` and ends the
/// iteration; a size of 0 means "to the end of the range".
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
    done: bool,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data,
            pos: start.min(end),
            end,
            done: false,
        }
    }
}

impl Iterator for BoxIter<'_> {
    type Item = Result<ContainerBox>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos + 8 > self.end {
            return None;
        }
        let h = match read_box_header(self.data, self.pos, self.end) {
            Ok(h) => h,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let payload_start = h.start + h.header_size as usize;
        let declared_end = if h.size == 0 {
            self.end
        } else {
            // u64 -> usize saturates on 32-bit targets; the clamp below handles it.
            h.start.saturating_add(usize::try_from(h.size).unwrap_or(usize::MAX))
        };
        let box_end = if declared_end > self.end {
            warn!(
                typ = %h.typ,
                offset = h.start,
                declared = h.size,
                available = self.end - h.start,
                "box overruns its parent, clamping"
            );
            self.done = true;
            self.end
        } else {
            declared_end
        };

        self.pos = box_end;
        if h.size == 0 {
            self.done = true;
        }
        Some(Ok(ContainerBox {
            typ: h.typ,
            start: payload_start,
            end: box_end,
            size: box_end - payload_start,
        }))
    }
}

/// Find the first box named `name` at the top level of `start..end`.
pub fn find_box(data: &[u8], start: usize, end: usize, name: &str) -> Result<ContainerBox> {
    let wanted = FourCC::from_str(name).ok_or_else(|| ParseError::BoxNotFound {
        name: name.to_string(),
        start,
        end,
    })?;
    for entry in BoxIter::new(data, start, end) {
        let b = entry?;
        if b.typ == wanted {
            debug!(typ = name, start = b.start, end = b.end, "located box");
            return Ok(b);
        }
    }
    Err(ParseError::BoxNotFound {
        name: name.to_string(),
        start,
        end,
    })
}

/// Follow a chain of box names, each searched inside the previous one's payload.
pub fn find_path(data: &[u8], start: usize, end: usize, path: &[&str]) -> Result<ContainerBox> {
    let mut range = (start, end);
    let mut found = None;
    for name in path {
        let b = find_box(data, range.0, range.1, name)?;
        range = (b.start, b.end);
        found = Some(b);
    }
    found.ok_or_else(|| ParseError::MalformedContainer("empty box path".into()))
}
