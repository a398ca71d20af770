use serde::Serialize;
use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else {
            None
        }
    }
    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}
impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}
impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}
impl Serialize for FourCC {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

/// Raw header of one box as it appears in the buffer.
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub typ: FourCC,
    /// Declared size field: 0 = to parent end, otherwise total size incl. header.
    pub size: u64,
    pub header_size: u64, // 8 or 16
    pub start: usize,     // buffer offset of the header
}

/// A located box: `start..end` is the payload range inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerBox {
    pub typ: FourCC,
    pub start: usize,
    pub end: usize,
    pub size: usize,
}

impl ContainerBox {
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end]
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
