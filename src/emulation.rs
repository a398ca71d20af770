//! Emulation-prevention removal for raw bitstream payloads.

/// Drop every `0x03` that follows two or more consecutive zero bytes.
///
/// The zero counter resets after each removal, so `00 00 03 00 00 03` loses
/// both escape bytes.
pub fn strip_emulation_prevention(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut zeros = 0usize;
    for &b in payload {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}
