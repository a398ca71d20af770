#![allow(dead_code)]

//! Synthetic dashcam files: a minimal box tree with one AVC video track and
//! an `mdat` of length-prefixed units.

use prost::Message;

#[derive(Clone, PartialEq, prost::Message)]
pub struct SeiMetadata {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(int32, tag = "2")]
    pub gear_state: i32,
    #[prost(uint64, tag = "3")]
    pub frame_seq_no: u64,
    #[prost(float, tag = "4")]
    pub vehicle_speed_mps: f32,
    #[prost(float, tag = "5")]
    pub accelerator_pedal_position: f32,
    #[prost(float, tag = "6")]
    pub steering_wheel_angle: f32,
    #[prost(bool, tag = "7")]
    pub blinker_on_left: bool,
    #[prost(bool, tag = "8")]
    pub blinker_on_right: bool,
    #[prost(bool, tag = "9")]
    pub brake_applied: bool,
    #[prost(int32, tag = "10")]
    pub autopilot_state: i32,
    #[prost(double, tag = "11")]
    pub latitude_deg: f64,
    #[prost(double, tag = "12")]
    pub longitude_deg: f64,
    #[prost(double, tag = "13")]
    pub heading_deg: f64,
    #[prost(double, tag = "14")]
    pub linear_acceleration_mps2_x: f64,
    #[prost(double, tag = "15")]
    pub linear_acceleration_mps2_y: f64,
    #[prost(double, tag = "16")]
    pub linear_acceleration_mps2_z: f64,
}

pub const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9];
pub const PPS: &[u8] = &[0x68, 0xeb, 0xe3, 0xcb];

pub fn make_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    v.extend_from_slice(name);
    v.extend_from_slice(payload);
    v
}

/// Box with a 64-bit size field.
pub fn make_large_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = 1u32.to_be_bytes().to_vec();
    v.extend_from_slice(name);
    v.extend_from_slice(&((payload.len() + 16) as u64).to_be_bytes());
    v.extend_from_slice(payload);
    v
}

/// Box whose size field is 0 ("to the end of the parent").
pub fn make_open_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = 0u32.to_be_bytes().to_vec();
    v.extend_from_slice(name);
    v.extend_from_slice(payload);
    v
}

pub fn full_box(name: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version, 0, 0, 0];
    payload.extend_from_slice(body);
    make_box(name, &payload)
}

pub fn avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut p = vec![1, sps[1], sps[2], sps[3], 0xff, 0xe1];
    p.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    p.extend_from_slice(sps);
    p.push(1);
    p.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    p.extend_from_slice(pps);
    make_box(b"avcC", &p)
}

pub fn avc1(width: u16, height: u16) -> Vec<u8> {
    let mut p = vec![0u8; 78];
    // data_reference_index
    p[7] = 1;
    p[24..26].copy_from_slice(&width.to_be_bytes());
    p[26..28].copy_from_slice(&height.to_be_bytes());
    // horizontal/vertical resolution 72 dpi
    p[28..32].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    p[32..36].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    p[40..42].copy_from_slice(&1u16.to_be_bytes());
    p[74..76].copy_from_slice(&0x0018u16.to_be_bytes());
    p[76..78].copy_from_slice(&0xffffu16.to_be_bytes());
    p.extend(avcc(SPS, PPS));
    make_box(b"avc1", &p)
}

pub fn mdhd(version: u8, time_scale: u32) -> Vec<u8> {
    let body = if version == 1 {
        let mut b = vec![0u8; 32];
        b[16..20].copy_from_slice(&time_scale.to_be_bytes());
        b
    } else {
        let mut b = vec![0u8; 20];
        b[8..12].copy_from_slice(&time_scale.to_be_bytes());
        b
    };
    full_box(b"mdhd", version, &body)
}

pub fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0u8; 12]);
    body.push(0);
    full_box(b"hdlr", 0, &body)
}

pub fn stts(runs: &[(u32, u32)]) -> Vec<u8> {
    let mut body = (runs.len() as u32).to_be_bytes().to_vec();
    for (count, delta) in runs {
        body.extend_from_slice(&count.to_be_bytes());
        body.extend_from_slice(&delta.to_be_bytes());
    }
    full_box(b"stts", 0, &body)
}

pub fn stsd(entry: &[u8]) -> Vec<u8> {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(entry);
    full_box(b"stsd", 0, &body)
}

pub struct TrackSpec {
    pub handler: [u8; 4],
    pub mdhd_version: u8,
    pub time_scale: u32,
    pub runs: Vec<(u32, u32)>,
    pub width: u16,
    pub height: u16,
    pub with_stts: bool,
}

impl Default for TrackSpec {
    fn default() -> Self {
        Self {
            handler: *b"vide",
            mdhd_version: 0,
            time_scale: 1000,
            runs: vec![(2, 33)],
            width: 1280,
            height: 960,
            with_stts: true,
        }
    }
}

pub fn trak(layout: &TrackSpec) -> Vec<u8> {
    let mut stbl = stsd(&avc1(layout.width, layout.height));
    if layout.with_stts {
        stbl.extend(stts(&layout.runs));
    }
    let minf = make_box(b"minf", &make_box(b"stbl", &stbl));
    let mdia = [mdhd(layout.mdhd_version, layout.time_scale), hdlr(&layout.handler), minf].concat();
    let tkhd = full_box(b"tkhd", 0, &[0u8; 80]);
    make_box(b"trak", &[tkhd, make_box(b"mdia", &mdia)].concat())
}

pub fn ftyp() -> Vec<u8> {
    make_box(b"ftyp", b"isom\0\0\x02\0isomavc1")
}

/// Length-prefixed unit.
pub fn unit(payload: &[u8]) -> Vec<u8> {
    let mut v = (payload.len() as u32).to_be_bytes().to_vec();
    v.extend_from_slice(payload);
    v
}

/// Insert emulation-prevention bytes the way an encoder would.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut zeros = 0;
    for &b in raw {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// SEI unit payload carrying `msg`, escaped.
pub fn sei_payload(msg: &SeiMetadata) -> Vec<u8> {
    let body = msg.encode_to_vec();
    let size = (body.len() + 4).min(255) as u8;
    let mut raw = vec![0x06, 0x05, size, 0x42, 0x42, 0x42, 0x69];
    raw.extend_from_slice(&body);
    raw.push(0x80);
    escape(&raw)
}

pub fn sei_unit(msg: &SeiMetadata) -> Vec<u8> {
    unit(&sei_payload(msg))
}

pub fn key_unit() -> Vec<u8> {
    unit(&[0x65, 0x88, 0x84, 0x00, 0x33])
}

pub fn delta_unit() -> Vec<u8> {
    unit(&[0x41, 0x9a, 0x02, 0x0c])
}

pub fn mdat(units: &[Vec<u8>]) -> Vec<u8> {
    make_box(b"mdat", &units.concat())
}

pub fn file_with(layout: &TrackSpec, units: &[Vec<u8>]) -> Vec<u8> {
    let moov = make_box(b"moov", &trak(layout));
    [ftyp(), moov, mdat(units)].concat()
}

/// Default track (time scale 1000, two 33 ms samples) over `units`.
pub fn file(units: &[Vec<u8>]) -> Vec<u8> {
    file_with(&TrackSpec::default(), units)
}

pub fn driving(speed_mps: f32, autopilot: i32) -> SeiMetadata {
    SeiMetadata {
        vehicle_speed_mps: speed_mps,
        autopilot_state: autopilot,
        gear_state: 1,
        ..Default::default()
    }
}

/// Metadata, key, metadata, delta: the two-frame clip used throughout.
pub fn two_frame_units(first: &SeiMetadata, second: &SeiMetadata) -> Vec<Vec<u8>> {
    vec![sei_unit(first), key_unit(), sei_unit(second), delta_unit()]
}
