mod common;

use common::{make_box, make_large_box, make_open_box};
use dashtel::parser::{BoxIter, ParseError, find_box, find_path, read_box_header};
use dashtel::FourCC;
use proptest::prelude::*;

#[test]
fn standard_header() {
    let data = [make_box(b"ftyp", b"isom"), make_box(b"free", &[0; 4])].concat();
    let h = read_box_header(&data, 0, data.len()).unwrap();
    assert_eq!(h.typ, FourCC(*b"ftyp"));
    assert_eq!(h.size, 12);
    assert_eq!(h.header_size, 8);

    let free = find_box(&data, 0, data.len(), "free").unwrap();
    assert_eq!((free.start, free.end, free.size), (20, 24, 4));
}

#[test]
fn extended_size_uses_sixteen_byte_header() {
    let data = [make_box(b"ftyp", b"isom"), make_large_box(b"mdat", &[7; 10])].concat();
    let mdat = find_box(&data, 0, data.len(), "mdat").unwrap();
    assert_eq!(mdat.start, 12 + 16);
    assert_eq!(mdat.end, data.len());
    assert_eq!(mdat.payload(&data), &[7; 10]);
}

#[test]
fn size_zero_extends_to_parent_end() {
    let inner = [make_box(b"tkhd", &[0; 4]), make_open_box(b"mdia", &[1, 2, 3])].concat();
    let data = [make_box(b"trak", &inner), make_box(b"free", &[])].concat();
    let trak = find_box(&data, 0, data.len(), "trak").unwrap();
    let mdia = find_box(&data, trak.start, trak.end, "mdia").unwrap();
    assert_eq!(mdia.end, trak.end);
    assert_eq!(mdia.size, 3);
}

#[test]
fn search_is_not_recursive() {
    let data = make_box(b"moov", &make_box(b"trak", &[]));
    assert!(matches!(
        find_box(&data, 0, data.len(), "trak"),
        Err(ParseError::BoxNotFound { .. })
    ));
    let trak = find_path(&data, 0, data.len(), &["moov", "trak"]).unwrap();
    assert!(trak.is_empty());
}

#[test]
fn overrunning_box_is_clamped_to_window() {
    let mut data = make_box(b"mdat", &[9; 8]);
    // declare 100 bytes, only 16 present
    data[..4].copy_from_slice(&100u32.to_be_bytes());
    let mdat = find_box(&data, 0, data.len(), "mdat").unwrap();
    assert_eq!(mdat.end, data.len());

    // a non-matching overrun ends the search
    let data = [data, make_box(b"free", &[])].concat();
    assert!(find_box(&data, 0, data.len(), "free").is_err());
}

#[test]
fn size_smaller_than_header_is_rejected() {
    let mut data = make_box(b"free", &[0; 4]);
    data[..4].copy_from_slice(&4u32.to_be_bytes());
    assert!(matches!(
        find_box(&data, 0, data.len(), "moov"),
        Err(ParseError::InvalidSize { .. })
    ));
}

#[test]
fn iterates_top_level_children_in_order() {
    let data = [
        make_box(b"ftyp", b"isom"),
        make_box(b"moov", &make_box(b"mvhd", &[0; 4])),
        make_box(b"mdat", &[]),
    ]
    .concat();
    let names: Vec<String> = BoxIter::new(&data, 0, data.len())
        .map(|b| b.unwrap().typ.to_string())
        .collect();
    assert_eq!(names, ["ftyp", "moov", "mdat"]);
}

const NAMES: [&[u8; 4]; 4] = [b"moov", b"free", b"udta", b"mdat"];

fn box_list() -> impl Strategy<Value = Vec<(usize, Vec<u8>, u8)>> {
    // (name index, payload, encoding: 0 = 32-bit, 1 = 64-bit, 2 = open-ended)
    prop::collection::vec((0..NAMES.len(), prop::collection::vec(any::<u8>(), 0..24), 0u8..3), 1..8)
}

proptest! {
    #[test]
    fn located_boxes_stay_inside_their_window(boxes in box_list(), prefix in 0usize..16, suffix in 0usize..16) {
        let mut data = vec![0xEEu8; prefix];
        let last = boxes.len() - 1;
        for (i, (n, payload, enc)) in boxes.iter().enumerate() {
            let name = NAMES[*n];
            data.extend(match *enc {
                1 => make_large_box(name, payload),
                2 if i == last => make_open_box(name, payload),
                _ => make_box(name, payload),
            });
        }
        let end = data.len();
        data.extend(vec![0xEEu8; suffix]);

        for name in NAMES {
            let name = std::str::from_utf8(name).unwrap();
            if let Ok(b) = find_box(&data, prefix, end, name) {
                prop_assert!(b.start >= prefix);
                prop_assert!(b.start <= b.end);
                prop_assert!(b.end <= end);
                prop_assert_eq!(b.size, b.end - b.start);
            }
        }
        if let (_, _, 2) = boxes[last] {
            let name = std::str::from_utf8(NAMES[boxes[last].0]).unwrap();
            let found = find_box(&data, prefix, end, name).unwrap();
            // an earlier box of the same name may match first
            if boxes.iter().filter(|(n, _, _)| *n == boxes[last].0).count() == 1 {
                prop_assert_eq!(found.end, end);
            }
        }
    }
}
