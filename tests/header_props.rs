use blendcodec::{Endian, Error, FileHeader, PointerWidth};
use proptest::prelude::*;

fn width() -> impl Strategy<Value = PointerWidth> {
    prop_oneof![Just(PointerWidth::Four), Just(PointerWidth::Eight)]
}

fn endian() -> impl Strategy<Value = Endian> {
    prop_oneof![Just(Endian::Little), Just(Endian::Big)]
}

proptest! {
    #[test]
    fn header_round_trips(w in width(), e in endian(), version in 0u16..=999) {
        let header = FileHeader::new(w, e, version);
        let bytes = header.encode().unwrap();
        prop_assert_eq!(&bytes[..7], b"BLENDER");
        prop_assert_eq!(FileHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn oversized_versions_are_rejected(version in 1000u16..) {
        let header = FileHeader::new(PointerWidth::Eight, Endian::Little, version);
        prop_assert!(matches!(header.encode(), Err(Error::Format(_))));
    }

    #[test]
    fn non_digit_versions_are_rejected(pos in 9usize..12, byte in any::<u8>()) {
        prop_assume!(!byte.is_ascii_digit());
        let mut bytes = *b"BLENDER-v400";
        bytes[pos] = byte;
        prop_assert!(matches!(FileHeader::decode(&bytes), Err(Error::Format(_))));
    }
}

#[test]
fn documented_rejections() {
    for bad in [b"BLENDEX-v400", b"BLENDERxv400", b"BLENDER-x400", b"BLENDER-v1a0"] {
        assert!(matches!(FileHeader::decode(bad), Err(Error::Format(_))));
    }
}
