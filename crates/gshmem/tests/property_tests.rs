//! Property-based suites over the record model and the ring path.

use proptest::prelude::*;

use gshmem::{compare, Attr, Cmp, LocalWorld, RingValue};

proptest! {
    /// Operand cells round-trip every representable value.
    #[test]
    fn prop_opvalue_roundtrip_u64(v in any::<u64>()) {
        prop_assert_eq!(u64::from_bits(v.to_bits()), v);
    }

    #[test]
    fn prop_opvalue_roundtrip_i64(v in any::<i64>()) {
        prop_assert_eq!(i64::from_bits(v.to_bits()), v);
    }

    #[test]
    fn prop_opvalue_roundtrip_small_ints(a in any::<u8>(), b in any::<i16>(), c in any::<u32>()) {
        prop_assert_eq!(u8::from_bits(a.to_bits()), a);
        prop_assert_eq!(i16::from_bits(b.to_bits()), b);
        prop_assert_eq!(u32::from_bits(c.to_bits()), c);
    }

    #[test]
    fn prop_opvalue_roundtrip_f64(v in any::<f64>()) {
        let back = <f64 as RingValue>::from_bits(RingValue::to_bits(v));
        // NaN payloads survive bit-wise even though NaN != NaN.
        prop_assert_eq!(back.to_bits(), v.to_bits());
    }

    /// The comparison helper agrees with the native operators.
    #[test]
    fn prop_compare_matches_reference(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(compare(a, b, Cmp::Eq), a == b);
        prop_assert_eq!(compare(a, b, Cmp::Ne), a != b);
        prop_assert_eq!(compare(a, b, Cmp::Gt), a > b);
        prop_assert_eq!(compare(a, b, Cmp::Ge), a >= b);
        prop_assert_eq!(compare(a, b, Cmp::Lt), a < b);
        prop_assert_eq!(compare(a, b, Cmp::Le), a <= b);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Ring-path put/get round-trips arbitrary buffers unchanged.
    #[test]
    fn prop_ring_put_get_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..512)) {
        let attr = Attr::default().with_ipc(false).with_heap_length(1 << 16);
        let data = std::sync::Arc::new(data);
        LocalWorld::launch(2, attr, move |pe| {
            let remote = pe.malloc(512).unwrap() as *mut u8;
            pe.barrier_all();

            if pe.my_pe() == 0 {
                pe.put(remote, data.as_ptr(), data.len(), 1);
                pe.quiet();
                let mut back = vec![0u8; data.len()];
                pe.get(back.as_mut_ptr(), remote as *const u8, data.len(), 1);
                assert_eq!(&back, data.as_ref());
            }
            pe.barrier_all();
        });
    }

    /// Scalar values of every width survive a ring-path round trip.
    #[test]
    fn prop_ring_scalar_roundtrip(v in any::<u64>()) {
        let attr = Attr::default().with_ipc(false).with_heap_length(1 << 16);
        LocalWorld::launch(2, attr, move |pe| {
            let cell = pe.calloc(1, 8).unwrap() as *mut u64;
            pe.barrier_all();

            if pe.my_pe() == 0 {
                pe.p(cell, v, 1);
                pe.quiet();
                assert_eq!(pe.g(cell as *const u64, 1), v);
            }
            pe.barrier_all();
        });
    }
}
