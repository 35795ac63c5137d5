//! Property-Based Tests for Reductions
//!
//! # Test Properties
//!
//! 1. **Storage Independence**: a tiled face and an untiled copy of the
//!    same pixels read identically at every whole resolution
//! 2. **Determinism**: repeated reads return the cached result unchanged

mod common;

use proptest::prelude::*;

use common::{memory_cache, read_packed, TextureBuilder};
use ptex_cache::{CacheConfig, DataType, MeshType, Res};

// =============================================================================
// Property Strategies
// =============================================================================

/// Face resolution plus a tile resolution no larger than the face
fn layout_strategy() -> impl Strategy<Value = (Res, Res)> {
    (1i8..=5, 1i8..=5).prop_flat_map(|(u, v)| {
        (0..=u, 0..=v).prop_map(move |(tu, tv)| (Res::new(u, v), Res::new(tu, tv)))
    })
}

fn data_type_strategy() -> impl Strategy<Value = DataType> {
    prop_oneof![Just(DataType::U8), Just(DataType::U16)]
}

fn pixels_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..512)
}

/// Repeat `seed` to exactly `len` bytes
fn fill_to(seed: &[u8], len: usize) -> Vec<u8> {
    seed.iter().copied().cycle().take(len).collect()
}

// =============================================================================
// Storage Independence
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: tiling never changes reduced pixels.
    #[test]
    fn prop_tiled_reductions_match_untiled(
        (res, tile_res) in layout_strategy(),
        data_type in data_type_strategy(),
        nchan in 1u16..=3,
        seed in pixels_strategy(),
    ) {
        let mut b = TextureBuilder::new(MeshType::Quad, data_type, nchan);
        let data = fill_to(&seed, res.size() * b.pixel_size());
        b.add_face(res, data.clone());
        b.add_tiled_face(res, tile_res, data);
        let (cache, _) = memory_cache(CacheConfig::default(), &[("p.ptx", b.build())]);
        let reader = cache.get("p.ptx").unwrap();

        for ulog2 in (0..=res.ulog2).rev() {
            for vlog2 in (0..=res.vlog2).rev() {
                let target = Res::new(ulog2, vlog2);
                let plain = read_packed(&reader, 0, target);
                let tiled = read_packed(&reader, 1, target);
                prop_assert_eq!(plain, tiled, "face {} tiles {} at {}", res, tile_res, target);
            }
        }
    }

    /// Property: a cached reduction reads back unchanged.
    #[test]
    fn prop_reductions_are_stable(
        (res, tile_res) in layout_strategy(),
        seed in pixels_strategy(),
        ulog2 in 0i8..=5,
        vlog2 in 0i8..=5,
    ) {
        let mut b = TextureBuilder::new(MeshType::Quad, DataType::U8, 1);
        b.add_tiled_face(res, tile_res, fill_to(&seed, res.size()));
        let (cache, _) = memory_cache(CacheConfig::default(), &[("s.ptx", b.build())]);
        let reader = cache.get("s.ptx").unwrap();

        let target = Res::new(ulog2.min(res.ulog2), vlog2.min(res.vlog2));
        let first = read_packed(&reader, 0, target);
        let reductions = reader.stats().reductions;
        let second = read_packed(&reader, 0, target);
        prop_assert_eq!(first, second);
        prop_assert_eq!(reader.stats().reductions, reductions);
    }
}
