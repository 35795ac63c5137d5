//! Concurrent access tests
//!
//! Many threads share one cache: first opens and cold reductions must run
//! once, and eviction under memory pressure must never change results or
//! leak objects.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{memory_cache, pattern, read_packed, TextureBuilder};
use ptex_cache::{CacheConfig, DataType, MeshType, Res};

fn texture(seed: u8) -> Vec<u8> {
    let mut b = TextureBuilder::new(MeshType::Quad, DataType::U8, 2);
    b.add_face(Res::new(3, 3), pattern(Res::new(3, 3), 2, seed));
    b.add_tiled_face(Res::new(4, 3), Res::new(2, 2), pattern(Res::new(4, 3), 2, seed + 1));
    b.add_face(Res::new(2, 4), pattern(Res::new(2, 4), 2, seed + 2));
    b.build()
}

#[test]
fn test_concurrent_first_open_happens_once() {
    let (cache, store) = memory_cache(CacheConfig::default(), &[("shared.ptx", texture(1))]);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let reader = cache.get("shared.ptx").unwrap();
                reader.num_faces()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
    assert_eq!(store.open_count("shared.ptx"), 1);
    assert_eq!(cache.stats().counters.files_opened, 1);
}

#[test]
fn test_cold_reduction_is_built_once() {
    let mut b = TextureBuilder::new(MeshType::Quad, DataType::U8, 1);
    b.add_face(Res::new(3, 3), pattern(Res::new(3, 3), 1, 4));
    let (cache, _) = memory_cache(CacheConfig::default(), &[("cold.ptx", b.build())]);
    let reader = cache.get("cold.ptx").unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let reader = reader.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                read_packed(&reader, 0, Res::new(2, 2))
            })
        })
        .collect();

    let results: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(reader.stats().reductions, 1);
    assert_eq!(reader.stats().face_loads, 1);
}

#[test]
fn test_eviction_under_pressure_keeps_results_and_accounting() {
    let files: Vec<(String, Vec<u8>)> = (0..3)
        .map(|i| (format!("t{}.ptx", i), texture(10 * i as u8)))
        .collect();
    let targets = [
        Res::new(3, 3),
        Res::new(2, 2),
        Res::new(1, 2),
        Res::new(2, 0),
        Res::new(1, 1),
    ];

    // Reference results from an unconstrained cache
    let named: Vec<(&str, Vec<u8>)> = files.iter().map(|(p, d)| (p.as_str(), d.clone())).collect();
    let (reference, _) = memory_cache(CacheConfig::default(), &named);
    let mut expected = HashMap::new();
    for (path, _) in &files {
        let reader = reference.get(path).unwrap();
        for face in 0..3 {
            for target in targets {
                let full = reader.face_info(face).unwrap().res;
                let target = Res::new(target.ulog2.min(full.ulog2), target.vlog2.min(full.vlog2));
                expected.insert((path.clone(), face, target), read_packed(&reader, face, target));
            }
        }
    }
    let expected = Arc::new(expected);

    let config = CacheConfig {
        max_files: 2,
        max_mem: 256,
        ..CacheConfig::default()
    };
    let (cache, _) = memory_cache(config, &named);
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6usize)
        .map(|t| {
            let cache = cache.clone();
            let expected = expected.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200usize {
                    let path = format!("t{}.ptx", (t + i) % 3);
                    let reader = cache.get(&path).unwrap();
                    let face = ((t * 7 + i) % 3) as u32;
                    let full = reader.face_info(face).unwrap().res;
                    let target = targets[(t + i * 3) % targets.len()];
                    let target = Res::new(target.ulog2.min(full.ulog2), target.vlog2.min(full.vlog2));
                    let got = read_packed(&reader, face, target);
                    assert_eq!(&got, &expected[&(path, face, target)]);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let counters = cache.stats().counters;
    assert!(counters.data_evictions + counters.file_evictions > 0);

    cache.purge_all();
    let stats = cache.stats();
    assert_eq!(stats.tracked_objects, 0);
    assert_eq!(stats.counters.objects_created, stats.counters.objects_destroyed);
}
