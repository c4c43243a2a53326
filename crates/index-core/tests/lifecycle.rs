//! End-to-end lifecycle through the facade.

use std::collections::HashSet;

use index_core::facade;
use index_core::{HandleError, IndexHandle, VectorId, EMPTY_ID};

const QUANTIZED_IVF: i32 = 0;
const BINARY_IVF: i32 = 1;
const QUANTIZED_GRAPH: i32 = 2;
const INNER_PRODUCT: i32 = 0;
const L2: i32 = 1;

/// The 4x4x4 lattice `[i % 4, (i / 4) % 4, i / 16]` for `i` in `0..64`.
fn lattice() -> Vec<f32> {
    (0..64)
        .flat_map(|i| [(i % 4) as f32, ((i / 4) % 4) as f32, (i / 16) as f32])
        .collect()
}

fn lattice_ids() -> Vec<VectorId> {
    (1..=64).collect()
}

fn lattice_index() -> IndexHandle {
    let mut handle = facade::create_index(3, 1, 3, 4, QUANTIZED_IVF, L2).unwrap();
    facade::train(&mut handle, &lattice(), QUANTIZED_IVF).unwrap();
    facade::add(&mut handle, &lattice(), &lattice_ids(), QUANTIZED_IVF).unwrap();
    handle
}

/// Eight clusters of 8-dim points, 40 each.
fn clustered() -> Vec<f32> {
    let mut data = Vec::new();
    for cluster in 0..8 {
        for i in 0..40 {
            for d in 0..8 {
                let base = if d == cluster { 10.0 } else { 0.0 };
                data.push(base + (i % 5) as f32 * 0.1 + ((i + d) % 3) as f32 * 0.05);
            }
        }
    }
    data
}

#[test]
fn test_lattice_scenario() {
    let handle = lattice_index();
    assert_eq!(facade::ntotal(&handle, QUANTIZED_IVF).unwrap(), 64);
    assert!(facade::is_trained(&handle, QUANTIZED_IVF).unwrap());

    let results = facade::search(&handle, 5, None, &[1.0, 2.0, 3.0], QUANTIZED_IVF).unwrap();
    assert_eq!(results.ids.len(), 5);
    assert_eq!(results.distances.len(), 5);
    assert_eq!(results.ids[0], 58);
    assert!(results.distances[0].abs() < 1e-3, "distance {}", results.distances[0]);

    let unique: HashSet<VectorId> = results.ids.iter().copied().collect();
    assert_eq!(unique.len(), 5);
    assert!(results.ids.iter().all(|id| (1..=64).contains(id)));
    for pair in results.distances.windows(2) {
        assert!(pair[0] <= pair[1]);
    }

    facade::release(handle);
}

#[test]
fn test_results_are_query_major() {
    let handle = lattice_index();
    let queries = [0.0, 0.0, 0.0, 3.0, 3.0, 3.0];
    let results = facade::search(&handle, 2, None, &queries, QUANTIZED_IVF).unwrap();

    assert_eq!(results.nq(), 2);
    assert_eq!(results.query(0).0[0], 1);
    assert_eq!(results.query(1).0[0], 64);
}

#[test]
fn test_short_results_are_padded() {
    let mut handle = facade::create_index(3, 1, 3, 4, QUANTIZED_IVF, L2).unwrap();
    facade::train(&mut handle, &lattice(), QUANTIZED_IVF).unwrap();
    facade::add(&mut handle, &lattice()[..6], &[10, 20], QUANTIZED_IVF).unwrap();

    let results = facade::search(&handle, 4, None, &[0.0, 0.0, 0.0], QUANTIZED_IVF).unwrap();
    assert_eq!(&results.ids[..2], &[10, 20]);
    assert_eq!(&results.ids[2..], &[EMPTY_ID, EMPTY_ID]);
    assert_eq!(results.hits(0).count(), 2);
}

#[test]
fn test_write_then_load_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lattice.index");
    let handle = lattice_index();
    facade::write_index(&handle, &path, QUANTIZED_IVF).unwrap();

    let loaded = facade::load_index(&path, QUANTIZED_IVF).unwrap();
    let queries = [1.0, 2.0, 3.0, 0.5, 0.5, 0.5, 3.0, 0.0, 1.0];
    let before = facade::search(&handle, 7, None, &queries, QUANTIZED_IVF).unwrap();
    let after = facade::search(&loaded, 7, None, &queries, QUANTIZED_IVF).unwrap();
    assert_eq!(before, after);
    assert_eq!(loaded.origin(), index_core::HandleOrigin::Loaded);

    let err = facade::load_index(&path, BINARY_IVF).unwrap_err();
    assert!(matches!(err, HandleError::FormatMismatch { .. }));
}

#[test]
fn test_removed_ids_never_returned() {
    let mut handle = facade::create_index(8, 8, 4, 4, QUANTIZED_IVF, L2).unwrap();
    let data = clustered();
    let ids: Vec<VectorId> = (0..320).collect();
    facade::train(&mut handle, &data, QUANTIZED_IVF).unwrap();
    facade::add(&mut handle, &data, &ids, QUANTIZED_IVF).unwrap();

    let removed: Vec<VectorId> = (0..320).step_by(3).collect();
    let total = facade::remove(&mut handle, &removed, QUANTIZED_IVF).unwrap();
    assert_eq!(total, 320 - removed.len());
    assert_eq!(facade::remove(&mut handle, &[-5, 10_000], QUANTIZED_IVF).unwrap(), total);

    let removed: HashSet<VectorId> = removed.into_iter().collect();
    let results = facade::search(&handle, 20, Some(8), &data[..8 * 16], QUANTIZED_IVF).unwrap();
    for (id, _) in (0..16).flat_map(|q| results.hits(q).collect::<Vec<_>>()) {
        assert!(!removed.contains(&id), "removed id {id} returned");
    }
}

#[test]
fn test_inner_product_orders_by_negated_score() {
    let mut handle = facade::create_index(8, 4, 4, 4, QUANTIZED_IVF, INNER_PRODUCT).unwrap();
    let data = clustered();
    let ids: Vec<VectorId> = (0..320).collect();
    facade::train(&mut handle, &data, QUANTIZED_IVF).unwrap();
    facade::add(&mut handle, &data, &ids, QUANTIZED_IVF).unwrap();

    let mut query = [0.0f32; 8];
    query[3] = 1.0;
    let results = facade::search(&handle, 5, Some(4), &query, QUANTIZED_IVF).unwrap();
    for (id, distance) in results.hits(0) {
        assert!((120..160).contains(&id), "id {id} is not in cluster 3");
        assert!(distance < -5.0);
    }
}

#[test]
fn test_type_mismatch_leaves_handle_untouched() {
    let mut handle = lattice_index();
    let before = facade::search(&handle, 5, None, &[1.0, 2.0, 3.0], QUANTIZED_IVF).unwrap();

    let mismatch = facade::add(&mut handle, &[0.0; 3], &[99], BINARY_IVF).unwrap_err();
    assert!(matches!(mismatch, HandleError::TypeMismatch { .. }));
    assert!(matches!(
        facade::remove(&mut handle, &[58], QUANTIZED_GRAPH).unwrap_err(),
        HandleError::TypeMismatch { .. }
    ));
    assert_eq!(
        facade::build(&mut handle, 11).unwrap_err(),
        HandleError::UnsupportedMethod(11)
    );

    assert_eq!(handle.ntotal(), 64);
    let after = facade::search(&handle, 5, None, &[1.0, 2.0, 3.0], QUANTIZED_IVF).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_add_before_train_fails_without_side_effects() {
    let mut handle = facade::create_index(3, 1, 3, 4, QUANTIZED_IVF, L2).unwrap();
    let err = facade::add(&mut handle, &lattice(), &lattice_ids(), QUANTIZED_IVF).unwrap_err();
    assert!(matches!(err, HandleError::NativeFailure(_)));
    assert_eq!(handle.ntotal(), 0);
}

#[test]
fn test_graph_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.index");
    let data = clustered();
    let ids: Vec<VectorId> = (1000..1320).collect();

    let mut handle = facade::create_index(8, 0, 4, 4, QUANTIZED_GRAPH, L2).unwrap();
    assert_eq!(facade::add(&mut handle, &data, &ids, QUANTIZED_GRAPH).unwrap(), 320);
    assert!(matches!(
        facade::search(&handle, 3, None, &data[..8], QUANTIZED_GRAPH).unwrap_err(),
        HandleError::NativeFailure(_)
    ));
    assert!(matches!(
        facade::train(&mut handle, &data, QUANTIZED_GRAPH).unwrap_err(),
        HandleError::NotSupportedByVariant { .. }
    ));

    facade::build(&mut handle, QUANTIZED_GRAPH).unwrap();
    assert!(facade::is_trained(&handle, QUANTIZED_GRAPH).unwrap());

    // Point 85 sits in cluster 2, ids 1080..1120.
    let query = &data[85 * 8..86 * 8];
    let results = facade::search(&handle, 5, Some(64), query, QUANTIZED_GRAPH).unwrap();
    assert_eq!(results.distances[0], 0.0);
    for (id, _) in results.hits(0) {
        assert!((1080..1120).contains(&id), "id {id} is not in cluster 2");
    }

    assert_eq!(facade::dimension(&handle, QUANTIZED_GRAPH).unwrap(), 8);
    assert_eq!(facade::get_object(&handle, 1085, QUANTIZED_GRAPH).unwrap(), query);
    assert!(matches!(
        facade::get_object(&handle, 1085, BINARY_IVF).unwrap_err(),
        HandleError::TypeMismatch { .. }
    ));

    let total = facade::remove(&mut handle, &[1085], QUANTIZED_GRAPH).unwrap();
    assert_eq!(total, 319);
    assert!(matches!(
        facade::get_object(&handle, 1085, QUANTIZED_GRAPH).unwrap_err(),
        HandleError::NativeFailure(_)
    ));
    let results = facade::search(&handle, 5, Some(64), query, QUANTIZED_GRAPH).unwrap();
    assert!(results.hits(0).all(|(id, _)| id != 1085));

    facade::write_index(&handle, &path, QUANTIZED_GRAPH).unwrap();
    let loaded = facade::load_index(&path, QUANTIZED_GRAPH).unwrap();
    assert_eq!(
        facade::search(&loaded, 5, Some(64), query, QUANTIZED_GRAPH).unwrap(),
        results
    );
}

#[test]
fn test_binary_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("binary.index");

    // 32-bit codes: bit b of vector i is set when bit (b % 8) of i is set.
    let data: Vec<f32> = (0..256)
        .flat_map(|i: usize| (0..32).map(move |b| if (i >> (b % 8)) & 1 == 1 { 1.0 } else { -1.0 }))
        .collect();
    let ids: Vec<VectorId> = (0..256).collect();

    let mut handle = facade::create_index(32, 4, 0, 0, BINARY_IVF, L2).unwrap();
    facade::train(&mut handle, &data, BINARY_IVF).unwrap();
    facade::add(&mut handle, &data, &ids, BINARY_IVF).unwrap();
    assert!(matches!(
        facade::build(&mut handle, BINARY_IVF).unwrap_err(),
        HandleError::NotSupportedByVariant { .. }
    ));

    let query = &data[17 * 32..18 * 32];
    let bits = facade::get_object(&handle, 17, BINARY_IVF).unwrap();
    assert_eq!(bits.len(), facade::dimension(&handle, BINARY_IVF).unwrap());
    for (bit, &x) in bits.iter().zip(query) {
        assert_eq!(*bit, if x > 0.0 { 1.0 } else { 0.0 });
    }

    let results = facade::search(&handle, 4, Some(4), query, BINARY_IVF).unwrap();
    assert_eq!(results.ids[0], 17);
    assert_eq!(results.distances[0], 0.0);
    for (_, distance) in results.hits(0) {
        assert_eq!(distance.fract(), 0.0);
    }
    // Flipping one bit of the byte flips four bits of the code.
    assert_eq!(results.distances[1], 4.0);

    facade::write_index(&handle, &path, BINARY_IVF).unwrap();
    let loaded = facade::load_index(&path, BINARY_IVF).unwrap();
    assert_eq!(facade::search(&loaded, 4, Some(4), query, BINARY_IVF).unwrap(), results);
}
