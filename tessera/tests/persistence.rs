//! End-to-end persistence tests across all three precisions.
//!
//! 1. Registry and top-k ordering survive close → open
//! 2. Deleted identifiers stay excluded after reopen
//! 3. Capacity growth across reopen
//! 4. On-disk artifacts per precision

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tessera::index::persist::{graph_path, mapping_path, read_mapping};
use tessera::{IndexConfig, Precision, VectorIndexManager};

const DIM: usize = 16;
const PRECISIONS: [Precision; 3] = [Precision::Full, Precision::Half, Precision::Quant8];

// ═══════════════════════════════════════════════════════════════════════════
// Test helpers
// ═══════════════════════════════════════════════════════════════════════════

fn temp_dir(name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "tessera-persist-{name}-{}-{now}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn lcg_next(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    let bits = u32::try_from(*state >> 40).unwrap_or(0);
    (bits as f32 / (1_u32 << 24) as f32).mul_add(2.0, -1.0)
}

fn random_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed;
    (0..count)
        .map(|_| (0..DIM).map(|_| lcg_next(&mut state)).collect())
        .collect()
}

fn small_floor() -> IndexConfig {
    IndexConfig {
        rebuild_capacity_floor: 16,
        ..IndexConfig::default()
    }
}

fn populate(dir: &Path, precision: Precision, vectors: &[Vec<f32>]) -> VectorIndexManager {
    let index = VectorIndexManager::create_with_config(dir, DIM, 32, precision, small_floor())
        .expect("create index");
    for (i, vector) in vectors.iter().enumerate() {
        index.add(&format!("doc-{i}"), vector).expect("add");
    }
    index
}

fn top_ids(index: &VectorIndexManager, query: &[f32], k: usize) -> Vec<String> {
    index
        .search(query, k)
        .expect("search")
        .into_iter()
        .map(|hit| hit.identifier)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// 1. Round trip
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn reopen_preserves_registry_and_nearest_neighbour() {
    let vectors = random_vectors(120, 7);
    for precision in PRECISIONS {
        let dir = temp_dir(precision.as_str());
        let index = populate(&dir, precision, &vectors);
        let before: Vec<Vec<String>> = vectors.iter().map(|v| top_ids(&index, v, 1)).collect();
        let labels_before: Vec<Option<u64>> = (0..vectors.len())
            .map(|i| index.label_of(&format!("doc-{i}")).expect("label"))
            .collect();
        index.close().expect("close");

        let reopened =
            VectorIndexManager::open_with_config(&dir, DIM, small_floor()).expect("reopen");
        assert_eq!(reopened.precision(), precision);
        assert_eq!(reopened.live_count().expect("live"), vectors.len());
        for (i, vector) in vectors.iter().enumerate() {
            let id = format!("doc-{i}");
            assert_eq!(reopened.label_of(&id).expect("label"), labels_before[i]);
            let after = top_ids(&reopened, vector, 1);
            assert_eq!(after, before[i], "{precision}: top-1 for {id} changed");
            assert_eq!(after, vec![id]);
        }
        reopened.close().expect("close");
        let _ = std::fs::remove_dir_all(&dir);
    }
}

#[test]
fn reopen_similarities_stay_within_precision_tolerance() {
    let vectors = random_vectors(40, 99);
    let query = random_vectors(1, 12_345).remove(0);
    for (precision, tolerance) in [
        (Precision::Full, 1e-5),
        (Precision::Half, 5e-3),
        (Precision::Quant8, 2e-2),
    ] {
        let dir = temp_dir(&format!("tol-{precision}"));
        let index = populate(&dir, precision, &vectors);
        let before = index.search(&query, 5).expect("search before");
        index.close().expect("close");

        let reopened =
            VectorIndexManager::open_with_config(&dir, DIM, small_floor()).expect("reopen");
        for hit in &before {
            let after = reopened
                .search(&query, vectors.len())
                .expect("search after")
                .into_iter()
                .find(|candidate| candidate.identifier == hit.identifier)
                .expect("hit survives reopen");
            assert!(
                (after.similarity - hit.similarity).abs() <= tolerance,
                "{precision}: {} moved from {} to {}",
                hit.identifier,
                hit.similarity,
                after.similarity
            );
        }
        reopened.close().expect("close");
        let _ = std::fs::remove_dir_all(&dir);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Deleted-entry exclusion
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn deleted_identifier_never_returned_after_reopen() {
    let vectors = random_vectors(30, 3);
    for precision in PRECISIONS {
        let dir = temp_dir(&format!("delete-{precision}"));
        let index = populate(&dir, precision, &vectors);
        index.delete("doc-0").expect("delete");
        index.add("doc-1", &vectors[0]).expect("update doc-1 onto doc-0's vector");
        index.close().expect("close");

        let reopened =
            VectorIndexManager::open_with_config(&dir, DIM, small_floor()).expect("reopen");
        assert!(!reopened.contains("doc-0").expect("contains"));
        assert_eq!(reopened.slot_count().expect("slots"), vectors.len() + 1);

        for query in &vectors {
            let ids = top_ids(&reopened, query, vectors.len());
            assert!(!ids.iter().any(|id| id == "doc-0"), "{precision}: doc-0 resurfaced");
            assert!(ids.iter().filter(|id| *id == "doc-1").count() <= 1);
        }
        assert_eq!(top_ids(&reopened, &vectors[0], 1), vec!["doc-1".to_owned()]);
        reopened.close().expect("close");
        let _ = std::fs::remove_dir_all(&dir);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Capacity growth
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn inserts_beyond_initial_capacity_survive_reopen() {
    let vectors = random_vectors(50, 42);
    for precision in PRECISIONS {
        let dir = temp_dir(&format!("grow-{precision}"));
        let index = VectorIndexManager::create_with_config(&dir, DIM, 4, precision, small_floor())
            .expect("create");
        for (i, vector) in vectors.iter().enumerate() {
            index.add(&format!("doc-{i}"), vector).expect("add past capacity");
        }
        assert_eq!(index.capacity().expect("capacity"), 64);
        index.close().expect("close");

        let reopened =
            VectorIndexManager::open_with_config(&dir, DIM, small_floor()).expect("reopen");
        assert!(reopened.capacity().expect("capacity") >= vectors.len());
        for (i, vector) in vectors.iter().enumerate() {
            assert_eq!(top_ids(&reopened, vector, 1), vec![format!("doc-{i}")]);
        }
        reopened
            .add("late", &vectors[0])
            .expect("add after reopen");
        assert_eq!(reopened.label_of("late").expect("label"), Some(50));
        reopened.close().expect("close");
        let _ = std::fs::remove_dir_all(&dir);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 4. On-disk artifacts
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn each_precision_writes_its_own_artifacts() {
    let vectors = random_vectors(5, 1);
    for (precision, record_bytes) in [
        (Precision::Full, None),
        (Precision::Half, Some(DIM * 2)),
        (Precision::Quant8, Some(4 + DIM)),
    ] {
        let dir = temp_dir(&format!("files-{precision}"));
        let index = populate(&dir, precision, &vectors);
        index.delete("doc-2").expect("delete");
        index.close().expect("close");

        let (stored, registry) = read_mapping(&mapping_path(&dir)).expect("mapping");
        assert_eq!(stored, precision);
        assert_eq!(registry.slot_count(), 5);
        assert_eq!(registry.live_count(), 4);
        assert_eq!(graph_path(&dir).exists(), precision == Precision::Full);

        let vector_file = dir.join(match precision {
            Precision::Full => "vectors.f32",
            Precision::Half => "vectors.f16",
            Precision::Quant8 => "vectors.i8",
        });
        match record_bytes {
            None => assert!(!vector_file.exists()),
            Some(stride) => {
                let len = std::fs::metadata(&vector_file).expect("vector file").len();
                assert_eq!(len, (8 + 5 * stride) as u64);
                let bytes = std::fs::read(&vector_file).expect("read");
                let tombstone = &bytes[8 + 2 * stride..8 + 3 * stride];
                assert!(tombstone.iter().all(|&b| b == 0), "tombstone record is zeroed");
            }
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
