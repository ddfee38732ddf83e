//! End-to-end scenarios over the full bridge pipeline: load, resolve, invoke (via the
//! hooked native generator), convert, cache.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{
    column_value, generator_image_bytes, hooked_bridge, image_with_export, native_generator,
};
use terrabridge::chunk::{ChunkSeed, CHUNK_DIM};
use terrabridge::file::File;
use terrabridge::image::{ImageLoader, LoaderConfig};
use terrabridge::invoke::{generator_signature, GenRequest};
use terrabridge::symbols::{SymbolResolver, TypeShape};
use terrabridge::{BridgeConfig, Error};

fn seed(world_seed: u32, x: i32, y: i32) -> ChunkSeed {
    ChunkSeed {
        world_seed,
        x,
        y,
        version: 1,
    }
}

#[test]
fn end_to_end_generation_produces_expected_columns() {
    let bridge = hooked_bridge(BridgeConfig::default());
    let key = seed(42, 3, 7);

    let chunk = bridge.generate(key).unwrap();

    // The converter transposes the generator's column-major output into row-major order
    for (row, col) in [(0usize, 0usize), (5, 2), (2, 5), (CHUNK_DIM - 1, 11)] {
        assert_eq!(
            chunk.column(row, col),
            column_value(&key, col as u32, row as u32),
            "column ({}, {})",
            row,
            col
        );
    }
}

#[test]
fn repeated_generation_is_byte_identical() {
    // Scenario: requesting chunk (seed=42, x=3, y=7, version=1) twice against the same
    // loaded instance returns identical payload bytes and headers.
    let bridge = hooked_bridge(BridgeConfig::default());
    let key = seed(42, 3, 7);

    let first = bridge.generate(key).unwrap();
    bridge.invalidate(&key); // force the second run through the generator again
    let second = bridge.generate(key).unwrap();

    assert_eq!(first.payload(), second.payload());
    assert_eq!(first.encode(), second.encode());
}

#[test]
fn cache_serves_repeat_requests_without_invoking() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_generator(request: &GenRequest, out: &mut *mut u8) -> i32 {
        CALLS.fetch_add(1, Ordering::SeqCst);
        native_generator(request, out)
    }

    let bridge = terrabridge::TerrainBridge::from_bytes(
        generator_image_bytes(),
        BridgeConfig::default(),
    )
    .unwrap();
    bridge.hooks().register("GenerateChunk", counting_generator);

    let key = seed(7, 0, 0);
    let first = bridge.generate(key).unwrap();
    let second = bridge.generate(key).unwrap();

    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(first.payload(), second.payload());
    assert_eq!(bridge.cached_chunks(), 1);
}

#[test]
fn resolution_checks_the_expected_signature() {
    // Scenario: resolving "GenerateChunk" succeeds at its in-section offset, and fails
    // with a symbol error when the caller expects a different overload.
    let file = File::from_mem(image_with_export(common::generator_mangled_name())).unwrap();
    let image = ImageLoader::with_config(
        LoaderConfig::new().with_base_address(u64::from(common::IMAGE_BASE)),
    )
    .load(&file)
    .unwrap();
    let resolver = SymbolResolver::new();

    let symbol = resolver
        .resolve(&image, "GenerateChunk", &generator_signature())
        .unwrap();
    assert_eq!(symbol.section, ".text");
    assert_eq!(symbol.rva, common::GENERATOR_RVA);
    assert_eq!(
        symbol.address,
        u64::from(common::IMAGE_BASE) + u64::from(common::GENERATOR_RVA)
    );

    let mut wider = generator_signature();
    wider.params.push(TypeShape::Int);
    let err = resolver.resolve(&image, "GenerateChunk", &wider).unwrap_err();
    assert!(matches!(err, Error::SymbolNotFound { .. }));
}

#[test]
fn timeout_retires_the_instance_and_recovery_uses_a_fresh_one() {
    // Scenario: an invocation that exceeds the timeout yields a timeout error, and a
    // subsequent request draws a freshly loaded instance rather than reusing the retired
    // one.
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn slow_first_generator(request: &GenRequest, out: &mut *mut u8) -> i32 {
        if CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(400));
        }
        native_generator(request, out)
    }

    let mut config = BridgeConfig::default();
    config.pool_capacity = 1;
    config.invoke_timeout = Duration::from_millis(50);

    let bridge =
        terrabridge::TerrainBridge::from_bytes(generator_image_bytes(), config).unwrap();
    bridge.hooks().register("GenerateChunk", slow_first_generator);

    let err = bridge.generate(seed(1, 0, 0)).unwrap_err();
    assert!(matches!(err, Error::InvocationTimeout { millis: 50 }));
    assert_eq!(bridge.live_instances(), 0);

    // The retired instance is gone; the next request loads and uses a fresh one
    let chunk = bridge.generate(seed(1, 0, 0)).unwrap();
    assert_eq!(chunk.seed(), &seed(1, 0, 0));
    assert_eq!(bridge.live_instances(), 1);
}

#[test]
fn fault_is_scoped_to_the_request() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn faulty_first_generator(request: &GenRequest, out: &mut *mut u8) -> i32 {
        if CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
            return 99;
        }
        native_generator(request, out)
    }

    let bridge = terrabridge::TerrainBridge::from_bytes(
        generator_image_bytes(),
        BridgeConfig::default(),
    )
    .unwrap();
    bridge.hooks().register("GenerateChunk", faulty_first_generator);

    let err = bridge.generate(seed(2, 1, 1)).unwrap_err();
    assert!(matches!(err, Error::InvocationFault { .. }));

    // The host survives and the next request succeeds on a fresh instance
    assert!(bridge.generate(seed(2, 1, 1)).is_ok());
}

#[test]
fn pool_exhaustion_is_backpressure_not_queueing() {
    fn slow_generator(request: &GenRequest, out: &mut *mut u8) -> i32 {
        std::thread::sleep(Duration::from_millis(400));
        native_generator(request, out)
    }

    let mut config = BridgeConfig::default();
    config.pool_capacity = 1;
    config.acquire_timeout = Duration::from_millis(50);
    config.invoke_timeout = Duration::from_secs(5);

    let bridge = Arc::new(
        terrabridge::TerrainBridge::from_bytes(generator_image_bytes(), config).unwrap(),
    );
    bridge.hooks().register("GenerateChunk", slow_generator);

    let busy = {
        let bridge = bridge.clone();
        std::thread::spawn(move || bridge.generate(seed(3, 0, 0)))
    };
    std::thread::sleep(Duration::from_millis(100));

    let err = bridge.generate(seed(3, 1, 0)).unwrap_err();
    assert!(matches!(err, Error::Backpressure { .. }));

    assert!(busy.join().unwrap().is_ok());
}

#[test]
fn concurrent_requests_match_sequential_results() {
    let keys: Vec<ChunkSeed> = (0..4).map(|i| seed(9, i, -i)).collect();

    // Sequential reference results against one pool
    let sequential = hooked_bridge(BridgeConfig::default());
    let expected: Vec<Vec<u8>> = keys
        .iter()
        .map(|key| sequential.generate(*key).unwrap().payload().to_vec())
        .collect();

    // The same requests concurrently against a pool of matching size
    let mut config = BridgeConfig::default();
    config.pool_capacity = 4;
    let concurrent = Arc::new(
        terrabridge::TerrainBridge::from_bytes(generator_image_bytes(), config).unwrap(),
    );
    concurrent.hooks().register("GenerateChunk", native_generator);

    let handles: Vec<_> = keys
        .iter()
        .map(|key| {
            let bridge = concurrent.clone();
            let key = *key;
            std::thread::spawn(move || bridge.generate(key).unwrap().payload().to_vec())
        })
        .collect();

    for (handle, expected) in handles.into_iter().zip(expected) {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn persistent_store_survives_bridge_restarts() {
    fn refusing_generator(_request: &GenRequest, _out: &mut *mut u8) -> i32 {
        27
    }

    let dir = std::env::temp_dir().join("terrabridge_it_store");
    let _ = std::fs::remove_dir_all(&dir);

    let mut config = BridgeConfig::default();
    config.cache_dir = Some(dir.clone());

    let key = seed(11, 4, -2);
    let original = {
        let bridge = hooked_bridge(config.clone());
        bridge.generate(key).unwrap().payload().to_vec()
    };

    // A fresh bridge whose generator refuses to run can still serve from the store
    let bridge =
        terrabridge::TerrainBridge::from_bytes(generator_image_bytes(), config).unwrap();
    bridge.hooks().register("GenerateChunk", refusing_generator);

    let chunk = bridge.generate(key).unwrap();
    assert_eq!(chunk.payload(), &original[..]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn capabilities_report_the_build_selection() {
    let bridge = hooked_bridge(BridgeConfig::default());
    let caps = bridge.capabilities();

    assert_eq!(caps.vector_conversion, cfg!(feature = "vector"));
    assert_eq!(caps.convention, generator_signature().convention);
}
