//! Parser robustness over truncated and corrupted generator images, and allocator safety
//! under adversarial call sequences - none of these may ever read past the input or crash
//! the process; they must fail with typed errors.

mod common;

use common::generator_image_bytes;
use terrabridge::heap::{AllocatorShim, HeapBackend, QuotaAllocator};
use terrabridge::{BridgeConfig, Error, TerrainBridge};

fn try_load(bytes: Vec<u8>) -> Result<TerrainBridge, Error> {
    TerrainBridge::from_bytes(bytes, BridgeConfig::default())
}

#[test]
fn empty_and_garbage_inputs_are_rejected() {
    assert!(try_load(Vec::new()).is_err());
    assert!(try_load(vec![0u8; 64]).is_err());
    assert!(try_load(b"MZ".to_vec()).is_err());
    assert!(try_load(b"this is not an executable image at all".to_vec()).is_err());
}

#[test]
fn every_truncation_point_is_rejected_cleanly() {
    let full = generator_image_bytes();

    // Sweep truncation points across every structural boundary: DOS header, PE header,
    // optional header, section table, section data, export data, relocation data.
    let mut cut = 0;
    while cut < full.len() {
        let truncated = full[..cut].to_vec();
        assert!(
            try_load(truncated).is_err(),
            "truncation at {:#x} must not produce a usable bridge",
            cut
        );
        cut += 0x40;
    }
}

#[test]
fn corrupted_headers_are_rejected() {
    let full = generator_image_bytes();

    // PE signature destroyed
    let mut broken = full.clone();
    broken[0x80..0x84].copy_from_slice(b"XX\0\0");
    assert!(try_load(broken).is_err());

    // e_lfanew pointing far outside the file
    let mut broken = full.clone();
    broken[0x3C..0x40].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
    assert!(try_load(broken).is_err());

    // Absurd section count
    let mut broken = full.clone();
    broken[0x86..0x88].copy_from_slice(&0xFFFFu16.to_le_bytes());
    assert!(try_load(broken).is_err());

    // Declared image size of zero
    let mut broken = full.clone();
    let size_of_image_offset = 0x80 + 4 + 20 + 56;
    broken[size_of_image_offset..size_of_image_offset + 4]
        .copy_from_slice(&0u32.to_le_bytes());
    assert!(try_load(broken).is_err());
}

#[test]
fn export_count_corruption_is_rejected() {
    let full = generator_image_bytes();

    // NumberOfNames at .edata file offset 0x600 + 24
    let mut broken = full;
    broken[0x618..0x61C].copy_from_slice(&0x0200_0000u32.to_le_bytes());
    assert!(try_load(broken).is_err());
}

#[test]
fn allocator_invariants_hold_under_adversarial_sequences() {
    let shim = AllocatorShim::with_arena(16 * 1024);

    let mut live = Vec::new();
    for round in 0..8 {
        for size in [1usize, 3, 16, 255, 1024] {
            if let Ok(address) = shim.allocate(size, 16) {
                live.push(address);
            }
        }
        // Free a prefix in insertion order, then attack with bad frees
        let drain = live.len() / 2;
        for address in live.drain(..drain) {
            shim.free(address).unwrap();
            assert!(matches!(
                shim.free(address),
                Err(Error::UnknownFree { .. })
            ));
        }
        assert!(shim.free(0x1).is_err());
        let _ = shim.take_fault();

        // No two live records may overlap, in any round
        let mut records = shim.live_records();
        records.sort_by_key(|record| record.address);
        for pair in records.windows(2) {
            assert!(
                pair[0].address + pair[0].size as u64 <= pair[1].address,
                "round {}: {:?} overlaps {:?}",
                round,
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn exhaustion_never_grows_unbounded() {
    let mut quota = QuotaAllocator::new(8 * 1024, usize::MAX);
    let before = quota.capacity();

    let mut served = 0;
    while quota.allocate(512, 16).is_ok() {
        served += 1;
        assert!(served < 1024, "allocator must exhaust, not grow");
    }

    assert_eq!(quota.capacity(), before);
    assert!(matches!(
        quota.allocate(512, 16),
        Err(Error::AllocatorExhausted { .. })
    ));
}
