//! Native hook registry for generation entry points.
//!
//! A hook lets a host-native routine stand in for a named export: when the invoker dispatches
//! a symbol with a registered hook, the hook runs instead of the foreign code, under exactly
//! the same contract - the installed allocator serves its allocations, the output pointer is
//! validated against live allocation records, and a non-zero return is an invocation fault.
//!
//! Hooks exist for the test suite (a synthetic generator standing in for the real binary) and
//! for platform bring-up, where the foreign routine is stubbed while the surrounding plumbing
//! is validated.

use dashmap::DashMap;

use crate::invoke::convention::GenRequest;

/// A host-native routine standing in for the foreign generation entry point.
///
/// Receives the marshalled request and an out-slot for the output buffer's base address.
/// The contract mirrors the foreign one: allocate through the installed allocator (e.g.
/// [`crate::heap::bridge_alloc`]), write the raw chunk, store the base pointer, return zero.
pub type NativeGeneratorFn = fn(request: &GenRequest, out: &mut *mut u8) -> i32;

/// Registry mapping undecorated export names to native stand-ins.
///
/// Uses a concurrent map; registration and lookup are safe from any thread. Lookups are on
/// the invocation path but the map is tiny, so contention is not a concern.
#[derive(Default)]
pub struct NativeHooks {
    hooks: DashMap<String, NativeGeneratorFn>,
}

impl NativeHooks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        NativeHooks {
            hooks: DashMap::new(),
        }
    }

    /// Registers `hook` for the undecorated export `name`, replacing any previous hook.
    pub fn register(&self, name: &str, hook: NativeGeneratorFn) {
        self.hooks.insert(name.to_string(), hook);
    }

    /// Removes the hook for `name`, if one was registered.
    pub fn unregister(&self, name: &str) {
        self.hooks.remove(name);
    }

    /// Looks up the hook registered for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<NativeGeneratorFn> {
        self.hooks.get(name).map(|entry| *entry.value())
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(_request: &GenRequest, _out: &mut *mut u8) -> i32 {
        7
    }

    #[test]
    fn register_lookup_unregister() {
        let hooks = NativeHooks::new();
        assert!(hooks.is_empty());

        hooks.register("GenerateChunk", stub);
        assert_eq!(hooks.len(), 1);

        let hook = hooks.lookup("GenerateChunk").unwrap();
        let request = GenRequest {
            world_seed: 0,
            chunk_x: 0,
            chunk_y: 0,
            version: 0,
        };
        let mut out = std::ptr::null_mut();
        assert_eq!(hook(&request, &mut out), 7);

        hooks.unregister("GenerateChunk");
        assert!(hooks.lookup("GenerateChunk").is_none());
    }
}
