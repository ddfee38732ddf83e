//! Invocation boundary around the foreign generation routine.
//!
//! [`TerrainInvoker`] is the only place where control ever crosses into code the bridge did
//! not compile. Everything around that crossing is defensive:
//!
//! - the request is marshalled into the exact layout the foreign routine expects
//!   ([`crate::invoke::GenRequest`])
//! - the instance's [`crate::heap::AllocatorShim`] is installed for the duration of the call,
//!   so every foreign allocation is served and tracked by the bridge
//! - the call runs on a dedicated invocation thread, bounded by a wall-clock timeout; a
//!   timeout abandons the thread (the call cannot be cancelled) and the owning instance is
//!   retired by the pool
//! - panics trapped at the boundary, non-zero foreign status, latched allocator misuse, and
//!   an output pointer that is not the base of a live allocation record all surface as
//!   [`crate::Error::InvocationFault`]
//! - arena exhaustion is retried once with an enlarged arena before failing the request
//!
//! The output-buffer contract is fixed (see [`crate::invoke::convention`]): the callee
//! allocates through the installed allocator and the bridge copies the bytes out and frees
//! the record afterwards.
//!
//! # Key Components
//!
//! - [`TerrainInvoker`] / [`InvokeConfig`] - The invocation boundary
//! - [`RawBuffer`] - The captured foreign output
//! - [`NativeHooks`] - Host-native stand-ins for named exports
//! - [`convention`] - Calling-convention selection and marshalling

pub mod convention;

mod hooks;

pub use convention::{
    foreign_convention, generator_signature, GenRequest, RawGeneratorFn, GENERATOR_SYMBOL,
};
pub use hooks::{NativeGeneratorFn, NativeHooks};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::{
    chunk::ChunkSeed,
    heap::AllocatorShim,
    image::TerrainImage,
    symbols::ExportSymbol,
    Error::{self, AllocatorExhausted, InvocationFault, InvocationTimeout},
    Result,
};

/// Raw output captured from one foreign generation call.
///
/// An exact copy of the allocation the foreign routine returned: its declared header plus the
/// payload, still in the foreign layout. [`crate::chunk::convert`] validates and transforms
/// it into the host representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBuffer {
    bytes: Vec<u8>,
}

impl RawBuffer {
    /// Wraps captured bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        RawBuffer { bytes }
    }

    /// The captured bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the captured bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Configuration of the invocation boundary.
#[derive(Clone, Debug)]
pub struct InvokeConfig {
    /// Wall-clock budget for one foreign call.
    pub timeout: Duration,

    /// Extra arena capacity added before the single exhaustion retry.
    pub arena_retry_extra: usize,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        InvokeConfig {
            timeout: Duration::from_secs(10),
            arena_retry_extra: 8 * 1024 * 1024,
        }
    }
}

/// What one invocation dispatches to.
enum Target {
    /// A registered host-native stand-in.
    Hook(NativeGeneratorFn),
    /// The resolved foreign entry point address.
    Raw(u64),
}

/// Result message from the invocation thread.
enum WorkerResult {
    /// The call returned; foreign status and the output pointer it stored.
    Returned { status: i32, out: u64 },
    /// A panic was trapped at the boundary.
    Panicked,
}

/// The invocation boundary around the resolved generation entry point.
///
/// One invoker serves any number of instances; all per-instance state lives in the instance's
/// shim and image. Calls are synchronous from the caller's perspective.
pub struct TerrainInvoker {
    config: InvokeConfig,
    hooks: Arc<NativeHooks>,
}

impl TerrainInvoker {
    /// Creates an invoker with the given configuration and hook registry.
    #[must_use]
    pub fn new(config: InvokeConfig, hooks: Arc<NativeHooks>) -> Self {
        TerrainInvoker { config, hooks }
    }

    /// Invokes the generation routine for `seed` and captures its output.
    ///
    /// Installs `shim` for the duration of the call, dispatches to a registered hook or to
    /// the resolved address, enforces the wall-clock timeout, and validates the returned
    /// buffer against the live allocation records before copying it out.
    ///
    /// On [`crate::Error::AllocatorExhausted`] the arena is enlarged once and the call
    /// retried; all other failures surface immediately.
    ///
    /// # Arguments
    /// * `image`  - The mapped image owning the entry point
    /// * `symbol` - The resolved, signature-verified entry point
    /// * `shim`   - The instance's allocator shim
    /// * `seed`   - The generation request
    ///
    /// # Errors
    /// [`crate::Error::InvocationFault`] or [`crate::Error::InvocationTimeout`] retire the
    /// owning instance; [`crate::Error::AllocatorExhausted`] (after the retry) does not.
    pub fn generate(
        &self,
        image: &TerrainImage,
        symbol: &ExportSymbol,
        shim: &AllocatorShim,
        seed: &ChunkSeed,
    ) -> Result<RawBuffer> {
        match self.call_once(image, symbol, shim, seed) {
            Err(AllocatorExhausted { .. }) => {
                shim.enlarge(self.config.arena_retry_extra);
                self.call_once(image, symbol, shim, seed)
            }
            other => other,
        }
    }

    /// One dispatch attempt, without the exhaustion retry.
    fn call_once(
        &self,
        image: &TerrainImage,
        symbol: &ExportSymbol,
        shim: &AllocatorShim,
        seed: &ChunkSeed,
    ) -> Result<RawBuffer> {
        let target = match self.hooks.lookup(&symbol.name) {
            Some(hook) => Target::Hook(hook),
            None => {
                // The resolver established this invariant; re-check before transmuting.
                let offset = symbol.address.wrapping_sub(image.base_address());
                if offset >= image.size_of_image() {
                    return Err(InvocationFault {
                        reason: format!(
                            "entry address {:#x} outside the mapped image",
                            symbol.address
                        ),
                    });
                }
                Target::Raw(symbol.address)
            }
        };

        let request = GenRequest::from_seed(seed);
        let worker_shim = shim.clone();
        let (sender, receiver) = mpsc::channel();

        std::thread::Builder::new()
            .name("terrabridge-invoke".to_string())
            .spawn(move || {
                let _installed = worker_shim.install();
                let mut out: *mut u8 = std::ptr::null_mut();

                let outcome = catch_unwind(AssertUnwindSafe(|| match target {
                    Target::Hook(hook) => hook(&request, &mut out),
                    Target::Raw(address) => {
                        // SAFETY: the address was resolved into an executable mapped
                        // section of `image`, whose buffer outlives this call unless the
                        // call times out - in which case the instance is abandoned, not
                        // freed. The signature was verified against the demangled export.
                        let entry: RawGeneratorFn =
                            unsafe { std::mem::transmute(address as usize) };
                        unsafe {
                            entry(
                                request.world_seed,
                                request.chunk_x,
                                request.chunk_y,
                                request.version,
                                &mut out,
                            )
                        }
                    }
                }));

                let message = match outcome {
                    Ok(status) => WorkerResult::Returned {
                        status,
                        out: out as u64,
                    },
                    Err(_) => WorkerResult::Panicked,
                };
                let _ = sender.send(message);
            })
            .map_err(Error::FileError)?;

        let message = match receiver.recv_timeout(self.config.timeout) {
            Ok(message) => message,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The foreign call cannot be cancelled; the thread is abandoned and the
                // owning instance must be retired. The shim is left untouched - the
                // runaway call may still be using the arena.
                return Err(InvocationTimeout {
                    millis: self.config.timeout.as_millis() as u64,
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(InvocationFault {
                    reason: "invocation thread terminated without reporting".to_string(),
                });
            }
        };

        let (status, out) = match message {
            WorkerResult::Returned { status, out } => (status, out),
            WorkerResult::Panicked => {
                let _ = shim.reset();
                return Err(InvocationFault {
                    reason: "panic trapped at the invocation boundary".to_string(),
                });
            }
        };

        if let Some(fault) = shim.take_fault() {
            let _ = shim.reset();
            return Err(match fault {
                exhausted @ AllocatorExhausted { .. } => exhausted,
                other => InvocationFault {
                    reason: other.to_string(),
                },
            });
        }

        if status != 0 {
            let _ = shim.reset();
            return Err(InvocationFault {
                reason: format!("foreign routine returned status {}", status),
            });
        }

        if out == 0 {
            let _ = shim.reset();
            return Err(InvocationFault {
                reason: "foreign routine reported success but stored no output pointer"
                    .to_string(),
            });
        }

        let Some(record) = shim.record_containing(out) else {
            let _ = shim.reset();
            return Err(InvocationFault {
                reason: format!("output pointer {:#x} is not inside a live allocation", out),
            });
        };

        if record.address != out {
            let _ = shim.reset();
            return Err(InvocationFault {
                reason: format!(
                    "output pointer {:#x} is interior to the allocation at {:#x}",
                    out, record.address
                ),
            });
        }

        // SAFETY: the record is live and spans [address, address + size); the arena backing
        // it is kept alive by the shim for at least the duration of this borrow.
        let bytes = unsafe {
            std::slice::from_raw_parts(record.address as *const u8, record.size).to_vec()
        };

        shim.reset()?;

        Ok(RawBuffer::new(bytes))
    }
}
