use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while parsing the generator
/// image, resolving its export symbols, hosting its allocator, invoking it, and converting or
/// caching its output. Each variant provides specific context about the failure mode to enable
/// appropriate error handling.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or inconsistent executable image
/// - [`Error::OutOfBounds`] - Attempted read beyond the input length
/// - [`Error::NotSupported`] - Unsupported image format or feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::GoblinErr`] - PE header parsing errors from the goblin crate
///
/// ## Resolution Errors
/// - [`Error::SymbolNotFound`] - Required export missing, or its demangled signature does not
///   match the caller's expectation
/// - [`Error::Demangle`] - The encoded symbol name does not follow the expected grammar
///
/// ## Allocator Errors
/// - [`Error::AllocatorExhausted`] - Arena budget exceeded during an invocation
/// - [`Error::UnknownFree`] - Foreign code freed an address no live record tracks
/// - [`Error::HeapOverlap`] - An allocation would overlap a live record
///
/// ## Invocation Errors
/// - [`Error::InvocationFault`] - The foreign routine faulted or reported failure
/// - [`Error::InvocationTimeout`] - The foreign routine exceeded the wall-clock budget
///
/// ## Conversion and Caching
/// - [`Error::Conversion`] - Raw output buffer inconsistent with its declared layout
///
/// ## Resource Errors
/// - [`Error::Backpressure`] - The instance pool bound was exceeded
/// - [`Error::LockError`] - Thread synchronization failure
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust,no_run
/// use terrabridge::{Error, TerrainBridge, BridgeConfig};
///
/// match TerrainBridge::from_file("worldgen.dll".as_ref(), BridgeConfig::default()) {
///     Ok(bridge) => println!("Generator image hosted"),
///     Err(Error::NotSupported) => eprintln!("Image format is not supported"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Image parsing errors
    /// The image is damaged and could not be parsed.
    ///
    /// This error indicates that the executable structure is corrupted or doesn't conform to
    /// the expected PE format. The error includes the source location where the malformation
    /// was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    ///
    /// This is a safety check to prevent buffer overruns when reading malformed or truncated
    /// data; no read beyond the input length ever takes place.
    #[error("Out of bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This image type is not supported.
    ///
    /// Indicates that the input is not a PE executable the bridge can host, or uses features
    /// (e.g. forwarded exports) that are deliberately unsupported.
    #[error("This image type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading the image from disk or while
    /// touching the persistent chunk store.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE header parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    // Resolution errors
    /// A required export could not be resolved.
    ///
    /// Raised both when no export carries the requested undecorated name and when a name match
    /// exists but its demangled signature does not match the signature the invoker expects.
    /// The two cases are deliberately not distinguished at the type level: a wrong overload is
    /// as unusable as a missing symbol.
    #[error("Export '{name}' not resolved - {reason}")]
    SymbolNotFound {
        /// Undecorated name that was requested
        name: String,
        /// Why resolution failed (missing, signature mismatch, outside any section)
        reason: String,
    },

    /// The encoded symbol name does not follow the expected mangling grammar.
    #[error("Cannot demangle '{0}'")]
    Demangle(String),

    // Allocator errors
    /// The foreign call exceeded the arena budget.
    ///
    /// Local to one invocation; the invoker retries once with an enlarged arena before this
    /// error reaches the caller.
    #[error("Allocator exhausted - requested {requested} bytes, {available} available")]
    AllocatorExhausted {
        /// Size of the allocation request that failed
        requested: usize,
        /// Largest satisfiable request at the time of failure
        available: usize,
    },

    /// Foreign code freed an address that no live allocation record tracks.
    ///
    /// Indicates either a resolver/signature mismatch or foreign-code misbehavior; never
    /// treated as a no-op.
    #[error("Free of untracked address {address:#x}")]
    UnknownFree {
        /// The address passed to free
        address: u64,
    },

    /// An allocation would overlap an existing live record.
    #[error("Allocation at {address:#x} ({size} bytes) overlaps a live allocation")]
    HeapOverlap {
        /// Base address of the offending allocation
        address: u64,
        /// Size of the offending allocation
        size: usize,
    },

    // Invocation errors
    /// The foreign routine faulted, panicked at the boundary, or reported a failure status.
    ///
    /// The owning image instance is retired from the pool and never reused.
    #[error("Invocation fault - {reason}")]
    InvocationFault {
        /// Human-readable fault description (status code, trap kind, output inconsistency)
        reason: String,
    },

    /// The foreign routine exceeded the configured wall-clock budget.
    ///
    /// The in-flight call cannot be cancelled; the invocation thread is abandoned and the
    /// owning image instance is retired from the pool.
    #[error("Invocation exceeded the {millis}ms wall-clock budget")]
    InvocationTimeout {
        /// Configured budget in milliseconds
        millis: u64,
    },

    // Conversion errors
    /// The raw output buffer is inconsistent with its declared layout.
    ///
    /// Not retried; a conversion failure indicates a resolver or signature mismatch upstream.
    #[error("Raw terrain buffer inconsistent - {0}")]
    Conversion(String),

    // Resource errors
    /// The instance pool bound was exceeded.
    ///
    /// Raised when all loaded image instances stayed busy for the whole acquire bound; the
    /// request fails instead of queueing unboundedly.
    #[error("Instance pool exhausted after waiting {waited_ms}ms")]
    Backpressure {
        /// How long the request waited before giving up
        waited_ms: u64,
    },

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically when trying to acquire
    /// a mutex or rwlock that is in an invalid state.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping external library
    /// errors with additional context.
    #[error("{0}")]
    Other(String),
}
