//! Build-time capability selection point.
//!
//! The packaging configuration - not this crate - decides which CPU and OS variants a build
//! targets: the `vector` cargo feature selects the wide conversion path, and the host
//! OS/architecture `cfg` selects the foreign calling-convention variant (see
//! [`crate::invoke::convention`]). This module exposes what was selected, so the embedding
//! server can log it and the packaging layer can assert it built what it intended.

use crate::invoke::foreign_convention;
use crate::symbols::CallingConvention;

/// The capability selection compiled into this build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the wide (`vector` feature) conversion path is compiled in.
    pub vector_conversion: bool,

    /// Host operating system the build targets.
    pub host_os: &'static str,

    /// Host CPU architecture the build targets.
    pub host_arch: &'static str,

    /// Calling convention expected of the foreign entry point on this target.
    pub convention: CallingConvention,
}

/// Reports the capabilities compiled into this build.
#[must_use]
pub fn detect() -> Capabilities {
    Capabilities {
        vector_conversion: cfg!(feature = "vector"),
        host_os: std::env::consts::OS,
        host_arch: std::env::consts::ARCH,
        convention: foreign_convention(),
    }
}
