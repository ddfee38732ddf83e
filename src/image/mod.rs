//! Loading and mapping of the generator executable image.
//!
//! This module turns the raw bytes of the original world-generator binary into an immutable,
//! addressable [`TerrainImage`]: headers validated, sections mapped at their declared RVAs
//! with recorded protections, base relocations applied, and the export directory parsed into
//! an ordered table. Everything downstream - symbol resolution, allocator hosting, invocation -
//! works against this mapped form and never re-reads the source file.
//!
//! # Key Components
//!
//! - [`ImageLoader`] / [`LoaderConfig`] - Validation and mapping
//! - [`TerrainImage`] - The mapped, immutable image instance
//! - [`MappedSection`] / [`SectionProtection`] - Per-section metadata
//! - [`ExportTable`] / [`ExportEntry`] - Parsed export directory
//!
//! # Invariants
//!
//! - Section virtual ranges never overlap within one image (enforced at load)
//! - The mapped image is immutable for the lifetime of the instance
//! - No foreign code executes during loading

mod exports;
mod loader;
mod section;

pub use exports::{undecorate, ExportEntry, ExportTable};
pub use loader::{ImageLoader, LoaderConfig, TerrainImage};
pub use section::{MappedSection, SectionProtection};
