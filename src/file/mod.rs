//! PE file abstraction for the generator executable.
//!
//! This module provides the parsing layer that every other component builds on. It abstracts
//! over different data sources (files on disk, in-memory buffers) and exposes ergonomic,
//! bounds-checked access to the PE structures of the original world-generator binary: headers,
//! section table, and data directories.
//!
//! # Architecture
//!
//! - **Backend system** - Pluggable data sources behind the [`crate::file::Backend`] trait
//! - **PE format parsing** - Header parsing via `goblin`, with every derived offset
//!   re-validated against the real input length before use
//! - **Address translation** - RVA to file offset conversion via the section table
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Main PE file abstraction
//! - [`crate::file::Backend`] - Trait for data sources
//! - [`crate::file::physical::Physical`] - Memory-mapped file backend
//! - [`crate::file::memory::Memory`] - In-memory buffer backend
//! - [`crate::file::parser::Parser`] - Cursor parser for untrusted bytes
//! - [`crate::file::io`] - Bounds-checked primitive reads/writes
//!
//! # Examples
//!
//! ```rust,no_run
//! use terrabridge::file::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("worldgen.dll"))?;
//! println!("Image base: 0x{:x}", file.imagebase());
//! println!("Sections: {}", file.sections().count());
//! # Ok::<(), terrabridge::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! `File` is immutable after construction and safe to share across threads.

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{
    header::Header, optional_header::OptionalHeader, section_table::SectionTable, PE,
};
use ouroboros::self_referencing;

pub use memory::Memory;
pub use physical::Physical;

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of image bytes, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe, and every access is
/// bounds-checked.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

#[self_referencing]
/// Represents the generator executable with parsed PE headers.
///
/// This struct wraps the parsed PE and provides methods for accessing headers, sections, data
/// directories, and for converting between address spaces. It supports loading from both files
/// and memory buffers, and validates on construction that the input is a PE with an optional
/// header and a non-empty section table - the minimum the bridge needs before it will attempt
/// to map anything.
///
/// # Examples
///
/// ```rust,no_run
/// use terrabridge::file::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("worldgen.dll"))?;
/// for section in file.sections() {
///     let name = std::str::from_utf8(&section.name)
///         .unwrap_or("<invalid>")
///         .trim_end_matches('\0');
///     println!("{} at RVA 0x{:x}", name, section.virtual_address);
/// }
/// # Ok::<(), terrabridge::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE file from the given path.
    ///
    /// The file is memory-mapped for efficient access.
    ///
    /// # Arguments
    ///
    /// * `file` - Path to the executable image on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is empty, is not valid PE, lacks an
    /// optional header, or has no sections.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes of the executable image.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or the data is not a PE the bridge can host.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            let data = data.as_ref();
            match PE::parse(data.data()) {
                Ok(pe) => {
                    if pe.header.optional_header.is_none() {
                        return Err(malformed_error!("Image does not have an OptionalHeader"));
                    }
                    if pe.sections.is_empty() {
                        return Err(malformed_error!("Image does not declare any sections"));
                    }

                    Ok(pe)
                }
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entire file data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a slice of the file data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The offset to start the slice from.
    /// * `len` - The length of the slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Returns the preferred image base address of the PE file.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// Returns `true` for a PE32+ (64-bit) image.
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// Returns a reference to the PE header.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// Returns a reference to the optional header.
    ///
    /// Always `Some` for files that survived [`File::from_file`]/[`File::from_mem`]
    /// validation.
    #[must_use]
    pub fn header_optional(&self) -> &Option<OptionalHeader> {
        self.with_pe(|pe| &pe.header.optional_header)
    }

    /// Returns an iterator over the section headers of the PE file.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Returns the RVA and size of the export directory, if the image declares one.
    #[must_use]
    pub fn export_directory(&self) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            let dir = pe
                .header
                .optional_header
                .as_ref()
                .and_then(|oh| oh.data_directories.get_export_table())?;
            if dir.virtual_address == 0 || dir.size == 0 {
                return None;
            }
            Some((dir.virtual_address, dir.size))
        })
    }

    /// Returns the RVA and size of the base relocation directory, if the image declares one.
    #[must_use]
    pub fn relocation_directory(&self) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            let dir = pe
                .header
                .optional_header
                .as_ref()
                .and_then(|oh| oh.data_directories.get_base_relocation_table())?;
            if dir.virtual_address == 0 || dir.size == 0 {
                return None;
            }
            Some((dir.virtual_address, dir.size))
        })
    }

    /// Converts a relative virtual address (RVA) to a file offset.
    ///
    /// RVAs are addresses relative to the image base; this walks the section table to find
    /// the declaring section and maps into its raw data range.
    ///
    /// # Arguments
    ///
    /// * `rva` - The RVA to convert.
    ///
    /// # Errors
    ///
    /// Returns an error if the RVA does not fall inside any section, or the section table
    /// itself is inconsistent.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| {
            let rva_u32 = u32::try_from(rva)
                .map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

            for section in &pe.sections {
                let Some(section_max) = section.virtual_address.checked_add(section.virtual_size)
                else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        section.virtual_size
                    ));
                };

                if section.virtual_address <= rva_u32 && rva_u32 < section_max {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}
