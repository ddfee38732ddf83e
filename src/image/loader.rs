//! Image loader: maps the generator executable into an addressable buffer.
//!
//! This module provides [`crate::image::ImageLoader`], which validates the PE structure of the
//! generator binary and maps its sections into one contiguous, addressable image buffer with
//! correct base offsets, zero-filled BSS ranges, and applied base relocations. The result is an
//! immutable [`crate::image::TerrainImage`] ready for symbol resolution and invocation.
//!
//! # Validation
//!
//! Nothing derived from the input is trusted before it is checked against the input's actual
//! length: header sizes, section raw-data ranges, section virtual ranges, overlap between
//! sections, relocation blocks, and every export-table offset. A truncated or inconsistent
//! image yields a parse error and no image instance is ever created from it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use terrabridge::image::ImageLoader;
//! use terrabridge::file::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("worldgen.dll"))?;
//! let image = ImageLoader::new().load(&file)?;
//!
//! println!("{} sections, base {:#x}", image.sections().len(), image.base_address());
//! # Ok::<(), terrabridge::Error>(())
//! ```
//!
//! No foreign code executes during loading; mapping is pure data movement.

use sha1::{Digest, Sha1};

use crate::{
    file::File,
    image::{
        section::{MappedSection, SectionProtection, SCN_CNT_UNINITIALIZED_DATA},
        ExportTable,
    },
    Result,
};

/// Base relocation types from the PE format specification.
///
/// These constants define how addresses are fixed up when an image is mapped at a different
/// base address than its preferred location.
mod reloc_type {
    /// No-op relocation, used for padding to maintain alignment.
    pub const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
    /// 32-bit address fixup (add delta to DWORD at offset).
    pub const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
    /// 64-bit address fixup (add delta to QWORD at offset).
    pub const IMAGE_REL_BASED_DIR64: u16 = 10;
}

/// Upper bound on the declared in-memory image size.
///
/// The original generator maps below 64MB; anything past this cap is a corrupt or hostile
/// header, not a bigger generator.
const MAX_IMAGE_SIZE: u64 = 0x1000_0000;

/// Configuration options for image loading.
///
/// Controls how [`ImageLoader`] maps the generator image. Uses the builder pattern for
/// convenient configuration.
///
/// # Default Configuration
///
/// - Maps at the buffer's runtime address and applies relocations accordingly
/// - Applies section memory protection metadata from the section characteristics
///
/// # Example
///
/// ```rust
/// use terrabridge::image::LoaderConfig;
///
/// let config = LoaderConfig::new()
///     .with_base_address(0x10000000)
///     .without_relocations();
/// assert_eq!(config.base_address, Some(0x10000000));
/// ```
#[derive(Clone, Debug, Default)]
pub struct LoaderConfig {
    /// Base address override for the mapped image.
    ///
    /// When `None`, the image is treated as mapped at the buffer's runtime address and
    /// relocated there. When `Some(address)`, relocation targets that address instead -
    /// useful for offline analysis of the mapped bytes.
    pub base_address: Option<u64>,

    /// Whether to apply section protection metadata.
    ///
    /// When `false`, all sections are recorded with full read/write/execute access. Useful
    /// when inspecting images that abuse their declared characteristics.
    pub force_rwx: bool,

    /// Whether to apply base relocations when mapping away from the preferred base.
    pub skip_relocations: bool,
}

impl LoaderConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit base address the image should be relocated against.
    #[must_use]
    pub fn with_base_address(mut self, base: u64) -> Self {
        self.base_address = Some(base);
        self
    }

    /// Records all sections with full read-write-execute access.
    #[must_use]
    pub fn without_permissions(mut self) -> Self {
        self.force_rwx = true;
        self
    }

    /// Disables base relocation processing.
    ///
    /// An image mapped away from its preferred base without relocations carries incorrect
    /// absolute addresses; only use this for offline inspection.
    #[must_use]
    pub fn without_relocations(mut self) -> Self {
        self.skip_relocations = true;
        self
    }
}

/// The generator executable, mapped and ready for resolution.
///
/// Holds the contiguous image buffer with all sections placed at their declared RVAs, the
/// section metadata, the parsed export table, and a fingerprint of the source bytes. Created
/// once by [`ImageLoader::load`] and immutable thereafter; all mutable per-invocation state
/// (the foreign code's own statics, the allocator) lives in the owning bridge instance.
pub struct TerrainImage {
    /// Base address the image is relocated against.
    base_address: u64,

    /// Declared in-memory size of the image.
    size_of_image: u64,

    /// The contiguous mapped image: headers + sections at their RVAs.
    data: Vec<u8>,

    /// Metadata for each mapped section, ordered by virtual address.
    sections: Vec<MappedSection>,

    /// Exports parsed from the image's export directory.
    exports: ExportTable,

    /// SHA-1 of the source file bytes; guards the persistent chunk cache.
    fingerprint: [u8; 20],

    /// Whether the image is PE32+ (64-bit).
    is_64: bool,
}

impl TerrainImage {
    /// Base address this image is relocated against.
    #[must_use]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Declared in-memory size of the image.
    #[must_use]
    pub fn size_of_image(&self) -> u64 {
        self.size_of_image
    }

    /// Whether the image is PE32+ (64-bit).
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// The mapped sections, ordered by virtual address.
    #[must_use]
    pub fn sections(&self) -> &[MappedSection] {
        &self.sections
    }

    /// The parsed export table.
    #[must_use]
    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// SHA-1 fingerprint of the source file bytes.
    #[must_use]
    pub fn fingerprint(&self) -> &[u8; 20] {
        &self.fingerprint
    }

    /// Converts an RVA to an absolute address in the relocated address space.
    #[must_use]
    pub fn rva_to_va(&self, rva: u32) -> u64 {
        self.base_address + u64::from(rva)
    }

    /// Finds the section containing the given RVA, if any.
    #[must_use]
    pub fn section_for_rva(&self, rva: u32) -> Option<&MappedSection> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Bounds-checked read of mapped image bytes.
    ///
    /// # Arguments
    /// * `rva` - Start of the range, relative to the image base
    /// * `len` - Number of bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the mapped image.
    pub fn read(&self, rva: u32, len: usize) -> Result<&[u8]> {
        let start = rva as usize;
        let Some(end) = start.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[start..end])
    }

    /// Runtime address of the mapped buffer itself.
    ///
    /// This is where the image bytes actually live in the host process; the invoker derives
    /// callable addresses from it.
    #[must_use]
    pub fn mapped_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

/// Loader that validates and maps generator executables.
///
/// Stateless apart from its [`LoaderConfig`]; one loader can map any number of images.
/// Each call to [`ImageLoader::load`] produces an independent [`TerrainImage`] - the pool
/// loads several to serve concurrent generation requests.
pub struct ImageLoader {
    /// Configuration controlling mapping behavior.
    config: LoaderConfig,
}

impl ImageLoader {
    /// Creates a loader with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    /// Creates a loader with the given configuration.
    #[must_use]
    pub fn with_config(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Validates and maps `file` into a fresh [`TerrainImage`].
    ///
    /// # Arguments
    /// * `file` - The parsed PE file to map
    ///
    /// # Errors
    ///
    /// Returns a parse error if:
    /// - the optional header declares sizes inconsistent with the actual input
    /// - any section's raw data range leaves the file, or its virtual range leaves the image
    /// - two sections' virtual ranges overlap
    /// - relocation data is required but missing or malformed
    /// - the export directory is inconsistent (see [`ExportTable`])
    pub fn load(&self, file: &File) -> Result<TerrainImage> {
        let file_bytes = file.data();

        let Some(optional_header) = file.header_optional() else {
            return Err(malformed_error!("Image does not have an OptionalHeader"));
        };

        let preferred_base = file.imagebase();
        let size_of_image = u64::from(optional_header.windows_fields.size_of_image);
        let headers_size = optional_header.windows_fields.size_of_headers as usize;
        let is_64 = file.is_64();

        if size_of_image == 0 || size_of_image > MAX_IMAGE_SIZE {
            return Err(malformed_error!(
                "Declared image size {:#x} outside the supported range",
                size_of_image
            ));
        }

        if headers_size > file_bytes.len() {
            return Err(malformed_error!(
                "Declared header size {:#x} exceeds the {:#x} byte input",
                headers_size,
                file_bytes.len()
            ));
        }

        let mut image_data = vec![0u8; size_of_image as usize];
        if headers_size > image_data.len() {
            return Err(malformed_error!(
                "Declared header size {:#x} exceeds the image size {:#x}",
                headers_size,
                size_of_image
            ));
        }
        image_data[..headers_size].copy_from_slice(&file_bytes[..headers_size]);

        let sections = self.map_sections(file, &mut image_data)?;

        let base_address = match self.config.base_address {
            Some(base) => base,
            None => image_data.as_ptr() as u64,
        };

        let delta = base_address.wrapping_sub(preferred_base) as i64;
        if delta != 0 && !self.config.skip_relocations {
            apply_relocations(file, &mut image_data, delta, is_64)?;
        }

        let exports = ExportTable::parse(file)?;

        let mut hasher = Sha1::new();
        hasher.update(file_bytes);
        let fingerprint: [u8; 20] = hasher.finalize().into();

        Ok(TerrainImage {
            base_address,
            size_of_image,
            data: image_data,
            sections,
            exports,
            fingerprint,
            is_64,
        })
    }

    /// Validates the section table and copies each section into the image buffer.
    fn map_sections(&self, file: &File, image_data: &mut [u8]) -> Result<Vec<MappedSection>> {
        let file_bytes = file.data();
        let mut sections = Vec::new();

        for section in file.sections() {
            let name = String::from_utf8_lossy(&section.name)
                .trim_end_matches('\0')
                .to_string();
            let virtual_address = section.virtual_address;
            let virtual_size = section.virtual_size;
            let raw_size = section.size_of_raw_data;
            let raw_offset = section.pointer_to_raw_data;
            let characteristics = section.characteristics;
            let is_uninitialized = characteristics & SCN_CNT_UNINITIALIZED_DATA != 0;

            let mapped_size = virtual_size.max(raw_size) as u64;
            let Some(virtual_end) = u64::from(virtual_address).checked_add(mapped_size) else {
                return Err(malformed_error!(
                    "Section '{}' virtual range overflows - {:#x} + {:#x}",
                    name,
                    virtual_address,
                    mapped_size
                ));
            };

            if virtual_end > image_data.len() as u64 {
                return Err(malformed_error!(
                    "Section '{}' virtual range {:#x}..{:#x} leaves the {:#x} byte image",
                    name,
                    virtual_address,
                    virtual_end,
                    image_data.len()
                ));
            }

            // A zero virtual size means "use the raw size" per the PE specification
            let copy_size = if virtual_size == 0 {
                raw_size as usize
            } else {
                raw_size.min(virtual_size) as usize
            };
            if !is_uninitialized && copy_size > 0 {
                let raw_start = raw_offset as usize;
                let Some(raw_end) = raw_start.checked_add(copy_size) else {
                    return Err(malformed_error!(
                        "Section '{}' raw range overflows - {:#x} + {:#x}",
                        name,
                        raw_start,
                        copy_size
                    ));
                };

                if raw_end > file_bytes.len() {
                    return Err(malformed_error!(
                        "Section '{}' raw data {:#x}..{:#x} leaves the {:#x} byte input",
                        name,
                        raw_start,
                        raw_end,
                        file_bytes.len()
                    ));
                }

                let dest_start = virtual_address as usize;
                image_data[dest_start..dest_start + copy_size]
                    .copy_from_slice(&file_bytes[raw_start..raw_end]);
            }

            let protection = if self.config.force_rwx {
                SectionProtection::READ | SectionProtection::WRITE | SectionProtection::EXECUTE
            } else {
                SectionProtection::from_characteristics(characteristics)
            };

            sections.push(MappedSection {
                name,
                virtual_address,
                virtual_size,
                raw_size,
                file_offset: raw_offset,
                protection,
                is_uninitialized,
            });
        }

        sections.sort_by_key(|s| s.virtual_address);

        for pair in sections.windows(2) {
            let prev_end = u64::from(pair[0].virtual_address) + u64::from(pair[0].mapped_size());
            if u64::from(pair[1].virtual_address) < prev_end {
                return Err(malformed_error!(
                    "Sections '{}' and '{}' declare overlapping virtual ranges",
                    pair[0].name,
                    pair[1].name
                ));
            }
        }

        Ok(sections)
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies base relocations to fix up absolute addresses in the mapped image.
///
/// The base relocation table consists of blocks, each covering a 4KB page: a 4-byte page RVA
/// and 4-byte block size, followed by 16-bit entries (type in the high 4 bits, page offset in
/// the low 12 bits). Every block header, entry, and fixup target is validated against the
/// mapped image bounds; a malformed block is an error rather than a silent stop.
fn apply_relocations(file: &File, image_data: &mut [u8], delta: i64, is_64: bool) -> Result<()> {
    let Some((reloc_rva, reloc_size)) = file.relocation_directory() else {
        return Err(malformed_error!(
            "Image requires relocation but has no relocation directory"
        ));
    };

    let reloc_start = reloc_rva as usize;
    let reloc_len = reloc_size as usize;
    let Some(reloc_end) = reloc_start.checked_add(reloc_len) else {
        return Err(malformed_error!("Relocation directory range overflows"));
    };

    if reloc_end > image_data.len() {
        return Err(malformed_error!(
            "Relocation directory {:#x}..{:#x} leaves the mapped image",
            reloc_start,
            reloc_end
        ));
    }

    let mut offset = reloc_start;
    while offset + 8 <= reloc_end {
        let page_rva = u32::from_le_bytes([
            image_data[offset],
            image_data[offset + 1],
            image_data[offset + 2],
            image_data[offset + 3],
        ]) as usize;

        let block_size = u32::from_le_bytes([
            image_data[offset + 4],
            image_data[offset + 5],
            image_data[offset + 6],
            image_data[offset + 7],
        ]) as usize;

        if block_size < 8 || offset + block_size > reloc_end {
            return Err(malformed_error!(
                "Relocation block at {:#x} declares invalid size {:#x}",
                offset,
                block_size
            ));
        }

        let entry_count = (block_size - 8) / 2;
        for i in 0..entry_count {
            let entry_offset = offset + 8 + i * 2;
            let entry =
                u16::from_le_bytes([image_data[entry_offset], image_data[entry_offset + 1]]);

            let kind = entry >> 12;
            let target_offset = page_rva + (entry & 0x0FFF) as usize;

            match kind {
                reloc_type::IMAGE_REL_BASED_ABSOLUTE => {
                    // Padding entry
                }
                reloc_type::IMAGE_REL_BASED_HIGHLOW => {
                    if target_offset + 4 > image_data.len() {
                        return Err(malformed_error!(
                            "HIGHLOW fixup at {:#x} leaves the mapped image",
                            target_offset
                        ));
                    }
                    let value = u32::from_le_bytes([
                        image_data[target_offset],
                        image_data[target_offset + 1],
                        image_data[target_offset + 2],
                        image_data[target_offset + 3],
                    ]);
                    let new_value = (i64::from(value) + delta) as u32;
                    image_data[target_offset..target_offset + 4]
                        .copy_from_slice(&new_value.to_le_bytes());
                }
                reloc_type::IMAGE_REL_BASED_DIR64 if is_64 => {
                    if target_offset + 8 > image_data.len() {
                        return Err(malformed_error!(
                            "DIR64 fixup at {:#x} leaves the mapped image",
                            target_offset
                        ));
                    }
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&image_data[target_offset..target_offset + 8]);
                    let value = u64::from_le_bytes(bytes);
                    let new_value = value.wrapping_add(delta as u64);
                    image_data[target_offset..target_offset + 8]
                        .copy_from_slice(&new_value.to_le_bytes());
                }
                _ => {
                    return Err(malformed_error!(
                        "Unsupported relocation type {} at {:#x}",
                        kind,
                        entry_offset
                    ));
                }
            }
        }

        offset += block_size;
    }

    Ok(())
}
