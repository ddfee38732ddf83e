//! Mapped section metadata and protection flags.
//!
//! Every section of the generator image is mapped at its declared RVA inside one contiguous
//! image buffer; [`crate::image::MappedSection`] records where it landed and what access the
//! original binary declared for it. The loader rejects images whose section ranges overlap, so
//! a resolved address can always be attributed to exactly one section.

use bitflags::bitflags;

bitflags! {
    /// Memory protection flags declared by a section's characteristics.
    ///
    /// Derived from the `IMAGE_SCN_MEM_*` characteristic bits. Common combinations:
    /// - Code: `READ | EXECUTE`
    /// - Data: `READ | WRITE`
    /// - Constants: `READ` only
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionProtection: u8 {
        /// Section may be read.
        const READ = 0b001;
        /// Section may be written.
        const WRITE = 0b010;
        /// Section contains executable code.
        const EXECUTE = 0b100;
    }
}

/// IMAGE_SCN_MEM_EXECUTE
const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
/// IMAGE_SCN_MEM_READ
const SCN_MEM_READ: u32 = 0x4000_0000;
/// IMAGE_SCN_MEM_WRITE
const SCN_MEM_WRITE: u32 = 0x8000_0000;
/// IMAGE_SCN_CNT_UNINITIALIZED_DATA
pub(crate) const SCN_CNT_UNINITIALIZED_DATA: u32 = 0x80;

impl SectionProtection {
    /// Derives protection flags from PE section characteristics.
    #[must_use]
    pub fn from_characteristics(characteristics: u32) -> Self {
        let mut protection = SectionProtection::empty();
        if characteristics & SCN_MEM_EXECUTE != 0 {
            protection |= SectionProtection::EXECUTE;
        }
        if characteristics & SCN_MEM_READ != 0 {
            protection |= SectionProtection::READ;
        }
        if characteristics & SCN_MEM_WRITE != 0 {
            protection |= SectionProtection::WRITE;
        }
        protection
    }
}

/// Metadata about an individual section mapped into the image buffer.
///
/// Created once by the loader and immutable thereafter. The section's bytes live inside the
/// owning [`crate::image::TerrainImage`]'s contiguous buffer at `virtual_address`; BSS
/// sections are zero-filled there.
#[derive(Clone, Debug)]
pub struct MappedSection {
    /// Name of the section (e.g., ".text", ".data").
    pub name: String,

    /// Relative virtual address where the section starts.
    pub virtual_address: u32,

    /// Size of the section in memory when mapped.
    ///
    /// May exceed [`raw_size`](Self::raw_size) when the tail is zero-filled BSS data.
    pub virtual_size: u32,

    /// Size of the section's data on disk.
    pub raw_size: u32,

    /// Offset of the section's raw data in the source file.
    pub file_offset: u32,

    /// Protection flags declared by the section's characteristics.
    pub protection: SectionProtection,

    /// Whether this section holds only uninitialized (zero-filled) data.
    pub is_uninitialized: bool,
}

impl MappedSection {
    /// Size of the section's mapped range - the larger of virtual and raw size.
    #[must_use]
    pub fn mapped_size(&self) -> u32 {
        self.virtual_size.max(self.raw_size)
    }

    /// Returns `true` if the given RVA falls inside this section's mapped range.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && (rva - self.virtual_address) < self.mapped_size()
    }
}

impl std::fmt::Display for MappedSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {:#x}+{:#x} [{:?}]",
            self.name,
            self.virtual_address,
            self.mapped_size(),
            self.protection
        )
    }
}
