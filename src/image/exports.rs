//! Defensive walk of the image's export directory.
//!
//! The export name, ordinal, and address tables are the bridge's only window into the foreign
//! binary, and they arrive as untrusted bytes: every table count, array offset, and string RVA
//! is validated against the real input length before use. The walk produces an ordered
//! [`crate::image::ExportTable`] keyed by undecorated name, with all mangled overload
//! candidates preserved per name for signature verification during resolution.
//!
//! # Key Components
//!
//! - [`crate::image::ExportTable`] - Ordered container of parsed exports
//! - [`crate::image::ExportEntry`] - One named export: mangled name, RVA, ordinal
//!
//! Forwarded exports (entries whose RVA points back inside the export directory) are parsed
//! but flagged; resolving one fails, since there is no code behind them to invoke.

use crossbeam_skiplist::SkipMap;
use std::collections::BTreeMap;

use crate::{file::parser::Parser, file::File, Result};

/// Defensive cap on the export table counts.
///
/// Ordinal indices are 16-bit, so a conforming linker can never emit more entries; a larger
/// declared count indicates a corrupt or hostile image.
const MAX_EXPORT_ENTRIES: u32 = 0x1_0000;

/// One named export parsed from the image's export directory.
///
/// Created once during the export walk and immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportEntry {
    /// The raw (possibly mangled) export name as it appears in the name table.
    pub mangled: String,

    /// RVA of the exported routine within the image.
    pub rva: u32,

    /// Export ordinal (biased by the directory's ordinal base).
    pub ordinal: u32,

    /// Whether this entry forwards to another module instead of carrying code.
    pub forwarded: bool,
}

/// Container for the exports of a generator image.
///
/// Provides ordered storage and lookup by undecorated name. Multiple overloads sharing one
/// undecorated name are kept together; the resolver disambiguates them by demangled signature.
pub struct ExportTable {
    data: SkipMap<String, Vec<ExportEntry>>,
}

impl ExportTable {
    /// Walks the export directory of `file` and builds the table.
    ///
    /// An image without an export directory produces an empty table - the failure then
    /// surfaces at resolve time with the name that was asked for, which is the more useful
    /// error.
    ///
    /// # Arguments
    /// * `file` - The parsed PE file to walk
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if any declared
    /// count, array, or string offset is inconsistent with the actual input.
    pub(crate) fn parse(file: &File) -> Result<ExportTable> {
        let table = ExportTable {
            data: SkipMap::new(),
        };

        let Some((dir_rva, dir_size)) = file.export_directory() else {
            return Ok(table);
        };

        let dir_offset = file.rva_to_offset(dir_rva as usize)?;
        let mut parser = Parser::new(file.data());
        parser.seek(dir_offset)?;

        // IMAGE_EXPORT_DIRECTORY
        let _characteristics = parser.read_le::<u32>()?;
        let _timestamp = parser.read_le::<u32>()?;
        let _version = parser.read_le::<u32>()?;
        let _name_rva = parser.read_le::<u32>()?;
        let ordinal_base = parser.read_le::<u32>()?;
        let number_of_functions = parser.read_le::<u32>()?;
        let number_of_names = parser.read_le::<u32>()?;
        let address_of_functions = parser.read_le::<u32>()?;
        let address_of_names = parser.read_le::<u32>()?;
        let address_of_name_ordinals = parser.read_le::<u32>()?;

        if number_of_functions > MAX_EXPORT_ENTRIES || number_of_names > MAX_EXPORT_ENTRIES {
            return Err(malformed_error!(
                "Export directory declares {} functions / {} names, exceeding the {} cap",
                number_of_functions,
                number_of_names,
                MAX_EXPORT_ENTRIES
            ));
        }

        if number_of_names > number_of_functions {
            return Err(malformed_error!(
                "Export directory declares more names ({}) than functions ({})",
                number_of_names,
                number_of_functions
            ));
        }

        let names_offset = file.rva_to_offset(address_of_names as usize)?;
        let ordinals_offset = file.rva_to_offset(address_of_name_ordinals as usize)?;
        let functions_offset = file.rva_to_offset(address_of_functions as usize)?;

        let mut grouped: BTreeMap<String, Vec<ExportEntry>> = BTreeMap::new();

        for index in 0..number_of_names as usize {
            parser.seek(names_offset + index * 4)?;
            let name_rva = parser.read_le::<u32>()?;

            parser.seek(ordinals_offset + index * 2)?;
            let ordinal_index = parser.read_le::<u16>()? as usize;

            if ordinal_index >= number_of_functions as usize {
                return Err(malformed_error!(
                    "Export name {} references ordinal index {} beyond the {} functions",
                    index,
                    ordinal_index,
                    number_of_functions
                ));
            }

            parser.seek(functions_offset + ordinal_index * 4)?;
            let function_rva = parser.read_le::<u32>()?;

            let name_offset = file.rva_to_offset(name_rva as usize)?;
            parser.seek(name_offset)?;
            let mangled = parser.read_string_utf8()?;

            if mangled.is_empty() {
                return Err(malformed_error!("Export name {} is empty", index));
            }

            // An RVA inside the export directory marks a forwarder string, not code.
            let forwarded =
                function_rva >= dir_rva && function_rva - dir_rva < dir_size;

            let entry = ExportEntry {
                ordinal: ordinal_base + ordinal_index as u32,
                rva: function_rva,
                forwarded,
                mangled: mangled.clone(),
            };

            grouped
                .entry(undecorate(&mangled).to_string())
                .or_default()
                .push(entry);
        }

        for (name, entries) in grouped {
            table.data.insert(name, entries);
        }

        Ok(table)
    }

    /// Returns all overload candidates exported under the given undecorated name.
    ///
    /// # Arguments
    /// * `name` - The undecorated name to look up
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<ExportEntry>> {
        self.data.get(name).map(|entry| entry.value().clone())
    }

    /// Get an iterator over all exports, ordered by undecorated name.
    pub fn iter(&self) -> crossbeam_skiplist::map::Iter<'_, String, Vec<ExportEntry>> {
        self.data.iter()
    }

    /// Number of distinct undecorated names in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the image exported nothing by name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Strips compiler decoration from an export name, leaving the bare routine name.
///
/// Handles the three decoration schemes the original toolchain emits:
/// - C++ mangling: `?GenerateChunk@@YG...@Z` -> `GenerateChunk`
/// - stdcall: `_GenerateChunk@20` -> `GenerateChunk`
/// - fastcall: `@GenerateChunk@20` -> `GenerateChunk`
///
/// Undecorated C names pass through unchanged.
#[must_use]
pub fn undecorate(mangled: &str) -> &str {
    if let Some(rest) = mangled.strip_prefix('?') {
        return rest.split('@').next().unwrap_or(rest);
    }

    let stripped = mangled
        .strip_prefix('_')
        .or_else(|| mangled.strip_prefix('@'))
        .unwrap_or(mangled);

    match stripped.rfind('@') {
        // Only treat a trailing @N as stack-size decoration when N is all digits
        Some(pos)
            if pos + 1 < stripped.len()
                && stripped[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &stripped[..pos]
        }
        _ => stripped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::pe::PeBuilder;

    #[test]
    fn undecorate_schemes() {
        assert_eq!(undecorate("?GenerateChunk@@YGHIJJIPAPAE@Z"), "GenerateChunk");
        assert_eq!(undecorate("_GenerateChunk@20"), "GenerateChunk");
        assert_eq!(undecorate("@GenerateChunk@20"), "GenerateChunk");
        assert_eq!(undecorate("GenerateChunk"), "GenerateChunk");
        assert_eq!(undecorate("_plain_c_name"), "plain_c_name");
        assert_eq!(undecorate("name@tail"), "name@tail");
    }

    #[test]
    fn parse_synthetic_exports() {
        let bytes = PeBuilder::new()
            .export("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010)
            .export("_Cleanup@4", 0x1080)
            .build();
        let file = File::from_mem(bytes).unwrap();

        let table = ExportTable::parse(&file).unwrap();
        assert_eq!(table.len(), 2);

        let candidates = table.get("GenerateChunk").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rva, 0x1010);
        assert!(!candidates[0].forwarded);

        assert!(table.get("Cleanup").is_some());
        assert!(table.get("Missing").is_none());
    }

    #[test]
    fn parse_image_without_exports() {
        let bytes = PeBuilder::new().build();
        let file = File::from_mem(bytes).unwrap();

        let table = ExportTable::parse(&file).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn parse_rejects_truncated_name_table() {
        // Export directory whose name array points past the end of the file. The header
        // parser may already reject the image; if it passes, the walk must.
        let bytes = PeBuilder::new()
            .export("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010)
            .corrupt_export_names()
            .build();

        let result = File::from_mem(bytes).and_then(|file| ExportTable::parse(&file).map(|_| ()));
        assert!(result.is_err());
    }
}
