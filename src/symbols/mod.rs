//! Resolution of generation entry points from the image's export table.
//!
//! This module connects names to callable addresses. [`SymbolResolver`] looks an undecorated
//! name up in the loaded image's export table, demangles every overload candidate, verifies
//! the demangled signature against the signature the invoker expects, and only then produces
//! an [`ExportSymbol`] whose address is guaranteed to lie inside exactly one mapped,
//! executable section.
//!
//! A name match with the wrong signature is a resolution failure - calling the wrong overload
//! silently is the one mistake this layer exists to prevent.
//!
//! # Key Components
//!
//! - [`SymbolResolver`] - Lookup, demangle, verify, resolve
//! - [`ExportSymbol`] - A fully resolved, signature-verified export
//! - [`demangle`] - The pure name demangler
//! - [`Signature`] / [`TypeShape`] / [`CallingConvention`] - Signature model
//!
//! # Examples
//!
//! ```rust,no_run
//! use terrabridge::symbols::{SymbolResolver, Signature, TypeShape, CallingConvention};
//! # let image: terrabridge::image::TerrainImage = unimplemented!();
//!
//! let expected = Signature {
//!     convention: CallingConvention::Stdcall,
//!     returns: TypeShape::Int,
//!     params: vec![TypeShape::UInt, TypeShape::Long, TypeShape::Long, TypeShape::UInt,
//!                  TypeShape::Ptr(Box::new(TypeShape::Ptr(Box::new(TypeShape::UChar))))],
//! };
//!
//! let resolver = SymbolResolver::new();
//! let symbol = resolver.resolve(&image, "GenerateChunk", &expected)?;
//! println!("GenerateChunk at {:#x}", symbol.address);
//! # Ok::<(), terrabridge::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! Resolver state is immutable apart from an internal demangling cache; resolution never
//! depends on having previously executed any foreign code.

mod demangler;
mod types;

pub use demangler::demangle;
pub use types::{
    CallingConvention, DemangledExport, DemangledSignature, Signature, TypeShape,
};

use dashmap::DashMap;

use crate::{image::TerrainImage, Error::SymbolNotFound, Result};

/// A resolved, signature-verified export of the generator image.
///
/// Created by [`SymbolResolver::resolve`] and immutable thereafter. The address invariant -
/// `address` lies inside exactly one mapped section of the owning image - is established at
/// resolution time and holds for the image's lifetime, since the image never changes after
/// load.
#[derive(Clone, Debug)]
pub struct ExportSymbol {
    /// Undecorated routine name.
    pub name: String,

    /// The mangled export name the resolution matched.
    pub mangled: String,

    /// Signature information reconstructed from the mangled name.
    pub signature: DemangledSignature,

    /// Absolute address in the image's relocated address space.
    pub address: u64,

    /// RVA of the routine within the image.
    pub rva: u32,

    /// Name of the section containing the routine.
    pub section: String,

    /// Offset of the routine relative to its section's start.
    ///
    /// Stable across independent loads of the same image bytes, unlike `address`.
    pub section_offset: u32,
}

/// Resolves export names to verified [`ExportSymbol`]s.
///
/// Holds only a cache of demangling results keyed by mangled name; demangling is pure, so the
/// cache is a transparent speedup shared safely across threads.
pub struct SymbolResolver {
    demangled: DashMap<String, DemangledExport>,
}

impl SymbolResolver {
    /// Creates a resolver with an empty demangling cache.
    #[must_use]
    pub fn new() -> Self {
        SymbolResolver {
            demangled: DashMap::new(),
        }
    }

    /// Resolves `name` in `image`, verifying the demangled signature against `expected`.
    ///
    /// Resolution first matches on the undecorated name, then validates each overload
    /// candidate's demangled signature; the first candidate that matches is resolved to an
    /// absolute address and bound to its containing section.
    ///
    /// # Arguments
    /// * `image`    - The loaded image to resolve against
    /// * `name`     - Undecorated name of the routine
    /// * `expected` - The signature the caller intends to invoke
    ///
    /// # Errors
    /// Returns [`crate::Error::SymbolNotFound`] when no export carries the name, when every
    /// name match has a mismatched signature, when the match is a forwarder, or when the
    /// resolved address does not fall inside an executable mapped section.
    pub fn resolve(
        &self,
        image: &TerrainImage,
        name: &str,
        expected: &Signature,
    ) -> Result<ExportSymbol> {
        let Some(candidates) = image.exports().get(name) else {
            return Err(SymbolNotFound {
                name: name.to_string(),
                reason: "no export with that name".to_string(),
            });
        };

        let mut mismatch: Option<String> = None;

        for candidate in &candidates {
            if candidate.forwarded {
                mismatch.get_or_insert_with(|| {
                    format!("'{}' forwards to another module", candidate.mangled)
                });
                continue;
            }

            let demangled = match self.demangled.get(&candidate.mangled) {
                Some(cached) => cached.value().clone(),
                None => match demangle(&candidate.mangled) {
                    Ok(export) => {
                        self.demangled
                            .insert(candidate.mangled.clone(), export.clone());
                        export
                    }
                    Err(_) => {
                        mismatch.get_or_insert_with(|| {
                            format!("'{}' does not demangle", candidate.mangled)
                        });
                        continue;
                    }
                },
            };

            if !signature_matches(&demangled.signature, expected) {
                mismatch.get_or_insert_with(|| match &demangled.signature {
                    DemangledSignature::Full(found) => {
                        format!("signature mismatch: expected {}, found {}", expected, found)
                    }
                    DemangledSignature::StackAnnotated {
                        convention,
                        stack_bytes,
                    } => format!(
                        "signature mismatch: expected {}, found {} with {} argument bytes",
                        expected, convention, stack_bytes
                    ),
                    DemangledSignature::Opaque => format!(
                        "signature mismatch: expected {}, found undecorated name",
                        expected
                    ),
                });
                continue;
            }

            let Some(section) = image.section_for_rva(candidate.rva) else {
                return Err(SymbolNotFound {
                    name: name.to_string(),
                    reason: format!(
                        "'{}' resolves to RVA {:#x} outside any mapped section",
                        candidate.mangled, candidate.rva
                    ),
                });
            };

            if !section
                .protection
                .contains(crate::image::SectionProtection::EXECUTE)
            {
                return Err(SymbolNotFound {
                    name: name.to_string(),
                    reason: format!(
                        "'{}' resolves into non-executable section '{}'",
                        candidate.mangled, section.name
                    ),
                });
            }

            return Ok(ExportSymbol {
                name: demangled.name,
                mangled: candidate.mangled.clone(),
                signature: demangled.signature,
                address: image.rva_to_va(candidate.rva),
                rva: candidate.rva,
                section: section.name.clone(),
                section_offset: candidate.rva - section.virtual_address,
            });
        }

        Err(SymbolNotFound {
            name: name.to_string(),
            reason: mismatch.unwrap_or_else(|| "no viable candidate".to_string()),
        })
    }
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares whatever the demangled name revealed against the caller's expectation.
///
/// A fully mangled name must match exactly. A stack-annotated C name must agree on the
/// convention and the total argument width. An undecorated C name can only be checked for the
/// cdecl default - everything else about it is taken on the caller's authority.
fn signature_matches(found: &DemangledSignature, expected: &Signature) -> bool {
    match found {
        DemangledSignature::Full(signature) => signature == expected,
        DemangledSignature::StackAnnotated {
            convention,
            stack_bytes,
        } => *convention == expected.convention && *stack_bytes == expected.stack_bytes(),
        DemangledSignature::Opaque => expected.convention == CallingConvention::Cdecl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::File;
    use crate::image::{ImageLoader, LoaderConfig};
    use crate::test::pe::PeBuilder;

    fn expected_signature() -> Signature {
        Signature {
            convention: CallingConvention::Stdcall,
            returns: TypeShape::Int,
            params: vec![
                TypeShape::UInt,
                TypeShape::Long,
                TypeShape::Long,
                TypeShape::UInt,
                TypeShape::Ptr(Box::new(TypeShape::Ptr(Box::new(TypeShape::UChar)))),
            ],
        }
    }

    fn image_with(mangled: &str, rva: u32) -> TerrainImage {
        let bytes = PeBuilder::new().export(mangled, rva).build();
        let file = File::from_mem(bytes).unwrap();
        ImageLoader::with_config(
            LoaderConfig::new().with_base_address(PeBuilder::DEFAULT_IMAGE_BASE),
        )
        .load(&file)
        .unwrap()
    }

    #[test]
    fn resolves_matching_export() {
        let image = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010);
        let resolver = SymbolResolver::new();

        let symbol = resolver
            .resolve(&image, "GenerateChunk", &expected_signature())
            .unwrap();

        assert_eq!(symbol.name, "GenerateChunk");
        assert_eq!(symbol.rva, 0x1010);
        assert_eq!(symbol.section, ".text");
        assert_eq!(symbol.section_offset, 0x10);
        assert_eq!(symbol.address, PeBuilder::DEFAULT_IMAGE_BASE + 0x1010);
    }

    #[test]
    fn missing_name_fails() {
        let image = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010);
        let resolver = SymbolResolver::new();

        let err = resolver
            .resolve(&image, "GenerateTerrain", &expected_signature())
            .unwrap_err();
        assert!(matches!(err, SymbolNotFound { .. }));
    }

    #[test]
    fn signature_mismatch_fails_despite_name_match() {
        let image = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010);
        let resolver = SymbolResolver::new();

        // Same name, one extra int parameter expected
        let mut wider = expected_signature();
        wider.params.push(TypeShape::Int);

        let err = resolver
            .resolve(&image, "GenerateChunk", &wider)
            .unwrap_err();
        match err {
            SymbolNotFound { reason, .. } => assert!(reason.contains("signature mismatch")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stack_annotated_name_verifies_width() {
        let image = image_with("_GenerateChunk@20", 0x1010);
        let resolver = SymbolResolver::new();

        assert!(resolver
            .resolve(&image, "GenerateChunk", &expected_signature())
            .is_ok());

        let mut wider = expected_signature();
        wider.params.push(TypeShape::Int); // 24 bytes now
        assert!(resolver.resolve(&image, "GenerateChunk", &wider).is_err());
    }

    #[test]
    fn non_executable_target_fails() {
        // RVA 0x3000 lands in .reloc, which is not executable
        let image = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x3000);
        let resolver = SymbolResolver::new();

        let err = resolver
            .resolve(&image, "GenerateChunk", &expected_signature())
            .unwrap_err();
        match err {
            SymbolNotFound { reason, .. } => assert!(reason.contains("non-executable")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resolution_is_stable_across_loads() {
        let first = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010);
        let second = image_with("?GenerateChunk@@YGHIJJIPAPAE@Z", 0x1010);
        let resolver = SymbolResolver::new();

        let a = resolver
            .resolve(&first, "GenerateChunk", &expected_signature())
            .unwrap();
        let b = resolver
            .resolve(&second, "GenerateChunk", &expected_signature())
            .unwrap();

        assert_eq!(a.section_offset, b.section_offset);
        assert_eq!(a.section, b.section);
    }
}
