//! Pure demangler for the compiler's encoded export names.
//!
//! Name demangling is a parsing problem over a compact encoded grammar. This module
//! implements it as a side-effect-free function from the encoded string to a structured
//! [`crate::symbols::DemangledExport`], so it can be unit-tested independent of image loading
//! or invocation.
//!
//! # Supported grammar
//!
//! The subset the original generator's toolchain emits for its exports:
//!
//! ```text
//! ?name@scope@...@@Y<conv><ret><params>@Z      C++ free function
//! ?name@@Y<conv><ret>XZ                        C++ free function taking void
//! _name@N                                      stdcall-decorated C name
//! @name@N                                      fastcall-decorated C name
//! name                                         undecorated cdecl C name
//! ```
//!
//! Conventions: `A` = cdecl, `G` = stdcall, `I` = fastcall. Primitive codes are listed on
//! [`crate::symbols::TypeShape`]; `PA`/`PB` encode (const) pointers, and a single digit
//! back-references an earlier multi-character parameter encoding, as the original compiler
//! does to compress repeated types.
//!
//! Member functions, templates, and varargs are outside the exported surface of the
//! generator and are rejected rather than guessed at.

use crate::{
    symbols::types::{
        CallingConvention, DemangledExport, DemangledSignature, Signature, TypeShape,
    },
    Error::Demangle,
    Result,
};

/// Maximum pointer nesting while parsing one type encoding.
const MAX_RECURSION_DEPTH: usize = 32;

/// Maximum number of back-referenceable parameter encodings, per the mangling scheme.
const MAX_BACKREFS: usize = 10;

/// Demangles an encoded export name into a structured form.
///
/// This is a pure function: same input, same output, no side effects.
///
/// # Arguments
/// * `mangled` - The export name exactly as it appears in the image's name table
///
/// # Errors
/// Returns [`crate::Error::Demangle`] if the name does not follow the supported grammar.
///
/// # Examples
///
/// ```rust
/// use terrabridge::symbols::{demangle, DemangledSignature};
///
/// let export = demangle("?GenerateChunk@@YGHIJJIPAPAE@Z")?;
/// assert_eq!(export.name, "GenerateChunk");
/// assert!(matches!(export.signature, DemangledSignature::Full(_)));
/// # Ok::<(), terrabridge::Error>(())
/// ```
pub fn demangle(mangled: &str) -> Result<DemangledExport> {
    if mangled.is_empty() {
        return Err(Demangle(mangled.to_string()));
    }

    if let Some(rest) = mangled.strip_prefix('?') {
        return demangle_cpp(mangled, rest);
    }

    // Decorated C names carry the convention in their prefix and the argument stack
    // width in a trailing `@N`.
    if let Some(rest) = mangled.strip_prefix('_') {
        if let Some((name, bytes)) = split_stack_decoration(rest) {
            return Ok(DemangledExport {
                name: name.to_string(),
                qualifiers: Vec::new(),
                signature: DemangledSignature::StackAnnotated {
                    convention: CallingConvention::Stdcall,
                    stack_bytes: bytes,
                },
            });
        }

        return Ok(DemangledExport {
            name: rest.to_string(),
            qualifiers: Vec::new(),
            signature: DemangledSignature::Opaque,
        });
    }

    if let Some(rest) = mangled.strip_prefix('@') {
        if let Some((name, bytes)) = split_stack_decoration(rest) {
            return Ok(DemangledExport {
                name: name.to_string(),
                qualifiers: Vec::new(),
                signature: DemangledSignature::StackAnnotated {
                    convention: CallingConvention::Fastcall,
                    stack_bytes: bytes,
                },
            });
        }

        return Err(Demangle(mangled.to_string()));
    }

    Ok(DemangledExport {
        name: mangled.to_string(),
        qualifiers: Vec::new(),
        signature: DemangledSignature::Opaque,
    })
}

/// Splits `name@N` into `(name, N)` when the suffix is a well-formed stack width.
fn split_stack_decoration(decorated: &str) -> Option<(&str, u32)> {
    let pos = decorated.rfind('@')?;
    if pos == 0 || pos + 1 >= decorated.len() {
        return None;
    }

    let bytes: u32 = decorated[pos + 1..].parse().ok()?;
    Some((&decorated[..pos], bytes))
}

/// Parses a C++-mangled name: `?name@scope@...@@Y<conv><ret><params>@Z`.
fn demangle_cpp(original: &str, rest: &str) -> Result<DemangledExport> {
    let Some(double_at) = rest.find("@@") else {
        return Err(Demangle(original.to_string()));
    };

    let mut components = rest[..double_at].split('@');
    let Some(name) = components.next().filter(|n| !n.is_empty()) else {
        return Err(Demangle(original.to_string()));
    };
    let qualifiers: Vec<String> = components
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let mut parser = TypeCursor::new(original, rest[double_at + 2..].as_bytes());

    // Only global/static functions (`Y`) are exported by the generator
    if parser.next()? != b'Y' {
        return Err(Demangle(original.to_string()));
    }

    let convention = match parser.next()? {
        b'A' => CallingConvention::Cdecl,
        b'G' => CallingConvention::Stdcall,
        b'I' => CallingConvention::Fastcall,
        _ => return Err(Demangle(original.to_string())),
    };

    let returns = parser.parse_type(0)?;

    let mut params = Vec::new();
    loop {
        match parser.peek()? {
            b'@' => {
                parser.advance();
                if parser.next()? != b'Z' {
                    return Err(Demangle(original.to_string()));
                }
                break;
            }
            b'Z' if params.last() == Some(&TypeShape::Void) => {
                // `XZ` closes a void parameter list without the `@` separator
                parser.advance();
                params.clear();
                break;
            }
            _ => {
                let start = parser.pos();
                let shape = parser.parse_type(0)?;

                if shape == TypeShape::Void && !params.is_empty() {
                    return Err(Demangle(original.to_string()));
                }

                // Multi-character encodings become back-reference targets
                if parser.pos() - start > 1 && parser.backrefs.len() < MAX_BACKREFS {
                    parser.backrefs.push(shape.clone());
                }

                params.push(shape);
            }
        }
    }

    if parser.remaining() != 0 {
        return Err(Demangle(original.to_string()));
    }

    // `void` in a parameter position is only legal as the bare `XZ` list
    if params.contains(&TypeShape::Void) {
        return Err(Demangle(original.to_string()));
    }

    Ok(DemangledExport {
        name: name.to_string(),
        qualifiers,
        signature: DemangledSignature::Full(Signature {
            convention,
            returns,
            params,
        }),
    })
}

/// Cursor over the type-encoding tail of a mangled name.
struct TypeCursor<'a> {
    original: &'a str,
    data: &'a [u8],
    position: usize,
    backrefs: Vec<TypeShape>,
}

impl<'a> TypeCursor<'a> {
    fn new(original: &'a str, data: &'a [u8]) -> Self {
        TypeCursor {
            original,
            data,
            position: 0,
            backrefs: Vec::new(),
        }
    }

    fn pos(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or_else(|| Demangle(self.original.to_string()))
    }

    fn next(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.position += 1;
        Ok(byte)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    /// Parses one type encoding at the cursor.
    fn parse_type(&mut self, depth: usize) -> Result<TypeShape> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Demangle(self.original.to_string()));
        }

        let code = self.next()?;
        let shape = match code {
            b'X' => TypeShape::Void,
            b'C' | b'D' => TypeShape::Char,
            b'E' => TypeShape::UChar,
            b'F' => TypeShape::Short,
            b'G' => TypeShape::UShort,
            b'H' => TypeShape::Int,
            b'I' => TypeShape::UInt,
            b'J' => TypeShape::Long,
            b'K' => TypeShape::ULong,
            b'M' => TypeShape::Float,
            b'N' => TypeShape::Double,
            b'_' => match self.next()? {
                b'J' => TypeShape::Int64,
                b'K' => TypeShape::UInt64,
                b'N' => TypeShape::Bool,
                _ => return Err(Demangle(self.original.to_string())),
            },
            b'P' => match self.next()? {
                b'A' => TypeShape::Ptr(Box::new(self.parse_type(depth + 1)?)),
                b'B' => TypeShape::ConstPtr(Box::new(self.parse_type(depth + 1)?)),
                _ => return Err(Demangle(self.original.to_string())),
            },
            b'0'..=b'9' => {
                let index = (code - b'0') as usize;
                match self.backrefs.get(index) {
                    Some(shape) => shape.clone(),
                    None => return Err(Demangle(self.original.to_string())),
                }
            }
            _ => return Err(Demangle(self.original.to_string())),
        };

        Ok(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(mangled: &str) -> Signature {
        match demangle(mangled).unwrap().signature {
            DemangledSignature::Full(sig) => sig,
            other => panic!("expected full signature, got {:?}", other),
        }
    }

    #[test]
    fn generator_entry_point() {
        // int __stdcall GenerateChunk(unsigned int, long, long, unsigned int, unsigned char **)
        let export = demangle("?GenerateChunk@@YGHIJJIPAPAE@Z").unwrap();
        assert_eq!(export.name, "GenerateChunk");
        assert!(export.qualifiers.is_empty());

        let sig = full("?GenerateChunk@@YGHIJJIPAPAE@Z");
        assert_eq!(sig.convention, CallingConvention::Stdcall);
        assert_eq!(sig.returns, TypeShape::Int);
        assert_eq!(
            sig.params,
            vec![
                TypeShape::UInt,
                TypeShape::Long,
                TypeShape::Long,
                TypeShape::UInt,
                TypeShape::Ptr(Box::new(TypeShape::Ptr(Box::new(TypeShape::UChar)))),
            ]
        );
    }

    #[test]
    fn void_parameter_list() {
        // void __cdecl Initialize(void)
        let sig = full("?Initialize@@YAXXZ");
        assert_eq!(sig.convention, CallingConvention::Cdecl);
        assert_eq!(sig.returns, TypeShape::Void);
        assert!(sig.params.is_empty());
    }

    #[test]
    fn scoped_name() {
        let export = demangle("?Seed@world@tgen@@YAX_K@Z").unwrap();
        assert_eq!(export.name, "Seed");
        assert_eq!(export.qualifiers, vec!["world", "tgen"]);

        match export.signature {
            DemangledSignature::Full(sig) => {
                assert_eq!(sig.params, vec![TypeShape::UInt64]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn back_references() {
        // double __cdecl Blend(unsigned __int64, unsigned __int64, double)
        // The second parameter is the digit 0, referencing the first multi-char encoding.
        let sig = full("?Blend@@YAN_K0N@Z");
        assert_eq!(
            sig.params,
            vec![TypeShape::UInt64, TypeShape::UInt64, TypeShape::Double]
        );
    }

    #[test]
    fn backref_out_of_range_is_rejected() {
        assert!(demangle("?Bad@@YAH0@Z").is_err());
    }

    #[test]
    fn stdcall_decorated_c_name() {
        let export = demangle("_GenerateChunk@20").unwrap();
        assert_eq!(export.name, "GenerateChunk");
        assert_eq!(
            export.signature,
            DemangledSignature::StackAnnotated {
                convention: CallingConvention::Stdcall,
                stack_bytes: 20,
            }
        );
    }

    #[test]
    fn fastcall_decorated_c_name() {
        let export = demangle("@Tick@8").unwrap();
        assert_eq!(export.name, "Tick");
        assert_eq!(
            export.signature,
            DemangledSignature::StackAnnotated {
                convention: CallingConvention::Fastcall,
                stack_bytes: 8,
            }
        );
    }

    #[test]
    fn undecorated_c_name_is_opaque() {
        let export = demangle("tgen_generate").unwrap();
        assert_eq!(export.name, "tgen_generate");
        assert_eq!(export.signature, DemangledSignature::Opaque);
    }

    #[test]
    fn underscore_name_without_decoration() {
        let export = demangle("_init_table").unwrap();
        assert_eq!(export.name, "init_table");
        assert_eq!(export.signature, DemangledSignature::Opaque);
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(demangle("").is_err());
        assert!(demangle("?").is_err());
        assert!(demangle("?NoDoubleAt").is_err());
        assert!(demangle("?Name@@ZZHH@Z").is_err());
        assert!(demangle("?Name@@YQHH@Z").is_err());
        assert!(demangle("?Name@@YGH$@Z").is_err());
        assert!(demangle("?Name@@YGHH").is_err());
        assert!(demangle("?Name@@YGHH@X").is_err());
        assert!(demangle("@fastcall_without_bytes").is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(demangle("?Name@@YGHH@Zextra").is_err());
    }

    #[test]
    fn deep_pointer_nesting_is_bounded() {
        let mut encoded = String::from("?Deep@@YAX");
        for _ in 0..64 {
            encoded.push_str("PA");
        }
        encoded.push_str("H@Z");
        assert!(demangle(&encoded).is_err());
    }

    #[test]
    fn demangling_is_pure() {
        let a = demangle("?GenerateChunk@@YGHIJJIPAPAE@Z").unwrap();
        let b = demangle("?GenerateChunk@@YGHIJJIPAPAE@Z").unwrap();
        assert_eq!(a, b);
    }
}
