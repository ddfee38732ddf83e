//! Structured signature types reconstructed from mangled export names.
//!
//! A demangled export describes the callable shape of a foreign routine: calling convention,
//! return type, and parameter list. The invoker compares its expected [`Signature`] against
//! the demangled one before any call is made, so a wrong overload can never be invoked
//! silently.

use strum::Display;

/// Calling convention encoded in a mangled name.
///
/// Only the conventions the original toolchain emits for exported functions are modeled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallingConvention {
    /// Caller-cleans C convention (`__cdecl`, code `A`).
    Cdecl,
    /// Callee-cleans Win32 convention (`__stdcall`, code `G`).
    Stdcall,
    /// Register-first convention (`__fastcall`, code `I`).
    Fastcall,
}

/// The shape of a single value crossing the invocation boundary.
///
/// This is deliberately a *shape*, not a full C type system: it captures exactly what is
/// needed to compare overloads and compute stack widths for decorated C names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeShape {
    /// `void` - return position only
    Void,
    /// `bool` (`_N`)
    Bool,
    /// `char` (`D`) / `signed char` (`C`)
    Char,
    /// `unsigned char` (`E`)
    UChar,
    /// `short` (`F`)
    Short,
    /// `unsigned short` (`G`)
    UShort,
    /// `int` (`H`)
    Int,
    /// `unsigned int` (`I`)
    UInt,
    /// `long` (`J`)
    Long,
    /// `unsigned long` (`K`)
    ULong,
    /// `__int64` (`_J`)
    Int64,
    /// `unsigned __int64` (`_K`)
    UInt64,
    /// `float` (`M`)
    Float,
    /// `double` (`N`)
    Double,
    /// Pointer to a pointee shape (`PA<type>`)
    Ptr(Box<TypeShape>),
    /// Pointer to const pointee (`PB<type>`)
    ConstPtr(Box<TypeShape>),
}

impl TypeShape {
    /// Width of this shape on a 32-bit argument stack, in bytes.
    ///
    /// The original generator is a 32-bit image; stack widths are what `@N` stdcall
    /// decorations encode, so this is the basis for verifying decorated C names.
    #[must_use]
    pub fn stack_bytes(&self) -> u32 {
        match self {
            TypeShape::Void => 0,
            TypeShape::Int64 | TypeShape::UInt64 | TypeShape::Double => 8,
            _ => 4,
        }
    }
}

impl std::fmt::Display for TypeShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeShape::Void => write!(f, "void"),
            TypeShape::Bool => write!(f, "bool"),
            TypeShape::Char => write!(f, "char"),
            TypeShape::UChar => write!(f, "unsigned char"),
            TypeShape::Short => write!(f, "short"),
            TypeShape::UShort => write!(f, "unsigned short"),
            TypeShape::Int => write!(f, "int"),
            TypeShape::UInt => write!(f, "unsigned int"),
            TypeShape::Long => write!(f, "long"),
            TypeShape::ULong => write!(f, "unsigned long"),
            TypeShape::Int64 => write!(f, "__int64"),
            TypeShape::UInt64 => write!(f, "unsigned __int64"),
            TypeShape::Float => write!(f, "float"),
            TypeShape::Double => write!(f, "double"),
            TypeShape::Ptr(inner) => write!(f, "{} *", inner),
            TypeShape::ConstPtr(inner) => write!(f, "{} const *", inner),
        }
    }
}

/// A complete callable signature: convention, return shape, parameter shapes.
///
/// Built by the demangler from an encoded name, or by the invoker to state its expectation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Calling convention of the routine.
    pub convention: CallingConvention,
    /// Return shape.
    pub returns: TypeShape,
    /// Parameter shapes, in declaration order.
    pub params: Vec<TypeShape>,
}

impl Signature {
    /// Total width of the parameter list on a 32-bit argument stack.
    ///
    /// This is the value a `_name@N` stdcall decoration carries.
    #[must_use]
    pub fn stack_bytes(&self) -> u32 {
        self.params.iter().map(TypeShape::stack_bytes).sum()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} (", self.convention, self.returns)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

/// What could be learned about an export's signature from its name alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DemangledSignature {
    /// C++ mangling carried the full signature.
    Full(Signature),
    /// A decorated C name carried the convention and total argument stack width.
    StackAnnotated {
        /// Convention implied by the decoration scheme.
        convention: CallingConvention,
        /// Total argument bytes encoded in the `@N` suffix.
        stack_bytes: u32,
    },
    /// An undecorated C name; nothing to verify against beyond the convention default.
    Opaque,
}

/// A fully demangled export name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemangledExport {
    /// The bare routine name.
    pub name: String,
    /// Enclosing scope components, innermost first (empty for free functions).
    pub qualifiers: Vec<String>,
    /// Whatever signature information the encoding carried.
    pub signature: DemangledSignature,
}
