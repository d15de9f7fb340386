use alloc::string::String;
use core::fmt::Display;
use regwasm_types::{ExternalKind, FuncType, ValType, WasmValue};

#[cfg(feature = "parser")]
use regwasm_parser::ParseError;

/// A regwasm error
#[derive(Debug)]
pub enum Error {
    #[cfg(feature = "parser")]
    /// A parsing error occurred
    ParseError(ParseError),

    /// A WebAssembly feature is not supported
    UnsupportedFeature(String),

    /// An unknown error occurred
    Other(String),

    /// A WebAssembly trap occurred
    Trap(Trap),

    /// Instantiating a module failed
    Instantiation(InstantiationError),

    /// An indexed access through a validated array was out of bounds
    IndexOutOfBounds { kind: &'static str, index: usize, count: usize },

    /// The runtime is not the one the module instance was instantiated in
    InvalidStore,
}

/// A pre-execution failure while instantiating a module
#[derive(Debug)]
pub enum InstantiationError {
    /// A linking error occurred
    Linker(LinkingError),

    /// An export referenced an out-of-bounds index
    ExportIndexOutOfBounds { kind: ExternalKind, index: u32, count: usize },

    /// The resource limiter rejected a declared minimum size
    ResourceLimit { kind: &'static str, minimum: u64 },
}

#[derive(Debug)]
/// A linking error
pub enum LinkingError {
    /// An unknown import was encountered
    UnknownImport {
        /// The module name
        module: String,
        /// The import name
        name: String,
    },
    /// A mismatched import type was encountered
    IncompatibleImportType {
        /// The module name
        module: String,
        /// The import name
        name: String,
    },
}

impl LinkingError {
    pub(crate) fn unknown_import(import: &regwasm_types::Import) -> Self {
        Self::UnknownImport { module: import.module.clone().into(), name: import.name.clone().into() }
    }

    pub(crate) fn incompatible_import_type(import: &regwasm_types::Import) -> Self {
        Self::IncompatibleImportType { module: import.module.clone().into(), name: import.name.clone().into() }
    }
}

#[derive(Debug)]
/// A WebAssembly trap
///
/// Traps abort the current invocation; the stack is unwound and no partial
/// results are returned.
///
/// See <https://webassembly.github.io/spec/core/intro/overview.html#trap>
pub enum Trap {
    /// An unreachable instruction was executed
    Unreachable,

    /// Integer overflow
    IntegerOverflow,

    /// A division by zero occurred
    IntegerDivideByZero,

    /// Invalid conversion to integer
    InvalidConversionToInteger,

    /// An out-of-bounds memory access occurred
    OutOfBoundsMemoryAccess {
        /// The offset of the access
        offset: usize,
        /// The size of the access
        len: usize,
        /// The size of the memory
        max: usize,
    },

    /// An out-of-bounds table access occurred
    OutOfBoundsTableAccess {
        /// The offset of the access
        offset: usize,
        /// The size of the access
        len: usize,
        /// The size of the table
        max: usize,
    },

    /// Indirect call type mismatch
    IndirectCallTypeMismatch {
        /// The expected type
        expected: FuncType,
        /// The actual type
        actual: FuncType,
    },

    /// An undefined element was encountered
    UndefinedElement {
        /// The element index
        index: usize,
    },

    /// An uninitialized element was encountered
    UninitializedElement {
        /// The element index
        index: usize,
    },

    /// The call stack was exhausted
    CallStackExhausted,

    /// An invalid function index was encountered
    InvalidFunctionIndex {
        /// The function index
        index: usize,
    },

    /// A custom trap message
    Custom(String),
}

impl Trap {
    /// Get the message of the trap
    pub fn message(&self) -> &str {
        match self {
            Self::Unreachable => "unreachable",
            Self::IntegerOverflow => "integer overflow",
            Self::IntegerDivideByZero => "integer divide by zero",
            Self::InvalidConversionToInteger => "invalid conversion to integer",
            Self::OutOfBoundsMemoryAccess { .. } => "out of bounds memory access",
            Self::OutOfBoundsTableAccess { .. } => "out of bounds table access",
            Self::IndirectCallTypeMismatch { .. } => "indirect call type mismatch",
            Self::UndefinedElement { .. } => "undefined element",
            Self::UninitializedElement { .. } => "uninitialized element",
            Self::CallStackExhausted => "call stack exhausted",
            Self::InvalidFunctionIndex { .. } => "invalid function index",
            Self::Custom(message) => message,
        }
    }

    pub(crate) fn argument_mismatch(expected: &[ValType], got: &[WasmValue]) -> Self {
        Self::Custom(alloc::format!("argument type mismatch: expected {:?}, got {:?}", expected, got))
    }
}

/// An error produced while lowering a function body to the internal
/// instruction set. Surfaced as a trap at the call site that triggered the
/// lazy compilation.
#[derive(Debug)]
pub enum TranslationError {
    /// The expression was structurally malformed
    MalformedExpression,
    /// The operand stack did not hold the expected number of values
    TypeMismatch { expected: usize, got: usize },
    /// A branch referenced an unknown label
    UnknownLabel(u32),
    /// An instruction referenced an unknown local
    UnknownLocal(u32),
    /// A memory instruction carried an over-aligned hint
    InvalidAlignment(u32),
    /// An operator outside the engine's feature set was encountered
    UnsupportedOperator(&'static str),
}

impl Display for TranslationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MalformedExpression => write!(f, "malformed expression"),
            Self::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {} operands, got {}", expected, got)
            }
            Self::UnknownLabel(label) => write!(f, "unknown label {}", label),
            Self::UnknownLocal(local) => write!(f, "unknown local {}", local),
            Self::InvalidAlignment(align) => write!(f, "invalid alignment {}", align),
            Self::UnsupportedOperator(op) => write!(f, "unsupported operator {}", op),
        }
    }
}

impl LinkingError {
    /// Get the message of the linking error
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownImport { .. } => "unknown import",
            Self::IncompatibleImportType { .. } => "incompatible import type",
        }
    }
}

impl From<LinkingError> for Error {
    fn from(value: LinkingError) -> Self {
        Self::Instantiation(InstantiationError::Linker(value))
    }
}

impl From<InstantiationError> for Error {
    fn from(value: InstantiationError) -> Self {
        Self::Instantiation(value)
    }
}

impl From<Trap> for Error {
    fn from(value: Trap) -> Self {
        Self::Trap(value)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            #[cfg(feature = "parser")]
            Self::ParseError(err) => write!(f, "error parsing module: {}", err),

            Self::Trap(trap) => write!(f, "trap: {}", trap.message()),
            Self::Instantiation(err) => write!(f, "instantiation error: {}", err),
            Self::IndexOutOfBounds { kind, index, count } => {
                write!(f, "{} index out of bounds: {} (count: {})", kind, index, count)
            }
            Self::Other(message) => write!(f, "unknown error: {}", message),
            Self::UnsupportedFeature(feature) => write!(f, "unsupported feature: {}", feature),
            Self::InvalidStore => write!(f, "invalid store"),
        }
    }
}

impl Display for InstantiationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Linker(err) => write!(f, "linking error: {}", err.message()),
            Self::ExportIndexOutOfBounds { kind, index, count } => {
                write!(f, "export index out of bounds: {:?} {} (count: {})", kind, index, count)
            }
            Self::ResourceLimit { kind, minimum } => {
                write!(f, "resource limiter rejected {} of minimum size {}", kind, minimum)
            }
        }
    }
}

#[cfg(feature = "std")]
impl crate::std::error::Error for Error {}

#[cfg(feature = "parser")]
impl From<regwasm_parser::ParseError> for Error {
    fn from(value: regwasm_parser::ParseError) -> Self {
        Self::ParseError(value)
    }
}

/// A specialized [`Result`] type for regwasm operations
pub type Result<T, E = Error> = core::result::Result<T, E>;
