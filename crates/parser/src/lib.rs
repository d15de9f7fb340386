#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]
//! See [`regwasm`](https://docs.rs/regwasm) for documentation.

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// log for logging (optional).
#[cfg(feature = "logging")]
#[allow(clippy::single_component_path_imports, unused_imports)]
use log;

// noop fallback if logging is disabled.
#[cfg(not(feature = "logging"))]
#[allow(unused_imports, unused_macros)]
pub(crate) mod log {
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! info    ( ($($tt:tt)*) => {{}} );
    macro_rules! error    ( ($($tt:tt)*) => {{}} );
    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use info;
}

mod conversion;
mod error;
mod module;
pub use error::*;
use module::ModuleReader;
use wasmparser::{Validator, WasmFeatures};

pub use regwasm_types::WasmModule;

/// A WebAssembly parser
#[derive(Default, Debug)]
pub struct Parser {}

impl Parser {
    /// Create a new parser instance
    pub fn new() -> Self {
        Self {}
    }

    fn create_validator() -> Validator {
        let mut features = WasmFeatures::default();

        // the engine's feature set
        features.set(WasmFeatures::MUTABLE_GLOBAL, true);
        features.set(WasmFeatures::SATURATING_FLOAT_TO_INT, true);
        features.set(WasmFeatures::SIGN_EXTENSION, true);
        features.set(WasmFeatures::REFERENCE_TYPES, true);
        features.set(WasmFeatures::BULK_MEMORY, true);
        features.set(WasmFeatures::MULTI_VALUE, true);
        features.set(WasmFeatures::FLOATS, true);

        // out of scope for this engine
        features.set(WasmFeatures::SIMD, false);
        features.set(WasmFeatures::RELAXED_SIMD, false);
        features.set(WasmFeatures::THREADS, false);
        features.set(WasmFeatures::TAIL_CALL, false);
        features.set(WasmFeatures::MULTI_MEMORY, false);
        features.set(WasmFeatures::MEMORY64, false);
        features.set(WasmFeatures::EXCEPTIONS, false);
        features.set(WasmFeatures::EXTENDED_CONST, false);
        features.set(WasmFeatures::COMPONENT_MODEL, false);
        features.set(WasmFeatures::FUNCTION_REFERENCES, false);
        features.set(WasmFeatures::GC, false);
        features.set(WasmFeatures::MEMORY_CONTROL, false);

        Validator::new_with_features(features)
    }

    /// Parse a [`WasmModule`] from bytes
    pub fn parse_module_bytes(&self, wasm: impl AsRef<[u8]>) -> Result<WasmModule> {
        let wasm = wasm.as_ref();
        let mut validator = Self::create_validator();
        let mut reader = ModuleReader::new();

        for payload in wasmparser::Parser::new(0).parse_all(wasm) {
            reader.process_payload(payload?, &mut validator, wasm)?;
        }

        if !reader.end_reached {
            return Err(ParseError::EndNotReached);
        }

        reader.into_module()
    }

    #[cfg(feature = "std")]
    /// Parse a [`WasmModule`] from a file. Requires `std` feature.
    pub fn parse_module_file(&self, path: impl AsRef<std::path::Path>) -> Result<WasmModule> {
        use alloc::format;
        let wasm = std::fs::read(path.as_ref())
            .map_err(|e| ParseError::Other(format!("Error reading file {:?}: {}", path.as_ref(), e)))?;
        self.parse_module_bytes(wasm)
    }
}
