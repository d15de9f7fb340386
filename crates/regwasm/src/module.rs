use regwasm_types::WasmModule;

use crate::Result;

/// A parsed and validated WebAssembly module, ready for instantiation
#[derive(Debug, Clone)]
pub struct Module {
    data: WasmModule,
}

impl From<WasmModule> for Module {
    fn from(data: WasmModule) -> Self {
        Self { data }
    }
}

impl Module {
    #[cfg(feature = "parser")]
    /// Parse a module from bytes. Requires the `parser` feature.
    pub fn parse_bytes(wasm: &[u8]) -> Result<Self> {
        let parser = regwasm_parser::Parser::new();
        let data = parser.parse_module_bytes(wasm)?;
        Ok(data.into())
    }

    #[cfg(all(feature = "parser", feature = "std"))]
    /// Parse a module from a file. Requires the `parser` and `std` features.
    pub fn parse_file(path: impl AsRef<crate::std::path::Path>) -> Result<Self> {
        let parser = regwasm_parser::Parser::new();
        let data = parser.parse_module_file(path)?;
        Ok(data.into())
    }

    pub(crate) fn data(&self) -> &WasmModule {
        &self.data
    }
}
