#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

//! A register-machine WebAssembly interpreter.
//!
//! Modules are parsed and validated up front (see [`Module`]), but function
//! bodies are lowered lazily: the first call translates the stack-machine
//! expression into an internal register instruction sequence, which a tight
//! dispatch loop then executes over a contiguous register-file stack.
//!
//! ```rust
//! use regwasm::{Imports, Module, Runtime, WasmValue};
//!
//! # fn main() -> regwasm::Result<()> {
//! let wasm = wat::parse_str(
//!     r#"(module (func (export "add") (param i32 i32) (result i32)
//!         local.get 0 local.get 1 i32.add))"#,
//! ).expect("failed to parse wat");
//!
//! let module = Module::parse_bytes(&wasm)?;
//! let mut runtime = Runtime::new();
//! let instance = runtime.instantiate(&module, Imports::new())?;
//! let add = instance.exported_func(&runtime, "add")?;
//! assert_eq!(add.call(&mut runtime, &[WasmValue::I32(3), WasmValue::I32(4)])?, vec![WasmValue::I32(7)]);
//! # Ok(())
//! # }
//! ```

mod std;
extern crate alloc;

// log for logging (optional).
#[cfg(feature = "logging")]
#[allow(clippy::single_component_path_imports, unused_imports)]
pub(crate) use log;

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

mod error;
pub use error::*;

mod interner;
mod ir;
mod translator;

pub mod store;
pub use store::{CallHook, ResourceLimiter, Runtime, UnlimitedResources};

pub mod module;
pub use module::Module;

pub mod instance;
pub use instance::ModuleInstance;

pub mod func;
pub use func::{FuncHandle, TypedFuncHandle};

pub mod imports;
pub use imports::{Caller, Extern, HostFunc, Imports};

pub mod runtime;
pub use runtime::RawValue;

#[cfg(feature = "parser")]
pub use regwasm_parser as parser;
pub use regwasm_types::*;

#[inline(always)]
#[cold]
pub(crate) fn cold() {}

#[inline(always)]
pub(crate) fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}
