use std::cell::Cell;
use std::rc::Rc;

use eyre::Result;
use regwasm::{
    CallHook, Error, Extern, FuncType, Imports, InstantiationError, LinkingError, Module, ResourceLimiter, Runtime,
    Trap, ValType, WasmValue,
};

fn parse(wat: &str) -> Result<Module> {
    let wasm = wat::parse_str(wat)?;
    Ok(Module::parse_bytes(&wasm)?)
}

fn func_ty(params: &[ValType], results: &[ValType]) -> FuncType {
    FuncType { params: params.into(), results: results.into() }
}

#[test]
fn test_host_function_import() -> Result<()> {
    let module = parse(
        r#"(module
            (import "env" "add3" (func $add3 (param i32) (result i32)))
            (func (export "call") (param i32) (result i32) (call $add3 (local.get 0))))"#,
    )?;

    let mut imports = Imports::new();
    imports.define(
        "env",
        "add3",
        Extern::func(func_ty(&[ValType::I32], &[ValType::I32]), |_caller, args| {
            let WasmValue::I32(v) = args[0] else {
                return Err(Trap::Custom("expected i32".into()));
            };
            Ok(vec![WasmValue::I32(v + 3)])
        }),
    );

    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, imports)?;
    let call = instance.exported_func(&runtime, "call")?;
    assert_eq!(call.call(&mut runtime, &[WasmValue::I32(39)])?, vec![WasmValue::I32(42)]);
    Ok(())
}

#[test]
fn test_host_trap_propagates() -> Result<()> {
    let module = parse(
        r#"(module
            (import "env" "fail" (func $fail))
            (func (export "call") (call $fail)))"#,
    )?;

    let mut imports = Imports::new();
    imports.define(
        "env",
        "fail",
        Extern::func(func_ty(&[], &[]), |_caller, _args| Err(Trap::Custom("host failure".into()))),
    );

    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, imports)?;
    let res = instance.exported_func(&runtime, "call")?.call(&mut runtime, &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::Custom(msg))) if msg == "host failure"));
    Ok(())
}

#[test]
fn test_host_reentrancy() -> Result<()> {
    // the host callback re-enters another export of the calling instance;
    // the nested call runs on its own stack context
    let module = parse(
        r#"(module
            (import "env" "callback" (func $cb (param i32) (result i32)))
            (func (export "double") (param i32) (result i32) (i32.mul (local.get 0) (i32.const 2)))
            (func (export "run") (param i32) (result i32) (call $cb (local.get 0))))"#,
    )?;

    let mut imports = Imports::new();
    imports.define(
        "env",
        "callback",
        Extern::func(func_ty(&[ValType::I32], &[ValType::I32]), |mut caller, args| {
            let instance = caller.instance().map_err(|e| Trap::Custom(e.to_string()))?;
            let double = instance
                .exported_func(caller.runtime(), "double")
                .map_err(|e| Trap::Custom(e.to_string()))?;
            double.call(caller.runtime(), args).map_err(|e| Trap::Custom(e.to_string()))
        }),
    );

    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, imports)?;
    let run = instance.exported_func(&runtime, "run")?;
    assert_eq!(run.call(&mut runtime, &[WasmValue::I32(21)])?, vec![WasmValue::I32(42)]);
    Ok(())
}

#[test]
fn test_unknown_import() -> Result<()> {
    let module = parse(r#"(module (import "env" "missing" (func)))"#)?;

    let mut runtime = Runtime::new();
    let res = runtime.instantiate(&module, Imports::new());
    assert!(
        matches!(
            res,
            Err(Error::Instantiation(InstantiationError::Linker(LinkingError::UnknownImport { .. })))
        ),
        "got: {:?}",
        res
    );
    Ok(())
}

#[test]
fn test_incompatible_import_type() -> Result<()> {
    let module = parse(r#"(module (import "env" "f" (func (param i32))))"#)?;

    let mut imports = Imports::new();
    imports.define("env", "f", Extern::func(func_ty(&[ValType::I64], &[]), |_caller, _args| Ok(vec![])));

    let mut runtime = Runtime::new();
    let res = runtime.instantiate(&module, imports);
    assert!(
        matches!(
            res,
            Err(Error::Instantiation(InstantiationError::Linker(LinkingError::IncompatibleImportType { .. })))
        ),
        "got: {:?}",
        res
    );
    Ok(())
}

#[test]
fn test_global_import() -> Result<()> {
    let module = parse(
        r#"(module
            (import "env" "offset" (global $off i32))
            (func (export "get") (result i32) (global.get $off)))"#,
    )?;

    let mut imports = Imports::new();
    imports.define("env", "offset", Extern::global(WasmValue::I32(1000), false));

    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, imports)?;
    let get = instance.exported_func(&runtime, "get")?;
    assert_eq!(get.call(&mut runtime, &[])?, vec![WasmValue::I32(1000)]);
    Ok(())
}

#[test]
fn test_cross_instance_import() -> Result<()> {
    let mut runtime = Runtime::new();

    let provider = parse(r#"(module (func (export "seven") (result i32) (i32.const 7)))"#)?;
    let provider = runtime.instantiate(&provider, Imports::new())?;
    let seven = provider.export("seven").expect("export");

    let consumer = parse(
        r#"(module
            (import "provider" "seven" (func $seven (result i32)))
            (func (export "eight") (result i32) (i32.add (call $seven) (i32.const 1))))"#,
    )?;
    let mut imports = Imports::new();
    imports.define("provider", "seven", Extern::external(seven));

    let consumer = runtime.instantiate(&consumer, imports)?;
    let eight = consumer.exported_func(&runtime, "eight")?;
    assert_eq!(eight.call(&mut runtime, &[])?, vec![WasmValue::I32(8)]);
    Ok(())
}

#[test]
fn test_cross_instance_memory() -> Result<()> {
    let mut runtime = Runtime::new();

    let provider = parse(r#"(module (memory (export "mem") 1))"#)?;
    let provider_instance = runtime.instantiate(&provider, Imports::new())?;
    let mem = provider_instance.export("mem").expect("export");

    let writer = parse(
        r#"(module
            (import "provider" "mem" (memory 1))
            (func (export "write") (i32.store (i32.const 0) (i32.const 1234))))"#,
    )?;
    let reader = parse(
        r#"(module
            (import "provider" "mem" (memory 1))
            (func (export "read") (result i32) (i32.load (i32.const 0))))"#,
    )?;

    let mut imports = Imports::new();
    imports.define("provider", "mem", Extern::external(mem));
    let writer = runtime.instantiate(&writer, imports)?;

    let mut imports = Imports::new();
    imports.define("provider", "mem", Extern::external(mem));
    let reader = runtime.instantiate(&reader, imports)?;

    writer.exported_func(&runtime, "write")?.call(&mut runtime, &[])?;
    let res = reader.exported_func(&runtime, "read")?.call(&mut runtime, &[])?;
    assert_eq!(res, vec![WasmValue::I32(1234)]);
    Ok(())
}

#[test]
fn test_resource_limiter_rejects_minimum() -> Result<()> {
    struct SmallMemories;
    impl ResourceLimiter for SmallMemories {
        fn memory_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> bool {
            desired <= 65536
        }
        fn table_growing(&mut self, _current: u32, _desired: u32, _maximum: Option<u32>) -> bool {
            true
        }
    }

    let module = parse(r#"(module (memory 4))"#)?;
    let mut runtime = Runtime::with_limiter(Box::new(SmallMemories));
    let res = runtime.instantiate(&module, Imports::new());
    assert!(
        matches!(res, Err(Error::Instantiation(InstantiationError::ResourceLimit { kind: "memory", .. }))),
        "got: {:?}",
        res
    );
    Ok(())
}

#[test]
fn test_resource_limiter_rejects_growth_without_trap() -> Result<()> {
    struct NoGrowth;
    impl ResourceLimiter for NoGrowth {
        fn memory_growing(&mut self, current: usize, _desired: usize, _maximum: Option<usize>) -> bool {
            current == 0
        }
        fn table_growing(&mut self, _current: u32, _desired: u32, _maximum: Option<u32>) -> bool {
            true
        }
    }

    let module = parse(
        r#"(module
            (memory 1)
            (func (export "grow") (result i32) (memory.grow (i32.const 1))))"#,
    )?;

    let mut runtime = Runtime::with_limiter(Box::new(NoGrowth));
    let instance = runtime.instantiate(&module, Imports::new())?;
    let res = instance.exported_func(&runtime, "grow")?.call(&mut runtime, &[])?;
    assert_eq!(res, vec![WasmValue::I32(-1)]);
    Ok(())
}

#[test]
fn test_call_hook_sees_enters_and_exits() -> Result<()> {
    struct Counter {
        enters: Cell<usize>,
        exits: Cell<usize>,
    }
    impl CallHook for Counter {
        fn on_enter_function(&self, _func: u32, _depth: usize) {
            self.enters.set(self.enters.get() + 1);
        }
        fn on_exit_function(&self, _func: u32, _depth: usize) {
            self.exits.set(self.exits.get() + 1);
        }
    }

    let module = parse(
        r#"(module
            (func $inner (result i32) (i32.const 1))
            (func (export "outer") (result i32) (i32.add (call $inner) (call $inner))))"#,
    )?;

    let mut runtime = Runtime::new();
    let hook = Rc::new(Counter { enters: Cell::new(0), exits: Cell::new(0) });
    runtime.set_call_hook(hook.clone());

    let instance = runtime.instantiate(&module, Imports::new())?;
    let outer = instance.exported_func(&runtime, "outer")?;
    assert_eq!(outer.call(&mut runtime, &[])?, vec![WasmValue::I32(2)]);

    // one enter/exit pair for the root call and one per inner call
    assert_eq!(hook.enters.get(), 3);
    assert_eq!(hook.exits.get(), 3);
    Ok(())
}
