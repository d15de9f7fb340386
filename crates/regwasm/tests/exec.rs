use eyre::Result;
use regwasm::{Error, Imports, Module, ModuleInstance, Runtime, Trap, WasmValue};

fn instantiate(wat: &str) -> Result<(Runtime, ModuleInstance)> {
    let wasm = wat::parse_str(wat)?;
    let module = Module::parse_bytes(&wasm)?;
    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, Imports::new())?;
    Ok((runtime, instance))
}

fn invoke(
    runtime: &mut Runtime,
    instance: &ModuleInstance,
    name: &str,
    args: &[WasmValue],
) -> regwasm::Result<Vec<WasmValue>> {
    instance.exported_func(runtime, name)?.call(runtime, args)
}

#[test]
fn test_add() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "add") (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.add))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "add", &[WasmValue::I32(3), WasmValue::I32(4)])?;
    assert_eq!(res, vec![WasmValue::I32(7)]);
    Ok(())
}

#[test]
fn test_recursive_factorial() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "fact") (param i64) (result i64)
            (if (result i64) (i64.eqz (local.get 0))
                (then (i64.const 1))
                (else (i64.mul (local.get 0) (call 0 (i64.sub (local.get 0) (i64.const 1))))))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "fact", &[WasmValue::I64(5)])?;
    assert_eq!(res, vec![WasmValue::I64(120)]);
    Ok(())
}

#[test]
fn test_active_data_segment_load() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (memory 1)
            (data (i32.const 0) "\01\02\03\04")
            (func (export "read") (result i32) (i32.load (i32.const 0))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "read", &[])?;
    assert_eq!(res, vec![WasmValue::I32(0x04030201)]);
    Ok(())
}

#[test]
fn test_memory_grow_at_max() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (memory 1 1)
            (func (export "grow") (result i32) (memory.grow (i32.const 1)))
            (func (export "size") (result i32) (memory.size)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "grow", &[])?, vec![WasmValue::I32(-1)]);
    assert_eq!(invoke(&mut runtime, &instance, "size", &[])?, vec![WasmValue::I32(1)]);
    Ok(())
}

#[test]
fn test_indirect_call_type_mismatch() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (type $void (func))
            (func $one (param i32) (result i32) local.get 0)
            (table 2 funcref)
            (elem (i32.const 1) $one)
            (func (export "call") (call_indirect (type $void) (i32.const 1))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "call", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::IndirectCallTypeMismatch { .. }))), "got: {:?}", res);
    Ok(())
}

#[test]
fn test_indirect_call_uninitialized_and_undefined() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (type $void (func))
            (table 2 funcref)
            (func (export "null") (call_indirect (type $void) (i32.const 0)))
            (func (export "oob") (call_indirect (type $void) (i32.const 5))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "null", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::UninitializedElement { index: 0 }))), "got: {:?}", res);

    let res = invoke(&mut runtime, &instance, "oob", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::UndefinedElement { index: 5 }))), "got: {:?}", res);
    Ok(())
}

#[test]
fn test_deep_recursion_exhausts_cleanly() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func $rec (export "rec") (param i32)
            (if (i32.ne (local.get 0) (i32.const 0))
                (then (call $rec (i32.sub (local.get 0) (i32.const 1)))))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "rec", &[WasmValue::I32(100_000)]);
    assert!(matches!(res, Err(Error::Trap(Trap::CallStackExhausted))), "got: {:?}", res);

    // the next invocation on the same instance starts on a fresh stack
    let res = invoke(&mut runtime, &instance, "rec", &[WasmValue::I32(10)])?;
    assert_eq!(res, vec![]);
    Ok(())
}

#[test]
fn test_start_function_runs_at_instantiation() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (global $g (mut i32) (i32.const 0))
            (func $init (global.set $g (i32.const 41)))
            (start $init)
            (func (export "get") (result i32) (global.get $g)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "get", &[])?, vec![WasmValue::I32(41)]);
    Ok(())
}

#[test]
fn test_argument_type_mismatch_is_a_trap() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "id") (param i32) (result i32) local.get 0))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "id", &[WasmValue::I64(1)]);
    assert!(matches!(res, Err(Error::Trap(Trap::Custom(_)))), "got: {:?}", res);

    let res = invoke(&mut runtime, &instance, "id", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::Custom(_)))), "got: {:?}", res);
    Ok(())
}

#[test]
fn test_multi_value_return() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "swap") (param i32 i32) (result i32 i32)
            local.get 1 local.get 0))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "swap", &[WasmValue::I32(1), WasmValue::I32(2)])?;
    assert_eq!(res, vec![WasmValue::I32(2), WasmValue::I32(1)]);
    Ok(())
}

#[test]
fn test_exports() -> Result<()> {
    let (_runtime, instance) = instantiate(
        r#"(module
            (memory (export "mem") 1)
            (global (export "g") i32 (i32.const 1))
            (func (export "f")))"#,
    )?;

    assert!(matches!(instance.export("f"), Some(regwasm::ExternVal::Func(_))));
    assert!(matches!(instance.export("mem"), Some(regwasm::ExternVal::Memory(_))));
    assert!(matches!(instance.export("g"), Some(regwasm::ExternVal::Global(_))));
    assert!(instance.export("missing").is_none());
    Ok(())
}

#[test]
fn test_typed_func_handle() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "mul") (param i32 i32) (result i32)
            (i32.mul (local.get 0) (local.get 1))))"#,
    )?;

    let mul = instance.typed_func::<(i32, i32), (i32,)>(&runtime, "mul")?;
    assert_eq!(mul.call(&mut runtime, (6, 7))?, (42,));
    Ok(())
}
