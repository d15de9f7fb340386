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
fn test_integer_division_edges() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "div_s") (param i32 i32) (result i32) (i32.div_s (local.get 0) (local.get 1)))
            (func (export "rem_s") (param i32 i32) (result i32) (i32.rem_s (local.get 0) (local.get 1))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "div_s", &[WasmValue::I32(i32::MIN), WasmValue::I32(-1)]);
    assert!(matches!(res, Err(Error::Trap(Trap::IntegerOverflow))), "got: {:?}", res);

    let res = invoke(&mut runtime, &instance, "div_s", &[WasmValue::I32(1), WasmValue::I32(0)]);
    assert!(matches!(res, Err(Error::Trap(Trap::IntegerDivideByZero))), "got: {:?}", res);

    // MIN rem -1 is 0, not a trap
    let res = invoke(&mut runtime, &instance, "rem_s", &[WasmValue::I32(i32::MIN), WasmValue::I32(-1)])?;
    assert_eq!(res, vec![WasmValue::I32(0)]);

    let res = invoke(&mut runtime, &instance, "div_s", &[WasmValue::I32(-7), WasmValue::I32(2)])?;
    assert_eq!(res, vec![WasmValue::I32(-3)]);
    Ok(())
}

#[test]
fn test_float_truncations() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "trunc") (param f32) (result i32) (i32.trunc_f32_s (local.get 0)))
            (func (export "trunc_sat") (param f32) (result i32) (i32.trunc_sat_f32_s (local.get 0))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "trunc", &[WasmValue::F32(f32::NAN)]);
    assert!(matches!(res, Err(Error::Trap(Trap::InvalidConversionToInteger))), "got: {:?}", res);

    let res = invoke(&mut runtime, &instance, "trunc", &[WasmValue::F32(3e10)]);
    assert!(matches!(res, Err(Error::Trap(Trap::IntegerOverflow))), "got: {:?}", res);

    assert_eq!(invoke(&mut runtime, &instance, "trunc", &[WasmValue::F32(-3.7)])?, vec![WasmValue::I32(-3)]);

    // saturating variants clamp instead of trapping
    assert_eq!(invoke(&mut runtime, &instance, "trunc_sat", &[WasmValue::F32(f32::NAN)])?, vec![WasmValue::I32(0)]);
    assert_eq!(invoke(&mut runtime, &instance, "trunc_sat", &[WasmValue::F32(3e10)])?, vec![WasmValue::I32(i32::MAX)]);
    assert_eq!(
        invoke(&mut runtime, &instance, "trunc_sat", &[WasmValue::F32(f32::NEG_INFINITY)])?,
        vec![WasmValue::I32(i32::MIN)]
    );
    Ok(())
}

#[test]
fn test_load_at_memory_boundary() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (memory 1)
            (func (export "load") (param i32) (result i32) (i32.load (local.get 0))))"#,
    )?;

    // offset + size == memory size succeeds
    let res = invoke(&mut runtime, &instance, "load", &[WasmValue::I32(65532)])?;
    assert_eq!(res, vec![WasmValue::I32(0)]);

    // one byte past traps
    let res = invoke(&mut runtime, &instance, "load", &[WasmValue::I32(65533)]);
    assert!(matches!(res, Err(Error::Trap(Trap::OutOfBoundsMemoryAccess { .. }))), "got: {:?}", res);
    Ok(())
}

#[test]
fn test_memory_grow_makes_new_pages_addressable() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (memory 1 2)
            (func (export "grow") (result i32) (memory.grow (i32.const 1)))
            (func (export "probe") (result i32)
                (i32.store (i32.const 65536) (i32.const 99))
                (i32.load (i32.const 65536))))"#,
    )?;

    // the second page traps before the grow and is live after it
    let res = invoke(&mut runtime, &instance, "probe", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::OutOfBoundsMemoryAccess { .. }))), "got: {:?}", res);

    assert_eq!(invoke(&mut runtime, &instance, "grow", &[])?, vec![WasmValue::I32(1)]);
    assert_eq!(invoke(&mut runtime, &instance, "probe", &[])?, vec![WasmValue::I32(99)]);
    Ok(())
}

#[test]
fn test_local_aliasing_is_materialized() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "alias") (param i32) (result i32)
            local.get 0
            i32.const 9
            local.set 0
            local.get 0
            i32.add))"#,
    )?;

    // the stacked copy of the parameter must keep its pre-set value
    assert_eq!(invoke(&mut runtime, &instance, "alias", &[WasmValue::I32(5)])?, vec![WasmValue::I32(14)]);
    Ok(())
}

#[test]
fn test_loop_with_backedge() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "sum") (param i32) (result i32) (local i32)
            (block
                (loop
                    (br_if 1 (i32.eqz (local.get 0)))
                    (local.set 1 (i32.add (local.get 1) (local.get 0)))
                    (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                    (br 0)))
            (local.get 1)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "sum", &[WasmValue::I32(5)])?, vec![WasmValue::I32(15)]);
    assert_eq!(invoke(&mut runtime, &instance, "sum", &[WasmValue::I32(0)])?, vec![WasmValue::I32(0)]);
    Ok(())
}

#[test]
fn test_br_if_with_values() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "pick") (param i32 i32) (result i32)
            (block (result i32)
                (local.get 0)
                (local.get 1)
                (br_if 0)
                (drop)
                (i32.const 42))))"#,
    )?;

    assert_eq!(
        invoke(&mut runtime, &instance, "pick", &[WasmValue::I32(5), WasmValue::I32(1)])?,
        vec![WasmValue::I32(5)]
    );
    assert_eq!(
        invoke(&mut runtime, &instance, "pick", &[WasmValue::I32(5), WasmValue::I32(0)])?,
        vec![WasmValue::I32(42)]
    );
    Ok(())
}

#[test]
fn test_br_table() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "bt") (param i32) (result i32)
            (block
                (block
                    (block (local.get 0) (br_table 0 1 2))
                    (return (i32.const 10)))
                (return (i32.const 20)))
            (i32.const 30)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "bt", &[WasmValue::I32(0)])?, vec![WasmValue::I32(10)]);
    assert_eq!(invoke(&mut runtime, &instance, "bt", &[WasmValue::I32(1)])?, vec![WasmValue::I32(20)]);
    assert_eq!(invoke(&mut runtime, &instance, "bt", &[WasmValue::I32(2)])?, vec![WasmValue::I32(30)]);
    assert_eq!(invoke(&mut runtime, &instance, "bt", &[WasmValue::I32(99)])?, vec![WasmValue::I32(30)]);
    Ok(())
}

#[test]
fn test_globals_including_fast_path() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (global $a (mut i32) (i32.const 10))
            (global $b (mut i64) (i64.const 20))
            (func (export "bump0") (result i32)
                (global.set $a (i32.add (global.get $a) (i32.const 1)))
                (global.get $a))
            (func (export "bump1") (result i64)
                (global.set $b (i64.add (global.get $b) (i64.const 1)))
                (global.get $b)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "bump0", &[])?, vec![WasmValue::I32(11)]);
    assert_eq!(invoke(&mut runtime, &instance, "bump0", &[])?, vec![WasmValue::I32(12)]);
    assert_eq!(invoke(&mut runtime, &instance, "bump1", &[])?, vec![WasmValue::I64(21)]);
    Ok(())
}

#[test]
fn test_global_initializer_chain() -> Result<()> {
    // a global initializer may reference previously defined globals
    let (mut runtime, instance) = instantiate(
        r#"(module
            (global $a i32 (i32.const 7))
            (global $b i32 (global.get $a))
            (func (export "get_b") (result i32) (global.get $b)))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "get_b", &[])?, vec![WasmValue::I32(7)]);
    Ok(())
}

#[test]
fn test_select_and_parametric() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module (func (export "sel") (param i32) (result i32)
            (select (i32.const 100) (i32.const 200) (local.get 0))))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "sel", &[WasmValue::I32(1)])?, vec![WasmValue::I32(100)]);
    assert_eq!(invoke(&mut runtime, &instance, "sel", &[WasmValue::I32(0)])?, vec![WasmValue::I32(200)]);
    Ok(())
}

#[test]
fn test_sign_extension_ops() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "ext8") (param i32) (result i32) (i32.extend8_s (local.get 0)))
            (func (export "ext16") (param i32) (result i32) (i32.extend16_s (local.get 0))))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "ext8", &[WasmValue::I32(0x80)])?, vec![WasmValue::I32(-128)]);
    assert_eq!(invoke(&mut runtime, &instance, "ext8", &[WasmValue::I32(0x7f)])?, vec![WasmValue::I32(127)]);
    assert_eq!(invoke(&mut runtime, &instance, "ext16", &[WasmValue::I32(0x8000)])?, vec![WasmValue::I32(-32768)]);
    Ok(())
}

#[test]
fn test_block_params_and_if_results() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "inc_block") (param i32) (result i32)
                (local.get 0)
                (block (param i32) (result i32) (i32.const 1) (i32.add)))
            (func (export "abs") (param i32) (result i32)
                (if (result i32) (i32.lt_s (local.get 0) (i32.const 0))
                    (then (i32.sub (i32.const 0) (local.get 0)))
                    (else (local.get 0)))))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "inc_block", &[WasmValue::I32(41)])?, vec![WasmValue::I32(42)]);
    assert_eq!(invoke(&mut runtime, &instance, "abs", &[WasmValue::I32(-5)])?, vec![WasmValue::I32(5)]);
    assert_eq!(invoke(&mut runtime, &instance, "abs", &[WasmValue::I32(5)])?, vec![WasmValue::I32(5)]);
    Ok(())
}

#[test]
fn test_unreachable_and_dead_code() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "boom") (result i32) (unreachable))
            (func (export "early") (param i32) (result i32)
                (block (result i32)
                    (i32.const 1)
                    (br 0)
                    ;; dead code, skipped structurally
                    (drop)
                    (i32.const 2))))"#,
    )?;

    let res = invoke(&mut runtime, &instance, "boom", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::Unreachable))), "got: {:?}", res);

    assert_eq!(invoke(&mut runtime, &instance, "early", &[WasmValue::I32(0)])?, vec![WasmValue::I32(1)]);
    Ok(())
}

#[test]
fn test_bulk_memory_ops() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (memory 1)
            (data $seg "\10\20\30\40")
            (func (export "init") (memory.init $seg (i32.const 8) (i32.const 0) (i32.const 4)))
            (func (export "drop_seg") (data.drop $seg))
            (func (export "fill") (memory.fill (i32.const 0) (i32.const 0xAB) (i32.const 4)))
            (func (export "copy") (memory.copy (i32.const 16) (i32.const 8) (i32.const 4)))
            (func (export "load") (param i32) (result i32) (i32.load (local.get 0))))"#,
    )?;

    invoke(&mut runtime, &instance, "init", &[])?;
    assert_eq!(invoke(&mut runtime, &instance, "load", &[WasmValue::I32(8)])?, vec![WasmValue::I32(0x40302010)]);

    invoke(&mut runtime, &instance, "copy", &[])?;
    assert_eq!(invoke(&mut runtime, &instance, "load", &[WasmValue::I32(16)])?, vec![WasmValue::I32(0x40302010)]);

    invoke(&mut runtime, &instance, "fill", &[])?;
    assert_eq!(
        invoke(&mut runtime, &instance, "load", &[WasmValue::I32(0)])?,
        vec![WasmValue::I32(0xABABABABu32 as i32)]
    );

    // a dropped segment behaves as empty: a non-zero init traps
    invoke(&mut runtime, &instance, "drop_seg", &[])?;
    let res = invoke(&mut runtime, &instance, "init", &[]);
    assert!(matches!(res, Err(Error::Trap(Trap::OutOfBoundsMemoryAccess { .. }))), "got: {:?}", res);
    Ok(())
}

#[test]
fn test_table_ops() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (table 4 8 funcref)
            (func $f (result i32) (i32.const 7))
            (elem (i32.const 0) $f)
            (func (export "size") (result i32) (table.size))
            (func (export "grow") (param i32) (result i32) (table.grow (ref.null func) (local.get 0)))
            (func (export "is_null") (param i32) (result i32) (ref.is_null (table.get (local.get 0))))
            (func (export "move") (param i32 i32) (table.set (local.get 1) (table.get (local.get 0))))
            (func (export "call") (param i32) (result i32) (call_indirect (result i32) (local.get 0))))"#,
    )?;

    assert_eq!(invoke(&mut runtime, &instance, "size", &[])?, vec![WasmValue::I32(4)]);
    assert_eq!(invoke(&mut runtime, &instance, "is_null", &[WasmValue::I32(0)])?, vec![WasmValue::I32(0)]);
    assert_eq!(invoke(&mut runtime, &instance, "is_null", &[WasmValue::I32(1)])?, vec![WasmValue::I32(1)]);

    // move the funcref and call through the new slot
    invoke(&mut runtime, &instance, "move", &[WasmValue::I32(0), WasmValue::I32(3)])?;
    assert_eq!(invoke(&mut runtime, &instance, "call", &[WasmValue::I32(3)])?, vec![WasmValue::I32(7)]);

    assert_eq!(invoke(&mut runtime, &instance, "grow", &[WasmValue::I32(2)])?, vec![WasmValue::I32(4)]);
    assert_eq!(invoke(&mut runtime, &instance, "size", &[])?, vec![WasmValue::I32(6)]);
    // past the declared maximum
    assert_eq!(invoke(&mut runtime, &instance, "grow", &[WasmValue::I32(10)])?, vec![WasmValue::I32(-1)]);
    Ok(())
}

#[test]
fn test_i64_and_float_arithmetic() -> Result<()> {
    let (mut runtime, instance) = instantiate(
        r#"(module
            (func (export "rot") (param i64 i64) (result i64) (i64.rotl (local.get 0) (local.get 1)))
            (func (export "sqrt") (param f64) (result f64) (f64.sqrt (local.get 0)))
            (func (export "min") (param f32 f32) (result f32) (f32.min (local.get 0) (local.get 1)))
            (func (export "nearest") (param f64) (result f64) (f64.nearest (local.get 0))))"#,
    )?;

    assert_eq!(
        invoke(&mut runtime, &instance, "rot", &[WasmValue::I64(1), WasmValue::I64(65)])?,
        vec![WasmValue::I64(2)]
    );
    assert_eq!(invoke(&mut runtime, &instance, "sqrt", &[WasmValue::F64(9.0)])?, vec![WasmValue::F64(3.0)]);

    // min propagates NaN
    let res = invoke(&mut runtime, &instance, "min", &[WasmValue::F32(f32::NAN), WasmValue::F32(1.0)])?;
    assert!(res[0].eq_loose(&WasmValue::F32(f32::NAN)), "got: {:?}", res);

    // round-half-to-even
    let res = invoke(&mut runtime, &instance, "nearest", &[WasmValue::F64(2.5)])?;
    assert!(res[0].eq_loose(&WasmValue::F64(2.0)), "got: {:?}", res);
    let res = invoke(&mut runtime, &instance, "nearest", &[WasmValue::F64(3.5)])?;
    assert!(res[0].eq_loose(&WasmValue::F64(4.0)), "got: {:?}", res);
    Ok(())
}
