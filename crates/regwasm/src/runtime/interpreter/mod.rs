//! The execution loop: direct dispatch over translated instruction
//! sequences, with the hot state (`pc`, the current sequence, the frame
//! base, the default memory and global 0 of the current instance) held in
//! locals of the loop.

use alloc::{format, rc::Rc, string::ToString, vec::Vec};
use core::cell::RefCell;
use core::ops::Neg;

use regwasm_types::{FuncAddr, FuncType, ModuleInstanceAddr, WasmValue};

use crate::{
    cold,
    imports::Caller,
    instance::ModuleInstance,
    interner::SigId,
    ir::{CompiledBody, Instruction, InstructionSequence, Reg},
    log,
    runtime::stack::{CallFrame, Stack},
    store::{Function, GlobalInstance, HostFuncEntity, MemoryInstance},
    translator, unlikely, Error, RawValue, Result, Runtime, Trap,
};

mod macros;
mod traits;
use {macros::*, traits::*};

#[cfg(not(feature = "std"))]
mod no_std_floats;

#[cfg(not(feature = "std"))]
#[allow(unused_imports)]
use no_std_floats::FExt;

/// Execute a function on a fresh stack context.
///
/// Arguments are written into registers `[0, params)` of the root frame;
/// results are read back from registers `[0, results)` once the root frame
/// unwinds into the end-of-execution sentinel.
pub(crate) fn execute(
    runtime: &mut Runtime,
    module: &ModuleInstance,
    func_addr: FuncAddr,
    params: &[WasmValue],
    ty: &FuncType,
) -> Result<Vec<WasmValue>> {
    let func_inst = runtime
        .get_func(func_addr)
        .map_err(|_| Trap::InvalidFunctionIndex { index: func_addr as usize })?
        .clone();

    // exported host functions run directly, without a wasm frame
    if let Function::Host(host) = &func_inst.func {
        let host = HostFuncEntity { ty: host.ty.clone(), func: host.func.clone() };
        let results = (host.func)(Caller::new(runtime, module.id()), params).map_err(Error::Trap)?;
        check_host_results(&host.ty, &results)?;
        return Ok(results);
    }

    let compiled = compile_on_first_use(runtime, func_addr)?;

    let mut stack = Stack::new();
    stack.alloc_frame(0, &compiled)?;
    for (i, param) in params.iter().enumerate() {
        stack.regs[i] = RawValue::from(*param);
    }

    // the root frame returns into a one-instruction sentinel sequence;
    // reaching it ends the loop
    stack.push_frame(CallFrame {
        return_pc: 0,
        return_iseq: InstructionSequence::sentinel(),
        prev_base: 0,
        caller_instance: module.id(),
        func: func_addr,
    })?;

    if let Some(hook) = &runtime.call_hook {
        hook.on_enter_function(func_addr, 1);
    }

    let mut executor = Executor {
        runtime,
        stack,
        iseq: compiled.iseq.clone(),
        pc: 0,
        base: 0,
        instance: module.clone(),
        mem: None,
        global0: None,
    };
    executor.refresh_caches();
    executor.run()?;

    Ok(ty.results.iter().enumerate().map(|(i, rty)| executor.stack.regs[i].attach_type(*rty)).collect())
}

fn compile_on_first_use(runtime: &Runtime, func_addr: FuncAddr) -> Result<CompiledBody> {
    translator::compile(runtime, func_addr)
        .map_err(|e| Error::Trap(Trap::Custom(format!("lazy compilation failed: {}", e))))
}

fn check_host_results(ty: &FuncType, results: &[WasmValue]) -> Result<()> {
    if results.len() != ty.results.len() || ty.results.iter().zip(results).any(|(t, v)| v.val_type() != *t) {
        return Err(Error::Trap(Trap::Custom(format!(
            "host function result mismatch: expected {:?}, got {:?}",
            ty.results, results
        ))));
    }
    Ok(())
}

struct Executor<'r> {
    runtime: &'r mut Runtime,
    stack: Stack,

    iseq: InstructionSequence,
    pc: usize,
    base: usize,
    instance: ModuleInstance,

    /// The current instance's default memory, refreshed on instance
    /// switches and after host calls. Base and size are read through it, so
    /// a successful `memory.grow` is visible at the next access.
    mem: Option<Rc<RefCell<MemoryInstance>>>,
    /// The current instance's global 0, serving `global.get 0`/`global.set 0`.
    global0: Option<Rc<RefCell<GlobalInstance>>>,
}

impl Executor<'_> {
    fn refresh_caches(&mut self) {
        self.mem = self.instance.mem_addrs().first().and_then(|a| self.runtime.data.mems.get(*a as usize)).cloned();
        self.global0 =
            self.instance.global_addrs().first().and_then(|a| self.runtime.data.globals.get(*a as usize)).cloned();
    }

    fn default_memory(&self) -> Result<&Rc<RefCell<MemoryInstance>>> {
        self.mem.as_ref().ok_or_else(|| Error::Other("no default memory".to_string()))
    }

    fn switch_instance(&mut self, addr: ModuleInstanceAddr) -> Result<()> {
        self.instance = self.runtime.get_instance(addr)?.clone();
        self.refresh_caches();
        Ok(())
    }

    #[inline(always)]
    fn branch(&mut self, offset: i32) {
        self.pc = (self.pc as isize + offset as isize) as usize;
    }

    fn do_return(&mut self) -> Result<()> {
        let frame = self.stack.pop_frame().ok_or_else(|| Error::Other("call stack empty".to_string()))?;
        if let Some(hook) = &self.runtime.call_hook {
            hook.on_exit_function(frame.func, self.stack.depth() + 1);
        }

        self.pc = frame.return_pc;
        self.iseq = frame.return_iseq;
        self.base = frame.prev_base;
        if frame.caller_instance != self.instance.id() {
            self.switch_instance(frame.caller_instance)?;
        }
        Ok(())
    }

    fn call_function(&mut self, func_addr: FuncAddr, sp: u32) -> Result<()> {
        let func_inst = self.runtime.get_func(func_addr)?.clone();
        match &func_inst.func {
            Function::Host(host) => {
                let host = HostFuncEntity { ty: host.ty.clone(), func: host.func.clone() };
                self.call_host(func_addr, &host, sp)
            }
            Function::Wasm(wasm) => {
                let compiled = match wasm.compiled() {
                    Some(compiled) => compiled,
                    None => compile_on_first_use(self.runtime, func_addr)?,
                };

                let new_base = self.base + sp as usize;
                self.stack.push_frame(CallFrame {
                    return_pc: self.pc + 1,
                    return_iseq: self.iseq.clone(),
                    prev_base: self.base,
                    caller_instance: self.instance.id(),
                    func: func_addr,
                })?;
                self.stack.alloc_frame(new_base, &compiled)?;
                if let Some(hook) = &self.runtime.call_hook {
                    hook.on_enter_function(func_addr, self.stack.depth());
                }

                self.base = new_base;
                self.iseq = compiled.iseq;
                self.pc = 0;
                if func_inst.owner != self.instance.id() {
                    self.switch_instance(func_inst.owner)?;
                }
                Ok(())
            }
        }
    }

    fn call_host(&mut self, func_addr: FuncAddr, host: &HostFuncEntity, sp: u32) -> Result<()> {
        let base = self.base + sp as usize;
        let params: Vec<WasmValue> =
            host.ty.params.iter().enumerate().map(|(i, ty)| self.stack.regs[base + i].attach_type(*ty)).collect();

        let depth = self.stack.depth() + 1;
        if let Some(hook) = &self.runtime.call_hook {
            hook.on_enter_function(func_addr, depth);
        }
        let results =
            (host.func)(Caller::new(&mut *self.runtime, self.instance.id()), &params).map_err(Error::Trap)?;
        if let Some(hook) = &self.runtime.call_hook {
            hook.on_exit_function(func_addr, depth);
        }

        check_host_results(&host.ty, &results)?;
        for (i, value) in results.iter().enumerate() {
            self.stack.regs[base + i] = RawValue::from(*value);
        }

        self.pc += 1;
        // the host may have grown memory through the caller
        self.refresh_caches();
        Ok(())
    }

    fn call_indirect(&mut self, sig_id: SigId, table_index: u32, index: Reg, sp: u32) -> Result<()> {
        let table_addr = self.instance.resolve_table_addr(table_index)?;
        let i: u32 = self.stack.get(self.base, index).into();

        let elem = {
            let table = self.runtime.get_table(table_addr)?.borrow();
            if unlikely(i as usize >= table.elements.len()) {
                return Err(Trap::UndefinedElement { index: i as usize }.into());
            }
            table.elements[i as usize]
        };
        let func_addr = elem.ok_or(Trap::UninitializedElement { index: i as usize })?;

        let func_inst = self.runtime.get_func(func_addr)?;
        if unlikely(func_inst.ty_id != sig_id) {
            let expected = self.runtime.types.resolve(sig_id).clone();
            let actual = func_inst.ty(self.runtime).clone();
            log::error!("indirect call type mismatch: {:?} != {:?}", actual, expected);
            return Err(Trap::IndirectCallTypeMismatch { expected, actual }.into());
        }

        self.call_function(func_addr, sp)
    }

    fn run(&mut self) -> Result<()> {
        use Instruction::*;

        loop {
            let Some(&instr) = self.iseq.get(self.pc) else {
                cold();
                return Err(Error::Other(format!(
                    "instruction pointer out of bounds: {} >= {}",
                    self.pc,
                    self.iseq.len()
                )));
            };

            match instr {
                // moves and constants
                Copy(dst, src) => {
                    let value = self.stack.get(self.base, src);
                    self.stack.set(self.base, dst, value);
                }
                Const32(dst, bits) => self.stack.set(self.base, dst, RawValue::from(bits)),
                Const64(dst, bits) => self.stack.set(self.base, dst, RawValue::from(bits)),

                // control
                Unreachable => {
                    cold();
                    return Err(Trap::Unreachable.into());
                }
                Br(offset) => {
                    self.branch(offset);
                    continue;
                }
                BrIf(cond, offset) => {
                    let cond: i32 = self.stack.get(self.base, cond).into();
                    if cond != 0 {
                        self.branch(offset);
                        continue;
                    }
                }
                BrIfNot(cond, offset) => {
                    let cond: i32 = self.stack.get(self.base, cond).into();
                    if cond == 0 {
                        self.branch(offset);
                        continue;
                    }
                }
                BrTable(index, len) => {
                    let index: u32 = self.stack.get(self.base, index).into();
                    self.pc += 1 + (index as usize).min(len as usize - 1);
                    continue;
                }
                Return => {
                    self.do_return()?;
                    continue;
                }
                Call(func_index, sp) => {
                    let func_addr = self.instance.resolve_func_addr(func_index)?;
                    self.call_function(func_addr, sp)?;
                    continue;
                }
                CallIndirect(sig_id, table_index, index, sp) => {
                    self.call_indirect(sig_id, table_index, index, sp)?;
                    continue;
                }
                EndOfExecution => return Ok(()),

                Select(dst, cond, lhs, rhs) => {
                    let cond: i32 = self.stack.get(self.base, cond).into();
                    let value = if cond != 0 { self.stack.get(self.base, lhs) } else { self.stack.get(self.base, rhs) };
                    self.stack.set(self.base, dst, value);
                }

                // globals
                GlobalGet(dst, index) => {
                    let addr = self.instance.resolve_global_addr(index)?;
                    let value = self.runtime.get_global(addr)?.borrow().value;
                    self.stack.set(self.base, dst, value);
                }
                GlobalSet(src, index) => {
                    let value = self.stack.get(self.base, src);
                    let addr = self.instance.resolve_global_addr(index)?;
                    self.runtime.get_global(addr)?.borrow_mut().value = value;
                }
                GlobalGet0(dst) => {
                    let value = match &self.global0 {
                        Some(global) => global.borrow().value,
                        None => return Err(Error::Other("no global 0".to_string())),
                    };
                    self.stack.set(self.base, dst, value);
                }
                GlobalSet0(src) => {
                    let value = self.stack.get(self.base, src);
                    match &self.global0 {
                        Some(global) => global.borrow_mut().value = value,
                        None => return Err(Error::Other("no global 0".to_string())),
                    }
                }

                // memory
                I32Load(dst, addr, offset) => mem_load!(i32, self, dst, addr, offset),
                I64Load(dst, addr, offset) => mem_load!(i64, self, dst, addr, offset),
                F32Load(dst, addr, offset) => mem_load!(f32, self, dst, addr, offset),
                F64Load(dst, addr, offset) => mem_load!(f64, self, dst, addr, offset),
                I32Load8S(dst, addr, offset) => mem_load!(i8, i32, self, dst, addr, offset),
                I32Load8U(dst, addr, offset) => mem_load!(u8, i32, self, dst, addr, offset),
                I32Load16S(dst, addr, offset) => mem_load!(i16, i32, self, dst, addr, offset),
                I32Load16U(dst, addr, offset) => mem_load!(u16, i32, self, dst, addr, offset),
                I64Load8S(dst, addr, offset) => mem_load!(i8, i64, self, dst, addr, offset),
                I64Load8U(dst, addr, offset) => mem_load!(u8, i64, self, dst, addr, offset),
                I64Load16S(dst, addr, offset) => mem_load!(i16, i64, self, dst, addr, offset),
                I64Load16U(dst, addr, offset) => mem_load!(u16, i64, self, dst, addr, offset),
                I64Load32S(dst, addr, offset) => mem_load!(i32, i64, self, dst, addr, offset),
                I64Load32U(dst, addr, offset) => mem_load!(u32, i64, self, dst, addr, offset),
                I32Store(addr, src, offset) => mem_store!(i32, self, addr, src, offset),
                I64Store(addr, src, offset) => mem_store!(i64, self, addr, src, offset),
                F32Store(addr, src, offset) => mem_store!(f32, self, addr, src, offset),
                F64Store(addr, src, offset) => mem_store!(f64, self, addr, src, offset),
                I32Store8(addr, src, offset) => mem_store!(i32, i8, self, addr, src, offset),
                I32Store16(addr, src, offset) => mem_store!(i32, i16, self, addr, src, offset),
                I64Store8(addr, src, offset) => mem_store!(i64, i8, self, addr, src, offset),
                I64Store16(addr, src, offset) => mem_store!(i64, i16, self, addr, src, offset),
                I64Store32(addr, src, offset) => mem_store!(i64, i32, self, addr, src, offset),
                MemorySize(dst) => {
                    let pages = self.default_memory()?.borrow().size_pages();
                    self.stack.set(self.base, dst, RawValue::from(pages));
                }
                MemoryGrow(dst, delta) => {
                    let delta: i32 = self.stack.get(self.base, delta).into();
                    let mem = self.default_memory()?.clone();
                    let prev = mem.borrow_mut().grow(delta, &mut *self.runtime.limiter);
                    self.stack.set(self.base, dst, RawValue::from(prev));
                }
                MemoryInit(d, s, n, data_index) => {
                    let d: u32 = self.stack.get(self.base, d).into();
                    let s: u32 = self.stack.get(self.base, s).into();
                    let n: u32 = self.stack.get(self.base, n).into();
                    let data_addr = self.instance.resolve_data_addr(data_index)?;
                    let mem = self.default_memory()?.clone();

                    let data = self.runtime.data.datas.get(data_addr as usize).ok_or(Error::IndexOutOfBounds {
                        kind: "data",
                        index: data_addr as usize,
                        count: self.runtime.data.datas.len(),
                    })?;
                    let bytes = data.bytes();
                    let end = (s as usize)
                        .checked_add(n as usize)
                        .filter(|end| *end <= bytes.len())
                        .ok_or(Error::Trap(Trap::OutOfBoundsMemoryAccess {
                            offset: s as usize,
                            len: n as usize,
                            max: bytes.len(),
                        }))?;
                    mem.borrow_mut().store(d as usize, &bytes[s as usize..end])?;
                }
                MemoryCopy(d, s, n) => {
                    let d: u32 = self.stack.get(self.base, d).into();
                    let s: u32 = self.stack.get(self.base, s).into();
                    let n: u32 = self.stack.get(self.base, n).into();
                    self.default_memory()?.borrow_mut().copy_within(d as usize, s as usize, n as usize)?;
                }
                MemoryFill(d, val, n) => {
                    let d: u32 = self.stack.get(self.base, d).into();
                    let val: i32 = self.stack.get(self.base, val).into();
                    let n: u32 = self.stack.get(self.base, n).into();
                    self.default_memory()?.borrow_mut().fill(d as usize, n as usize, val as u8)?;
                }
                DataDrop(data_index) => {
                    let data_addr = self.instance.resolve_data_addr(data_index)?;
                    let count = self.runtime.data.datas.len();
                    self.runtime
                        .data
                        .datas
                        .get_mut(data_addr as usize)
                        .ok_or(Error::IndexOutOfBounds { kind: "data", index: data_addr as usize, count })?
                        .drop_bytes();
                }

                // tables
                TableGet(dst, index, table_index) => {
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let i: u32 = self.stack.get(self.base, index).into();
                    let elem = self.runtime.get_table(table_addr)?.borrow().get(i as usize)?;
                    let encoded = match elem {
                        Some(addr) => addr as i64,
                        None => -1,
                    };
                    self.stack.set(self.base, dst, RawValue::from(encoded));
                }
                TableSet(index, src, table_index) => {
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let i: u32 = self.stack.get(self.base, index).into();
                    let value: i64 = self.stack.get(self.base, src).into();
                    let value = if value < 0 { None } else { Some(value as u32) };
                    self.runtime.get_table(table_addr)?.borrow_mut().set(i as usize, value)?;
                }
                TableSize(dst, table_index) => {
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let size = self.runtime.get_table(table_addr)?.borrow().size();
                    self.stack.set(self.base, dst, RawValue::from(size));
                }
                TableGrow(dst, init, delta, table_index) => {
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let delta: i32 = self.stack.get(self.base, delta).into();
                    let init: i64 = self.stack.get(self.base, init).into();
                    let init = if init < 0 { None } else { Some(init as u32) };
                    let table = self.runtime.get_table(table_addr)?.clone();
                    let prev = table.borrow_mut().grow(delta, init, &mut *self.runtime.limiter);
                    self.stack.set(self.base, dst, RawValue::from(prev));
                }
                TableFill(i, val, n, table_index) => {
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let i: u32 = self.stack.get(self.base, i).into();
                    let val: i64 = self.stack.get(self.base, val).into();
                    let val = if val < 0 { None } else { Some(val as u32) };
                    let n: u32 = self.stack.get(self.base, n).into();
                    self.runtime.get_table(table_addr)?.borrow_mut().fill(i as usize, n as usize, val)?;
                }
                TableCopy(d, s, n, src_table, dst_table) => {
                    let src_addr = self.instance.resolve_table_addr(src_table)?;
                    let dst_addr = self.instance.resolve_table_addr(dst_table)?;
                    let d: u32 = self.stack.get(self.base, d).into();
                    let s: u32 = self.stack.get(self.base, s).into();
                    let n: u32 = self.stack.get(self.base, n).into();

                    if src_addr == dst_addr {
                        self.runtime.get_table(dst_addr)?.borrow_mut().copy_within(
                            d as usize,
                            s as usize,
                            n as usize,
                        )?;
                    } else {
                        let src = self.runtime.get_table(src_addr)?.clone();
                        let dst = self.runtime.get_table(dst_addr)?.clone();
                        let src = src.borrow();
                        let max = src.elements.len();
                        let items = (s as usize)
                            .checked_add(n as usize)
                            .and_then(|end| src.elements.get(s as usize..end))
                            .ok_or(Error::Trap(Trap::OutOfBoundsTableAccess {
                                offset: s as usize,
                                len: n as usize,
                                max,
                            }))?;
                        dst.borrow_mut().init(d as usize, items)?;
                    }
                }
                TableInit(d, s, n, elem_index, table_index) => {
                    let elem_addr = self.instance.resolve_elem_addr(elem_index)?;
                    let table_addr = self.instance.resolve_table_addr(table_index)?;
                    let d: u32 = self.stack.get(self.base, d).into();
                    let s: u32 = self.stack.get(self.base, s).into();
                    let n: u32 = self.stack.get(self.base, n).into();

                    let table = self.runtime.get_table(table_addr)?.clone();
                    let elem = self.runtime.data.elems.get(elem_addr as usize).ok_or(Error::IndexOutOfBounds {
                        kind: "element",
                        index: elem_addr as usize,
                        count: self.runtime.data.elems.len(),
                    })?;
                    let items = elem.items();
                    let end = (s as usize)
                        .checked_add(n as usize)
                        .filter(|end| *end <= items.len())
                        .ok_or(Error::Trap(Trap::OutOfBoundsTableAccess {
                            offset: s as usize,
                            len: n as usize,
                            max: items.len(),
                        }))?;
                    table.borrow_mut().init(d as usize, &items[s as usize..end])?;
                }
                ElemDrop(elem_index) => {
                    let elem_addr = self.instance.resolve_elem_addr(elem_index)?;
                    let count = self.runtime.data.elems.len();
                    self.runtime
                        .data
                        .elems
                        .get_mut(elem_addr as usize)
                        .ok_or(Error::IndexOutOfBounds { kind: "element", index: elem_addr as usize, count })?
                        .drop_items();
                }

                // references
                RefNull(dst) => self.stack.set(self.base, dst, RawValue::from(-1i64)),
                RefFunc(dst, func_index) => {
                    let addr = self.instance.resolve_func_addr(func_index)?;
                    self.stack.set(self.base, dst, RawValue::from(addr as i64));
                }
                RefIsNull(dst, src) => {
                    let value: i64 = self.stack.get(self.base, src).into();
                    self.stack.set(self.base, dst, RawValue::from((value < 0) as i32));
                }

                // i32/i64 comparisons
                I32Eqz(dst, src) => comp_zero!(==, i32, self, dst, src),
                I32Eq(dst, lhs, rhs) => comp!(==, i32, self, dst, lhs, rhs),
                I32Ne(dst, lhs, rhs) => comp!(!=, i32, self, dst, lhs, rhs),
                I32LtS(dst, lhs, rhs) => comp!(<, i32, self, dst, lhs, rhs),
                I32LtU(dst, lhs, rhs) => comp!(<, u32, self, dst, lhs, rhs),
                I32GtS(dst, lhs, rhs) => comp!(>, i32, self, dst, lhs, rhs),
                I32GtU(dst, lhs, rhs) => comp!(>, u32, self, dst, lhs, rhs),
                I32LeS(dst, lhs, rhs) => comp!(<=, i32, self, dst, lhs, rhs),
                I32LeU(dst, lhs, rhs) => comp!(<=, u32, self, dst, lhs, rhs),
                I32GeS(dst, lhs, rhs) => comp!(>=, i32, self, dst, lhs, rhs),
                I32GeU(dst, lhs, rhs) => comp!(>=, u32, self, dst, lhs, rhs),
                I64Eqz(dst, src) => comp_zero!(==, i64, self, dst, src),
                I64Eq(dst, lhs, rhs) => comp!(==, i64, self, dst, lhs, rhs),
                I64Ne(dst, lhs, rhs) => comp!(!=, i64, self, dst, lhs, rhs),
                I64LtS(dst, lhs, rhs) => comp!(<, i64, self, dst, lhs, rhs),
                I64LtU(dst, lhs, rhs) => comp!(<, u64, self, dst, lhs, rhs),
                I64GtS(dst, lhs, rhs) => comp!(>, i64, self, dst, lhs, rhs),
                I64GtU(dst, lhs, rhs) => comp!(>, u64, self, dst, lhs, rhs),
                I64LeS(dst, lhs, rhs) => comp!(<=, i64, self, dst, lhs, rhs),
                I64LeU(dst, lhs, rhs) => comp!(<=, u64, self, dst, lhs, rhs),
                I64GeS(dst, lhs, rhs) => comp!(>=, i64, self, dst, lhs, rhs),
                I64GeU(dst, lhs, rhs) => comp!(>=, u64, self, dst, lhs, rhs),

                // float comparisons
                F32Eq(dst, lhs, rhs) => comp!(==, f32, self, dst, lhs, rhs),
                F32Ne(dst, lhs, rhs) => comp!(!=, f32, self, dst, lhs, rhs),
                F32Lt(dst, lhs, rhs) => comp!(<, f32, self, dst, lhs, rhs),
                F32Gt(dst, lhs, rhs) => comp!(>, f32, self, dst, lhs, rhs),
                F32Le(dst, lhs, rhs) => comp!(<=, f32, self, dst, lhs, rhs),
                F32Ge(dst, lhs, rhs) => comp!(>=, f32, self, dst, lhs, rhs),
                F64Eq(dst, lhs, rhs) => comp!(==, f64, self, dst, lhs, rhs),
                F64Ne(dst, lhs, rhs) => comp!(!=, f64, self, dst, lhs, rhs),
                F64Lt(dst, lhs, rhs) => comp!(<, f64, self, dst, lhs, rhs),
                F64Gt(dst, lhs, rhs) => comp!(>, f64, self, dst, lhs, rhs),
                F64Le(dst, lhs, rhs) => comp!(<=, f64, self, dst, lhs, rhs),
                F64Ge(dst, lhs, rhs) => comp!(>=, f64, self, dst, lhs, rhs),

                // integer arithmetic
                I32Clz(dst, src) => arithmetic_single!(leading_zeros, i32, i32, self, dst, src),
                I32Ctz(dst, src) => arithmetic_single!(trailing_zeros, i32, i32, self, dst, src),
                I32Popcnt(dst, src) => arithmetic_single!(count_ones, i32, i32, self, dst, src),
                I32Add(dst, lhs, rhs) => arithmetic!(wrapping_add, i32, self, dst, lhs, rhs),
                I32Sub(dst, lhs, rhs) => arithmetic!(wrapping_sub, i32, self, dst, lhs, rhs),
                I32Mul(dst, lhs, rhs) => arithmetic!(wrapping_mul, i32, self, dst, lhs, rhs),
                I32DivS(dst, lhs, rhs) => checked_int_div!(checked_div, i32, self, dst, lhs, rhs),
                I32DivU(dst, lhs, rhs) => checked_int_div!(checked_div, u32, self, dst, lhs, rhs),
                I32RemS(dst, lhs, rhs) => wrapping_int_rem!(i32, self, dst, lhs, rhs),
                I32RemU(dst, lhs, rhs) => wrapping_int_rem!(u32, self, dst, lhs, rhs),
                I64Clz(dst, src) => arithmetic_single!(leading_zeros, i64, i64, self, dst, src),
                I64Ctz(dst, src) => arithmetic_single!(trailing_zeros, i64, i64, self, dst, src),
                I64Popcnt(dst, src) => arithmetic_single!(count_ones, i64, i64, self, dst, src),
                I64Add(dst, lhs, rhs) => arithmetic!(wrapping_add, i64, self, dst, lhs, rhs),
                I64Sub(dst, lhs, rhs) => arithmetic!(wrapping_sub, i64, self, dst, lhs, rhs),
                I64Mul(dst, lhs, rhs) => arithmetic!(wrapping_mul, i64, self, dst, lhs, rhs),
                I64DivS(dst, lhs, rhs) => checked_int_div!(checked_div, i64, self, dst, lhs, rhs),
                I64DivU(dst, lhs, rhs) => checked_int_div!(checked_div, u64, self, dst, lhs, rhs),
                I64RemS(dst, lhs, rhs) => wrapping_int_rem!(i64, self, dst, lhs, rhs),
                I64RemU(dst, lhs, rhs) => wrapping_int_rem!(u64, self, dst, lhs, rhs),

                // bitwise
                I32And(dst, lhs, rhs) => arithmetic!(&, i32, self, dst, lhs, rhs),
                I32Or(dst, lhs, rhs) => arithmetic!(|, i32, self, dst, lhs, rhs),
                I32Xor(dst, lhs, rhs) => arithmetic!(^, i32, self, dst, lhs, rhs),
                I32Shl(dst, lhs, rhs) => arithmetic!(wasm_shl, i32, self, dst, lhs, rhs),
                I32ShrS(dst, lhs, rhs) => arithmetic!(wasm_shr, i32, self, dst, lhs, rhs),
                I32ShrU(dst, lhs, rhs) => arithmetic!(wasm_shr, u32, self, dst, lhs, rhs),
                I32Rotl(dst, lhs, rhs) => arithmetic!(wasm_rotl, i32, self, dst, lhs, rhs),
                I32Rotr(dst, lhs, rhs) => arithmetic!(wasm_rotr, i32, self, dst, lhs, rhs),
                I64And(dst, lhs, rhs) => arithmetic!(&, i64, self, dst, lhs, rhs),
                I64Or(dst, lhs, rhs) => arithmetic!(|, i64, self, dst, lhs, rhs),
                I64Xor(dst, lhs, rhs) => arithmetic!(^, i64, self, dst, lhs, rhs),
                I64Shl(dst, lhs, rhs) => arithmetic!(wasm_shl, i64, self, dst, lhs, rhs),
                I64ShrS(dst, lhs, rhs) => arithmetic!(wasm_shr, i64, self, dst, lhs, rhs),
                I64ShrU(dst, lhs, rhs) => arithmetic!(wasm_shr, u64, self, dst, lhs, rhs),
                I64Rotl(dst, lhs, rhs) => arithmetic!(wasm_rotl, i64, self, dst, lhs, rhs),
                I64Rotr(dst, lhs, rhs) => arithmetic!(wasm_rotr, i64, self, dst, lhs, rhs),

                // floating point
                F32Abs(dst, src) => arithmetic_single!(abs, f32, self, dst, src),
                F32Neg(dst, src) => arithmetic_single!(neg, f32, self, dst, src),
                F32Ceil(dst, src) => arithmetic_single!(ceil, f32, self, dst, src),
                F32Floor(dst, src) => arithmetic_single!(floor, f32, self, dst, src),
                F32Trunc(dst, src) => arithmetic_single!(trunc, f32, self, dst, src),
                F32Nearest(dst, src) => arithmetic_single!(wasm_nearest, f32, self, dst, src),
                F32Sqrt(dst, src) => arithmetic_single!(sqrt, f32, self, dst, src),
                F32Add(dst, lhs, rhs) => arithmetic!(+, f32, self, dst, lhs, rhs),
                F32Sub(dst, lhs, rhs) => arithmetic!(-, f32, self, dst, lhs, rhs),
                F32Mul(dst, lhs, rhs) => arithmetic!(*, f32, self, dst, lhs, rhs),
                F32Div(dst, lhs, rhs) => arithmetic!(/, f32, self, dst, lhs, rhs),
                F32Min(dst, lhs, rhs) => arithmetic!(wasm_minimum, f32, self, dst, lhs, rhs),
                F32Max(dst, lhs, rhs) => arithmetic!(wasm_maximum, f32, self, dst, lhs, rhs),
                F32Copysign(dst, lhs, rhs) => arithmetic!(copysign, f32, self, dst, lhs, rhs),
                F64Abs(dst, src) => arithmetic_single!(abs, f64, self, dst, src),
                F64Neg(dst, src) => arithmetic_single!(neg, f64, self, dst, src),
                F64Ceil(dst, src) => arithmetic_single!(ceil, f64, self, dst, src),
                F64Floor(dst, src) => arithmetic_single!(floor, f64, self, dst, src),
                F64Trunc(dst, src) => arithmetic_single!(trunc, f64, self, dst, src),
                F64Nearest(dst, src) => arithmetic_single!(wasm_nearest, f64, self, dst, src),
                F64Sqrt(dst, src) => arithmetic_single!(sqrt, f64, self, dst, src),
                F64Add(dst, lhs, rhs) => arithmetic!(+, f64, self, dst, lhs, rhs),
                F64Sub(dst, lhs, rhs) => arithmetic!(-, f64, self, dst, lhs, rhs),
                F64Mul(dst, lhs, rhs) => arithmetic!(*, f64, self, dst, lhs, rhs),
                F64Div(dst, lhs, rhs) => arithmetic!(/, f64, self, dst, lhs, rhs),
                F64Min(dst, lhs, rhs) => arithmetic!(wasm_minimum, f64, self, dst, lhs, rhs),
                F64Max(dst, lhs, rhs) => arithmetic!(wasm_maximum, f64, self, dst, lhs, rhs),
                F64Copysign(dst, lhs, rhs) => arithmetic!(copysign, f64, self, dst, lhs, rhs),

                // conversions
                I32WrapI64(dst, src) => conv!(i64, i32, self, dst, src),
                I32TruncF32S(dst, src) => checked_conv_float!(f32, i32, self, dst, src),
                I32TruncF32U(dst, src) => checked_conv_float!(f32, u32, i32, self, dst, src),
                I32TruncF64S(dst, src) => checked_conv_float!(f64, i32, self, dst, src),
                I32TruncF64U(dst, src) => checked_conv_float!(f64, u32, i32, self, dst, src),
                I32Extend8S(dst, src) => conv!(i32, i8, i32, self, dst, src),
                I32Extend16S(dst, src) => conv!(i32, i16, i32, self, dst, src),
                I64Extend8S(dst, src) => conv!(i64, i8, i64, self, dst, src),
                I64Extend16S(dst, src) => conv!(i64, i16, i64, self, dst, src),
                I64Extend32S(dst, src) => conv!(i64, i32, i64, self, dst, src),
                I64ExtendI32S(dst, src) => conv!(i32, i64, self, dst, src),
                I64ExtendI32U(dst, src) => conv!(u32, i64, self, dst, src),
                I64TruncF32S(dst, src) => checked_conv_float!(f32, i64, self, dst, src),
                I64TruncF32U(dst, src) => checked_conv_float!(f32, u64, i64, self, dst, src),
                I64TruncF64S(dst, src) => checked_conv_float!(f64, i64, self, dst, src),
                I64TruncF64U(dst, src) => checked_conv_float!(f64, u64, i64, self, dst, src),
                F32ConvertI32S(dst, src) => conv!(i32, f32, self, dst, src),
                F32ConvertI32U(dst, src) => conv!(u32, f32, self, dst, src),
                F32ConvertI64S(dst, src) => conv!(i64, f32, self, dst, src),
                F32ConvertI64U(dst, src) => conv!(u64, f32, self, dst, src),
                F32DemoteF64(dst, src) => conv!(f64, f32, self, dst, src),
                F64ConvertI32S(dst, src) => conv!(i32, f64, self, dst, src),
                F64ConvertI32U(dst, src) => conv!(u32, f64, self, dst, src),
                F64ConvertI64S(dst, src) => conv!(i64, f64, self, dst, src),
                F64ConvertI64U(dst, src) => conv!(u64, f64, self, dst, src),
                F64PromoteF32(dst, src) => conv!(f32, f64, self, dst, src),

                // saturating float-to-int conversions
                I32TruncSatF32S(dst, src) => conv!(f32, i32, self, dst, src),
                I32TruncSatF32U(dst, src) => conv!(f32, u32, i32, self, dst, src),
                I32TruncSatF64S(dst, src) => conv!(f64, i32, self, dst, src),
                I32TruncSatF64U(dst, src) => conv!(f64, u32, i32, self, dst, src),
                I64TruncSatF32S(dst, src) => conv!(f32, i64, self, dst, src),
                I64TruncSatF32U(dst, src) => conv!(f32, u64, i64, self, dst, src),
                I64TruncSatF64S(dst, src) => conv!(f64, i64, self, dst, src),
                I64TruncSatF64U(dst, src) => conv!(f64, u64, i64, self, dst, src),
            }

            self.pc += 1;
        }
    }
}
