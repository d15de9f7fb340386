#![allow(dead_code)] // entity provenance fields are kept for debugging

use core::{
    cell::RefCell,
    sync::atomic::{AtomicUsize, Ordering},
};

use alloc::{boxed::Box, rc::Rc, string::ToString, vec, vec::Vec};
use regwasm_types::{
    Addr, ConstInstruction, DataAddr, ElemAddr, ElementKind, FuncAddr, FuncType, GlobalAddr, GlobalType, MemAddr,
    MemoryArch, MemoryType, ModuleInstanceAddr, TableAddr, TableType, ValType,
};

use crate::{
    imports::{HostFuncInner, Imports},
    interner::{SigId, TypeInterner},
    ir::CompiledBody,
    log, Error, InstantiationError, Module, ModuleInstance, RawValue, Result, Trap,
};

// global runtime id counter
static RUNTIME_ID: AtomicUsize = AtomicUsize::new(0);

pub(crate) const PAGE_SIZE: usize = 65536;
pub(crate) const MAX_PAGES: usize = 65536;

/// Limits the growth of memories and tables.
///
/// Consulted synchronously before any growth, including the declared
/// minimums at instantiation time. A rejected growth makes `memory.grow` /
/// `table.grow` return `-1` without trapping.
pub trait ResourceLimiter {
    /// Whether a memory may grow from `current` to `desired` bytes.
    fn memory_growing(&mut self, current: usize, desired: usize, maximum: Option<usize>) -> bool;

    /// Whether a table may grow from `current` to `desired` elements.
    fn table_growing(&mut self, current: u32, desired: u32, maximum: Option<u32>) -> bool;
}

/// The default limiter: growth is only bounded by the entity's own maximum.
#[derive(Debug, Default)]
pub struct UnlimitedResources;

impl ResourceLimiter for UnlimitedResources {
    fn memory_growing(&mut self, _current: usize, _desired: usize, _maximum: Option<usize>) -> bool {
        true
    }

    fn table_growing(&mut self, _current: u32, _desired: u32, _maximum: Option<u32>) -> bool {
        true
    }
}

/// An enter/exit interceptor for function calls.
///
/// When installed on a [`Runtime`], invoked on every frame push and pop and
/// around host calls.
pub trait CallHook {
    fn on_enter_function(&self, func: FuncAddr, depth: usize);
    fn on_exit_function(&self, func: FuncAddr, depth: usize);
}

/// Global state that can be manipulated by WebAssembly programs.
///
/// Owns one append-only pool per entity kind, the list of module instances,
/// and the function-type interner. Entities are never freed or moved, so
/// addresses handed out stay valid until the runtime is dropped. A runtime
/// and its entities are single-threaded; cross-thread use requires external
/// synchronization.
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#store>
pub struct Runtime {
    id: usize,
    pub(crate) instances: Vec<ModuleInstance>,
    pub(crate) data: StoreData,
    pub(crate) types: TypeInterner,
    pub(crate) limiter: Box<dyn ResourceLimiter>,
    pub(crate) call_hook: Option<Rc<dyn CallHook>>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreData {
    pub(crate) funcs: Vec<Rc<FunctionInstance>>,
    pub(crate) tables: Vec<Rc<RefCell<TableInstance>>>,
    pub(crate) mems: Vec<Rc<RefCell<MemoryInstance>>>,
    pub(crate) globals: Vec<Rc<RefCell<GlobalInstance>>>,
    pub(crate) elems: Vec<ElemInstance>,
    pub(crate) datas: Vec<DataInstance>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("instances", &self.instances.len())
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a new runtime
    pub fn new() -> Self {
        Self::with_limiter(Box::new(UnlimitedResources))
    }

    /// Create a new runtime with the given resource limiter
    pub fn with_limiter(limiter: Box<dyn ResourceLimiter>) -> Self {
        let id = RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        Self { id, instances: Vec::new(), data: StoreData::default(), types: TypeInterner::default(), limiter, call_hook: None }
    }

    /// Install an enter/exit function interceptor
    pub fn set_call_hook(&mut self, hook: Rc<dyn CallHook>) {
        self.call_hook = Some(hook);
    }

    /// Get the runtime's ID (unique per process)
    pub fn id(&self) -> usize {
        self.id
    }

    /// Instantiate a module with the given imports.
    ///
    /// Allocates the instance, performs the active-segment copies, and
    /// invokes the start function if present. If a copy or the start
    /// function traps, the error is returned but the instance remains
    /// allocated in the runtime.
    ///
    /// See <https://webassembly.github.io/spec/core/exec/modules.html#exec-instantiation>
    pub fn instantiate(&mut self, module: &Module, imports: Imports) -> Result<ModuleInstance> {
        let instance = ModuleInstance::instantiate(self, module.data(), imports)?;
        instance.initialize(self, module.data())?;
        instance.start(self)?;
        Ok(instance)
    }

    pub(crate) fn next_instance_idx(&self) -> ModuleInstanceAddr {
        self.instances.len() as ModuleInstanceAddr
    }

    pub(crate) fn add_instance(&mut self, instance: ModuleInstance) {
        self.instances.push(instance);
    }

    pub(crate) fn get_instance(&self, addr: ModuleInstanceAddr) -> Result<&ModuleInstance> {
        self.instances
            .get(addr as usize)
            .ok_or(Error::IndexOutOfBounds { kind: "instance", index: addr as usize, count: self.instances.len() })
    }

    pub(crate) fn add_func(&mut self, func: FunctionInstance) -> FuncAddr {
        self.data.funcs.push(Rc::new(func));
        self.data.funcs.len() as FuncAddr - 1
    }

    pub(crate) fn add_table(&mut self, table: TableType, owner: ModuleInstanceAddr) -> Result<TableAddr> {
        if !self.limiter.table_growing(0, table.size_initial, table.size_max) {
            return Err(InstantiationError::ResourceLimit { kind: "table", minimum: table.size_initial as u64 }.into());
        }
        self.data.tables.push(Rc::new(RefCell::new(TableInstance::new(table, owner))));
        Ok(self.data.tables.len() as TableAddr - 1)
    }

    pub(crate) fn add_mem(&mut self, mem: MemoryType, owner: ModuleInstanceAddr) -> Result<MemAddr> {
        if let MemoryArch::I64 = mem.arch {
            return Err(Error::UnsupportedFeature("64-bit memories".to_string()));
        }
        let min_bytes = mem.page_count_initial as usize * PAGE_SIZE;
        let max_bytes = mem.page_count_max.map(|p| p as usize * PAGE_SIZE);
        if !self.limiter.memory_growing(0, min_bytes, max_bytes) {
            return Err(InstantiationError::ResourceLimit { kind: "memory", minimum: mem.page_count_initial }.into());
        }
        self.data.mems.push(Rc::new(RefCell::new(MemoryInstance::new(mem, owner))));
        Ok(self.data.mems.len() as MemAddr - 1)
    }

    pub(crate) fn add_global(&mut self, ty: GlobalType, value: RawValue, owner: ModuleInstanceAddr) -> GlobalAddr {
        self.data.globals.push(Rc::new(RefCell::new(GlobalInstance::new(ty, value, owner))));
        self.data.globals.len() as GlobalAddr - 1
    }

    pub(crate) fn add_elem(&mut self, elem: ElemInstance) -> ElemAddr {
        self.data.elems.push(elem);
        self.data.elems.len() as ElemAddr - 1
    }

    pub(crate) fn add_data(&mut self, data: DataInstance) -> DataAddr {
        self.data.datas.push(data);
        self.data.datas.len() as DataAddr - 1
    }

    /// Get the function at the actual index in the store
    pub(crate) fn get_func(&self, addr: FuncAddr) -> Result<&Rc<FunctionInstance>> {
        self.data
            .funcs
            .get(addr as usize)
            .ok_or(Error::IndexOutOfBounds { kind: "function", index: addr as usize, count: self.data.funcs.len() })
    }

    /// Get the memory at the actual index in the store
    pub(crate) fn get_mem(&self, addr: MemAddr) -> Result<&Rc<RefCell<MemoryInstance>>> {
        self.data
            .mems
            .get(addr as usize)
            .ok_or(Error::IndexOutOfBounds { kind: "memory", index: addr as usize, count: self.data.mems.len() })
    }

    /// Get the table at the actual index in the store
    pub(crate) fn get_table(&self, addr: TableAddr) -> Result<&Rc<RefCell<TableInstance>>> {
        self.data
            .tables
            .get(addr as usize)
            .ok_or(Error::IndexOutOfBounds { kind: "table", index: addr as usize, count: self.data.tables.len() })
    }

    /// Get the global at the actual index in the store
    pub(crate) fn get_global(&self, addr: GlobalAddr) -> Result<&Rc<RefCell<GlobalInstance>>> {
        self.data
            .globals
            .get(addr as usize)
            .ok_or(Error::IndexOutOfBounds { kind: "global", index: addr as usize, count: self.data.globals.len() })
    }

    /// Evaluate a constant expression against the merged index spaces built
    /// so far. The Wasm constant-expression discipline guarantees forward
    /// references are absent.
    pub(crate) fn eval_const(
        &self,
        funcs: &[FuncAddr],
        globals: &[GlobalAddr],
        instr: &ConstInstruction,
    ) -> Result<RawValue> {
        use ConstInstruction::*;
        Ok(match instr {
            I32Const(i) => RawValue::from(*i),
            I64Const(i) => RawValue::from(*i),
            F32Const(f) => RawValue::from(*f),
            F64Const(f) => RawValue::from(*f),
            GlobalGet(i) => {
                let addr = *globals
                    .get(*i as usize)
                    .ok_or(Error::IndexOutOfBounds { kind: "global", index: *i as usize, count: globals.len() })?;
                self.get_global(addr)?.borrow().value
            }
            RefNull(_) => RawValue::from(-1i64),
            RefFunc(i) => {
                let addr = *funcs
                    .get(*i as usize)
                    .ok_or(Error::IndexOutOfBounds { kind: "function", index: *i as usize, count: funcs.len() })?;
                RawValue::from(addr as i64)
            }
        })
    }

    pub(crate) fn eval_i32_const(
        &self,
        funcs: &[FuncAddr],
        globals: &[GlobalAddr],
        instr: &ConstInstruction,
    ) -> Result<i32> {
        Ok(i32::from(self.eval_const(funcs, globals, instr)?))
    }
}

/// A WebAssembly Function Instance
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#function-instances>
#[derive(Debug)]
pub(crate) struct FunctionInstance {
    /// The interned signature id; equal ids mean structurally equal types.
    pub(crate) ty_id: SigId,
    pub(crate) owner: ModuleInstanceAddr,
    pub(crate) func: Function,
}

impl FunctionInstance {
    pub(crate) fn ty<'r>(&self, runtime: &'r Runtime) -> &'r FuncType {
        runtime.types.resolve(self.ty_id)
    }
}

#[derive(Debug)]
pub(crate) enum Function {
    Wasm(WasmFuncEntity),
    Host(HostFuncEntity),
}

#[derive(Debug)]
pub(crate) struct WasmFuncEntity {
    pub(crate) locals: Box<[ValType]>,
    pub(crate) body: RefCell<CodeBody>,
}

impl WasmFuncEntity {
    /// The compiled body, if the one-shot transition has happened.
    pub(crate) fn compiled(&self) -> Option<CompiledBody> {
        match &*self.body.borrow() {
            CodeBody::Compiled(compiled) => Some(compiled.clone()),
            CodeBody::Uncompiled(_) => None,
        }
    }
}

/// The state of a wasm function's code.
///
/// Starts `Uncompiled` and transitions exactly once to `Compiled` on first
/// call; after the transition the instruction sequence is immutable.
#[derive(Debug)]
pub(crate) enum CodeBody {
    Uncompiled(Rc<[u8]>),
    Compiled(CompiledBody),
}

pub(crate) struct HostFuncEntity {
    pub(crate) ty: FuncType,
    pub(crate) func: Rc<HostFuncInner>,
}

impl core::fmt::Debug for HostFuncEntity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostFuncEntity").field("ty", &self.ty).finish_non_exhaustive()
    }
}

/// A WebAssembly Table Instance
///
/// Elements are `None` when uninitialized (null), which keeps null distinct
/// from any valid function address.
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#table-instances>
#[derive(Debug)]
pub(crate) struct TableInstance {
    pub(crate) kind: TableType,
    pub(crate) elements: Vec<Option<Addr>>,
    pub(crate) owner: ModuleInstanceAddr,
}

impl TableInstance {
    pub(crate) fn new(kind: TableType, owner: ModuleInstanceAddr) -> Self {
        Self { elements: vec![None; kind.size_initial as usize], kind, owner }
    }

    pub(crate) fn get(&self, index: usize) -> Result<Option<Addr>> {
        self.elements.get(index).copied().ok_or_else(|| {
            Trap::OutOfBoundsTableAccess { offset: index, len: 1, max: self.elements.len() }.into()
        })
    }

    pub(crate) fn set(&mut self, index: usize, value: Option<Addr>) -> Result<()> {
        let max = self.elements.len();
        match self.elements.get_mut(index) {
            Some(element) => {
                *element = value;
                Ok(())
            }
            None => Err(Trap::OutOfBoundsTableAccess { offset: index, len: 1, max }.into()),
        }
    }

    pub(crate) fn size(&self) -> i32 {
        self.elements.len() as i32
    }

    pub(crate) fn grow(&mut self, delta: i32, init: Option<Addr>, limiter: &mut dyn ResourceLimiter) -> i32 {
        let current = self.elements.len() as u64;
        let new = current + delta as u32 as u64;

        if new > self.kind.size_max.unwrap_or(u32::MAX) as u64 {
            return -1;
        }
        if !limiter.table_growing(current as u32, new as u32, self.kind.size_max) {
            return -1;
        }

        self.elements.resize(new as usize, init);
        current as i32
    }

    pub(crate) fn fill(&mut self, offset: usize, len: usize, value: Option<Addr>) -> Result<()> {
        let end = self.checked_range(offset, len)?;
        self.elements[offset..end].fill(value);
        Ok(())
    }

    pub(crate) fn init(&mut self, offset: usize, items: &[Option<Addr>]) -> Result<()> {
        let end = self.checked_range(offset, items.len())?;
        self.elements[offset..end].copy_from_slice(items);
        Ok(())
    }

    pub(crate) fn copy_within(&mut self, dst: usize, src: usize, len: usize) -> Result<()> {
        self.checked_range(dst, len)?;
        let src_end = self.checked_range(src, len)?;
        self.elements.copy_within(src..src_end, dst);
        Ok(())
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<usize> {
        let max = self.elements.len();
        match offset.checked_add(len) {
            Some(end) if end <= max => Ok(end),
            _ => Err(Trap::OutOfBoundsTableAccess { offset, len, max }.into()),
        }
    }
}

/// A WebAssembly Memory Instance
///
/// Growth may reallocate the backing buffer; readers that cache base and
/// size must refresh after any operation that can grow memory.
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#memory-instances>
#[derive(Debug)]
pub(crate) struct MemoryInstance {
    pub(crate) kind: MemoryType,
    pub(crate) data: Vec<u8>,
    pub(crate) page_count: usize,
    pub(crate) owner: ModuleInstanceAddr,
}

impl MemoryInstance {
    pub(crate) fn new(kind: MemoryType, owner: ModuleInstanceAddr) -> Self {
        log::debug!("initializing memory with {} pages", kind.page_count_initial);

        Self {
            data: vec![0; PAGE_SIZE * kind.page_count_initial as usize],
            page_count: kind.page_count_initial as usize,
            kind,
            owner,
        }
    }

    pub(crate) fn max_pages(&self) -> usize {
        self.kind.page_count_max.unwrap_or(MAX_PAGES as u64) as usize
    }

    pub(crate) fn store(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        let end = self.checked_range(addr, data.len())?;
        self.data[addr..end].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn load_bytes<const N: usize>(&self, addr: usize) -> Result<[u8; N]> {
        let end = self.checked_range(addr, N)?;
        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.data[addr..end]);
        Ok(bytes)
    }

    pub(crate) fn fill(&mut self, addr: usize, len: usize, value: u8) -> Result<()> {
        let end = self.checked_range(addr, len)?;
        self.data[addr..end].fill(value);
        Ok(())
    }

    pub(crate) fn copy_within(&mut self, dst: usize, src: usize, len: usize) -> Result<()> {
        self.checked_range(dst, len)?;
        let src_end = self.checked_range(src, len)?;
        self.data.copy_within(src..src_end, dst);
        Ok(())
    }

    pub(crate) fn size_pages(&self) -> i32 {
        self.page_count as i32
    }

    /// Grow the memory by `delta` pages, returning the previous page count
    /// or `-1` if the maximum or the resource limiter rejects the growth.
    pub(crate) fn grow(&mut self, delta: i32, limiter: &mut dyn ResourceLimiter) -> i32 {
        let current = self.page_count;
        let new = current as u64 + delta as u32 as u64;

        if new > self.max_pages() as u64 || new > MAX_PAGES as u64 {
            return -1;
        }

        let max_bytes = self.kind.page_count_max.map(|p| p as usize * PAGE_SIZE);
        if !limiter.memory_growing(current * PAGE_SIZE, new as usize * PAGE_SIZE, max_bytes) {
            return -1;
        }

        self.data.resize(new as usize * PAGE_SIZE, 0);
        self.page_count = new as usize;
        log::debug!("memory grown by {} pages to {}", delta, self.page_count);

        current as i32
    }

    fn checked_range(&self, addr: usize, len: usize) -> Result<usize> {
        let max = self.data.len();
        match addr.checked_add(len) {
            Some(end) if end <= max => Ok(end),
            _ => {
                crate::cold();
                Err(Trap::OutOfBoundsMemoryAccess { offset: addr, len, max }.into())
            }
        }
    }
}

/// A WebAssembly Global Instance
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#global-instances>
#[derive(Debug)]
pub(crate) struct GlobalInstance {
    pub(crate) ty: GlobalType,
    pub(crate) value: RawValue,
    pub(crate) owner: ModuleInstanceAddr,
}

impl GlobalInstance {
    pub(crate) fn new(ty: GlobalType, value: RawValue, owner: ModuleInstanceAddr) -> Self {
        Self { ty, value, owner }
    }
}

/// A WebAssembly Element Instance
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#element-instances>
#[derive(Debug)]
pub(crate) struct ElemInstance {
    pub(crate) kind: ElementKind,
    /// `None` if the segment was dropped; a dropped segment behaves as empty.
    pub(crate) items: Option<Vec<Option<FuncAddr>>>,
    pub(crate) owner: ModuleInstanceAddr,
}

impl ElemInstance {
    pub(crate) fn new(kind: ElementKind, owner: ModuleInstanceAddr, items: Option<Vec<Option<FuncAddr>>>) -> Self {
        Self { kind, owner, items }
    }

    pub(crate) fn items(&self) -> &[Option<FuncAddr>] {
        self.items.as_deref().unwrap_or(&[])
    }

    pub(crate) fn drop_items(&mut self) {
        self.items = None;
    }
}

/// A WebAssembly Data Instance
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#data-instances>
#[derive(Debug)]
pub(crate) struct DataInstance {
    /// `None` if the segment was dropped; a dropped segment behaves as empty.
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) owner: ModuleInstanceAddr,
}

impl DataInstance {
    pub(crate) fn new(data: Option<Vec<u8>>, owner: ModuleInstanceAddr) -> Self {
        Self { data, owner }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub(crate) fn drop_bytes(&mut self) {
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(pages: u64, max: Option<u64>) -> MemoryInstance {
        MemoryInstance::new(MemoryType::new_32(pages, max), 0)
    }

    #[test]
    fn test_memory_bounds() {
        let mut m = mem(1, Some(1));
        m.store(PAGE_SIZE - 4, &42u32.to_le_bytes()).expect("store at boundary");
        assert_eq!(m.load_bytes::<4>(PAGE_SIZE - 4).expect("load at boundary"), 42u32.to_le_bytes());
        assert!(m.store(PAGE_SIZE - 3, &42u32.to_le_bytes()).is_err());
        assert!(m.load_bytes::<2>(usize::MAX).is_err());
    }

    #[test]
    fn test_memory_grow() {
        let mut limiter = UnlimitedResources;
        let mut m = mem(1, Some(2));
        assert_eq!(m.grow(1, &mut limiter), 1);
        assert_eq!(m.size_pages(), 2);
        // past the declared maximum
        assert_eq!(m.grow(1, &mut limiter), -1);
        assert_eq!(m.size_pages(), 2);
        // the new pages are live after a successful grow
        m.store(PAGE_SIZE * 2 - 1, &[1]).expect("store into grown page");
    }

    #[test]
    fn test_memory_grow_limiter() {
        struct NoGrowth;
        impl ResourceLimiter for NoGrowth {
            fn memory_growing(&mut self, current: usize, _desired: usize, _maximum: Option<usize>) -> bool {
                current == 0
            }
            fn table_growing(&mut self, _current: u32, _desired: u32, _maximum: Option<u32>) -> bool {
                true
            }
        }

        let mut limiter = NoGrowth;
        let mut m = mem(1, None);
        assert_eq!(m.grow(1, &mut limiter), -1);
        assert_eq!(m.size_pages(), 1);
    }

    #[test]
    fn test_table_ops() {
        let mut limiter = UnlimitedResources;
        let mut t = TableInstance::new(TableType::new(ValType::RefFunc, 2, Some(4)), 0);
        assert_eq!(t.get(0).expect("in bounds"), None);
        t.set(1, Some(7)).expect("in bounds");
        assert_eq!(t.get(1).expect("in bounds"), Some(7));
        assert!(t.get(2).is_err());

        assert_eq!(t.grow(2, Some(9), &mut limiter), 2);
        assert_eq!(t.get(3).expect("grown"), Some(9));
        assert_eq!(t.grow(1, None, &mut limiter), -1);
    }
}
