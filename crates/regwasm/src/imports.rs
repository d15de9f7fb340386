use alloc::{
    collections::BTreeMap,
    rc::Rc,
    string::{String, ToString},
    vec::Vec,
};
use regwasm_types::{
    ExternVal, FuncAddr, FuncType, Global, GlobalAddr, GlobalType, ImportKind, MemAddr, ModuleInstanceAddr, TableAddr,
    WasmModule, WasmValue,
};

use crate::{
    store::{Function, FunctionInstance, HostFuncEntity},
    Error, LinkingError, ModuleInstance, Result, Runtime, Trap,
};

/// The callable behind a host function.
pub(crate) type HostFuncInner = dyn Fn(Caller<'_>, &[WasmValue]) -> Result<Vec<WasmValue>, Trap>;

/// The handle a host function is invoked through.
///
/// Gives the host access to the runtime (including re-entrant calls back
/// into wasm) and the identity of the calling instance.
#[derive(Debug)]
pub struct Caller<'a> {
    runtime: &'a mut Runtime,
    instance: ModuleInstanceAddr,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(runtime: &'a mut Runtime, instance: ModuleInstanceAddr) -> Self {
        Self { runtime, instance }
    }

    /// The runtime the calling instance lives in
    pub fn runtime(&mut self) -> &mut Runtime {
        self.runtime
    }

    /// The instance the call came through
    pub fn instance(&self) -> Result<ModuleInstance> {
        Ok(self.runtime.get_instance(self.instance)?.clone())
    }

    /// The address of the calling instance
    pub fn instance_addr(&self) -> ModuleInstanceAddr {
        self.instance
    }
}

/// A host function value: a function type plus an opaque callable
#[derive(Clone)]
pub struct HostFunc {
    pub(crate) ty: FuncType,
    pub(crate) func: Rc<HostFuncInner>,
}

impl core::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish_non_exhaustive()
    }
}

#[derive(Debug)]
#[non_exhaustive]
/// An external value provided to [`Imports::define`]
pub enum Extern {
    /// A global value definition
    Global(Global),

    /// A host function
    Func(HostFunc),

    /// An entity that already lives in the runtime, e.g. another instance's
    /// export
    External(ExternVal),
}

impl Extern {
    /// Create a new global import
    pub fn global(val: WasmValue, mutable: bool) -> Self {
        Self::Global(Global { ty: GlobalType { ty: val.val_type(), mutable }, init: val.const_instr() })
    }

    /// Create a new host-function import
    pub fn func(
        ty: FuncType,
        func: impl Fn(Caller<'_>, &[WasmValue]) -> Result<Vec<WasmValue>, Trap> + 'static,
    ) -> Self {
        Self::Func(HostFunc { ty, func: Rc::new(func) })
    }

    /// Import an entity that already lives in the runtime
    pub fn external(val: ExternVal) -> Self {
        Self::External(val)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
/// Name of an import
pub struct ExternName {
    module: String,
    name: String,
}

#[derive(Debug, Default)]
/// Imports for a module instance
pub struct Imports {
    values: BTreeMap<ExternName, Extern>,
}

/// The per-kind address vectors produced by linking, in import order.
/// Locally defined entities are appended after these to form the merged
/// index spaces.
#[derive(Debug, Default)]
pub(crate) struct ResolvedImports {
    pub(crate) funcs: Vec<FuncAddr>,
    pub(crate) tables: Vec<TableAddr>,
    pub(crate) mems: Vec<MemAddr>,
    pub(crate) globals: Vec<GlobalAddr>,
}

impl Imports {
    /// Create a new empty import set
    pub fn new() -> Self {
        Imports { values: BTreeMap::new() }
    }

    /// Define an import
    pub fn define(&mut self, module: &str, name: &str, value: Extern) -> &mut Self {
        self.values.insert(ExternName { module: module.to_string(), name: name.to_string() }, value);
        self
    }

    fn get(&self, module: &str, name: &str) -> Option<&Extern> {
        self.values.get(&ExternName { module: module.to_string(), name: name.to_string() })
    }

    /// Resolve the module's imports in declaration order, type-checking each
    /// against the import's declared type.
    pub(crate) fn link(
        &self,
        runtime: &mut Runtime,
        module: &WasmModule,
        idx: ModuleInstanceAddr,
    ) -> Result<ResolvedImports> {
        let mut addrs = ResolvedImports::default();

        for import in module.imports.iter() {
            let ext = self
                .get(&import.module, &import.name)
                .ok_or_else(|| Error::from(LinkingError::unknown_import(import)))?;

            match (&import.kind, ext) {
                (ImportKind::Function(ty_addr), Extern::Func(host)) => {
                    let expected = module.func_types.get(*ty_addr as usize).ok_or(Error::IndexOutOfBounds {
                        kind: "type",
                        index: *ty_addr as usize,
                        count: module.func_types.len(),
                    })?;
                    if host.ty != *expected {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }

                    let ty_id = runtime.types.intern(&host.ty);
                    let func = Function::Host(HostFuncEntity { ty: host.ty.clone(), func: host.func.clone() });
                    addrs.funcs.push(runtime.add_func(FunctionInstance { ty_id, owner: idx, func }));
                }
                (ImportKind::Function(ty_addr), Extern::External(ExternVal::Func(addr))) => {
                    let expected = module.func_types.get(*ty_addr as usize).ok_or(Error::IndexOutOfBounds {
                        kind: "type",
                        index: *ty_addr as usize,
                        count: module.func_types.len(),
                    })?;
                    let func = runtime.get_func(*addr)?;
                    if func.ty(runtime) != expected {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }
                    addrs.funcs.push(*addr);
                }
                (ImportKind::Global(ty), Extern::Global(global)) => {
                    if global.ty != *ty {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }
                    let value = runtime.eval_const(&[], &[], &global.init)?;
                    addrs.globals.push(runtime.add_global(*ty, value, idx));
                }
                (ImportKind::Global(ty), Extern::External(ExternVal::Global(addr))) => {
                    if runtime.get_global(*addr)?.borrow().ty != *ty {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }
                    addrs.globals.push(*addr);
                }
                (ImportKind::Memory(ty), Extern::External(ExternVal::Memory(addr))) => {
                    let mem = runtime.get_mem(*addr)?.borrow();
                    let compatible = mem.kind.page_count_initial >= ty.page_count_initial
                        && match ty.page_count_max {
                            Some(required) => mem.kind.page_count_max.is_some_and(|max| max <= required),
                            None => true,
                        };
                    drop(mem);
                    if !compatible {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }
                    addrs.mems.push(*addr);
                }
                (ImportKind::Table(ty), Extern::External(ExternVal::Table(addr))) => {
                    let table = runtime.get_table(*addr)?.borrow();
                    let compatible = table.kind.element_type == ty.element_type
                        && table.kind.size_initial >= ty.size_initial
                        && match ty.size_max {
                            Some(required) => table.kind.size_max.is_some_and(|max| max <= required),
                            None => true,
                        };
                    drop(table);
                    if !compatible {
                        return Err(LinkingError::incompatible_import_type(import).into());
                    }
                    addrs.tables.push(*addr);
                }
                _ => return Err(LinkingError::incompatible_import_type(import).into()),
            }
        }

        Ok(addrs)
    }
}
