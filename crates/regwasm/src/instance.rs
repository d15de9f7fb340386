use alloc::{boxed::Box, collections::BTreeMap, rc::Rc, string::ToString, vec::Vec};
use core::cell::RefCell;
use regwasm_types::{
    DataAddr, DataKind, ElemAddr, ElementItem, ElementKind, ExternVal, ExternalKind, FuncAddr, FuncType, GlobalAddr,
    MemAddr, ModuleInstanceAddr, TableAddr, TypeAddr, WasmModule,
};

use crate::{
    func::{FromWasmValueTuple, IntoWasmValueTuple},
    imports::Imports,
    interner::SigId,
    store::{CodeBody, DataInstance, ElemInstance, Function, FunctionInstance, WasmFuncEntity},
    Error, FuncHandle, InstantiationError, Result, Runtime, TypedFuncHandle,
};

/// A WebAssembly Module Instance
///
/// All entities are addressed through the merged import+local index spaces;
/// addrs are indices into the runtime's entity pools.
///
/// See <https://webassembly.github.io/spec/core/exec/runtime.html#module-instances>
#[derive(Debug, Clone)]
pub struct ModuleInstance(Rc<ModuleInstanceInner>);

#[derive(Debug)]
pub(crate) struct ModuleInstanceInner {
    pub(crate) store_id: usize,
    pub(crate) idx: ModuleInstanceAddr,

    pub(crate) types: Box<[FuncType]>,
    pub(crate) sig_ids: Box<[SigId]>,

    pub(crate) func_addrs: Box<[FuncAddr]>,
    pub(crate) table_addrs: Box<[TableAddr]>,
    pub(crate) mem_addrs: Box<[MemAddr]>,
    pub(crate) global_addrs: Box<[GlobalAddr]>,
    pub(crate) elem_addrs: Box<[ElemAddr]>,
    pub(crate) data_addrs: Box<[DataAddr]>,

    pub(crate) func_start: Option<FuncAddr>,
    pub(crate) exports: BTreeMap<Box<str>, ExternVal>,
}

impl ModuleInstance {
    /// Get the module instance's address
    pub fn id(&self) -> ModuleInstanceAddr {
        self.0.idx
    }

    pub(crate) fn store_id(&self) -> usize {
        self.0.store_id
    }

    /// Allocate the instance: combine imports and module-local definitions
    /// into merged index spaces, evaluate constant initializers, and build
    /// the export map. Active segment copies are performed separately by
    /// [`ModuleInstance::initialize`].
    ///
    /// See <https://webassembly.github.io/spec/core/exec/modules.html#alloc-module>
    pub(crate) fn instantiate(runtime: &mut Runtime, module: &WasmModule, imports: Imports) -> Result<Self> {
        // Reserve the instance index first so entities can hold it by identity.
        let idx = runtime.next_instance_idx();

        // Imports come first in each index space, in import order.
        let mut addrs = imports.link(runtime, module, idx)?;

        let sig_ids: Box<[SigId]> = module.func_types.iter().map(|ty| runtime.types.intern(ty)).collect();

        // Local functions; bodies stay uncompiled until first call.
        for func in module.funcs.iter() {
            let ty_id = *sig_ids.get(func.ty_addr as usize).ok_or(Error::IndexOutOfBounds {
                kind: "type",
                index: func.ty_addr as usize,
                count: sig_ids.len(),
            })?;
            let entity = WasmFuncEntity {
                locals: func.locals.clone(),
                body: RefCell::new(CodeBody::Uncompiled(Rc::from(&*func.body))),
            };
            addrs.funcs.push(runtime.add_func(FunctionInstance { ty_id, owner: idx, func: Function::Wasm(entity) }));
        }

        // Tables and memories; the resource limiter sees the declared minimums.
        for table in module.table_types.iter() {
            addrs.tables.push(runtime.add_table(table.clone(), idx)?);
        }
        for mem in module.memory_types.iter() {
            addrs.mems.push(runtime.add_mem(*mem, idx)?);
        }

        // Globals, each evaluated against the entities allocated so far.
        for global in module.globals.iter() {
            let value = runtime.eval_const(&addrs.funcs, &addrs.globals, &global.init)?;
            addrs.globals.push(runtime.add_global(global.ty, value, idx));
        }

        // Element segments: passive items become references now; active and
        // declarative segments start dropped (the active copy happens during
        // initialization).
        let mut elem_addrs = Vec::with_capacity(module.elements.len());
        for elem in module.elements.iter() {
            let items = match elem.kind {
                ElementKind::Passive => Some(eval_element_items(runtime, &addrs.funcs, &addrs.globals, &elem.items)?),
                ElementKind::Active { .. } | ElementKind::Declared => None,
            };
            elem_addrs.push(runtime.add_elem(ElemInstance::new(elem.kind, idx, items)));
        }

        // Data segments: passive bytes retained, active start dropped.
        let mut data_addrs = Vec::with_capacity(module.data.len());
        for data in module.data.iter() {
            let bytes = match data.kind {
                DataKind::Passive => Some(data.data.to_vec()),
                DataKind::Active { .. } => None,
            };
            data_addrs.push(runtime.add_data(DataInstance::new(bytes, idx)));
        }

        // Export map over the merged index spaces.
        let mut exports = BTreeMap::new();
        for export in module.exports.iter() {
            let (addr, count) = match export.kind {
                ExternalKind::Func => (addrs.funcs.get(export.index as usize), addrs.funcs.len()),
                ExternalKind::Table => (addrs.tables.get(export.index as usize), addrs.tables.len()),
                ExternalKind::Memory => (addrs.mems.get(export.index as usize), addrs.mems.len()),
                ExternalKind::Global => (addrs.globals.get(export.index as usize), addrs.globals.len()),
            };
            let addr = *addr.ok_or(InstantiationError::ExportIndexOutOfBounds {
                kind: export.kind,
                index: export.index,
                count,
            })?;
            exports.insert(export.name.clone(), ExternVal::new(export.kind, addr));
        }

        let instance = ModuleInstance(Rc::new(ModuleInstanceInner {
            store_id: runtime.id(),
            idx,

            types: module.func_types.clone(),
            sig_ids,

            func_addrs: addrs.funcs.into_boxed_slice(),
            table_addrs: addrs.tables.into_boxed_slice(),
            mem_addrs: addrs.mems.into_boxed_slice(),
            global_addrs: addrs.globals.into_boxed_slice(),
            elem_addrs: elem_addrs.into_boxed_slice(),
            data_addrs: data_addrs.into_boxed_slice(),

            func_start: module.start_func,
            exports,
        }));

        runtime.add_instance(instance.clone());
        Ok(instance)
    }

    /// Perform the active-segment copies: `table.init` / `memory.init` with
    /// up-front bounds checks, followed by the segment-drop semantics (the
    /// segments were allocated dropped already).
    pub(crate) fn initialize(&self, runtime: &mut Runtime, module: &WasmModule) -> Result<()> {
        for elem in module.elements.iter() {
            let ElementKind::Active { table, offset } = elem.kind else { continue };

            let offset = runtime.eval_i32_const(self.func_addrs(), self.global_addrs(), &offset)?;
            let items = eval_element_items(runtime, self.func_addrs(), self.global_addrs(), &elem.items)?;
            let table_addr = self.resolve_table_addr(table)?;
            runtime.get_table(table_addr)?.clone().borrow_mut().init(offset as u32 as usize, &items)?;
        }

        for data in module.data.iter() {
            let DataKind::Active { mem, offset } = &data.kind else { continue };
            if *mem != 0 {
                return Err(Error::UnsupportedFeature("data segments for non-zero memories".to_string()));
            }

            let offset = runtime.eval_i32_const(self.func_addrs(), self.global_addrs(), offset)?;
            let mem_addr = self.resolve_mem_addr(*mem)?;
            runtime.get_mem(mem_addr)?.clone().borrow_mut().store(offset as u32 as usize, &data.data)?;
        }

        Ok(())
    }

    /// Get one of the module's exports by name
    pub fn export(&self, name: &str) -> Option<ExternVal> {
        self.0.exports.get(name).copied()
    }

    /// Get an exported function by name
    pub fn exported_func(&self, runtime: &Runtime, name: &str) -> Result<FuncHandle> {
        if self.0.store_id != runtime.id() {
            return Err(Error::InvalidStore);
        }

        let export = self
            .export(name)
            .ok_or_else(|| Error::Other(alloc::format!("export not found: {}", name)))?;
        let ExternVal::Func(addr) = export else {
            return Err(Error::Other(alloc::format!("export is not a function: {}", name)));
        };

        let func_inst = runtime.get_func(addr)?;
        let ty = func_inst.ty(runtime).clone();

        Ok(FuncHandle { addr, module: self.clone(), name: Some(name.to_string()), ty })
    }

    /// Get a typed exported function by name
    pub fn typed_func<P, R>(&self, runtime: &Runtime, name: &str) -> Result<TypedFuncHandle<P, R>>
    where
        P: IntoWasmValueTuple,
        R: FromWasmValueTuple,
    {
        let func = self.exported_func(runtime, name)?;
        Ok(TypedFuncHandle { func, marker: core::marker::PhantomData })
    }

    /// Get the start function of the module, if one is declared
    ///
    /// See <https://webassembly.github.io/spec/core/syntax/modules.html#start-function>
    pub fn start_func(&self, runtime: &Runtime) -> Result<Option<FuncHandle>> {
        if self.0.store_id != runtime.id() {
            return Err(Error::InvalidStore);
        }

        let Some(func_index) = self.0.func_start else {
            return Ok(None);
        };

        let addr = self.resolve_func_addr(func_index)?;
        let func_inst = runtime.get_func(addr)?;
        let ty = func_inst.ty(runtime).clone();

        Ok(Some(FuncHandle { module: self.clone(), addr, ty, name: None }))
    }

    /// Invoke the start function of the module, if one is declared
    ///
    /// See <https://webassembly.github.io/spec/core/syntax/modules.html#syntax-start>
    pub fn start(&self, runtime: &mut Runtime) -> Result<Option<()>> {
        let Some(func) = self.start_func(runtime)? else {
            return Ok(None);
        };

        let _ = func.call(runtime, &[])?;
        Ok(Some(()))
    }

    pub(crate) fn func_addrs(&self) -> &[FuncAddr] {
        &self.0.func_addrs
    }

    pub(crate) fn global_addrs(&self) -> &[GlobalAddr] {
        &self.0.global_addrs
    }

    pub(crate) fn mem_addrs(&self) -> &[MemAddr] {
        &self.0.mem_addrs
    }

    pub(crate) fn ty(&self, type_addr: TypeAddr) -> Result<&FuncType> {
        self.0.types.get(type_addr as usize).ok_or(Error::IndexOutOfBounds {
            kind: "type",
            index: type_addr as usize,
            count: self.0.types.len(),
        })
    }

    pub(crate) fn sig_id(&self, type_addr: TypeAddr) -> Result<SigId> {
        self.0.sig_ids.get(type_addr as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "type",
            index: type_addr as usize,
            count: self.0.sig_ids.len(),
        })
    }

    // resolve module-space indices to runtime addresses

    pub(crate) fn resolve_func_addr(&self, idx: u32) -> Result<FuncAddr> {
        self.0.func_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "function",
            index: idx as usize,
            count: self.0.func_addrs.len(),
        })
    }

    pub(crate) fn resolve_table_addr(&self, idx: u32) -> Result<TableAddr> {
        self.0.table_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "table",
            index: idx as usize,
            count: self.0.table_addrs.len(),
        })
    }

    pub(crate) fn resolve_mem_addr(&self, idx: u32) -> Result<MemAddr> {
        self.0.mem_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "memory",
            index: idx as usize,
            count: self.0.mem_addrs.len(),
        })
    }

    pub(crate) fn resolve_global_addr(&self, idx: u32) -> Result<GlobalAddr> {
        self.0.global_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "global",
            index: idx as usize,
            count: self.0.global_addrs.len(),
        })
    }

    pub(crate) fn resolve_elem_addr(&self, idx: u32) -> Result<ElemAddr> {
        self.0.elem_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "element",
            index: idx as usize,
            count: self.0.elem_addrs.len(),
        })
    }

    pub(crate) fn resolve_data_addr(&self, idx: u32) -> Result<DataAddr> {
        self.0.data_addrs.get(idx as usize).copied().ok_or(Error::IndexOutOfBounds {
            kind: "data",
            index: idx as usize,
            count: self.0.data_addrs.len(),
        })
    }
}

/// Evaluate element items to references: a function index resolves through
/// the merged function space, a constant expression to a (possibly null)
/// reference.
fn eval_element_items(
    runtime: &Runtime,
    funcs: &[FuncAddr],
    globals: &[GlobalAddr],
    items: &[ElementItem],
) -> Result<Vec<Option<FuncAddr>>> {
    items
        .iter()
        .map(|item| match item {
            ElementItem::Func(idx) => funcs
                .get(*idx as usize)
                .copied()
                .map(Some)
                .ok_or(Error::IndexOutOfBounds { kind: "function", index: *idx as usize, count: funcs.len() }),
            ElementItem::Expr(expr) => {
                let value = i64::from(runtime.eval_const(funcs, globals, expr)?);
                Ok(if value < 0 { None } else { Some(value as u32) })
            }
        })
        .collect()
}
