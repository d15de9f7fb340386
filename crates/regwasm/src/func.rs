use alloc::{string::String, string::ToString, vec, vec::Vec};
use regwasm_types::{FuncAddr, FuncType, WasmValue};

use crate::{runtime::interpreter, Error, ModuleInstance, Result, Runtime, Trap};

/// A handle to an exported function
#[derive(Debug, Clone)]
pub struct FuncHandle {
    pub(crate) module: ModuleInstance,
    pub(crate) addr: FuncAddr,
    pub(crate) ty: FuncType,
    pub name: Option<String>,
}

impl FuncHandle {
    /// Call a function
    ///
    /// Each call executes on a fresh stack context; re-entrant calls from a
    /// host callback are independent executions.
    ///
    /// See <https://webassembly.github.io/spec/core/exec/modules.html#invocation>
    pub fn call(&self, runtime: &mut Runtime, params: &[WasmValue]) -> Result<Vec<WasmValue>> {
        if self.module.store_id() != runtime.id() {
            return Err(Error::InvalidStore);
        }

        let func_ty = &self.ty;
        if func_ty.params.len() != params.len() {
            return Err(Trap::argument_mismatch(&func_ty.params, params).into());
        }

        if func_ty.params.iter().zip(params).any(|(ty, param)| *ty != param.val_type()) {
            return Err(Trap::argument_mismatch(&func_ty.params, params).into());
        }

        interpreter::execute(runtime, &self.module, self.addr, params, func_ty)
    }

    /// The function's type
    pub fn ty(&self) -> &FuncType {
        &self.ty
    }
}

/// A [`FuncHandle`] with a statically known signature
#[derive(Debug)]
pub struct TypedFuncHandle<P, R> {
    pub func: FuncHandle,
    pub(crate) marker: core::marker::PhantomData<(P, R)>,
}

pub trait IntoWasmValueTuple {
    fn into_wasm_value_tuple(self) -> Vec<WasmValue>;
}

pub trait FromWasmValueTuple {
    fn from_wasm_value_tuple(values: Vec<WasmValue>) -> Result<Self>
    where
        Self: Sized;
}

impl<P: IntoWasmValueTuple, R: FromWasmValueTuple> TypedFuncHandle<P, R> {
    pub fn call(&self, runtime: &mut Runtime, params: P) -> Result<R> {
        let wasm_values = params.into_wasm_value_tuple();
        let result = self.func.call(runtime, &wasm_values)?;
        R::from_wasm_value_tuple(result)
    }
}

macro_rules! impl_into_wasm_value_tuple {
    ($($T:ident),*) => {
        impl<$($T),*> IntoWasmValueTuple for ($($T,)*)
        where
            $($T: Into<WasmValue>),*
        {
            #[allow(non_snake_case)]
            fn into_wasm_value_tuple(self) -> Vec<WasmValue> {
                let ($($T,)*) = self;
                vec![$($T.into(),)*]
            }
        }
    }
}

impl_into_wasm_value_tuple!(T1);
impl_into_wasm_value_tuple!(T1, T2);
impl_into_wasm_value_tuple!(T1, T2, T3);
impl_into_wasm_value_tuple!(T1, T2, T3, T4);
impl_into_wasm_value_tuple!(T1, T2, T3, T4, T5);
impl_into_wasm_value_tuple!(T1, T2, T3, T4, T5, T6);
impl_into_wasm_value_tuple!(T1, T2, T3, T4, T5, T6, T7);
impl_into_wasm_value_tuple!(T1, T2, T3, T4, T5, T6, T7, T8);

macro_rules! impl_from_wasm_value_tuple {
    ($($T:ident),*) => {
        impl<$($T),*> FromWasmValueTuple for ($($T,)*)
        where
            $($T: TryFrom<WasmValue, Error = ()>),*
        {
            fn from_wasm_value_tuple(values: Vec<WasmValue>) -> Result<Self> {
                let mut iter = values.into_iter();
                Ok((
                    $(
                        $T::try_from(
                            iter.next()
                            .ok_or(Error::Other("not enough values in the result".to_string()))?
                        )
                        .map_err(|_| Error::Other("could not convert result value to the expected type".to_string()))?,
                    )*
                ))
            }
        }
    }
}

impl_from_wasm_value_tuple!(T1);
impl_from_wasm_value_tuple!(T1, T2);
impl_from_wasm_value_tuple!(T1, T2, T3);
impl_from_wasm_value_tuple!(T1, T2, T3, T4);
impl_from_wasm_value_tuple!(T1, T2, T3, T4, T5);
impl_from_wasm_value_tuple!(T1, T2, T3, T4, T5, T6);
impl_from_wasm_value_tuple!(T1, T2, T3, T4, T5, T6, T7);
impl_from_wasm_value_tuple!(T1, T2, T3, T4, T5, T6, T7, T8);
