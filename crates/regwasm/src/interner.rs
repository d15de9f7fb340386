use alloc::{collections::BTreeMap, vec::Vec};
use regwasm_types::FuncType;

/// A dense id for an interned function type.
///
/// Two ids taken from the same interner are equal iff the types they were
/// interned from are structurally equal, which turns the `call_indirect`
/// signature check into an integer compare.
pub(crate) type SigId = u32;

/// Deduplicating map assigning dense ids to function types.
///
/// Ids are stable for the life of the owning runtime.
#[derive(Debug, Default)]
pub(crate) struct TypeInterner {
    types: Vec<FuncType>,
    ids: BTreeMap<FuncType, SigId>,
}

impl TypeInterner {
    pub(crate) fn intern(&mut self, ty: &FuncType) -> SigId {
        if let Some(id) = self.ids.get(ty) {
            return *id;
        }

        let id = self.types.len() as SigId;
        self.types.push(ty.clone());
        self.ids.insert(ty.clone(), id);
        id
    }

    pub(crate) fn resolve(&self, id: SigId) -> &FuncType {
        &self.types[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use regwasm_types::ValType;

    fn ty(params: &[ValType], results: &[ValType]) -> FuncType {
        FuncType { params: Box::from(params), results: Box::from(results) }
    }

    #[test]
    fn test_intern_roundtrip() {
        let mut interner = TypeInterner::default();
        let a = ty(&[ValType::I32, ValType::I32], &[ValType::I32]);
        let b = ty(&[ValType::I64], &[]);

        let a_id = interner.intern(&a);
        let b_id = interner.intern(&b);

        assert_ne!(a_id, b_id);
        assert_eq!(interner.resolve(a_id), &a);
        assert_eq!(interner.resolve(b_id), &b);
    }

    #[test]
    fn test_intern_dedup() {
        let mut interner = TypeInterner::default();
        let a = ty(&[ValType::F64], &[ValType::F64]);
        let a2 = ty(&[ValType::F64], &[ValType::F64]);
        let b = ty(&[ValType::F64], &[ValType::F32]);

        assert_eq!(interner.intern(&a), interner.intern(&a2));
        assert_ne!(interner.intern(&a), interner.intern(&b));
    }
}
