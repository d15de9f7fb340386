use crate::{ParseError, Result};
use alloc::{boxed::Box, format, string::ToString, vec::Vec};
use regwasm_types::*;
use wasmparser::OperatorsReader;

pub(crate) fn convert_module_elements<'a, T: IntoIterator<Item = wasmparser::Result<wasmparser::Element<'a>>>>(
    elements: T,
) -> Result<Vec<Element>> {
    elements.into_iter().map(|element| convert_module_element(element?)).collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_module_element(element: wasmparser::Element<'_>) -> Result<Element> {
    let kind = match element.kind {
        wasmparser::ElementKind::Active { table_index, offset_expr } => ElementKind::Active {
            table: table_index.unwrap_or(0),
            offset: process_const_operators(offset_expr.get_operators_reader())?,
        },
        wasmparser::ElementKind::Passive => ElementKind::Passive,
        wasmparser::ElementKind::Declared => ElementKind::Declared,
    };

    match element.items {
        wasmparser::ElementItems::Functions(funcs) => {
            let items =
                funcs.into_iter().map(|func| Ok(ElementItem::Func(func?))).collect::<Result<Vec<_>>>()?.into_boxed_slice();

            Ok(Element { kind, items, ty: ValType::RefFunc })
        }

        wasmparser::ElementItems::Expressions(ty, exprs) => {
            let items = exprs
                .into_iter()
                .map(|expr| Ok(ElementItem::Expr(process_const_operators(expr?.get_operators_reader())?)))
                .collect::<Result<Vec<_>>>()?
                .into_boxed_slice();

            Ok(Element { kind, items, ty: convert_reftype(&ty) })
        }
    }
}

pub(crate) fn convert_module_data_sections<'a, T: IntoIterator<Item = wasmparser::Result<wasmparser::Data<'a>>>>(
    data_sections: T,
) -> Result<Vec<Data>> {
    data_sections.into_iter().map(|data| convert_module_data(data?)).collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_module_data(data: wasmparser::Data<'_>) -> Result<Data> {
    Ok(Data {
        data: data.data.to_vec().into_boxed_slice(),
        kind: match data.kind {
            wasmparser::DataKind::Active { memory_index, offset_expr } => {
                let offset = process_const_operators(offset_expr.get_operators_reader())?;
                DataKind::Active { mem: memory_index, offset }
            }
            wasmparser::DataKind::Passive => DataKind::Passive,
        },
    })
}

pub(crate) fn convert_module_imports<'a, T: IntoIterator<Item = wasmparser::Result<wasmparser::Import<'a>>>>(
    imports: T,
) -> Result<Vec<Import>> {
    imports.into_iter().map(|import| convert_module_import(import?)).collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_module_import(import: wasmparser::Import<'_>) -> Result<Import> {
    Ok(Import {
        module: import.module.to_string().into_boxed_str(),
        name: import.name.to_string().into_boxed_str(),
        kind: match import.ty {
            wasmparser::TypeRef::Func(ty) => ImportKind::Function(ty),
            wasmparser::TypeRef::Table(ty) => ImportKind::Table(convert_table_type(&ty)?),
            wasmparser::TypeRef::Memory(ty) => ImportKind::Memory(convert_module_memory(ty)?),
            wasmparser::TypeRef::Global(ty) => {
                ImportKind::Global(GlobalType { mutable: ty.mutable, ty: convert_valtype(&ty.content_type) })
            }
            wasmparser::TypeRef::Tag(ty) => {
                return Err(ParseError::UnsupportedOperator(format!("Unsupported import kind: {:?}", ty)))
            }
        },
    })
}

pub(crate) fn convert_module_memories<T: IntoIterator<Item = wasmparser::Result<wasmparser::MemoryType>>>(
    memory_types: T,
) -> Result<Vec<MemoryType>> {
    memory_types.into_iter().map(|memory| convert_module_memory(memory?)).collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_module_memory(memory: wasmparser::MemoryType) -> Result<MemoryType> {
    Ok(MemoryType {
        arch: match memory.memory64 {
            true => MemoryArch::I64,
            false => MemoryArch::I32,
        },
        page_count_initial: memory.initial,
        page_count_max: memory.maximum,
    })
}

pub(crate) fn convert_module_tables<'a, T: IntoIterator<Item = wasmparser::Result<wasmparser::Table<'a>>>>(
    table_types: T,
) -> Result<Vec<TableType>> {
    table_types.into_iter().map(|table| convert_table_type(&table?.ty)).collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_table_type(table: &wasmparser::TableType) -> Result<TableType> {
    let ty = convert_reftype(&table.element_type);

    let size_initial = table
        .initial
        .try_into()
        .map_err(|_| ParseError::UnsupportedOperator(format!("Table size initial is too large: {}", table.initial)))?;
    let size_max = match table.maximum {
        Some(max) => Some(
            max.try_into()
                .map_err(|_| ParseError::UnsupportedOperator(format!("Table size max is too large: {}", max)))?,
        ),
        None => None,
    };

    Ok(TableType { element_type: ty, size_initial, size_max })
}

pub(crate) fn convert_module_globals<'a, T: IntoIterator<Item = wasmparser::Result<wasmparser::Global<'a>>>>(
    globals: T,
) -> Result<Vec<Global>> {
    globals
        .into_iter()
        .map(|global| {
            let global = global?;
            let ty = convert_valtype(&global.ty.content_type);
            let ops = global.init_expr.get_operators_reader();

            Ok(Global { init: process_const_operators(ops)?, ty: GlobalType { mutable: global.ty.mutable, ty } })
        })
        .collect::<Result<Vec<_>>>()
}

pub(crate) fn convert_module_export(export: wasmparser::Export<'_>) -> Result<Export> {
    let kind = match export.kind {
        wasmparser::ExternalKind::Func => ExternalKind::Func,
        wasmparser::ExternalKind::Table => ExternalKind::Table,
        wasmparser::ExternalKind::Memory => ExternalKind::Memory,
        wasmparser::ExternalKind::Global => ExternalKind::Global,
        wasmparser::ExternalKind::Tag => {
            return Err(ParseError::UnsupportedOperator(format!("Unsupported export kind: {:?}", export.kind)))
        }
    };

    Ok(Export { index: export.index, name: Box::from(export.name), kind })
}

/// Decode the local declarations of a code-section entry and retain the full
/// entry bytes for the runtime's lazy translator.
pub(crate) fn convert_module_code(
    func: &wasmparser::FunctionBody<'_>,
    wasm: &[u8],
) -> Result<(Box<[u8]>, Box<[ValType]>)> {
    let locals_reader = func.get_locals_reader()?;
    let mut locals = Vec::with_capacity(locals_reader.get_count() as usize);
    for local in locals_reader {
        let (count, ty) = local?;
        for _ in 0..count {
            locals.push(convert_valtype(&ty));
        }
    }

    let range = func.range();
    let body = wasm
        .get(range.start..range.end)
        .ok_or_else(|| ParseError::Other("function body out of range".to_string()))?
        .to_vec()
        .into_boxed_slice();

    Ok((body, locals.into_boxed_slice()))
}

pub(crate) fn convert_module_type(ty: wasmparser::RecGroup) -> Result<FuncType> {
    let mut types = ty.types();

    if types.len() != 1 {
        return Err(ParseError::UnsupportedOperator("Expected exactly one type in the type section".to_string()));
    }
    let ty = types.next().ok_or(ParseError::InvalidType)?.unwrap_func();

    let params = ty.params().iter().map(|p| convert_valtype(p)).collect::<Vec<ValType>>().into_boxed_slice();
    let results = ty.results().iter().map(|p| convert_valtype(p)).collect::<Vec<ValType>>().into_boxed_slice();

    Ok(FuncType { params, results })
}

pub(crate) fn convert_reftype(reftype: &wasmparser::RefType) -> ValType {
    match reftype {
        _ if reftype.is_func_ref() => ValType::RefFunc,
        _ if reftype.is_extern_ref() => ValType::RefExtern,
        _ => unimplemented!("Unsupported reference type: {:?}", reftype),
    }
}

pub(crate) fn convert_valtype(valtype: &wasmparser::ValType) -> ValType {
    use wasmparser::ValType::*;
    match valtype {
        I32 => ValType::I32,
        I64 => ValType::I64,
        F32 => ValType::F32,
        F64 => ValType::F64,
        Ref(r) => convert_reftype(r),
        V128 => unimplemented!("128-bit values are not supported"),
    }
}

pub(crate) fn process_const_operators(ops: OperatorsReader<'_>) -> Result<ConstInstruction> {
    let ops = ops.into_iter().collect::<wasmparser::Result<Vec<_>>>()?;
    // A validated const expression is a single instruction followed by `end`.
    if ops.len() < 2 || !matches!(ops[ops.len() - 1], wasmparser::Operator::End) {
        return Err(ParseError::UnsupportedOperator("Unsupported const expression".to_string()));
    }
    process_const_operator(ops[ops.len() - 2].clone())
}

pub(crate) fn process_const_operator(op: wasmparser::Operator<'_>) -> Result<ConstInstruction> {
    match op {
        wasmparser::Operator::RefNull { hty } => Ok(ConstInstruction::RefNull(convert_heaptype(hty))),
        wasmparser::Operator::RefFunc { function_index } => Ok(ConstInstruction::RefFunc(function_index)),
        wasmparser::Operator::I32Const { value } => Ok(ConstInstruction::I32Const(value)),
        wasmparser::Operator::I64Const { value } => Ok(ConstInstruction::I64Const(value)),
        wasmparser::Operator::F32Const { value } => Ok(ConstInstruction::F32Const(f32::from_bits(value.bits()))),
        wasmparser::Operator::F64Const { value } => Ok(ConstInstruction::F64Const(f64::from_bits(value.bits()))),
        wasmparser::Operator::GlobalGet { global_index } => Ok(ConstInstruction::GlobalGet(global_index)),
        op => Err(ParseError::UnsupportedOperator(format!("Unsupported const instruction: {:?}", op))),
    }
}

pub(crate) fn convert_heaptype(heap: wasmparser::HeapType) -> ValType {
    match heap {
        wasmparser::HeapType::Func => ValType::RefFunc,
        wasmparser::HeapType::Extern => ValType::RefExtern,
        _ => unimplemented!("Unsupported heap type: {:?}", heap),
    }
}
