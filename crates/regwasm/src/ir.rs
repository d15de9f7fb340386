use alloc::rc::Rc;
use core::ops::Deref;

/// A frame-relative register number.
///
/// Registers `0..P` hold parameters, `P..P+L` non-parameter locals, and the
/// rest are translator-assigned temporaries. This is an index into the
/// current frame's slice of the register-file buffer, not a CPU register.
pub(crate) type Reg = u16;

/// A compiled function body: the instruction sequence plus the frame layout
/// the translator assigned for it.
#[derive(Debug, Clone)]
pub(crate) struct CompiledBody {
    pub(crate) iseq: InstructionSequence,
    /// Number of parameter registers.
    pub(crate) n_params: u16,
    /// End of the local region: parameters + non-parameter locals.
    pub(crate) locals_end: u16,
    /// Total register-file width of a frame running this body.
    pub(crate) frame_regs: u32,
}

/// A stable, cheaply clonable reference to a compiled instruction sequence.
#[derive(Debug, Clone)]
pub(crate) struct InstructionSequence(Rc<[Instruction]>);

impl InstructionSequence {
    pub(crate) fn new(instrs: alloc::vec::Vec<Instruction>) -> Self {
        Self(Rc::from(instrs))
    }

    /// The single-instruction sequence the root frame returns into.
    pub(crate) fn sentinel() -> Self {
        Self(Rc::from(alloc::vec![Instruction::EndOfExecution]))
    }
}

impl Deref for InstructionSequence {
    type Target = [Instruction];

    fn deref(&self) -> &[Instruction] {
        &self.0
    }
}

/// A register-machine instruction.
///
/// These are regwasm's internal bytecode instructions; one WebAssembly
/// instruction can lower to several of these and vice versa. Operand order
/// conventions: binary ops are `(dst, lhs, rhs)`, unary ops `(dst, src)`,
/// loads `(dst, addr, offset)`, stores `(addr, src, offset)`. Branch offsets
/// are relative to the branching instruction itself.
///
/// # Differences to the spec
/// * Control structure is resolved at translation time; only relative
///   branches remain.
/// * `BrTable(index, len)` is followed by `len` `Br` slot instructions
///   (targets first, default last) to keep this enum small.
/// * Calls carry `sp`, the offset from the caller's frame base to the
///   callee's, whose parameter registers overlap the caller's argument
///   temporaries.
#[derive(Debug, Clone, Copy, PartialEq)]
#[rustfmt::skip]
pub(crate) enum Instruction {
    // > Moves and constants
    Copy(Reg, Reg),
    Const32(Reg, u32),
    Const64(Reg, u64),

    // > Control instructions
    Unreachable,
    Br(i32),
    BrIf(Reg, i32),
    BrIfNot(Reg, i32),
    BrTable(Reg, u32),
    Return,
    Call(u32, u32),
    CallIndirect(u32, u32, Reg, u32), // (sig_id, table, index, sp)
    EndOfExecution,

    // > Parametric instructions
    Select(Reg, Reg, Reg, Reg), // (dst, cond, lhs, rhs)

    // > Variable instructions
    GlobalGet(Reg, u32), GlobalSet(Reg, u32),
    GlobalGet0(Reg), GlobalSet0(Reg),

    // > Memory instructions
    I32Load(Reg, Reg, u64), I64Load(Reg, Reg, u64), F32Load(Reg, Reg, u64), F64Load(Reg, Reg, u64),
    I32Load8S(Reg, Reg, u64), I32Load8U(Reg, Reg, u64), I32Load16S(Reg, Reg, u64), I32Load16U(Reg, Reg, u64),
    I64Load8S(Reg, Reg, u64), I64Load8U(Reg, Reg, u64), I64Load16S(Reg, Reg, u64), I64Load16U(Reg, Reg, u64),
    I64Load32S(Reg, Reg, u64), I64Load32U(Reg, Reg, u64),
    I32Store(Reg, Reg, u64), I64Store(Reg, Reg, u64), F32Store(Reg, Reg, u64), F64Store(Reg, Reg, u64),
    I32Store8(Reg, Reg, u64), I32Store16(Reg, Reg, u64),
    I64Store8(Reg, Reg, u64), I64Store16(Reg, Reg, u64), I64Store32(Reg, Reg, u64),
    MemorySize(Reg),
    MemoryGrow(Reg, Reg),

    // > Bulk memory instructions
    MemoryInit(Reg, Reg, Reg, u32), // (d, s, n, data)
    MemoryCopy(Reg, Reg, Reg),      // (d, s, n)
    MemoryFill(Reg, Reg, Reg),      // (d, val, n)
    DataDrop(u32),

    // > Table instructions
    TableGet(Reg, Reg, u32),           // (dst, index, table)
    TableSet(Reg, Reg, u32),           // (index, src, table)
    TableSize(Reg, u32),
    TableGrow(Reg, Reg, Reg, u32),     // (dst, init, delta, table)
    TableFill(Reg, Reg, Reg, u32),     // (i, val, n, table)
    TableCopy(Reg, Reg, Reg, u32, u32), // (d, s, n, src_table, dst_table)
    TableInit(Reg, Reg, Reg, u32, u32), // (d, s, n, elem, table)
    ElemDrop(u32),

    // > Reference types
    RefNull(Reg),
    RefFunc(Reg, u32),
    RefIsNull(Reg, Reg),

    // > Numeric instructions
    // Comparisons: (dst, lhs, rhs); *Eqz: (dst, src)
    I32Eqz(Reg, Reg), I32Eq(Reg, Reg, Reg), I32Ne(Reg, Reg, Reg), I32LtS(Reg, Reg, Reg), I32LtU(Reg, Reg, Reg),
    I32GtS(Reg, Reg, Reg), I32GtU(Reg, Reg, Reg), I32LeS(Reg, Reg, Reg), I32LeU(Reg, Reg, Reg), I32GeS(Reg, Reg, Reg), I32GeU(Reg, Reg, Reg),
    I64Eqz(Reg, Reg), I64Eq(Reg, Reg, Reg), I64Ne(Reg, Reg, Reg), I64LtS(Reg, Reg, Reg), I64LtU(Reg, Reg, Reg),
    I64GtS(Reg, Reg, Reg), I64GtU(Reg, Reg, Reg), I64LeS(Reg, Reg, Reg), I64LeU(Reg, Reg, Reg), I64GeS(Reg, Reg, Reg), I64GeU(Reg, Reg, Reg),
    F32Eq(Reg, Reg, Reg), F32Ne(Reg, Reg, Reg), F32Lt(Reg, Reg, Reg), F32Gt(Reg, Reg, Reg), F32Le(Reg, Reg, Reg), F32Ge(Reg, Reg, Reg),
    F64Eq(Reg, Reg, Reg), F64Ne(Reg, Reg, Reg), F64Lt(Reg, Reg, Reg), F64Gt(Reg, Reg, Reg), F64Le(Reg, Reg, Reg), F64Ge(Reg, Reg, Reg),
    // Integer arithmetic
    I32Clz(Reg, Reg), I32Ctz(Reg, Reg), I32Popcnt(Reg, Reg),
    I32Add(Reg, Reg, Reg), I32Sub(Reg, Reg, Reg), I32Mul(Reg, Reg, Reg), I32DivS(Reg, Reg, Reg), I32DivU(Reg, Reg, Reg), I32RemS(Reg, Reg, Reg), I32RemU(Reg, Reg, Reg),
    I64Clz(Reg, Reg), I64Ctz(Reg, Reg), I64Popcnt(Reg, Reg),
    I64Add(Reg, Reg, Reg), I64Sub(Reg, Reg, Reg), I64Mul(Reg, Reg, Reg), I64DivS(Reg, Reg, Reg), I64DivU(Reg, Reg, Reg), I64RemS(Reg, Reg, Reg), I64RemU(Reg, Reg, Reg),
    // Bitwise
    I32And(Reg, Reg, Reg), I32Or(Reg, Reg, Reg), I32Xor(Reg, Reg, Reg), I32Shl(Reg, Reg, Reg), I32ShrS(Reg, Reg, Reg), I32ShrU(Reg, Reg, Reg), I32Rotl(Reg, Reg, Reg), I32Rotr(Reg, Reg, Reg),
    I64And(Reg, Reg, Reg), I64Or(Reg, Reg, Reg), I64Xor(Reg, Reg, Reg), I64Shl(Reg, Reg, Reg), I64ShrS(Reg, Reg, Reg), I64ShrU(Reg, Reg, Reg), I64Rotl(Reg, Reg, Reg), I64Rotr(Reg, Reg, Reg),
    // Floating point
    F32Abs(Reg, Reg), F32Neg(Reg, Reg), F32Ceil(Reg, Reg), F32Floor(Reg, Reg), F32Trunc(Reg, Reg), F32Nearest(Reg, Reg), F32Sqrt(Reg, Reg),
    F32Add(Reg, Reg, Reg), F32Sub(Reg, Reg, Reg), F32Mul(Reg, Reg, Reg), F32Div(Reg, Reg, Reg), F32Min(Reg, Reg, Reg), F32Max(Reg, Reg, Reg), F32Copysign(Reg, Reg, Reg),
    F64Abs(Reg, Reg), F64Neg(Reg, Reg), F64Ceil(Reg, Reg), F64Floor(Reg, Reg), F64Trunc(Reg, Reg), F64Nearest(Reg, Reg), F64Sqrt(Reg, Reg),
    F64Add(Reg, Reg, Reg), F64Sub(Reg, Reg, Reg), F64Mul(Reg, Reg, Reg), F64Div(Reg, Reg, Reg), F64Min(Reg, Reg, Reg), F64Max(Reg, Reg, Reg), F64Copysign(Reg, Reg, Reg),
    // Conversions
    I32WrapI64(Reg, Reg), I32TruncF32S(Reg, Reg), I32TruncF32U(Reg, Reg), I32TruncF64S(Reg, Reg), I32TruncF64U(Reg, Reg),
    I32Extend8S(Reg, Reg), I32Extend16S(Reg, Reg),
    I64Extend8S(Reg, Reg), I64Extend16S(Reg, Reg), I64Extend32S(Reg, Reg), I64ExtendI32S(Reg, Reg), I64ExtendI32U(Reg, Reg),
    I64TruncF32S(Reg, Reg), I64TruncF32U(Reg, Reg), I64TruncF64S(Reg, Reg), I64TruncF64U(Reg, Reg),
    F32ConvertI32S(Reg, Reg), F32ConvertI32U(Reg, Reg), F32ConvertI64S(Reg, Reg), F32ConvertI64U(Reg, Reg), F32DemoteF64(Reg, Reg),
    F64ConvertI32S(Reg, Reg), F64ConvertI32U(Reg, Reg), F64ConvertI64S(Reg, Reg), F64ConvertI64U(Reg, Reg), F64PromoteF32(Reg, Reg),
    // Saturating float-to-int conversions
    I32TruncSatF32S(Reg, Reg), I32TruncSatF32U(Reg, Reg), I32TruncSatF64S(Reg, Reg), I32TruncSatF64U(Reg, Reg),
    I64TruncSatF32S(Reg, Reg), I64TruncSatF32U(Reg, Reg), I64TruncSatF64S(Reg, Reg), I64TruncSatF64U(Reg, Reg),
}
