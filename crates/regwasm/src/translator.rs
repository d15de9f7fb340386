//! Lowers WebAssembly's stack machine into the register IR, one function
//! body at a time, on first call.
//!
//! The translator is the parser's visitor: it consumes one operator at a
//! time and mirrors the Wasm operand stack with a stack of *register
//! numbers*. `local.get` pushes the local's own register instead of copying
//! it; every other push allocates the canonical temporary for its stack
//! position (`locals_end + height`), so the frame width is simply the
//! operand stack's high-water mark on top of the local region. Bodies were
//! validated at parse time, so the checks here are structural only.

use alloc::vec::Vec;
use regwasm_types::FuncAddr;
use wasmparser::{BlockType, FunctionBody, MemArg, VisitOperator};

use crate::{
    instance::ModuleInstance,
    interner::SigId,
    ir::{CompiledBody, Instruction, InstructionSequence, Reg},
    log,
    store::{CodeBody, Function},
    Result, Runtime, TranslationError,
};

/// Compile a function on first use, installing the result on the entity.
///
/// The `Uncompiled → Compiled` transition happens exactly once per entity
/// and is entity-local; recompiling the same body yields an equal sequence.
pub(crate) fn compile(runtime: &Runtime, func_addr: FuncAddr) -> Result<CompiledBody, TranslationError> {
    let func_inst =
        runtime.data.funcs.get(func_addr as usize).cloned().ok_or(TranslationError::MalformedExpression)?;
    let Function::Wasm(ref wasm_func) = func_inst.func else {
        return Err(TranslationError::MalformedExpression);
    };

    let bytes = match &*wasm_func.body.borrow() {
        CodeBody::Compiled(compiled) => return Ok(compiled.clone()),
        CodeBody::Uncompiled(bytes) => bytes.clone(),
    };

    let module =
        runtime.get_instance(func_inst.owner).map_err(|_| TranslationError::MalformedExpression)?.clone();
    let ty = runtime.types.resolve(func_inst.ty_id).clone();
    log::debug!("compiling function {} ({:?})", func_addr, ty);

    let mut translator = Translator::new(runtime, &module, ty.params.len(), ty.results.len(), wasm_func.locals.len())?;

    let body = FunctionBody::new(0, &bytes);
    let mut reader = body.get_operators_reader().map_err(|_| TranslationError::MalformedExpression)?;
    while !reader.eof() {
        reader.visit_operator(&mut translator).map_err(|_| TranslationError::MalformedExpression)??;
    }

    let compiled = translator.finish()?;
    *wasm_func.body.borrow_mut() = CodeBody::Compiled(compiled.clone());
    Ok(compiled)
}

#[derive(Debug, Clone, Copy)]
enum BlockKind {
    Block,
    Loop { start: usize },
    If { else_patch: usize },
    Else,
}

#[derive(Debug)]
struct ControlFrame {
    kind: BlockKind,
    n_params: u16,
    n_results: u16,
    /// Operand-stack height at entry, below the block parameters. Branch
    /// values land in the canonical registers starting here.
    height: usize,
    /// Forward branches to this block's end, patched when `end` is visited.
    end_patches: Vec<usize>,
    /// Set after `br`/`return`/`unreachable`/`br_table`; the rest of the
    /// block is skipped structurally.
    unreachable: bool,
}

pub(crate) struct Translator<'a> {
    runtime: &'a Runtime,
    module: &'a ModuleInstance,

    instrs: Vec<Instruction>,
    /// Register designations mirroring the Wasm operand stack. An entry
    /// below `locals_end` aliases a parameter or local; otherwise it is
    /// exactly the canonical temporary for its position.
    stack: Vec<Reg>,
    ctrl: Vec<ControlFrame>,
    /// Nesting depth of blocks opened inside unreachable code.
    dead_depth: usize,

    n_params: u16,
    n_results: u16,
    locals_end: u16,
    max_height: usize,
}

impl<'a> Translator<'a> {
    fn new(
        runtime: &'a Runtime,
        module: &'a ModuleInstance,
        n_params: usize,
        n_results: usize,
        n_locals: usize,
    ) -> Result<Self, TranslationError> {
        let locals_end = n_params + n_locals;
        if locals_end >= u16::MAX as usize {
            return Err(TranslationError::MalformedExpression);
        }

        let mut ctrl = Vec::with_capacity(8);
        ctrl.push(ControlFrame {
            kind: BlockKind::Block,
            n_params: 0,
            n_results: n_results as u16,
            height: 0,
            end_patches: Vec::new(),
            unreachable: false,
        });

        Ok(Self {
            runtime,
            module,
            instrs: Vec::with_capacity(32),
            stack: Vec::with_capacity(16),
            ctrl,
            dead_depth: 0,
            n_params: n_params as u16,
            n_results: n_results as u16,
            locals_end: locals_end as u16,
            max_height: 0,
        })
    }

    fn finish(self) -> Result<CompiledBody, TranslationError> {
        if !self.ctrl.is_empty() || self.dead_depth != 0 {
            return Err(TranslationError::MalformedExpression);
        }

        Ok(CompiledBody {
            iseq: InstructionSequence::new(self.instrs),
            n_params: self.n_params,
            locals_end: self.locals_end,
            frame_regs: self.locals_end as u32 + self.max_height as u32,
        })
    }

    fn dead(&self) -> bool {
        self.dead_depth > 0 || self.ctrl.last().is_some_and(|frame| frame.unreachable)
    }

    fn emit(&mut self, instr: Instruction) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    /// The canonical temporary register for an operand-stack position.
    fn temp(&self, height: usize) -> Result<Reg, TranslationError> {
        let reg = self.locals_end as usize + height;
        if reg >= u16::MAX as usize {
            return Err(TranslationError::MalformedExpression);
        }
        Ok(reg as Reg)
    }

    fn push(&mut self, reg: Reg) {
        self.stack.push(reg);
        if self.stack.len() > self.max_height {
            self.max_height = self.stack.len();
        }
    }

    fn push_temp(&mut self) -> Result<Reg, TranslationError> {
        let reg = self.temp(self.stack.len())?;
        self.push(reg);
        Ok(reg)
    }

    fn pop(&mut self) -> Result<Reg, TranslationError> {
        self.stack.pop().ok_or(TranslationError::TypeMismatch { expected: 1, got: 0 })
    }

    fn local(&self, index: u32) -> Result<Reg, TranslationError> {
        if index as usize >= self.locals_end as usize {
            return Err(TranslationError::UnknownLocal(index));
        }
        Ok(index as Reg)
    }

    /// Move a stack entry into its canonical register if it aliases one.
    fn materialize(&mut self, pos: usize) -> Result<(), TranslationError> {
        let want = self.temp(pos)?;
        let have = self.stack[pos];
        if have != want {
            self.emit(Instruction::Copy(want, have));
            self.stack[pos] = want;
        }
        Ok(())
    }

    fn materialize_top(&mut self, n: usize) -> Result<(), TranslationError> {
        let len = self.stack.len();
        if len < n {
            return Err(TranslationError::TypeMismatch { expected: n, got: len });
        }
        for pos in len - n..len {
            self.materialize(pos)?;
        }
        Ok(())
    }

    /// Materialize aliased entries below the top `keep_top` that reference
    /// `local`, before the local is overwritten.
    fn flush_local_aliases(&mut self, local: Reg, keep_top: usize) -> Result<(), TranslationError> {
        for pos in 0..self.stack.len().saturating_sub(keep_top) {
            if self.stack[pos] == local {
                self.materialize(pos)?;
            }
        }
        Ok(())
    }

    fn blocktype_arity(&self, blockty: BlockType) -> Result<(u16, u16), TranslationError> {
        Ok(match blockty {
            BlockType::Empty => (0, 0),
            BlockType::Type(_) => (0, 1),
            BlockType::FuncType(idx) => {
                let ty = self.module.ty(idx).map_err(|_| TranslationError::MalformedExpression)?;
                (ty.params.len() as u16, ty.results.len() as u16)
            }
        })
    }

    fn target_index(&self, depth: u32) -> Result<usize, TranslationError> {
        self.ctrl.len().checked_sub(1 + depth as usize).ok_or(TranslationError::UnknownLabel(depth))
    }

    /// `(is_loop, loop_start, height, arity)` of a branch target.
    fn target(&self, depth: u32) -> Result<(bool, usize, usize, u16), TranslationError> {
        let frame = &self.ctrl[self.target_index(depth)?];
        Ok(match frame.kind {
            BlockKind::Loop { start } => (true, start, frame.height, frame.n_params),
            _ => (false, 0, frame.height, frame.n_results),
        })
    }

    fn branch_needs_copies(&self, height: usize, arity: u16) -> Result<bool, TranslationError> {
        let n = arity as usize;
        let len = self.stack.len();
        if len < n {
            return Err(TranslationError::TypeMismatch { expected: n, got: len });
        }
        for k in 0..n {
            if self.stack[len - n + k] != self.temp(height + k)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Copy the top `arity` stack values into the target's value registers.
    ///
    /// Stack designations are left untouched: these copies may sit on a
    /// conditionally executed path (`br_if`, `br_table` trampolines), where
    /// the fall-through must keep seeing the original registers. Copying in
    /// ascending order is clobber-free because every destination lies below
    /// every still-unread canonical source and above every local alias.
    fn emit_branch_copies(&mut self, height: usize, arity: u16) -> Result<(), TranslationError> {
        let n = arity as usize;
        let len = self.stack.len();
        if len < n {
            return Err(TranslationError::TypeMismatch { expected: n, got: len });
        }
        for k in 0..n {
            let src = self.stack[len - n + k];
            let dst = self.temp(height + k)?;
            if src != dst {
                self.emit(Instruction::Copy(dst, src));
            }
        }
        Ok(())
    }

    /// Copy the top result values into registers `[0, n_results)` and emit
    /// `Return`. Local aliases living inside the result window are rescued
    /// into scratch temporaries above the stack first, so the copy-down
    /// cannot clobber a pending source.
    fn emit_return(&mut self) -> Result<(), TranslationError> {
        let n = self.n_results as usize;
        let len = self.stack.len();
        if len < n {
            return Err(TranslationError::TypeMismatch { expected: n, got: len });
        }

        let mut srcs: Vec<Reg> = (0..n).map(|k| self.stack[len - n + k]).collect();
        let mut scratch = 0usize;
        for (k, src) in srcs.iter_mut().enumerate() {
            if (*src as usize) < self.locals_end as usize && (*src as usize) < n && *src != k as Reg {
                let tmp = self.temp(len + scratch)?;
                scratch += 1;
                self.emit(Instruction::Copy(tmp, *src));
                *src = tmp;
            }
        }
        if len + scratch > self.max_height {
            self.max_height = len + scratch;
        }

        for (k, src) in srcs.iter().enumerate() {
            if *src != k as Reg {
                self.emit(Instruction::Copy(k as Reg, *src));
            }
        }
        self.emit(Instruction::Return);
        Ok(())
    }

    fn set_unreachable(&mut self) {
        if let Some(frame) = self.ctrl.last_mut() {
            frame.unreachable = true;
            let height = frame.height;
            self.stack.truncate(height);
        }
    }

    fn patch(&mut self, pos: usize, target: usize) -> Result<(), TranslationError> {
        let rel: i32 =
            (target as i64 - pos as i64).try_into().map_err(|_| TranslationError::MalformedExpression)?;
        match self.instrs.get_mut(pos) {
            Some(Instruction::Br(off)) | Some(Instruction::BrIf(_, off)) | Some(Instruction::BrIfNot(_, off)) => {
                *off = rel;
                Ok(())
            }
            _ => Err(TranslationError::MalformedExpression),
        }
    }

    /// An unconditional branch: value copies followed by a `Br`. A branch to
    /// the function label is a return.
    fn emit_branch(&mut self, depth: u32) -> Result<(), TranslationError> {
        let idx = self.target_index(depth)?;
        if idx == 0 {
            return self.emit_return();
        }

        let (is_loop, start, height, arity) = self.target(depth)?;
        self.emit_branch_copies(height, arity)?;
        let pos = self.emit(Instruction::Br(0));
        if is_loop {
            self.patch(pos, start)?;
        } else {
            self.ctrl[idx].end_patches.push(pos);
        }
        Ok(())
    }

    fn callee_arity(&self, function_index: u32) -> Result<(u16, u16), TranslationError> {
        let addr = self.module.resolve_func_addr(function_index).map_err(|_| TranslationError::MalformedExpression)?;
        let func = self.runtime.data.funcs.get(addr as usize).ok_or(TranslationError::MalformedExpression)?;
        let ty = self.runtime.types.resolve(func.ty_id);
        Ok((ty.params.len() as u16, ty.results.len() as u16))
    }

    fn emit_const32(&mut self, bits: u32) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::Const32(dst, bits));
        Ok(())
    }

    fn emit_const64(&mut self, bits: u64) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::Const64(dst, bits));
        Ok(())
    }

    fn emit_binop(&mut self, make: impl FnOnce(Reg, Reg, Reg) -> Instruction) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(make(dst, lhs, rhs));
        Ok(())
    }

    fn emit_unop(&mut self, make: impl FnOnce(Reg, Reg) -> Instruction) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        let src = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(make(dst, src));
        Ok(())
    }

    fn emit_load(
        &mut self,
        memarg: MemArg,
        size: u32,
        make: impl FnOnce(Reg, Reg, u64) -> Instruction,
    ) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        if u32::from(memarg.align) > size.trailing_zeros() {
            return Err(TranslationError::InvalidAlignment(memarg.align as u32));
        }
        let addr = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(make(dst, addr, memarg.offset));
        Ok(())
    }

    fn emit_store(
        &mut self,
        memarg: MemArg,
        size: u32,
        make: impl FnOnce(Reg, Reg, u64) -> Instruction,
    ) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        if u32::from(memarg.align) > size.trailing_zeros() {
            return Err(TranslationError::InvalidAlignment(memarg.align as u32));
        }
        let src = self.pop()?;
        let addr = self.pop()?;
        self.emit(make(addr, src, memarg.offset));
        Ok(())
    }

    fn emit_select(&mut self) -> Result<(), TranslationError> {
        if self.dead() {
            return Ok(());
        }
        let cond = self.pop()?;
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(Instruction::Select(dst, cond, lhs, rhs));
        Ok(())
    }
}

macro_rules! impl_visit_operator {
    ($(@$proposal:ident $op:ident $({ $($arg:ident: $argty:ty),* })? => $visit:ident)*) => {
        $(impl_visit_operator!(@@$proposal $op $({ $($arg: $argty),* })? => $visit);)*
    };

    (@@mvp $($rest:tt)* ) => {};
    (@@reference_types $($rest:tt)* ) => {};
    (@@sign_extension $($rest:tt)* ) => {};
    (@@saturating_float_to_int $($rest:tt)* ) => {};
    (@@bulk_memory $($rest:tt)* ) => {};
    (@@$proposal:ident $op:ident $({ $($arg:ident: $argty:ty),* })? => $visit:ident) => {
        #[cold]
        fn $visit(&mut self $($(,$arg: $argty)*)?) -> Self::Output {
            Err(TranslationError::UnsupportedOperator(stringify!($op)))
        }
    };
}

macro_rules! visit_binop {
    ($($visit:ident => $instr:ident),* $(,)?) => {$(
        fn $visit(&mut self) -> Self::Output {
            self.emit_binop(|dst, lhs, rhs| Instruction::$instr(dst, lhs, rhs))
        }
    )*};
}

macro_rules! visit_unop {
    ($($visit:ident => $instr:ident),* $(,)?) => {$(
        fn $visit(&mut self) -> Self::Output {
            self.emit_unop(|dst, src| Instruction::$instr(dst, src))
        }
    )*};
}

macro_rules! visit_load {
    ($($visit:ident => $instr:ident($size:expr)),* $(,)?) => {$(
        fn $visit(&mut self, memarg: MemArg) -> Self::Output {
            self.emit_load(memarg, $size, |dst, addr, offset| Instruction::$instr(dst, addr, offset))
        }
    )*};
}

macro_rules! visit_store {
    ($($visit:ident => $instr:ident($size:expr)),* $(,)?) => {$(
        fn $visit(&mut self, memarg: MemArg) -> Self::Output {
            self.emit_store(memarg, $size, |addr, src, offset| Instruction::$instr(addr, src, offset))
        }
    )*};
}

// Reinterpretations change the value's type, not its bits; the register
// keeps holding the same cell.
macro_rules! visit_reinterpret {
    ($($visit:ident),* $(,)?) => {$(
        fn $visit(&mut self) -> Self::Output {
            Ok(())
        }
    )*};
}

impl<'a> VisitOperator<'a> for Translator<'_> {
    type Output = Result<(), TranslationError>;

    wasmparser::for_each_operator!(impl_visit_operator);

    fn visit_unreachable(&mut self) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.emit(Instruction::Unreachable);
        self.set_unreachable();
        Ok(())
    }

    fn visit_nop(&mut self) -> Self::Output {
        Ok(())
    }

    fn visit_block(&mut self, blockty: BlockType) -> Self::Output {
        if self.dead() {
            self.dead_depth += 1;
            return Ok(());
        }
        let (n_params, n_results) = self.blocktype_arity(blockty)?;
        let height = self
            .stack
            .len()
            .checked_sub(n_params as usize)
            .ok_or(TranslationError::TypeMismatch { expected: n_params as usize, got: self.stack.len() })?;
        self.ctrl.push(ControlFrame {
            kind: BlockKind::Block,
            n_params,
            n_results,
            height,
            end_patches: Vec::new(),
            unreachable: false,
        });
        Ok(())
    }

    fn visit_loop(&mut self, blockty: BlockType) -> Self::Output {
        if self.dead() {
            self.dead_depth += 1;
            return Ok(());
        }
        let (n_params, n_results) = self.blocktype_arity(blockty)?;
        // back-edges copy the loop parameters into their canonical slots,
        // so they must start there
        self.materialize_top(n_params as usize)?;
        let height = self.stack.len() - n_params as usize;
        let start = self.instrs.len();
        self.ctrl.push(ControlFrame {
            kind: BlockKind::Loop { start },
            n_params,
            n_results,
            height,
            end_patches: Vec::new(),
            unreachable: false,
        });
        Ok(())
    }

    fn visit_if(&mut self, blockty: BlockType) -> Self::Output {
        if self.dead() {
            self.dead_depth += 1;
            return Ok(());
        }
        let (n_params, n_results) = self.blocktype_arity(blockty)?;
        let cond = self.pop()?;
        // the else branch enters with the parameters at their canonical
        // slots, exactly as they were when the condition was evaluated
        self.materialize_top(n_params as usize)?;
        let height = self.stack.len() - n_params as usize;
        let else_patch = self.emit(Instruction::BrIfNot(cond, 0));
        self.ctrl.push(ControlFrame {
            kind: BlockKind::If { else_patch },
            n_params,
            n_results,
            height,
            end_patches: Vec::new(),
            unreachable: false,
        });
        Ok(())
    }

    fn visit_else(&mut self) -> Self::Output {
        if self.dead_depth > 0 {
            return Ok(());
        }
        let idx = self.ctrl.len().checked_sub(1).ok_or(TranslationError::MalformedExpression)?;
        let (kind, height, n_params, n_results, live) = {
            let frame = &self.ctrl[idx];
            (frame.kind, frame.height, frame.n_params, frame.n_results, !frame.unreachable)
        };
        let BlockKind::If { else_patch } = kind else {
            return Err(TranslationError::MalformedExpression);
        };

        if live {
            self.emit_branch_copies(height, n_results)?;
            let pos = self.emit(Instruction::Br(0));
            self.ctrl[idx].end_patches.push(pos);
        }

        let here = self.instrs.len();
        self.patch(else_patch, here)?;
        self.ctrl[idx].kind = BlockKind::Else;
        self.ctrl[idx].unreachable = false;

        self.stack.truncate(height);
        for k in 0..n_params as usize {
            let reg = self.temp(height + k)?;
            self.push(reg);
        }
        Ok(())
    }

    fn visit_end(&mut self) -> Self::Output {
        if self.dead_depth > 0 {
            self.dead_depth -= 1;
            return Ok(());
        }
        let frame = self.ctrl.pop().ok_or(TranslationError::MalformedExpression)?;
        let live = !frame.unreachable;

        if self.ctrl.is_empty() {
            // the function's own end
            if live {
                self.emit_return()?;
            }
            return Ok(());
        }

        if live {
            self.emit_branch_copies(frame.height, frame.n_results)?;
        }
        let here = self.instrs.len();
        if let BlockKind::If { else_patch } = frame.kind {
            self.patch(else_patch, here)?;
        }
        for pos in frame.end_patches.iter() {
            self.patch(*pos, here)?;
        }

        self.stack.truncate(frame.height);
        for k in 0..frame.n_results as usize {
            let reg = self.temp(frame.height + k)?;
            self.push(reg);
        }
        Ok(())
    }

    fn visit_br(&mut self, relative_depth: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.emit_branch(relative_depth)?;
        self.set_unreachable();
        Ok(())
    }

    fn visit_br_if(&mut self, relative_depth: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let cond = self.pop()?;
        let idx = self.target_index(relative_depth)?;

        if idx == 0 {
            // a conditional return: skip over the return sequence when the
            // condition is false
            let skip = self.emit(Instruction::BrIfNot(cond, 0));
            self.emit_return()?;
            let here = self.instrs.len();
            self.patch(skip, here)?;
            return Ok(());
        }

        let (is_loop, start, height, arity) = self.target(relative_depth)?;
        if !self.branch_needs_copies(height, arity)? {
            let pos = self.emit(Instruction::BrIf(cond, 0));
            if is_loop {
                self.patch(pos, start)?;
            } else {
                self.ctrl[idx].end_patches.push(pos);
            }
        } else {
            // the copies must only run when the branch is taken
            let skip = self.emit(Instruction::BrIfNot(cond, 0));
            self.emit_branch_copies(height, arity)?;
            let pos = self.emit(Instruction::Br(0));
            if is_loop {
                self.patch(pos, start)?;
            } else {
                self.ctrl[idx].end_patches.push(pos);
            }
            let here = self.instrs.len();
            self.patch(skip, here)?;
        }
        Ok(())
    }

    fn visit_br_table(&mut self, targets: wasmparser::BrTable<'a>) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let index = self.pop()?;
        let mut depths = targets
            .targets()
            .collect::<core::result::Result<Vec<u32>, _>>()
            .map_err(|_| TranslationError::MalformedExpression)?;
        depths.push(targets.default());

        self.emit(Instruction::BrTable(index, depths.len() as u32));
        let slots = self.instrs.len();
        for _ in 0..depths.len() {
            self.emit(Instruction::Br(0));
        }

        // each slot jumps to a shared target, or through a trampoline that
        // puts the branch values in place first
        for (i, depth) in depths.iter().enumerate() {
            let slot = slots + i;
            let idx = self.target_index(*depth)?;
            if idx == 0 {
                let here = self.instrs.len();
                self.patch(slot, here)?;
                self.emit_return()?;
                continue;
            }

            let (is_loop, start, height, arity) = self.target(*depth)?;
            if self.branch_needs_copies(height, arity)? {
                let here = self.instrs.len();
                self.patch(slot, here)?;
                self.emit_branch_copies(height, arity)?;
                let pos = self.emit(Instruction::Br(0));
                if is_loop {
                    self.patch(pos, start)?;
                } else {
                    self.ctrl[idx].end_patches.push(pos);
                }
            } else if is_loop {
                self.patch(slot, start)?;
            } else {
                self.ctrl[idx].end_patches.push(slot);
            }
        }

        self.set_unreachable();
        Ok(())
    }

    fn visit_return(&mut self) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.emit_return()?;
        self.set_unreachable();
        Ok(())
    }

    fn visit_call(&mut self, function_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let (n_params, n_results) = self.callee_arity(function_index)?;
        // the callee's parameter registers overlap the argument temporaries
        self.materialize_top(n_params as usize)?;
        for _ in 0..n_params {
            self.pop()?;
        }
        let sp = self.locals_end as u32 + self.stack.len() as u32;
        self.emit(Instruction::Call(function_index, sp));
        for _ in 0..n_results {
            self.push_temp()?;
        }
        Ok(())
    }

    fn visit_call_indirect(&mut self, type_index: u32, table_index: u32, _table_byte: u8) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let ty = self.module.ty(type_index).map_err(|_| TranslationError::MalformedExpression)?;
        let (n_params, n_results) = (ty.params.len() as u16, ty.results.len() as u16);
        let sig_id: SigId = self.module.sig_id(type_index).map_err(|_| TranslationError::MalformedExpression)?;

        let index = self.pop()?;
        self.materialize_top(n_params as usize)?;
        for _ in 0..n_params {
            self.pop()?;
        }
        let sp = self.locals_end as u32 + self.stack.len() as u32;
        self.emit(Instruction::CallIndirect(sig_id, table_index, index, sp));
        for _ in 0..n_results {
            self.push_temp()?;
        }
        Ok(())
    }

    fn visit_drop(&mut self) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.pop()?;
        Ok(())
    }

    fn visit_select(&mut self) -> Self::Output {
        self.emit_select()
    }

    fn visit_typed_select(&mut self, _ty: wasmparser::ValType) -> Self::Output {
        self.emit_select()
    }

    fn visit_local_get(&mut self, local_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let reg = self.local(local_index)?;
        self.push(reg);
        Ok(())
    }

    fn visit_local_set(&mut self, local_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let local = self.local(local_index)?;
        self.flush_local_aliases(local, 1)?;
        let src = self.pop()?;
        if src != local {
            self.emit(Instruction::Copy(local, src));
        }
        Ok(())
    }

    fn visit_local_tee(&mut self, local_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let local = self.local(local_index)?;
        self.flush_local_aliases(local, 1)?;
        let top = self.stack.len().checked_sub(1).ok_or(TranslationError::TypeMismatch { expected: 1, got: 0 })?;
        let src = self.stack[top];
        if src != local {
            self.emit(Instruction::Copy(local, src));
        }
        self.stack[top] = local;
        Ok(())
    }

    fn visit_global_get(&mut self, global_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        if global_index == 0 {
            self.emit(Instruction::GlobalGet0(dst));
        } else {
            self.emit(Instruction::GlobalGet(dst, global_index));
        }
        Ok(())
    }

    fn visit_global_set(&mut self, global_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let src = self.pop()?;
        if global_index == 0 {
            self.emit(Instruction::GlobalSet0(src));
        } else {
            self.emit(Instruction::GlobalSet(src, global_index));
        }
        Ok(())
    }

    fn visit_i32_const(&mut self, value: i32) -> Self::Output {
        self.emit_const32(value as u32)
    }

    fn visit_i64_const(&mut self, value: i64) -> Self::Output {
        self.emit_const64(value as u64)
    }

    fn visit_f32_const(&mut self, value: wasmparser::Ieee32) -> Self::Output {
        self.emit_const32(value.bits())
    }

    fn visit_f64_const(&mut self, value: wasmparser::Ieee64) -> Self::Output {
        self.emit_const64(value.bits())
    }

    fn visit_memory_size(&mut self, _mem: u32, _mem_byte: u8) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::MemorySize(dst));
        Ok(())
    }

    fn visit_memory_grow(&mut self, _mem: u32, _mem_byte: u8) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let delta = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(Instruction::MemoryGrow(dst, delta));
        Ok(())
    }

    fn visit_memory_init(&mut self, data_index: u32, _mem: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let s = self.pop()?;
        let d = self.pop()?;
        self.emit(Instruction::MemoryInit(d, s, n, data_index));
        Ok(())
    }

    fn visit_memory_copy(&mut self, _dst_mem: u32, _src_mem: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let s = self.pop()?;
        let d = self.pop()?;
        self.emit(Instruction::MemoryCopy(d, s, n));
        Ok(())
    }

    fn visit_memory_fill(&mut self, _mem: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let val = self.pop()?;
        let d = self.pop()?;
        self.emit(Instruction::MemoryFill(d, val, n));
        Ok(())
    }

    fn visit_data_drop(&mut self, data_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.emit(Instruction::DataDrop(data_index));
        Ok(())
    }

    fn visit_table_init(&mut self, elem_index: u32, table_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let s = self.pop()?;
        let d = self.pop()?;
        self.emit(Instruction::TableInit(d, s, n, elem_index, table_index));
        Ok(())
    }

    fn visit_table_copy(&mut self, dst_table: u32, src_table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let s = self.pop()?;
        let d = self.pop()?;
        self.emit(Instruction::TableCopy(d, s, n, src_table, dst_table));
        Ok(())
    }

    fn visit_elem_drop(&mut self, elem_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        self.emit(Instruction::ElemDrop(elem_index));
        Ok(())
    }

    fn visit_table_get(&mut self, table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let index = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(Instruction::TableGet(dst, index, table));
        Ok(())
    }

    fn visit_table_set(&mut self, table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let src = self.pop()?;
        let index = self.pop()?;
        self.emit(Instruction::TableSet(index, src, table));
        Ok(())
    }

    fn visit_table_size(&mut self, table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::TableSize(dst, table));
        Ok(())
    }

    fn visit_table_grow(&mut self, table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let delta = self.pop()?;
        let init = self.pop()?;
        let dst = self.push_temp()?;
        self.emit(Instruction::TableGrow(dst, init, delta, table));
        Ok(())
    }

    fn visit_table_fill(&mut self, table: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let n = self.pop()?;
        let val = self.pop()?;
        let i = self.pop()?;
        self.emit(Instruction::TableFill(i, val, n, table));
        Ok(())
    }

    fn visit_ref_null(&mut self, _hty: wasmparser::HeapType) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::RefNull(dst));
        Ok(())
    }

    fn visit_ref_is_null(&mut self) -> Self::Output {
        self.emit_unop(|dst, src| Instruction::RefIsNull(dst, src))
    }

    fn visit_ref_func(&mut self, function_index: u32) -> Self::Output {
        if self.dead() {
            return Ok(());
        }
        let dst = self.push_temp()?;
        self.emit(Instruction::RefFunc(dst, function_index));
        Ok(())
    }

    visit_load! {
        visit_i32_load => I32Load(4), visit_i64_load => I64Load(8), visit_f32_load => F32Load(4), visit_f64_load => F64Load(8),
        visit_i32_load8_s => I32Load8S(1), visit_i32_load8_u => I32Load8U(1), visit_i32_load16_s => I32Load16S(2), visit_i32_load16_u => I32Load16U(2),
        visit_i64_load8_s => I64Load8S(1), visit_i64_load8_u => I64Load8U(1), visit_i64_load16_s => I64Load16S(2), visit_i64_load16_u => I64Load16U(2),
        visit_i64_load32_s => I64Load32S(4), visit_i64_load32_u => I64Load32U(4),
    }

    visit_store! {
        visit_i32_store => I32Store(4), visit_i64_store => I64Store(8), visit_f32_store => F32Store(4), visit_f64_store => F64Store(8),
        visit_i32_store8 => I32Store8(1), visit_i32_store16 => I32Store16(2),
        visit_i64_store8 => I64Store8(1), visit_i64_store16 => I64Store16(2), visit_i64_store32 => I64Store32(4),
    }

    visit_unop! {
        visit_i32_eqz => I32Eqz, visit_i64_eqz => I64Eqz,
        visit_i32_clz => I32Clz, visit_i32_ctz => I32Ctz, visit_i32_popcnt => I32Popcnt,
        visit_i64_clz => I64Clz, visit_i64_ctz => I64Ctz, visit_i64_popcnt => I64Popcnt,
        visit_f32_abs => F32Abs, visit_f32_neg => F32Neg, visit_f32_ceil => F32Ceil, visit_f32_floor => F32Floor,
        visit_f32_trunc => F32Trunc, visit_f32_nearest => F32Nearest, visit_f32_sqrt => F32Sqrt,
        visit_f64_abs => F64Abs, visit_f64_neg => F64Neg, visit_f64_ceil => F64Ceil, visit_f64_floor => F64Floor,
        visit_f64_trunc => F64Trunc, visit_f64_nearest => F64Nearest, visit_f64_sqrt => F64Sqrt,
        visit_i32_wrap_i64 => I32WrapI64,
        visit_i32_trunc_f32_s => I32TruncF32S, visit_i32_trunc_f32_u => I32TruncF32U,
        visit_i32_trunc_f64_s => I32TruncF64S, visit_i32_trunc_f64_u => I32TruncF64U,
        visit_i32_extend8_s => I32Extend8S, visit_i32_extend16_s => I32Extend16S,
        visit_i64_extend8_s => I64Extend8S, visit_i64_extend16_s => I64Extend16S, visit_i64_extend32_s => I64Extend32S,
        visit_i64_extend_i32_s => I64ExtendI32S, visit_i64_extend_i32_u => I64ExtendI32U,
        visit_i64_trunc_f32_s => I64TruncF32S, visit_i64_trunc_f32_u => I64TruncF32U,
        visit_i64_trunc_f64_s => I64TruncF64S, visit_i64_trunc_f64_u => I64TruncF64U,
        visit_f32_convert_i32_s => F32ConvertI32S, visit_f32_convert_i32_u => F32ConvertI32U,
        visit_f32_convert_i64_s => F32ConvertI64S, visit_f32_convert_i64_u => F32ConvertI64U,
        visit_f32_demote_f64 => F32DemoteF64,
        visit_f64_convert_i32_s => F64ConvertI32S, visit_f64_convert_i32_u => F64ConvertI32U,
        visit_f64_convert_i64_s => F64ConvertI64S, visit_f64_convert_i64_u => F64ConvertI64U,
        visit_f64_promote_f32 => F64PromoteF32,
        visit_i32_trunc_sat_f32_s => I32TruncSatF32S, visit_i32_trunc_sat_f32_u => I32TruncSatF32U,
        visit_i32_trunc_sat_f64_s => I32TruncSatF64S, visit_i32_trunc_sat_f64_u => I32TruncSatF64U,
        visit_i64_trunc_sat_f32_s => I64TruncSatF32S, visit_i64_trunc_sat_f32_u => I64TruncSatF32U,
        visit_i64_trunc_sat_f64_s => I64TruncSatF64S, visit_i64_trunc_sat_f64_u => I64TruncSatF64U,
    }

    visit_reinterpret! {
        visit_i32_reinterpret_f32, visit_i64_reinterpret_f64, visit_f32_reinterpret_i32, visit_f64_reinterpret_i64,
    }

    visit_binop! {
        visit_i32_eq => I32Eq, visit_i32_ne => I32Ne, visit_i32_lt_s => I32LtS, visit_i32_lt_u => I32LtU,
        visit_i32_gt_s => I32GtS, visit_i32_gt_u => I32GtU, visit_i32_le_s => I32LeS, visit_i32_le_u => I32LeU,
        visit_i32_ge_s => I32GeS, visit_i32_ge_u => I32GeU,
        visit_i64_eq => I64Eq, visit_i64_ne => I64Ne, visit_i64_lt_s => I64LtS, visit_i64_lt_u => I64LtU,
        visit_i64_gt_s => I64GtS, visit_i64_gt_u => I64GtU, visit_i64_le_s => I64LeS, visit_i64_le_u => I64LeU,
        visit_i64_ge_s => I64GeS, visit_i64_ge_u => I64GeU,
        visit_f32_eq => F32Eq, visit_f32_ne => F32Ne, visit_f32_lt => F32Lt, visit_f32_gt => F32Gt,
        visit_f32_le => F32Le, visit_f32_ge => F32Ge,
        visit_f64_eq => F64Eq, visit_f64_ne => F64Ne, visit_f64_lt => F64Lt, visit_f64_gt => F64Gt,
        visit_f64_le => F64Le, visit_f64_ge => F64Ge,
        visit_i32_add => I32Add, visit_i32_sub => I32Sub, visit_i32_mul => I32Mul,
        visit_i32_div_s => I32DivS, visit_i32_div_u => I32DivU, visit_i32_rem_s => I32RemS, visit_i32_rem_u => I32RemU,
        visit_i64_add => I64Add, visit_i64_sub => I64Sub, visit_i64_mul => I64Mul,
        visit_i64_div_s => I64DivS, visit_i64_div_u => I64DivU, visit_i64_rem_s => I64RemS, visit_i64_rem_u => I64RemU,
        visit_i32_and => I32And, visit_i32_or => I32Or, visit_i32_xor => I32Xor,
        visit_i32_shl => I32Shl, visit_i32_shr_s => I32ShrS, visit_i32_shr_u => I32ShrU,
        visit_i32_rotl => I32Rotl, visit_i32_rotr => I32Rotr,
        visit_i64_and => I64And, visit_i64_or => I64Or, visit_i64_xor => I64Xor,
        visit_i64_shl => I64Shl, visit_i64_shr_s => I64ShrS, visit_i64_shr_u => I64ShrU,
        visit_i64_rotl => I64Rotl, visit_i64_rotr => I64Rotr,
        visit_f32_add => F32Add, visit_f32_sub => F32Sub, visit_f32_mul => F32Mul, visit_f32_div => F32Div,
        visit_f32_min => F32Min, visit_f32_max => F32Max, visit_f32_copysign => F32Copysign,
        visit_f64_add => F64Add, visit_f64_sub => F64Sub, visit_f64_mul => F64Mul, visit_f64_div => F64Div,
        visit_f64_min => F64Min, visit_f64_max => F64Max, visit_f64_copysign => F64Copysign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Imports, Module};

    fn compile_export(wat: &str, name: &str) -> (Runtime, CompiledBody) {
        let wasm = wat::parse_str(wat).expect("valid wat");
        let module = Module::parse_bytes(&wasm).expect("parse");
        let mut runtime = Runtime::new();
        let instance = runtime.instantiate(&module, Imports::new()).expect("instantiate");
        let handle = instance.exported_func(&runtime, name).expect("export");
        let compiled = compile(&runtime, handle.addr).expect("compile");
        (runtime, compiled)
    }

    #[test]
    fn test_add_shape() {
        let (_rt, compiled) = compile_export(
            r#"(module (func (export "add") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
            "add",
        );

        // both operands alias parameter registers; only the add and the
        // return copy remain
        assert_eq!(compiled.n_params, 2);
        assert_eq!(compiled.locals_end, 2);
        assert_eq!(
            &*compiled.iseq,
            &[Instruction::I32Add(2, 0, 1), Instruction::Copy(0, 2), Instruction::Return]
        );
    }

    #[test]
    fn test_local_get_elides_copy() {
        let (_rt, compiled) = compile_export(
            r#"(module (func (export "id") (param i64) (result i64) local.get 0))"#,
            "id",
        );
        // the parameter already sits in the result register
        assert_eq!(&*compiled.iseq, &[Instruction::Return]);
    }

    #[test]
    fn test_local_set_aliasing() {
        // the stacked alias of local 0 must be materialized before the
        // local.set overwrites it
        let (_rt, compiled) = compile_export(
            r#"(module (func (export "f") (param i32) (result i32)
                local.get 0
                i32.const 7
                local.set 0
                ))"#,
            "f",
        );
        assert_eq!(
            &*compiled.iseq,
            &[
                Instruction::Copy(1, 0),
                Instruction::Const32(2, 7),
                Instruction::Copy(0, 2),
                Instruction::Copy(0, 1),
                Instruction::Return
            ]
        );
    }

    #[test]
    fn test_compile_idempotent() {
        let wasm = wat::parse_str(
            r#"(module (func (export "fac") (param i64) (result i64)
                (if (result i64) (i64.eqz (local.get 0))
                    (then (i64.const 1))
                    (else (i64.mul (local.get 0) (call 0 (i64.sub (local.get 0) (i64.const 1)))))))
            )"#,
        )
        .expect("valid wat");
        let module = Module::parse_bytes(&wasm).expect("parse");

        let mut seqs = Vec::new();
        for _ in 0..2 {
            let mut runtime = Runtime::new();
            let instance = runtime.instantiate(&module, Imports::new()).expect("instantiate");
            let handle = instance.exported_func(&runtime, "fac").expect("export");
            let compiled = compile(&runtime, handle.addr).expect("compile");
            seqs.push(compiled.iseq.to_vec());
        }
        assert_eq!(seqs[0], seqs[1]);
    }

    #[test]
    fn test_one_shot_transition() {
        let (runtime, compiled) = compile_export(
            r#"(module (func (export "f") (result i32) i32.const 3))"#,
            "f",
        );
        // a second compile returns the installed body
        let func = runtime.data.funcs.last().expect("function");
        let crate::store::Function::Wasm(wasm) = &func.func else { panic!("expected wasm function") };
        assert!(wasm.compiled().is_some());
        let again = compile(&runtime, runtime.data.funcs.len() as u32 - 1).expect("recompile");
        assert_eq!(&*again.iseq, &*compiled.iseq);
    }
}
