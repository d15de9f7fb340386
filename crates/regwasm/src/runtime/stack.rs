use alloc::vec::Vec;
use regwasm_types::{FuncAddr, ModuleInstanceAddr};

use crate::{
    cold,
    ir::{CompiledBody, InstructionSequence, Reg},
    RawValue, Result, Trap,
};

/// Maximum number of nested call frames.
pub(crate) const CALL_STACK_LIMIT: usize = 64 * 1024;

/// Maximum size of the register-file buffer, in 8-byte cells.
pub(crate) const REG_STACK_LIMIT: usize = 1024 * 1024;

/// The per-invocation execution state: one contiguous register-file buffer
/// shared by all frames, plus the frame headers.
///
/// A frame's registers are addressed as `base + register`; the translator
/// guarantees every register index an instruction references lies within its
/// frame's `[0, frame_regs)` range. Frame headers hold what an untyped cell
/// cannot: the return instruction sequence and the caller's identity.
#[derive(Debug)]
pub(crate) struct Stack {
    pub(crate) regs: Vec<RawValue>,
    pub(crate) frames: Vec<CallFrame>,
}

#[derive(Debug)]
pub(crate) struct CallFrame {
    pub(crate) return_pc: usize,
    pub(crate) return_iseq: InstructionSequence,
    pub(crate) prev_base: usize,
    pub(crate) caller_instance: ModuleInstanceAddr,
    pub(crate) func: FuncAddr,
}

impl Stack {
    pub(crate) fn new() -> Self {
        Self { regs: Vec::with_capacity(256), frames: Vec::with_capacity(16) }
    }

    /// Grow the register file to cover a frame at `base` and zero its
    /// non-parameter locals. Parameters were already written by the caller
    /// (they overlap the caller's argument temporaries).
    pub(crate) fn alloc_frame(&mut self, base: usize, body: &CompiledBody) -> Result<()> {
        let end = base + body.frame_regs as usize;
        if end > REG_STACK_LIMIT {
            cold();
            return Err(Trap::CallStackExhausted.into());
        }
        if self.regs.len() < end {
            self.regs.resize(end, RawValue::default());
        }

        // the buffer is reused across frames, so locals must be cleared
        for slot in &mut self.regs[base + body.n_params as usize..base + body.locals_end as usize] {
            *slot = RawValue::default();
        }
        Ok(())
    }

    pub(crate) fn push_frame(&mut self, frame: CallFrame) -> Result<()> {
        if self.frames.len() >= CALL_STACK_LIMIT {
            cold();
            return Err(Trap::CallStackExhausted.into());
        }
        self.frames.push(frame);
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    #[inline(always)]
    pub(crate) fn get(&self, base: usize, reg: Reg) -> RawValue {
        self.regs[base + reg as usize]
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, base: usize, reg: Reg, value: RawValue) {
        self.regs[base + reg as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstructionSequence;

    fn body(n_params: u16, locals_end: u16, frame_regs: u32) -> CompiledBody {
        CompiledBody { iseq: InstructionSequence::sentinel(), n_params, locals_end, frame_regs }
    }

    #[test]
    fn test_alloc_zeroes_locals() {
        let mut stack = Stack::new();
        stack.alloc_frame(0, &body(1, 3, 4)).expect("alloc");
        stack.set(0, 1, RawValue::from(7i64));
        stack.set(0, 2, RawValue::from(8i64));

        // a new frame over the same region only clears the locals
        stack.set(0, 0, RawValue::from(42i64));
        stack.alloc_frame(0, &body(1, 3, 4)).expect("alloc");
        assert_eq!(i64::from(stack.get(0, 0)), 42);
        assert_eq!(i64::from(stack.get(0, 1)), 0);
        assert_eq!(i64::from(stack.get(0, 2)), 0);
    }

    #[test]
    fn test_reg_limit() {
        let mut stack = Stack::new();
        assert!(matches!(
            stack.alloc_frame(REG_STACK_LIMIT, &body(0, 0, 1)),
            Err(crate::Error::Trap(Trap::CallStackExhausted))
        ));
    }
}
