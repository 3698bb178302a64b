//! Instruction emission with two-phase labels
//!
//! Jumps and catch entries refer to [`Label`]s. A label is placed exactly
//! once; `finish` patches every jump and resolves every pending catch entry
//! in one pass.
//!
//! The emitter also tracks the operand stack depth along the straight-line
//! path being emitted. Catch entries record the depth their owning frame
//! must be cut back to, and direct `next`/`redo` jumps pop down to the
//! depth of their loop.

use crate::bytecode::{CatchEntry, CatchKind, CodeObject, Instruction, Op};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label(usize);

struct PendingCatch {
    kind: CatchKind,
    start: Label,
    end: Label,
    cont: Label,
    handler: Option<Rc<CodeObject>>,
    sp: usize,
}

#[derive(Default)]
pub(crate) struct Emitter {
    instructions: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    /// Depth recorded by the first reachable jump to each label
    label_depths: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    catches: Vec<PendingCatch>,
    depth: usize,
    unreachable: bool,
    line: u32,
}

impl Emitter {
    pub(super) fn new(line: u32) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }

    pub(super) fn pc(&self) -> usize {
        self.instructions.len()
    }

    pub(super) fn depth(&self) -> usize {
        self.depth
    }

    /// Whether control can reach the next emitted instruction
    pub(super) fn reachable(&self) -> bool {
        !self.unreachable
    }

    /// Resynchronize after an expression that never completes normally
    pub(super) fn assume_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub(super) fn set_line(&mut self, line: u32) {
        if line > 0 {
            self.line = line;
        }
    }

    /// Append `op`. Unreachable code keeps a nominal depth so the code that
    /// follows a jump-like expression stays consistent.
    pub(super) fn emit(&mut self, op: Op) {
        let (pops, pushes) = op.stack_effect();
        self.depth = self.depth.saturating_sub(pops) + pushes;
        if op.is_terminator() {
            self.unreachable = true;
        }
        self.instructions.push(Instruction {
            op,
            line: self.line,
        });
    }

    pub(super) fn label(&mut self) -> Label {
        self.labels.push(None);
        self.label_depths.push(None);
        Label(self.labels.len() - 1)
    }

    /// Emit `Jump`, `BranchIf` or `BranchUnless` to `label`
    pub(super) fn emit_jump(&mut self, op: fn(usize) -> Op, label: Label) {
        let reachable = !self.unreachable;
        self.fixups.push((self.pc(), label));
        self.emit(op(usize::MAX));
        if reachable && self.label_depths[label.0].is_none() {
            self.label_depths[label.0] = Some(self.depth);
        }
    }

    pub(super) fn place(&mut self, label: Label) {
        debug_assert!(self.labels[label.0].is_none(), "label placed twice");
        self.labels[label.0] = Some(self.pc());
        if let Some(depth) = self.label_depths[label.0] {
            self.depth = depth;
        }
        self.unreachable = false;
    }

    pub(super) fn add_catch(
        &mut self,
        kind: CatchKind,
        start: Label,
        end: Label,
        cont: Label,
        handler: Option<Rc<CodeObject>>,
        sp: usize,
    ) {
        self.catches.push(PendingCatch {
            kind,
            start,
            end,
            cont,
            handler,
            sp,
        });
    }

    /// Patch jumps and resolve catch entries. A label that was never placed
    /// is reported by index.
    pub(super) fn finish(mut self) -> Result<(Vec<Instruction>, Vec<CatchEntry>), usize> {
        let labels = self.labels;
        let resolve = |label: Label| labels[label.0].ok_or(label.0);
        for (pc, label) in self.fixups {
            let target = resolve(label)?;
            let instr = &mut self.instructions[pc];
            let patched = match instr.op {
                Op::Jump(_) => Op::Jump(target),
                Op::BranchIf(_) => Op::BranchIf(target),
                Op::BranchUnless(_) => Op::BranchUnless(target),
                _ => continue,
            };
            instr.op = patched;
        }
        let mut table = Vec::with_capacity(self.catches.len());
        for pending in self.catches {
            table.push(CatchEntry {
                kind: pending.kind,
                start: resolve(pending.start)?,
                end: resolve(pending.end)?,
                cont: resolve(pending.cont)?,
                handler: pending.handler,
                sp: pending.sp,
            });
        }
        Ok((self.instructions, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_forward_jump_is_patched() {
        let mut e = Emitter::new(1);
        let end = e.label();
        e.emit(Op::PutTrue);
        e.emit_jump(Op::BranchUnless, end);
        e.emit(Op::PutObject(Value::Integer(1)));
        e.emit(Op::Pop);
        e.place(end);
        e.emit(Op::PutNil);
        e.emit(Op::Leave);
        let (instructions, _) = e.finish().unwrap();
        assert!(matches!(instructions[1].op, Op::BranchUnless(4)));
    }

    #[test]
    fn test_depth_follows_jump_after_terminator() {
        let mut e = Emitter::new(1);
        let end = e.label();
        e.emit(Op::PutNil);
        e.emit_jump(Op::Jump, end);
        assert!(!e.reachable());
        e.emit(Op::PutNil);
        e.emit(Op::PutNil);
        e.place(end);
        assert_eq!(e.depth(), 1);
        assert!(e.reachable());
    }

    #[test]
    fn test_unplaced_label_is_reported() {
        let mut e = Emitter::new(1);
        let never = e.label();
        e.emit_jump(Op::Jump, never);
        assert_eq!(e.finish().unwrap_err(), 0);
    }
}
