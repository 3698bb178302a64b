//! Bytecode validator: static checks before execution
//!
//! Performs five checks on a code object and, recursively, on every code
//! object it references:
//! 1. **Jump targets**: every branch lands inside the instruction list
//! 2. **Catch table**: `start <= end <= len`, `cont < len`, handlers present
//!    where the entry kind needs one
//! 3. **Locals**: depth-0 slots exist in the local table, keyword checks
//!    name a declared keyword
//! 4. **Stack depth**: a flow-sensitive walk from pc 0, every optional
//!    parameter entry and every catch continuation; joins must agree and no
//!    instruction may underflow
//! 5. **Termination**: the last instruction never falls through
//!
//! The compiler runs the validator when `compiler.verify_bytecode` is on.

use super::{CatchKind, CodeObject, Op};
use std::collections::HashSet;
use std::rc::Rc;

// ============================================================================
// Public API
// ============================================================================

/// A validation error with the code object and pc where it was detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Label of the offending code object
    pub code: String,
    pub offset: usize,
    pub kind: ValidationErrorKind,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @{:04}: {}", self.code, self.offset, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    JumpOutOfBounds { target: usize, len: usize },
    /// A catch entry's range or continuation is outside its own code object
    CatchOutOfBounds { start: usize, end: usize, cont: usize, len: usize },
    /// Rescue, ensure and retry entries must name their handler
    MissingHandler,
    LocalOutOfRange { slot: usize, locals: usize },
    KeywordOutOfRange { index: usize, keywords: usize },
    StackUnderflow { op: &'static str, depth_before: usize },
    /// Two paths reach the same pc with different operand stack depths
    StackMismatch { expected: usize, found: usize },
    /// The last instruction is not `leave`, `throw` or `jump`
    MissingTerminator,
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JumpOutOfBounds { target, len } => {
                write!(f, "jump target {} is out of bounds (len={})", target, len)
            }
            Self::CatchOutOfBounds {
                start,
                end,
                cont,
                len,
            } => write!(
                f,
                "catch entry {}..{} cont {} is out of bounds (len={})",
                start, end, cont, len
            ),
            Self::MissingHandler => write!(f, "catch entry has no handler"),
            Self::LocalOutOfRange { slot, locals } => {
                write!(f, "local slot {} out of range ({} locals)", slot, locals)
            }
            Self::KeywordOutOfRange { index, keywords } => {
                write!(f, "keyword {} out of range ({} keywords)", index, keywords)
            }
            Self::StackUnderflow { op, depth_before } => {
                write!(f, "stack underflow in {}: depth before = {}", op, depth_before)
            }
            Self::StackMismatch { expected, found } => {
                write!(f, "stack depth mismatch: expected {}, found {}", expected, found)
            }
            Self::MissingTerminator => write!(f, "code does not end with leave, throw or jump"),
        }
    }
}

/// Validate `code` and every nested code object, collecting all errors found
pub fn validate(code: &Rc<CodeObject>) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen: HashSet<*const CodeObject> = HashSet::new();
    let mut pending = vec![Rc::clone(code)];
    while let Some(current) = pending.pop() {
        if !seen.insert(Rc::as_ptr(&current)) {
            continue;
        }
        validate_one(&current, &mut errors);
        pending.extend(current.children());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_one(code: &CodeObject, errors: &mut Vec<ValidationError>) {
    let label = code.label();
    let mut report = |offset: usize, kind: ValidationErrorKind| {
        errors.push(ValidationError {
            code: label.clone(),
            offset,
            kind,
        })
    };
    let before = check_jump_targets(code, &mut report)
        + check_catch_table(code, &mut report)
        + check_locals(code, &mut report);
    // Depth analysis needs in-range targets
    if before == 0 {
        check_stack_depth(code, &mut report);
    }
    check_terminator(code, &mut report);
}

// ============================================================================
// Passes 1-3: references
// ============================================================================

fn check_jump_targets(code: &CodeObject, report: &mut impl FnMut(usize, ValidationErrorKind)) -> usize {
    let len = code.instructions.len();
    let mut count = 0;
    for (pc, instr) in code.instructions.iter().enumerate() {
        if let Some(target) = instr.op.jump_target() {
            if target >= len {
                report(pc, ValidationErrorKind::JumpOutOfBounds { target, len });
                count += 1;
            }
        }
    }
    for (k, entry) in code.params.opt_entries.iter().enumerate() {
        if *entry >= len {
            report(k, ValidationErrorKind::JumpOutOfBounds { target: *entry, len });
            count += 1;
        }
    }
    count
}

fn check_catch_table(code: &CodeObject, report: &mut impl FnMut(usize, ValidationErrorKind)) -> usize {
    let len = code.instructions.len();
    let mut count = 0;
    for entry in &code.catch_table {
        if entry.start > entry.end || entry.end > len || entry.cont >= len {
            report(
                entry.start,
                ValidationErrorKind::CatchOutOfBounds {
                    start: entry.start,
                    end: entry.end,
                    cont: entry.cont,
                    len,
                },
            );
            count += 1;
        }
        let needs_handler = matches!(
            entry.kind,
            CatchKind::Rescue | CatchKind::Ensure | CatchKind::Retry
        );
        if needs_handler && entry.handler.is_none() {
            report(entry.start, ValidationErrorKind::MissingHandler);
            count += 1;
        }
    }
    count
}

fn check_locals(code: &CodeObject, report: &mut impl FnMut(usize, ValidationErrorKind)) -> usize {
    let mut count = 0;
    for (pc, instr) in code.instructions.iter().enumerate() {
        match &instr.op {
            Op::GetLocal { slot, depth: 0 } | Op::SetLocal { slot, depth: 0 }
                if *slot >= code.locals.len() =>
            {
                report(
                    pc,
                    ValidationErrorKind::LocalOutOfRange {
                        slot: *slot,
                        locals: code.locals.len(),
                    },
                );
                count += 1;
            }
            Op::CheckKeyword(index) if *index >= code.params.keywords.len() => {
                report(
                    pc,
                    ValidationErrorKind::KeywordOutOfRange {
                        index: *index,
                        keywords: code.params.keywords.len(),
                    },
                );
                count += 1;
            }
            _ => {}
        }
    }
    count
}

// ============================================================================
// Pass 4: stack depth
// ============================================================================

fn check_stack_depth(code: &CodeObject, report: &mut impl FnMut(usize, ValidationErrorKind)) {
    let len = code.instructions.len();
    let mut depth_at: Vec<Option<usize>> = vec![None; len];
    let mut work: Vec<(usize, usize)> = vec![(0, 0)];
    for entry in &code.params.opt_entries {
        work.push((*entry, 0));
    }
    for entry in &code.catch_table {
        let resumed = match entry.kind {
            // The carried or handler value is pushed on resumption
            CatchKind::Rescue | CatchKind::Ensure | CatchKind::Break => entry.sp + 1,
            CatchKind::Retry | CatchKind::Next | CatchKind::Redo => entry.sp,
        };
        work.push((entry.cont, resumed));
    }

    while let Some((pc, depth)) = work.pop() {
        if pc >= len {
            continue;
        }
        match depth_at[pc] {
            Some(expected) if expected != depth => {
                report(pc, ValidationErrorKind::StackMismatch { expected, found: depth });
                continue;
            }
            Some(_) => continue,
            None => depth_at[pc] = Some(depth),
        }
        let op = &code.instructions[pc].op;
        let (pops, pushes) = op.stack_effect();
        if pops > depth {
            report(
                pc,
                ValidationErrorKind::StackUnderflow {
                    op: op.mnemonic(),
                    depth_before: depth,
                },
            );
            continue;
        }
        let after = depth - pops + pushes;
        if let Some(target) = op.jump_target() {
            work.push((target, after));
        }
        if !op.is_terminator() {
            work.push((pc + 1, after));
        }
    }
}

// ============================================================================
// Pass 5: termination
// ============================================================================

fn check_terminator(code: &CodeObject, report: &mut impl FnMut(usize, ValidationErrorKind)) {
    match code.instructions.last() {
        Some(instr) if instr.op.is_terminator() => {}
        Some(_) => report(code.instructions.len() - 1, ValidationErrorKind::MissingTerminator),
        None => report(0, ValidationErrorKind::MissingTerminator),
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CatchEntry, CodeKind, Instruction, ParamSpec};
    use crate::symbol::Symbol;
    use crate::value::Value;
    use std::cell::OnceCell;

    fn code(ops: Vec<Op>, catch_table: Vec<CatchEntry>) -> Rc<CodeObject> {
        Rc::new(CodeObject {
            name: Symbol::new("t"),
            kind: CodeKind::Main,
            file: Rc::from("t.rb"),
            line: 1,
            instructions: ops.into_iter().map(|op| Instruction { op, line: 1 }).collect(),
            locals: Vec::new(),
            params: ParamSpec::default(),
            catch_table,
            parent: OnceCell::new(),
        })
    }

    #[test]
    fn test_valid_straight_line() {
        let c = code(vec![Op::PutObject(Value::Integer(1)), Op::Leave], vec![]);
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn test_jump_out_of_bounds() {
        let c = code(vec![Op::Jump(9), Op::PutNil, Op::Leave], vec![]);
        let errors = validate(&c).unwrap_err();
        assert_eq!(
            errors[0].kind,
            ValidationErrorKind::JumpOutOfBounds { target: 9, len: 3 }
        );
    }

    #[test]
    fn test_stack_underflow() {
        let c = code(vec![Op::Pop, Op::PutNil, Op::Leave], vec![]);
        let errors = validate(&c).unwrap_err();
        assert!(matches!(
            errors[0].kind,
            ValidationErrorKind::StackUnderflow { op: "pop", .. }
        ));
    }

    #[test]
    fn test_join_mismatch() {
        // putnil; branchif 3; putnil; leave -- pc 3 reached with depth 0 and 1
        let c = code(
            vec![Op::PutNil, Op::BranchIf(3), Op::PutNil, Op::Leave],
            vec![],
        );
        let errors = validate(&c).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ValidationErrorKind::StackMismatch { .. })));
    }

    #[test]
    fn test_catch_entry_out_of_bounds() {
        let entry = CatchEntry {
            kind: CatchKind::Break,
            start: 0,
            end: 5,
            cont: 1,
            handler: None,
            sp: 0,
        };
        let c = code(vec![Op::PutNil, Op::Leave], vec![entry]);
        let errors = validate(&c).unwrap_err();
        assert!(matches!(
            errors[0].kind,
            ValidationErrorKind::CatchOutOfBounds { end: 5, .. }
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let c = code(vec![Op::PutNil], vec![]);
        let errors = validate(&c).unwrap_err();
        assert_eq!(errors.last().unwrap().kind, ValidationErrorKind::MissingTerminator);
        assert_eq!(errors.last().unwrap().to_string(), "<main> @0000: code does not end with leave, throw or jump");
    }

    #[test]
    fn test_local_out_of_range() {
        let c = code(
            vec![Op::GetLocal { slot: 2, depth: 0 }, Op::Leave],
            vec![],
        );
        let errors = validate(&c).unwrap_err();
        assert_eq!(
            errors[0].kind,
            ValidationErrorKind::LocalOutOfRange { slot: 2, locals: 0 }
        );
    }
}
