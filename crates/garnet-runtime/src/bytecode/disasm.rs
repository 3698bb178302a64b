//! Bytecode disassembler
//!
//! Renders a code object and every nested code object as text. Used for
//! `compiler.dump_bytecode` output and in tests.
//!
//! ```text
//! == <main> (main) main.rb:1 ==
//! locals: a
//! 0000  putobject 1          @1
//! 0001  dup                  @1
//! 0002  setlocal a(0,0)      @1
//! 0003  leave                @1
//! ```

use super::{CatchKind, CodeObject, ConstScope, DefineKind, LocalKind, Op, ThrowKind};
use std::fmt::Write;
use std::rc::Rc;

/// Disassemble `code` followed by its children, depth first
pub fn disassemble(code: &Rc<CodeObject>) -> String {
    let mut output = String::new();
    let mut pending = vec![Rc::clone(code)];
    while let Some(current) = pending.pop() {
        if !output.is_empty() {
            output.push('\n');
        }
        disassemble_one(&current, &mut output);
        let mut children = current.children();
        children.reverse();
        pending.extend(children);
    }
    output
}

fn disassemble_one(code: &CodeObject, output: &mut String) {
    let _ = writeln!(
        output,
        "== {} ({}) {}:{} ==",
        code.label(),
        format!("{:?}", code.kind).to_lowercase(),
        code.file,
        code.line
    );
    if !code.locals.is_empty() {
        let locals: Vec<String> = code
            .locals
            .iter()
            .map(|local| match local.kind {
                LocalKind::Plain => local.name.to_string(),
                LocalKind::Arg => format!("{}<arg>", local.name),
                LocalKind::Optional => format!("{}<opt>", local.name),
                LocalKind::Rest => format!("{}<rest>", local.name),
                LocalKind::Keyword => format!("{}<kw>", local.name),
                LocalKind::Block => format!("{}<block>", local.name),
            })
            .collect();
        let _ = writeln!(output, "locals: {}", locals.join(", "));
    }
    if !code.params.opt_entries.is_empty() {
        let _ = writeln!(output, "opt entries: {:?}", code.params.opt_entries);
    }
    for (pc, instr) in code.instructions.iter().enumerate() {
        let text = format_op(code, &instr.op);
        let _ = writeln!(output, "{:04}  {:<32} @{}", pc, text, instr.line);
    }
    if !code.catch_table.is_empty() {
        let _ = writeln!(output, "catch table:");
        for entry in &code.catch_table {
            let kind = match entry.kind {
                CatchKind::Rescue => "rescue",
                CatchKind::Ensure => "ensure",
                CatchKind::Retry => "retry",
                CatchKind::Break => "break",
                CatchKind::Next => "next",
                CatchKind::Redo => "redo",
            };
            let _ = write!(
                output,
                "  {:<6} {:04}..{:04} cont {:04} sp {}",
                kind, entry.start, entry.end, entry.cont, entry.sp
            );
            if let Some(handler) = &entry.handler {
                let _ = write!(output, " <{}>", handler.label());
            }
            output.push('\n');
        }
    }
}

/// One instruction with its operands
pub fn format_op(code: &CodeObject, op: &Op) -> String {
    let name = op.mnemonic();
    match op {
        Op::PutObject(value) => format!("{} {:?}", name, value),
        Op::PutString(s) => format!("{} {:?}", name, s),
        Op::TopN(n) | Op::SetN(n) | Op::NewArray(n) | Op::NewHash(n) | Op::ConcatStrings(n) => {
            format!("{} {}", name, n)
        }
        Op::GetLocal { slot, depth } | Op::SetLocal { slot, depth } => {
            let local = if *depth == 0 {
                code.locals
                    .get(*slot)
                    .map(|l| l.name.to_string())
                    .unwrap_or_default()
            } else {
                String::new()
            };
            format!("{} {}({},{})", name, local, slot, depth)
        }
        Op::GetIvar(sym)
        | Op::SetIvar(sym)
        | Op::GetGlobal(sym)
        | Op::SetGlobal(sym)
        | Op::GetCvar(sym)
        | Op::SetCvar(sym)
        | Op::Undef(sym) => format!("{} {}", name, sym),
        Op::GetConst { name: c, scope } => {
            let prefix = match scope {
                ConstScope::Lexical => "",
                ConstScope::Scoped => "<scope>::",
                ConstScope::Top => "::",
            };
            format!("{} {}{}", name, prefix, c)
        }
        Op::SetConst { name: c, scoped } => {
            format!("{} {}{}", name, if *scoped { "<scope>::" } else { "" }, c)
        }
        Op::NewRange { exclusive } => format!("{} {}", name, if *exclusive { "..." } else { ".." }),
        Op::ExpandArray { count, rest, post } => {
            let mut flags = Vec::new();
            if *rest {
                flags.push("rest");
            }
            if *post {
                flags.push("post");
            }
            format!("{} {} {}", name, count, flags.join(","))
        }
        Op::Jump(t) | Op::BranchIf(t) | Op::BranchUnless(t) => format!("{} {:04}", name, t),
        Op::Send(info) | Op::InvokeSuper { info, .. } => {
            let mut text = format!("{} :{}, {}", name, info.name, info.argc);
            if info.fcall {
                text.push_str(" fcall");
            }
            if info.splat {
                text.push_str(" splat");
            }
            if info.block_arg {
                text.push_str(" &blk");
            }
            if let Some(block) = &info.block {
                let _ = write!(text, " <{}>", block.label());
            }
            if let Op::InvokeSuper { zsuper: true, .. } = op {
                text.push_str(" zsuper");
            }
            text
        }
        Op::InvokeBlock { argc, splat } => {
            format!("{} {}{}", name, argc, if *splat { " splat" } else { "" })
        }
        Op::CheckMatch { splat } => format!("{}{}", name, if *splat { " splat" } else { "" }),
        Op::DefineMethod { name: m, singleton, .. } => {
            format!("{} {}{}", name, if *singleton { "self." } else { "" }, m)
        }
        Op::DefineClass { name: c, kind, .. } => {
            let kind = match kind {
                DefineKind::Class { has_super: true } => "class <",
                DefineKind::Class { has_super: false } => "class",
                DefineKind::Module => "module",
                DefineKind::Singleton => "singleton",
            };
            format!("{} {} {}", name, kind, c)
        }
        Op::Alias { new_name, old_name } => format!("{} {} {}", name, new_name, old_name),
        Op::CheckKeyword(n) => format!("{} {}", name, n),
        Op::Throw(kind) => {
            let detail = match kind {
                ThrowKind::Raise => "raise".to_string(),
                ThrowKind::Reraise => "reraise".to_string(),
                ThrowKind::Break { level, scope } => format!("break {} {:?}", level, scope),
                ThrowKind::Next { level, scope } => format!("next {} {:?}", level, scope),
                ThrowKind::Redo { level, scope } => format!("redo {} {:?}", level, scope),
                ThrowKind::Retry { level } => format!("retry {}", level),
                ThrowKind::Return => "return".to_string(),
            };
            format!("{} {}", name, detail.to_lowercase())
        }
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::sexp;
    use crate::compiler;

    fn disasm(source: &str) -> String {
        let node = sexp::parse(source, "test.rb").unwrap();
        disassemble(&compiler::compile(&node, "test.rb").unwrap())
    }

    #[test]
    fn test_disassemble_header_and_locals() {
        let out = disasm("(lasgn a (lit 1))");
        assert!(out.starts_with("== <main> (main) test.rb:1 =="));
        assert!(out.contains("locals: a"));
        assert!(out.contains("putobject 1"));
        assert!(out.contains("setlocal a(0,0)"));
    }

    #[test]
    fn test_disassemble_includes_children_and_catch_table() {
        let out = disasm("(defn foo (args) (rescue (call _ bar) (resbody (array) _ (lit 1))))");
        assert!(out.contains("definemethod foo"));
        assert!(out.contains("== foo (method)"));
        assert!(out.contains("== rescue in foo (rescue)"));
        assert!(out.contains("catch table:"));
        assert!(out.contains("rescue"));
    }

    #[test]
    fn test_disassemble_block_call() {
        let out = disasm("(iter (call (lit 3) times) (args i) (lvar i))");
        assert!(out.contains("send :times, 0 <block in <main>>"));
        assert!(out.contains("break "));
        assert!(out.contains("i<arg>"));
    }
}
