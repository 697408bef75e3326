//! AST to stack-program code generator.
//!
//! Each statement lowers independently; jump targets are relative offsets
//! measured in instructions. A conditional lowers to
//!
//! ```text
//! <cond>
//! push 3 + len(else)      ; relative offset of the then-branch
//! swap
//! jmpIf                   ; true: pc += offset - 2, false: fall through
//! <else or nop>
//! push 1 + len(then)
//! jmp                     ; skip the then-branch
//! <then>
//! ```
//!
//! so the else-branch falls through and the then-branch is reached by the
//! conditional jump.

use crate::instr::{Instr, Opcode, Prog};
use crate::word::float_to_word;
use gradsym_syntax::{parse, BinOp, Node, NodeKind, ParseError, Span, VarTable};
use thiserror::Error;

/// Code generation error.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("left side of assignment at {span} is not a variable")]
    AssignTarget { span: Span },

    #[error("unsupported node at {span}: {what}")]
    Unsupported { what: &'static str, span: Span },
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Compile source text to a program, returning the variable table alongside.
pub fn compile(source: &str) -> CompileResult<(VarTable, Prog)> {
    let (vars, program) = parse(source)?;
    let prog = compile_ast(&program)?;
    Ok((vars, prog))
}

/// Compile a parsed statement list to a program. A trailing `Done`
/// terminates the top level.
pub fn compile_ast(program: &[Node]) -> CompileResult<Prog> {
    let mut prog = Prog::new();
    for node in program {
        gen(node, &mut prog)?;
    }
    prog.push(Instr::new(Opcode::Done));
    Ok(prog)
}

/// Emit the address of an assignment target.
fn gen_lval(node: &Node, prog: &mut Prog) -> CompileResult<()> {
    let NodeKind::Var { offset } = node.kind else {
        return Err(CompileError::AssignTarget { span: node.span });
    };
    prog.push(Instr::with_word(Opcode::Push, offset));
    Ok(())
}

fn gen(node: &Node, prog: &mut Prog) -> CompileResult<()> {
    match &node.kind {
        NodeKind::Num(val) => {
            prog.push(Instr::with_word(Opcode::Push, float_to_word(*val)));
            Ok(())
        }
        NodeKind::Var { offset } => {
            prog.push(Instr::with_word(Opcode::Push, *offset));
            prog.push(Instr::new(Opcode::Load));
            Ok(())
        }
        NodeKind::Assign { lhs, rhs } => {
            gen(rhs, prog)?;
            gen_lval(lhs, prog)?;
            prog.push(Instr::new(Opcode::Swap));
            prog.push(Instr::new(Opcode::Store));
            Ok(())
        }
        NodeKind::Not(operand) => {
            gen(operand, prog)?;
            prog.push(Instr::new(Opcode::Not));
            Ok(())
        }
        NodeKind::Binary { op, lhs, rhs } => {
            gen(lhs, prog)?;
            gen(rhs, prog)?;
            match op {
                BinOp::Add => prog.push(Instr::new(Opcode::Add)),
                BinOp::Sub => prog.push(Instr::new(Opcode::Sub)),
                BinOp::Mul => prog.push(Instr::new(Opcode::Mul)),
                BinOp::Eq => prog.push(Instr::new(Opcode::Eq)),
                BinOp::Ne => {
                    prog.push(Instr::new(Opcode::Eq));
                    prog.push(Instr::new(Opcode::Not));
                }
                BinOp::Lt => prog.push(Instr::new(Opcode::Lt)),
                BinOp::Le => prog.push(Instr::new(Opcode::Le)),
                BinOp::And => prog.push(Instr::new(Opcode::And)),
                BinOp::Or => prog.push(Instr::new(Opcode::Or)),
                BinOp::Div => {
                    return Err(CompileError::Unsupported {
                        what: "division",
                        span: node.span,
                    });
                }
            }
            Ok(())
        }
        NodeKind::Return(_) => {
            // The engine never consumes a return value; results are read out
            // of memory. `return` terminates the path.
            prog.push(Instr::new(Opcode::Done));
            Ok(())
        }
        NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            gen(cond, prog)?;

            let mut then_prog = Prog::new();
            gen(then_branch, &mut then_prog)?;

            let mut else_prog = Prog::new();
            match else_branch {
                Some(els) => gen(els, &mut else_prog)?,
                None => else_prog.push(Instr::new(Opcode::Nop)),
            }
            else_prog.push(Instr::with_word(
                Opcode::Push,
                1 + then_prog.len() as u32,
            ));
            else_prog.push(Instr::new(Opcode::Jmp));

            prog.push(Instr::with_word(Opcode::Push, 3 + else_prog.len() as u32));
            prog.push(Instr::new(Opcode::Swap));
            prog.push(Instr::new(Opcode::JmpIf));
            prog.extend(else_prog);
            prog.extend(then_prog);
            Ok(())
        }
        NodeKind::Block(stmts) => {
            for stmt in stmts {
                gen(stmt, prog)?;
            }
            Ok(())
        }
        NodeKind::For { .. } => Err(CompileError::Unsupported {
            what: "for loop",
            span: node.span,
        }),
    }
}
