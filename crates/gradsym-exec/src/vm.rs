//! Symbolic transfer function of the stack VM.
//!
//! [`sym_step`] executes one instruction against a [`SymState`] and returns
//! the successor states: none for a terminal or stuck state, one for a
//! straight-line instruction, two for a symbolic branch.

use crate::state::SymState;
use gradsym_ir::{word_to_int, Instr, Opcode};
use gradsym_sym::{Sym, SymRef};
use smallvec::{smallvec, SmallVec};
use tracing::{error, warn};

/// Successors of one symbolic step.
pub type Successors = SmallVec<[SymState; 2]>;

/// Execute one instruction symbolically. Stuck configurations (a jump whose
/// address is not a constant, stack underflow) produce no successors: the
/// path dies and the caller observes a leaf.
pub fn sym_step(state: &SymState, instr: Instr) -> Successors {
    let mut next = state.clone();

    match instr.op {
        Opcode::Not => {
            let Some(w) = next.sym_stack.pop() else {
                return underflow(instr);
            };
            next.sym_stack.push(Sym::not(w));
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Lt
        | Opcode::Le | Opcode::Eq => {
            let (Some(r), Some(l)) = (next.sym_stack.pop(), next.sym_stack.pop()) else {
                return underflow(instr);
            };
            let term = match instr.op {
                Opcode::Add => Sym::add(l, r),
                Opcode::Sub => Sym::sub(l, r),
                Opcode::Mul => Sym::mul(l, r),
                Opcode::And => Sym::and(l, r),
                Opcode::Or => Sym::or(l, r),
                Opcode::Lt => Sym::lt(l, r),
                Opcode::Le => Sym::le(l, r),
                _ => Sym::eq(l, r),
            };
            next.sym_stack.push(term);
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Swap => {
            let (Some(x), Some(y)) = (next.sym_stack.pop(), next.sym_stack.pop()) else {
                return underflow(instr);
            };
            next.sym_stack.push(x);
            next.sym_stack.push(y);
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Dup => {
            let Some(w) = next.sym_stack.pop() else {
                return underflow(instr);
            };
            next.sym_stack.push(w.clone());
            next.sym_stack.push(w);
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Pop => {
            if next.sym_stack.pop().is_none() {
                return underflow(instr);
            }
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Push => {
            next.sym_stack.push(Sym::con(instr.word));
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Read => {
            next.sym_stack.push(Sym::any(next.var_cnt));
            next.var_cnt += 1;
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Load => {
            let Some(addr) = next.sym_stack.pop() else {
                return underflow(instr);
            };
            let Sym::Con(word) = *addr else {
                warn!(pc = state.pc, "load address is not a constant, path is stuck");
                return smallvec![];
            };
            match next.smem.get(&word) {
                Some(term) => {
                    let term = term.clone();
                    next.sym_stack.push(term);
                }
                None => next.sym_stack.push(Sym::any(word)),
            }
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Store => {
            let (Some(w), Some(addr)) = (next.sym_stack.pop(), next.sym_stack.pop()) else {
                return underflow(instr);
            };
            let Sym::Con(target) = *addr else {
                warn!(pc = state.pc, "store address is not a constant, path is stuck");
                return smallvec![];
            };
            store(&mut next, target, w);
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Jmp => {
            let Some(addr) = next.sym_stack.pop() else {
                return underflow(instr);
            };
            let Sym::Con(word) = *addr else {
                warn!(pc = state.pc, "jump address is not a constant, path is stuck");
                return smallvec![];
            };
            match jump_target(state.pc, word_to_int(word), 0) {
                Some(pc) => {
                    next.pc = pc;
                    smallvec![next]
                }
                None => smallvec![],
            }
        }
        Opcode::JmpIf => {
            let (Some(cond), Some(addr)) = (next.sym_stack.pop(), next.sym_stack.pop()) else {
                return underflow(instr);
            };
            let Sym::Con(word) = *addr else {
                warn!(pc = state.pc, "branch address is not a constant, path is stuck");
                return smallvec![];
            };
            // Resolve whatever memory has already made concrete before the
            // condition becomes a path constraint.
            let cond = cond.concretize(&next.mem);
            let Some(target) = jump_target(state.pc, word_to_int(word), 2) else {
                return smallvec![];
            };

            let mut true_state = next.clone();
            true_state.pc = target;
            true_state.path_constraints.push(cond.clone());

            let mut false_state = next;
            false_state.pc += 1;
            false_state.path_constraints.push(Sym::not(cond));

            smallvec![true_state, false_state]
        }
        Opcode::Nop => {
            next.pc += 1;
            smallvec![next]
        }
        Opcode::Done => smallvec![],
        Opcode::Print | Opcode::Over | Opcode::RotL => {
            error!(pc = state.pc, %instr, "unsupported instruction");
            smallvec![]
        }
    }
}

/// Write a term to memory, keeping the concrete/symbolic exclusivity
/// invariant: a constant lands in concrete memory, a variable whose value
/// is already known is copied through, anything else stays symbolic.
fn store(state: &mut SymState, target: u32, w: SymRef) {
    match &*w {
        Sym::Con(word) => {
            state.mem.insert(target, *word);
            state.smem.remove(&target);
        }
        Sym::Any(var) => {
            if let Some(&val) = state.mem.get(var) {
                state.mem.insert(target, val);
                state.smem.remove(&target);
            } else if let Some(term) = state.smem.get(var) {
                let term = term.clone();
                state.smem.insert(target, term);
                state.mem.remove(&target);
            } else {
                state.smem.insert(target, w);
                state.mem.remove(&target);
            }
        }
        _ => {
            state.smem.insert(target, w);
            state.mem.remove(&target);
        }
    }
}

fn jump_target(pc: usize, offset: i32, bias: i32) -> Option<usize> {
    let target = pc as i64 + offset as i64 - bias as i64;
    if target < 0 {
        warn!(pc, offset, "jump target underflows the program, path is stuck");
        return None;
    }
    Some(target as usize)
}

fn underflow(instr: Instr) -> Successors {
    warn!(%instr, "operand stack underflow, path is stuck");
    smallvec![]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradsym_ir::float_to_word;

    fn step(state: &SymState, instr: Instr) -> Vec<SymState> {
        sym_step(state, instr).into_vec()
    }

    fn push_con(state: &mut SymState, val: f32) {
        state.sym_stack.push(Sym::num(val));
    }

    #[test]
    fn test_push_pop() {
        let state = SymState::new();
        let out = step(&state, Instr::with_word(Opcode::Push, float_to_word(2.0)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pc, 1);
        assert_eq!(out[0].sym_stack.len(), 1);

        let out = step(&out[0], Instr::new(Opcode::Pop));
        assert!(out[0].sym_stack.is_empty());
    }

    #[test]
    fn test_binary_ops_pop_right_then_left() {
        let mut state = SymState::new();
        push_con(&mut state, 5.0);
        push_con(&mut state, 3.0);
        let out = step(&state, Instr::new(Opcode::Sub));
        assert_eq!(out[0].sym_stack.len(), 1);
        // 5 - 3, not 3 - 5
        assert_eq!(out[0].sym_stack[0].to_text(true), "(5-3)");
    }

    #[test]
    fn test_swap_and_dup() {
        let mut state = SymState::new();
        push_con(&mut state, 1.0);
        push_con(&mut state, 2.0);
        let out = step(&state, Instr::new(Opcode::Swap));
        assert_eq!(out[0].sym_stack[0].to_text(true), "2");
        assert_eq!(out[0].sym_stack[1].to_text(true), "1");

        let out = step(&out[0], Instr::new(Opcode::Dup));
        assert_eq!(out[0].sym_stack.len(), 3);
        assert_eq!(out[0].sym_stack[2].to_text(true), "1");
    }

    #[test]
    fn test_read_allocates_fresh_vars() {
        let state = SymState::new();
        let out = step(&state, Instr::new(Opcode::Read));
        assert_eq!(out[0].var_cnt, 1);
        assert_eq!(out[0].sym_stack[0].to_text(true), "var_0");
        let out = step(&out[0], Instr::new(Opcode::Read));
        assert_eq!(out[0].sym_stack[1].to_text(true), "var_1");
    }

    #[test]
    fn test_load_prefers_symbolic_memory() {
        let mut state = SymState::new();
        state.smem.insert(4, Sym::any(9));
        state.sym_stack.push(Sym::con(4));
        let out = step(&state, Instr::new(Opcode::Load));
        assert_eq!(out[0].sym_stack[0].to_text(true), "var_9");

        // No symbolic entry: the address itself names the input variable,
        // even when concrete memory knows a value for it.
        let mut state = SymState::new();
        state.mem.insert(4, float_to_word(1.0));
        state.sym_stack.push(Sym::con(4));
        let out = step(&state, Instr::new(Opcode::Load));
        assert_eq!(out[0].sym_stack[0].to_text(true), "var_4");
    }

    #[test]
    fn test_store_constant_goes_concrete() {
        let mut state = SymState::new();
        state.smem.insert(2, Sym::any(8));
        // stack: addr below, value on top
        state.sym_stack.push(Sym::con(2));
        push_con(&mut state, 7.0);
        let out = step(&state, Instr::new(Opcode::Store));
        assert_eq!(out[0].mem.get(&2), Some(&float_to_word(7.0)));
        assert!(!out[0].smem.contains_key(&2));
    }

    #[test]
    fn test_store_variable_copies_known_value() {
        let mut state = SymState::new();
        state.mem.insert(0, float_to_word(3.0));
        state.sym_stack.push(Sym::con(1));
        state.sym_stack.push(Sym::any(0));
        let out = step(&state, Instr::new(Opcode::Store));
        assert_eq!(out[0].mem.get(&1), Some(&float_to_word(3.0)));
    }

    #[test]
    fn test_store_unknown_variable_aliases_symbolically() {
        let mut state = SymState::new();
        state.sym_stack.push(Sym::con(1));
        state.sym_stack.push(Sym::any(0));
        let out = step(&state, Instr::new(Opcode::Store));
        assert_eq!(out[0].smem.get(&1).map(|t| t.to_text(true)), Some("var_0".to_string()));
        assert!(!out[0].mem.contains_key(&1));
    }

    #[test]
    fn test_store_forwards_symbolic_alias() {
        let mut state = SymState::new();
        state.smem.insert(0, Sym::any(9));
        state.sym_stack.push(Sym::con(1));
        state.sym_stack.push(Sym::any(0));
        let out = step(&state, Instr::new(Opcode::Store));
        assert_eq!(out[0].smem.get(&1).map(|t| t.to_text(true)), Some("var_9".to_string()));
    }

    #[test]
    fn test_store_expression_goes_symbolic() {
        let mut state = SymState::new();
        state.mem.insert(3, float_to_word(0.0));
        state.sym_stack.push(Sym::con(3));
        state.sym_stack.push(Sym::add(Sym::any(0), Sym::num(1.0)));
        let out = step(&state, Instr::new(Opcode::Store));
        assert!(!out[0].mem.contains_key(&3));
        assert_eq!(
            out[0].smem.get(&3).map(|t| t.to_text(true)),
            Some("(var_0+1)".to_string())
        );
    }

    #[test]
    fn test_mem_smem_exclusive_after_stores() {
        let mut state = SymState::new();
        // Symbolic store then concrete store to the same address
        state.sym_stack.push(Sym::con(5));
        state.sym_stack.push(Sym::any(0));
        let mid = step(&state, Instr::new(Opcode::Store)).remove(0);
        let mut mid2 = mid.clone();
        mid2.sym_stack.push(Sym::con(5));
        push_con(&mut mid2, 2.0);
        let out = step(&mid2, Instr::new(Opcode::Store)).remove(0);
        for addr in out.mem.keys() {
            assert!(!out.smem.contains_key(addr));
        }
    }

    #[test]
    fn test_jmp_moves_pc_by_offset() {
        let mut state = SymState::new();
        state.pc = 9;
        state.sym_stack.push(Sym::con(2));
        let out = step(&state, Instr::new(Opcode::Jmp));
        assert_eq!(out[0].pc, 11);
    }

    #[test]
    fn test_jmpif_forks_true_then_false() {
        let mut state = SymState::new();
        state.pc = 6;
        state.sym_stack.push(Sym::con(6));
        state.sym_stack.push(Sym::lt(Sym::num(2.0), Sym::any(0)));

        let out = step(&state, Instr::new(Opcode::JmpIf));
        assert_eq!(out.len(), 2);

        // True branch first: pc += offset - 2, constraint is the condition
        assert_eq!(out[0].pc, 10);
        assert_eq!(out[0].path_constraints[0].to_text(true), "(2<var_0)");

        // False branch second: fall through, negated condition
        assert_eq!(out[1].pc, 7);
        assert_eq!(out[1].path_constraints[0].to_text(true), "!((2<var_0))");

        // The fork does not disturb the remaining stack
        assert!(out[0].sym_stack.is_empty());
        assert!(out[1].sym_stack.is_empty());
    }

    #[test]
    fn test_jmpif_substitutes_concrete_memory() {
        let mut state = SymState::new();
        state.mem.insert(1, float_to_word(1.0));
        state.sym_stack.push(Sym::con(5));
        state
            .sym_stack
            .push(Sym::eq(Sym::any(1), Sym::num(4.0)));
        let out = step(&state, Instr::new(Opcode::JmpIf));
        assert_eq!(out[0].path_constraints[0].to_text(true), "(1==4)");
        assert_eq!(out[1].path_constraints[0].to_text(true), "!((1==4))");
    }

    #[test]
    fn test_jmpif_symbolic_address_is_stuck() {
        let mut state = SymState::new();
        state.sym_stack.push(Sym::any(0));
        state.sym_stack.push(Sym::num(1.0));
        let out = step(&state, Instr::new(Opcode::JmpIf));
        assert!(out.is_empty());
    }

    #[test]
    fn test_done_is_terminal() {
        let state = SymState::new();
        assert!(step(&state, Instr::new(Opcode::Done)).is_empty());
    }

    #[test]
    fn test_reserved_instructions_emit_no_successor() {
        let state = SymState::new();
        for op in [Opcode::Print, Opcode::Over, Opcode::RotL] {
            assert!(step(&state, Instr::new(op)).is_empty());
        }
    }

    #[test]
    fn test_underflow_is_stuck_not_panic() {
        let state = SymState::new();
        assert!(step(&state, Instr::new(Opcode::Add)).is_empty());
        assert!(step(&state, Instr::new(Opcode::Pop)).is_empty());
    }
}
