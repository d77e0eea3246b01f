//! # Sequence Module
//!
//! Converts a flat, authored list of instructions (jumps expressed as
//! numeric false-branch sizes) into a linked tree with resolved
//! successors. The first splitting jump in a list consumes everything
//! after it: the next `false_branch_size` instructions become the false
//! branch, the remainder becomes the true branch, and both sub-ranges are
//! built by the same routine, so nesting works to arbitrary depth.

use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::opcode::JMP_EXIT;

/// Builds an instruction tree from a flat authored list.
///
/// Returns the tree's root, or `None` for an empty input.
///
/// # Errors
/// - `InvalidZeroOffset`: a splitting jump (any conditional other than
///   `Exit`) was authored with a false-branch size of 0.
/// - `JumpOutOfBounds`: a jump's false-branch size is negative or larger
///   than the rest of the list.
/// - `EmptyJumpContext`: the branch splitter received no instructions.
pub fn instruction_sequence(instructions: Vec<Instruction>) -> Result<Option<Instruction>> {
    sequence_impl(instructions)
}

// Recursive so that a jump's branches can themselves contain jumps; the
// public wrapper just fixes the entry point name.
fn sequence_impl(mut instructions: Vec<Instruction>) -> Result<Option<Instruction>> {
    if instructions.is_empty() {
        // No more instructions to process, break the recursion.
        return Ok(None);
    }

    // Find the first splitting jump. Everything before it is a straight
    // chain; everything from it onwards belongs to the splitter.
    let mut split_at = None;
    for (i, insn) in instructions.iter().enumerate() {
        match insn {
            Instruction::ImmJmp {
                opcode,
                false_branch_size,
                ..
            } => {
                if *opcode == JMP_EXIT {
                    continue;
                }
                if *false_branch_size == 0 {
                    return Err(Error::invalid_zero_offset(
                        "only Exit can have a false-branch size of 0",
                    ));
                }
                split_at = Some(i);
                break;
            }
            Instruction::RegJmp {
                false_branch_size, ..
            } => {
                if *false_branch_size == 0 {
                    return Err(Error::invalid_zero_offset(
                        "register jump cannot have a false-branch size of 0",
                    ));
                }
                split_at = Some(i);
                break;
            }
            _ => {}
        }
    }

    let branch = match split_at {
        Some(i) => Some(handle_jmp(instructions.split_off(i))?),
        None => None,
    };

    // Chain the straight prefix back-to-front onto the branch (or onto
    // nothing, when the list had no splitting jump).
    let mut head = branch;
    for mut insn in instructions.into_iter().rev() {
        if let Some(h) = head {
            insn.set_next(h);
        }
        head = Some(insn);
    }
    Ok(head)
}

/// Branch splitter. `context[0]` is the jump itself; the next
/// `false_branch_size` instructions form the false branch and the rest
/// form the true branch. Both sub-ranges are built recursively and
/// installed on the jump, which is returned with its subtrees attached.
fn handle_jmp(mut context: Vec<Instruction>) -> Result<Instruction> {
    if context.is_empty() {
        return Err(Error::empty_jump_context(
            "branch splitter needs at least the jump instruction",
        ));
    }

    let mut branch = context.remove(0);
    let offset = match &branch {
        Instruction::ImmJmp {
            false_branch_size, ..
        }
        | Instruction::RegJmp {
            false_branch_size, ..
        } => *false_branch_size,
        // The caller only ever splits on jumps.
        _ => unreachable!("branch splitter invoked on a straight instruction"),
    };

    if offset < 0 || offset as usize > context.len() {
        return Err(Error::jump_out_of_bounds(format!(
            "false-branch size {} exceeds the {} remaining instructions",
            offset,
            context.len()
        )));
    }

    let true_instrs = context.split_off(offset as usize);
    let false_instrs = context;

    let false_next = sequence_impl(false_instrs)?;
    let true_next = sequence_impl(true_instrs)?;
    branch.set_branches(false_next, true_next);
    Ok(branch)
}
