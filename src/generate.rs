//! # Generate Module
//!
//! Random instruction factories. Each factory produces one well-formed
//! instruction, consulting the program's register ledger so the verifier
//! never sees a read of an uninitialized register: MOV may target any
//! register in bounds (and initializes it), every other ALU destination
//! and every jump operand comes from the initialized set.

use crate::error::{Error, Result};
use crate::instruction::{FalseBranchGen, Instruction, TrueBranchGen};
use crate::opcode::{
    is_conditional_jump, ALU_ARSH, ALU_LSH, ALU_MOV, ALU_NEG, ALU_OP_MAX, ALU_RSH, INS_CLASS_ALU,
    INS_CLASS_ALU64, JMP_OP_MAX,
};
use crate::program::Program;
use crate::register::Register;

/// Attempts at resampling before falling back to a deterministic pick.
const MAX_RESAMPLES: u32 = 64;

/// Produces a random ALU operation with either an immediate or a register
/// source, applied to a random destination register.
///
/// # Errors
/// `UnknownRegister` when a non-MOV operation is requested and no register
/// has been initialized yet.
pub fn random_alu_instruction(prog: &mut Program) -> Result<Instruction> {
    let op = (prog.rng_mut().rand_range(0x00, ALU_OP_MAX as u64) as u8) << 4;

    // MOV initializes its destination, so it alone may draw from the full
    // allowed range instead of the initialized set.
    let dst = if op == ALU_MOV {
        let (min_register, max_register) = (prog.min_register, prog.max_register);
        prog.rng_mut()
            .rand_range(min_register as u64, max_register as u64) as u8
    } else {
        prog.get_random_register()
    };
    let dst_reg = Register::from_number(dst)?;

    let class = if prog.rng_mut().rand_range(0, 1) == 0 {
        INS_CLASS_ALU
    } else {
        INS_CLASS_ALU64
    };

    // Toss another coin to decide between an immediate operand and a
    // source register.
    if prog.rng_mut().rand_range(0, 1) == 0 {
        imm_alu_instruction(op, class, dst_reg, prog)
    } else {
        reg_alu_instruction(op, class, dst_reg, prog)
    }
}

fn imm_alu_instruction(
    op: u8,
    class: u8,
    dst_reg: Register,
    prog: &mut Program,
) -> Result<Instruction> {
    let mut value = prog.rng_mut().rand_range(0, 0xFFFF_FFFF) as u32 as i32;
    match op {
        ALU_RSH | ALU_LSH | ALU_ARSH => {
            // Shifting past the operand width is rejected by the verifier.
            let max_shift = if class == INS_CLASS_ALU { 32 } else { 64 };
            value = value.rem_euclid(max_shift);
        }
        ALU_NEG => {
            // NEG ignores its immediate.
            value = 0;
        }
        ALU_MOV => {
            if !prog.is_register_initialized(dst_reg.number()) {
                prog.mark_register_initialized(dst_reg.number());
            }
        }
        _ => {}
    }

    Ok(Instruction::alu_imm(op, class, dst_reg, value))
}

fn reg_alu_instruction(
    mut op: u8,
    class: u8,
    dst_reg: Register,
    prog: &mut Program,
) -> Result<Instruction> {
    let src_reg = Register::from_number(prog.get_random_register())?;

    // Negation has no register form.
    while op == ALU_NEG {
        op = (prog.rng_mut().rand_range(0x00, ALU_OP_MAX as u64) as u8) << 4;
    }

    if op == ALU_MOV && !prog.is_register_initialized(dst_reg.number()) {
        prog.mark_register_initialized(dst_reg.number());
    }

    Ok(Instruction::alu_reg(op, class, dst_reg, src_reg))
}

/// Draws a random (pre-shifted) jump operation.
pub fn random_jump_op(prog: &mut Program) -> u8 {
    (prog.rng_mut().rand_range(0x00, JMP_OP_MAX as u64) as u8) << 4
}

/// Produces a random conditional jump comparing two distinct initialized
/// registers. The supplied closures defer construction of the true and
/// false subtrees until the program materializes them.
///
/// # Errors
/// `UnknownRegister` when fewer than two distinct registers have been
/// initialized.
pub fn random_jmp_reg_instruction(
    prog: &mut Program,
    true_branch_gen: TrueBranchGen,
    false_branch_gen: FalseBranchGen,
) -> Result<Instruction> {
    let mut op;
    loop {
        op = random_jump_op(prog);
        if is_conditional_jump(op) {
            break;
        }
    }

    let dst_reg = Register::from_number(prog.get_random_register())?;
    let mut src = prog.get_random_register();
    let mut resamples = 0;
    while src == dst_reg.number() && resamples < MAX_RESAMPLES {
        src = prog.get_random_register();
        resamples += 1;
    }
    if src == dst_reg.number() {
        // The sampler keeps landing on dst; fall back to any other tracked
        // register, or fail cleanly when only one exists.
        src = prog
            .initialized_registers()
            .iter()
            .copied()
            .find(|&r| r != dst_reg.number())
            .ok_or_else(|| {
                Error::unknown_register(
                    "register jump needs two distinct initialized registers",
                )
            })?;
    }
    let src_reg = Register::from_number(src)?;

    Ok(Instruction::reg_jmp_deferred(
        op,
        dst_reg,
        src_reg,
        true_branch_gen,
        false_branch_gen,
    ))
}
