//! # Strategy Module
//!
//! Concrete generator strategies. A strategy seeds the register ledger
//! with MOVs (nothing else may touch an uninitialized register), then
//! grows the program through the per-step hook until it decides to stop.

use crate::generate::{random_alu_instruction, random_jmp_reg_instruction};
use crate::instruction::Instruction;
use crate::program::{Generator, Program};
use crate::register::Register;
use crate::sequence::instruction_sequence;

/// Builds a straight chain of `len` random ALU instructions terminated by
/// an exit, returning the head and the chain's instruction count.
fn random_alu_run(prog: &mut Program, len: u32) -> (Instruction, i16) {
    let mut head = Instruction::exit();
    let mut count: i16 = 1;
    for _ in 0..len {
        if let Ok(mut insn) = random_alu_instruction(prog) {
            insn.set_next(head);
            head = insn;
            count += 1;
        }
    }
    (head, count)
}

// -----------------------------------------------------------------------------
// STRAIGHT-LINE STRATEGY
// -----------------------------------------------------------------------------

/// Generates a straight-line program: one seeding MOV, then a run of
/// random ALU instructions, then exit.
pub struct RandomAluGenerator {
    /// How many random ALU instructions to generate after the seed MOV.
    pub instruction_count: u32,
    generated: u32,
}

impl RandomAluGenerator {
    /// Creates a strategy producing `instruction_count` random ALU
    /// instructions.
    pub fn new(instruction_count: u32) -> Self {
        Self {
            instruction_count,
            generated: 0,
        }
    }
}

impl Generator for RandomAluGenerator {
    fn generate(&mut self, prog: &mut Program) -> Option<Instruction> {
        // Seed one register so every later draw has a source.
        let (min_register, max_register) = (prog.min_register, prog.max_register);
        let reg = prog
            .rng_mut()
            .rand_range(min_register as u64, max_register as u64) as u8;
        let imm = prog.rng_mut().rand_range(0, 0xFFFF_FFFF) as u32 as i32;
        let seed_reg = Register::from_number(reg).ok()?;
        prog.mark_register_initialized(reg);

        let mut instructions = vec![Instruction::mov64_imm(seed_reg, imm)];
        loop {
            let insn = self.generate_next_instruction(prog);
            let done = insn.is_exit();
            instructions.push(insn);
            if done {
                break;
            }
        }

        // A straight-line list never trips the sequence builder's jump
        // validation, so the error path is unreachable in practice.
        instruction_sequence(instructions).ok().flatten()
    }

    fn generate_next_instruction(&mut self, prog: &mut Program) -> Instruction {
        if self.generated >= self.instruction_count {
            return Instruction::exit();
        }
        self.generated += 1;
        random_alu_instruction(prog).unwrap_or_else(|_| Instruction::exit())
    }
}

// -----------------------------------------------------------------------------
// BRANCHING STRATEGY
// -----------------------------------------------------------------------------

/// Generates a branching program: two seeding MOVs, then one random
/// register jump whose true and false subtrees are deferred random ALU
/// runs.
pub struct RandomJumpGenerator {
    /// Length of the random ALU run on each side of the jump.
    pub branch_len: u32,
}

impl RandomJumpGenerator {
    /// Creates a strategy with the given per-branch run length.
    pub fn new(branch_len: u32) -> Self {
        Self { branch_len }
    }
}

impl Generator for RandomJumpGenerator {
    fn generate(&mut self, prog: &mut Program) -> Option<Instruction> {
        // The jump compares two registers, so seed two distinct ones.
        let (min_register, max_register) = (prog.min_register, prog.max_register);
        let r1 = prog.rng_mut().rand_range(min_register as u64, max_register as u64) as u8;
        let r2 = if r1 == prog.max_register {
            prog.min_register
        } else {
            r1 + 1
        };
        let reg1 = Register::from_number(r1).ok()?;
        let reg2 = Register::from_number(r2).ok()?;
        let imm1 = prog.rng_mut().rand_range(0, 0xFFFF_FFFF) as u32 as i32;
        let imm2 = prog.rng_mut().rand_range(0, 0xFFFF_FFFF) as u32 as i32;
        prog.mark_register_initialized(r1);
        prog.mark_register_initialized(r2);

        let len = self.branch_len;
        let jump = random_jmp_reg_instruction(
            prog,
            Box::new(move |prog: &mut Program| random_alu_run(prog, len).0),
            Box::new(move |prog: &mut Program| random_alu_run(prog, len)),
        )
        .ok()?;

        let mut root = Instruction::mov64_imm(reg1, imm1);
        root.set_next(Instruction::mov64_imm(reg2, imm2));
        root.set_next(jump);
        Some(root)
    }

    fn generate_next_instruction(&mut self, prog: &mut Program) -> Instruction {
        random_alu_instruction(prog).unwrap_or_else(|_| Instruction::exit())
    }
}
