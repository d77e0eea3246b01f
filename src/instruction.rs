//! # Instruction Module
//!
//! The instruction AST. Programs are branching trees: straight-line
//! instructions hold one linear successor, conditional jumps hold two
//! subtrees (false branch first, matching emission order). Jumps link to
//! real successor nodes; the numeric wire offset is derived at emission
//! time from the size of the false subtree, never stored.
//!
//! ## Key Design
//! - One sum type, four shapes; dispatch is an exhaustive `match`.
//! - `Exit` is a degenerate immediate jump with no successors: it numbers
//!   as one node and emits one word with offset 0.
//! - A register jump may carry deferred branch-generator closures; they
//!   are invoked once during program construction and then discarded.

use crate::opcode::{
    encode, ALU_MOV, ALU_MUL, BPF_K, BPF_X, INS_CLASS_ALU64, INS_CLASS_JMP, JMP_EXIT, JMP_JA,
    JMP_JGT, JMP_JLT, UNUSED_FIELD,
};
use crate::program::Program;
use crate::register::Register;

use std::fmt;

// -----------------------------------------------------------------------------
// DEFERRED BRANCH GENERATORS
// -----------------------------------------------------------------------------

/// One-shot producer of a true-branch subtree.
pub type TrueBranchGen = Box<dyn FnOnce(&mut Program) -> Instruction>;

/// One-shot producer of a false-branch subtree, reporting the authored
/// false-branch size alongside the subtree head.
pub type FalseBranchGen = Box<dyn FnOnce(&mut Program) -> (Instruction, i16)>;

// -----------------------------------------------------------------------------
// INSTRUCTION — AST Node
// -----------------------------------------------------------------------------

/// A single node of the instruction tree.
pub enum Instruction {
    /// ALU operation on a destination register and a 32-bit immediate.
    AluImm {
        opcode: u8,
        class: u8,
        dst_reg: Register,
        imm: i32,
        index: u32,
        next: Option<Box<Instruction>>,
    },
    /// ALU operation on a destination and a source register.
    AluReg {
        opcode: u8,
        class: u8,
        dst_reg: Register,
        src_reg: Register,
        index: u32,
        next: Option<Box<Instruction>>,
    },
    /// Conditional jump comparing a register against an immediate.
    /// `false_branch_size` is the authored number of instructions on the
    /// false path; `Exit` is the degenerate case with size 0.
    ImmJmp {
        opcode: u8,
        class: u8,
        dst_reg: Register,
        imm: i32,
        false_branch_size: i16,
        index: u32,
        false_next: Option<Box<Instruction>>,
        true_next: Option<Box<Instruction>>,
    },
    /// Conditional jump comparing two registers. May carry deferred
    /// branch generators to be materialized during construction.
    RegJmp {
        opcode: u8,
        class: u8,
        dst_reg: Register,
        src_reg: Register,
        false_branch_size: i16,
        index: u32,
        false_next: Option<Box<Instruction>>,
        true_next: Option<Box<Instruction>>,
        true_branch_gen: Option<TrueBranchGen>,
        false_branch_gen: Option<FalseBranchGen>,
    },
}

impl Instruction {
    // -------------------------------------------------------------------------
    // CONSTRUCTORS
    // -------------------------------------------------------------------------

    /// Creates an ALU instruction with an immediate operand.
    pub fn alu_imm(opcode: u8, class: u8, dst_reg: Register, imm: i32) -> Instruction {
        Instruction::AluImm {
            opcode,
            class,
            dst_reg,
            imm,
            index: 0,
            next: None,
        }
    }

    /// Creates an ALU instruction with a register operand.
    pub fn alu_reg(opcode: u8, class: u8, dst_reg: Register, src_reg: Register) -> Instruction {
        Instruction::AluReg {
            opcode,
            class,
            dst_reg,
            src_reg,
            index: 0,
            next: None,
        }
    }

    /// Creates a register/immediate conditional jump.
    pub fn imm_jmp(opcode: u8, dst_reg: Register, imm: i32, false_branch_size: i16) -> Instruction {
        Instruction::ImmJmp {
            opcode,
            class: INS_CLASS_JMP,
            dst_reg,
            imm,
            false_branch_size,
            index: 0,
            false_next: None,
            true_next: None,
        }
    }

    /// Creates a register/register conditional jump.
    pub fn reg_jmp(
        opcode: u8,
        dst_reg: Register,
        src_reg: Register,
        false_branch_size: i16,
    ) -> Instruction {
        Instruction::RegJmp {
            opcode,
            class: INS_CLASS_JMP,
            dst_reg,
            src_reg,
            false_branch_size,
            index: 0,
            false_next: None,
            true_next: None,
            true_branch_gen: None,
            false_branch_gen: None,
        }
    }

    /// Creates a register/register conditional jump whose subtrees are
    /// produced lazily during construction. The false-branch size is
    /// filled in from the generator's report at materialization time.
    pub fn reg_jmp_deferred(
        opcode: u8,
        dst_reg: Register,
        src_reg: Register,
        true_branch_gen: TrueBranchGen,
        false_branch_gen: FalseBranchGen,
    ) -> Instruction {
        Instruction::RegJmp {
            opcode,
            class: INS_CLASS_JMP,
            dst_reg,
            src_reg,
            false_branch_size: 0,
            index: 0,
            false_next: None,
            true_next: None,
            true_branch_gen: Some(true_branch_gen),
            false_branch_gen: Some(false_branch_gen),
        }
    }

    // -------------------------------------------------------------------------
    // AUTHORED HELPERS — the surface handwritten programs use
    // -------------------------------------------------------------------------

    /// `dst = imm` (64-bit). The one operation allowed to target an
    /// uninitialized register.
    pub fn mov64_imm(dst_reg: Register, imm: i32) -> Instruction {
        Instruction::alu_imm(ALU_MOV, INS_CLASS_ALU64, dst_reg, imm)
    }

    /// `dst = src` (64-bit).
    pub fn mov64_reg(dst_reg: Register, src_reg: Register) -> Instruction {
        Instruction::alu_reg(ALU_MOV, INS_CLASS_ALU64, dst_reg, src_reg)
    }

    /// `dst *= imm` (64-bit).
    pub fn mul64_imm(dst_reg: Register, imm: i32) -> Instruction {
        Instruction::alu_imm(ALU_MUL, INS_CLASS_ALU64, dst_reg, imm)
    }

    /// Program exit.
    pub fn exit() -> Instruction {
        Instruction::imm_jmp(JMP_EXIT, Register::R0, UNUSED_FIELD, 0)
    }

    /// Unconditional jump over the next `false_branch_size` instructions.
    pub fn jmp(false_branch_size: i16) -> Instruction {
        Instruction::imm_jmp(JMP_JA, Register::R0, UNUSED_FIELD, false_branch_size)
    }

    /// Jump if `dst > imm` (unsigned).
    pub fn jmp_gt(dst_reg: Register, imm: i32, false_branch_size: i16) -> Instruction {
        Instruction::imm_jmp(JMP_JGT, dst_reg, imm, false_branch_size)
    }

    /// Jump if `dst < src` (unsigned).
    pub fn jmp_lt_reg(dst_reg: Register, src_reg: Register, false_branch_size: i16) -> Instruction {
        Instruction::reg_jmp(JMP_JLT, dst_reg, src_reg, false_branch_size)
    }

    // -------------------------------------------------------------------------
    // TREE OPERATIONS
    // -------------------------------------------------------------------------

    /// Emits this node and everything reachable from it as 64-bit words.
    ///
    /// Straight instructions emit themselves then their linear successor.
    /// Branches emit themselves with the wire offset set to the emitted
    /// length of the false subtree, then the false subtree, then the true
    /// subtree, so the offset is exactly the number of words skipped when
    /// the condition holds.
    pub fn emit(&self) -> Vec<u64> {
        match self {
            Instruction::AluImm {
                opcode,
                class,
                dst_reg,
                imm,
                next,
                ..
            } => {
                let mut words = vec![encode(
                    opcode | BPF_K | class,
                    dst_reg.number(),
                    0,
                    0,
                    *imm,
                )];
                if let Some(next) = next {
                    words.extend(next.emit());
                }
                words
            }
            Instruction::AluReg {
                opcode,
                class,
                dst_reg,
                src_reg,
                next,
                ..
            } => {
                let mut words = vec![encode(
                    opcode | BPF_X | class,
                    dst_reg.number(),
                    src_reg.number(),
                    0,
                    UNUSED_FIELD,
                )];
                if let Some(next) = next {
                    words.extend(next.emit());
                }
                words
            }
            Instruction::ImmJmp {
                opcode,
                class,
                dst_reg,
                imm,
                false_next,
                true_next,
                ..
            } => {
                let false_words = false_next.as_deref().map(Instruction::emit).unwrap_or_default();
                let true_words = true_next.as_deref().map(Instruction::emit).unwrap_or_default();
                let mut words = vec![encode(
                    opcode | BPF_K | class,
                    dst_reg.number(),
                    0,
                    false_words.len() as i16,
                    *imm,
                )];
                words.extend(false_words);
                words.extend(true_words);
                words
            }
            Instruction::RegJmp {
                opcode,
                class,
                dst_reg,
                src_reg,
                false_next,
                true_next,
                ..
            } => {
                let false_words = false_next.as_deref().map(Instruction::emit).unwrap_or_default();
                let true_words = true_next.as_deref().map(Instruction::emit).unwrap_or_default();
                let mut words = vec![encode(
                    opcode | BPF_X | class,
                    dst_reg.number(),
                    src_reg.number(),
                    false_words.len() as i16,
                    UNUSED_FIELD,
                )];
                words.extend(false_words);
                words.extend(true_words);
                words
            }
        }
    }

    /// Assigns `start` as this node's index, numbers the false subtree
    /// then the true subtree (matching emission order), and returns one
    /// past the last index handed out.
    pub fn number(&mut self, start: u32) -> u32 {
        match self {
            Instruction::AluImm { index, next, .. } | Instruction::AluReg { index, next, .. } => {
                *index = start;
                match next {
                    Some(next) => next.number(start + 1),
                    None => start + 1,
                }
            }
            Instruction::ImmJmp {
                index,
                false_next,
                true_next,
                ..
            }
            | Instruction::RegJmp {
                index,
                false_next,
                true_next,
                ..
            } => {
                *index = start;
                let mut n = start + 1;
                if let Some(false_next) = false_next {
                    n = false_next.number(n);
                }
                if let Some(true_next) = true_next {
                    n = true_next.number(n);
                }
                n
            }
        }
    }

    /// Appends `insn` at the tail of this instruction's linear chain.
    ///
    /// Branches take no linear successor (their continuations live in the
    /// false/true subtrees), so appending to one is a no-op and anything
    /// after an `Exit` in an authored list is dead.
    pub fn set_next(&mut self, insn: Instruction) {
        match self {
            Instruction::AluImm { next, .. } | Instruction::AluReg { next, .. } => match next {
                Some(next) => next.set_next(insn),
                None => *next = Some(Box::new(insn)),
            },
            Instruction::ImmJmp { .. } | Instruction::RegJmp { .. } => {}
        }
    }

    /// The linear successor of a straight instruction.
    pub fn next(&self) -> Option<&Instruction> {
        match self {
            Instruction::AluImm { next, .. } | Instruction::AluReg { next, .. } => {
                next.as_deref()
            }
            _ => None,
        }
    }

    /// Installs the split successors on a branch node (sequence-builder
    /// use). No-op on straight instructions.
    pub fn set_branches(
        &mut self,
        false_branch: Option<Instruction>,
        true_branch: Option<Instruction>,
    ) {
        if let Instruction::ImmJmp {
            false_next,
            true_next,
            ..
        }
        | Instruction::RegJmp {
            false_next,
            true_next,
            ..
        } = self
        {
            *false_next = false_branch.map(Box::new);
            *true_next = true_branch.map(Box::new);
        }
    }

    /// Head of the false-branch subtree, if any.
    pub fn false_branch(&self) -> Option<&Instruction> {
        match self {
            Instruction::ImmJmp { false_next, .. } | Instruction::RegJmp { false_next, .. } => {
                false_next.as_deref()
            }
            _ => None,
        }
    }

    /// Head of the true-branch subtree, if any.
    pub fn true_branch(&self) -> Option<&Instruction> {
        match self {
            Instruction::ImmJmp { true_next, .. } | Instruction::RegJmp { true_next, .. } => {
                true_next.as_deref()
            }
            _ => None,
        }
    }

    /// The index assigned by `number`.
    #[inline]
    pub fn index(&self) -> u32 {
        match self {
            Instruction::AluImm { index, .. }
            | Instruction::AluReg { index, .. }
            | Instruction::ImmJmp { index, .. }
            | Instruction::RegJmp { index, .. } => *index,
        }
    }

    /// Whether this node is the exit instruction.
    #[inline]
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            Instruction::ImmJmp {
                opcode: JMP_EXIT,
                ..
            }
        )
    }
}

// Closures keep RegJmp from deriving Debug; print the shape by hand and
// note whether deferred generators are still pending.
impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::AluImm {
                opcode,
                class,
                dst_reg,
                imm,
                index,
                ..
            } => write!(
                f,
                "AluImm {{ op: {:#04x}, class: {:#04x}, dst: {}, imm: {}, index: {} }}",
                opcode, class, dst_reg, imm, index
            ),
            Instruction::AluReg {
                opcode,
                class,
                dst_reg,
                src_reg,
                index,
                ..
            } => write!(
                f,
                "AluReg {{ op: {:#04x}, class: {:#04x}, dst: {}, src: {}, index: {} }}",
                opcode, class, dst_reg, src_reg, index
            ),
            Instruction::ImmJmp {
                opcode,
                dst_reg,
                imm,
                false_branch_size,
                index,
                ..
            } => write!(
                f,
                "ImmJmp {{ op: {:#04x}, dst: {}, imm: {}, false_branch_size: {}, index: {} }}",
                opcode, dst_reg, imm, false_branch_size, index
            ),
            Instruction::RegJmp {
                opcode,
                dst_reg,
                src_reg,
                false_branch_size,
                index,
                true_branch_gen,
                false_branch_gen,
                ..
            } => write!(
                f,
                "RegJmp {{ op: {:#04x}, dst: {}, src: {}, false_branch_size: {}, index: {}, deferred: {} }}",
                opcode,
                dst_reg,
                src_reg,
                false_branch_size,
                index,
                true_branch_gen.is_some() || false_branch_gen.is_some()
            ),
        }
    }
}
