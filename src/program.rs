//! # Program Module
//!
//! Top-level container for one generated eBPF program: the instruction
//! tree, the register-initialization ledger the factories consult, the
//! RNG, the log map resource, and the pluggable generator strategy that
//! decides the program's shape.
//!
//! ## Key Design
//! - Construction is a handshake: the program calls the strategy's
//!   `generate`, and strategy code calls back into the program to draw
//!   randomness and track registers. The boxed strategy is taken out of
//!   the program for the duration of the callback so the borrow is clean.
//! - Deferred register-jump subtrees are materialized after `generate`
//!   returns: each pending closure runs once against the program, then is
//!   discarded.
//! - After construction the tree is immutable; emission is pure.

use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::map::LogMap;
use crate::poc::PocEmitter;
use crate::register::NO_REGISTER;
use crate::rng::NumGen;

use rustc_hash::FxHashSet;
use std::os::unix::io::RawFd;

/// Attempts at drawing an in-range register before giving up. The ledger
/// only admits in-range registers, so in practice the first draw lands.
const MAX_REGISTER_DRAWS: u32 = 64;

// -----------------------------------------------------------------------------
// GENERATOR STRATEGY
// -----------------------------------------------------------------------------

/// The strategy plugged into a program to drive tree construction.
pub trait Generator {
    /// Top-level hook: produces the root of the instruction tree, or
    /// `None` when the strategy has nothing to generate.
    fn generate(&mut self, prog: &mut Program) -> Option<Instruction>;

    /// Per-step hook: hands control back to the strategy so it can decide
    /// whether to keep appending instructions or finish. Called by
    /// strategy-authored producing code; the tree grows to a size only the
    /// strategy knows.
    fn generate_next_instruction(&mut self, prog: &mut Program) -> Instruction;
}

// -----------------------------------------------------------------------------
// PROGRAM
// -----------------------------------------------------------------------------

/// A generated eBPF program.
pub struct Program {
    root: Option<Instruction>,
    size: u32,

    // Registers initialized so far, in insertion order for sampling, with
    // a set alongside for O(1) membership.
    tracked_regs: Vec<u8>,
    tracked_set: FxHashSet<u8>,

    rng: NumGen,
    log_map: LogMap,

    /// Lowest register number random ALU operations may use.
    pub min_register: u8,
    /// Highest register number random ALU operations may use.
    pub max_register: u8,

    gen: Option<Box<dyn Generator>>,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("size", &self.size)
            .field("tracked_regs", &self.tracked_regs)
            .field("min_register", &self.min_register)
            .field("max_register", &self.max_register)
            .finish_non_exhaustive()
    }
}

impl Program {
    /// Creates a program: acquires the log map, then constructs the tree
    /// with a wall-clock seed.
    ///
    /// # Errors
    /// `MapCreationFailed` when the map syscall fails; `EmptyProgram` when
    /// the strategy generates nothing.
    pub fn new(
        gen: Box<dyn Generator>,
        map_size: u32,
        min_register: u8,
        max_register: u8,
    ) -> Result<Program> {
        let log_map = LogMap::create(map_size)?;
        Self::with_map(gen, log_map, min_register, max_register)
    }

    /// Creates a program over an already-acquired map resource.
    pub fn with_map(
        gen: Box<dyn Generator>,
        log_map: LogMap,
        min_register: u8,
        max_register: u8,
    ) -> Result<Program> {
        Self::build(gen, log_map, min_register, max_register, None)
    }

    /// Creates a program with a fixed RNG seed: the deterministic hook
    /// for tests and for reproducing interesting programs.
    pub fn seeded(
        gen: Box<dyn Generator>,
        log_map: LogMap,
        min_register: u8,
        max_register: u8,
        seed: u64,
    ) -> Result<Program> {
        Self::build(gen, log_map, min_register, max_register, Some(seed))
    }

    fn build(
        gen: Box<dyn Generator>,
        log_map: LogMap,
        min_register: u8,
        max_register: u8,
        seed: Option<u64>,
    ) -> Result<Program> {
        let rng = match seed {
            Some(seed) => NumGen::with_seed(seed),
            None => NumGen::from_clock(),
        };
        let mut prog = Program {
            root: None,
            size: 0,
            tracked_regs: Vec::new(),
            tracked_set: FxHashSet::default(),
            rng,
            log_map,
            min_register,
            max_register,
            gen: Some(gen),
        };
        prog.construct()?;
        Ok(prog)
    }

    /// Runs the strategy and fixes the tree. Called exactly once, from the
    /// constructors, after the RNG has been seeded.
    fn construct(&mut self) -> Result<()> {
        self.tracked_regs.clear();
        self.tracked_set.clear();

        // Take the strategy out so it can borrow the program mutably.
        let mut gen = self.gen.take().expect("construct runs once");
        let root = gen.generate(self);
        self.gen = Some(gen);

        let mut root = root.ok_or_else(|| {
            Error::empty_program("generator did not produce any valid instructions")
        })?;

        materialize(&mut root, self);
        self.size = root.number(0);
        self.root = Some(root);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // REGISTER TRACKING
    // -------------------------------------------------------------------------

    /// Whether `reg` has been marked initialized.
    #[inline]
    pub fn is_register_initialized(&self, reg: u8) -> bool {
        self.tracked_set.contains(&reg)
    }

    /// Records `reg` as initialized. Registers outside the configured
    /// bounds are ignored, so the ledger only ever holds usable registers.
    pub fn mark_register_initialized(&mut self, reg: u8) {
        if !(reg >= self.min_register && reg <= self.max_register) {
            return;
        }
        if self.tracked_set.insert(reg) {
            self.tracked_regs.push(reg);
        }
    }

    /// Returns a random initialized register within the configured bounds,
    /// or `NO_REGISTER` when none is available. Out-of-range samples are
    /// rejected and redrawn, a bounded number of times.
    pub fn get_random_register(&mut self) -> u8 {
        if self.tracked_regs.is_empty() {
            return NO_REGISTER;
        }
        for _ in 0..MAX_REGISTER_DRAWS {
            let idx = self.rng.rand_range(0, (self.tracked_regs.len() - 1) as u64) as usize;
            let reg = self.tracked_regs[idx];
            if reg >= self.min_register && reg <= self.max_register {
                return reg;
            }
        }
        NO_REGISTER
    }

    /// The initialized registers, in the order they were first marked.
    #[inline]
    pub fn initialized_registers(&self) -> &[u8] {
        &self.tracked_regs
    }

    // -------------------------------------------------------------------------
    // ACCESSORS
    // -------------------------------------------------------------------------

    /// The program's random number source.
    #[inline]
    pub fn rng_mut(&mut self) -> &mut NumGen {
        &mut self.rng
    }

    /// The instruction count assigned by numbering.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The root of the instruction tree.
    #[inline]
    pub fn root(&self) -> Option<&Instruction> {
        self.root.as_ref()
    }

    /// The log map's file descriptor.
    #[inline]
    pub fn log_map(&self) -> RawFd {
        self.log_map.fd()
    }

    /// Number of entries in the log map.
    #[inline]
    pub fn map_size(&self) -> u32 {
        self.log_map.max_entries()
    }

    // -------------------------------------------------------------------------
    // OUTPUT
    // -------------------------------------------------------------------------

    /// Emits the program as 64-bit instruction words. Pure: emission never
    /// mutates the tree and may be repeated.
    pub fn generate_bytecode(&self) -> Vec<u64> {
        match &self.root {
            Some(root) => root.emit(),
            None => Vec::new(),
        }
    }

    /// Renders a proof-of-concept source listing for this program through
    /// the injected emitter.
    pub fn generate_poc(&self, emitter: &dyn PocEmitter) -> Result<String> {
        emitter.emit(self)
    }

    /// Releases the program's map resource. Dropping the program does the
    /// same; either way the fd is closed exactly once.
    pub fn cleanup(self) {}
}

// -----------------------------------------------------------------------------
// DEFERRED BRANCH MATERIALIZATION
// -----------------------------------------------------------------------------

/// Walks the tree and expands pending register-jump branch generators.
/// Each closure runs once against the program, drawing randomness and
/// touching the register ledger as it goes, and is then discarded. The
/// subtrees it produces are walked too, so deferred jumps may nest.
fn materialize(insn: &mut Instruction, prog: &mut Program) {
    match insn {
        Instruction::AluImm { next, .. } | Instruction::AluReg { next, .. } => {
            if let Some(next) = next {
                materialize(next, prog);
            }
        }
        Instruction::ImmJmp {
            false_next,
            true_next,
            ..
        } => {
            if let Some(false_next) = false_next {
                materialize(false_next, prog);
            }
            if let Some(true_next) = true_next {
                materialize(true_next, prog);
            }
        }
        Instruction::RegJmp {
            false_branch_size,
            false_next,
            true_next,
            true_branch_gen,
            false_branch_gen,
            ..
        } => {
            if let Some(gen) = false_branch_gen.take() {
                let (head, size) = gen(prog);
                *false_branch_size = size;
                *false_next = Some(Box::new(head));
            }
            if let Some(gen) = true_branch_gen.take() {
                *true_next = Some(Box::new(gen(prog)));
            }
            if let Some(false_next) = false_next {
                materialize(false_next, prog);
            }
            if let Some(true_next) = true_next {
                materialize(true_next, prog);
            }
        }
    }
}
