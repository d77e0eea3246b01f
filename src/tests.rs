//! # Tests Module
//!
//! Unit and integration tests for the whole generator: registers, wire
//! encoding, the instruction AST, the sequence builder, the random
//! factories, program construction, and proof-of-concept emission.

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::generate::{random_alu_instruction, random_jmp_reg_instruction};
    use crate::instruction::Instruction;
    use crate::map::LogMap;
    use crate::opcode::{
        encode, is_conditional_jump, ALU_ARSH, ALU_LSH, ALU_MOV, ALU_NEG, ALU_RSH, BPF_K,
        INS_CLASS_ALU, INS_CLASS_ALU64, INS_CLASS_JMP, JMP_CALL, JMP_EXIT, JMP_JA, JMP_JEQ,
        JMP_JGT,
    };
    use crate::program::{Generator, Program};
    use crate::register::{Register, NO_REGISTER};
    use crate::rng::NumGen;
    use crate::sequence::instruction_sequence;
    use crate::strategy::{RandomAluGenerator, RandomJumpGenerator};

    use std::os::unix::io::IntoRawFd;

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Wire word reference values.
    const MOV64_IMM_R0_0: u64 = 0xb7;
    const EXIT_WORD: u64 = 0x95;

    /// Builds a map handle around a throwaway fd so program construction
    /// does not need BPF privileges.
    fn test_map() -> LogMap {
        let fd = std::fs::File::open("/dev/null")
            .expect("open /dev/null")
            .into_raw_fd();
        LogMap::from_raw_fd(fd, 16)
    }

    /// Constructs a deterministic program over registers 1..=9.
    fn seeded_program(gen: Box<dyn Generator>, seed: u64) -> Program {
        Program::seeded(gen, test_map(), 1, 9, seed).expect("program construction")
    }

    /// Collects the linear chain starting at `root`.
    fn chain(root: &Instruction) -> Vec<&Instruction> {
        let mut nodes = vec![root];
        let mut cur = root;
        while let Some(next) = cur.next() {
            nodes.push(next);
            cur = next;
        }
        nodes
    }

    fn word_opcode(word: u64) -> u8 {
        (word & 0xff) as u8
    }

    fn word_dst(word: u64) -> u8 {
        ((word >> 8) & 0x0f) as u8
    }

    fn word_offset(word: u64) -> i16 {
        ((word >> 16) & 0xffff) as u16 as i16
    }

    fn word_imm(word: u64) -> i32 {
        (word >> 32) as u32 as i32
    }

    /// Strategy that generates nothing.
    struct NullGenerator;

    impl Generator for NullGenerator {
        fn generate(&mut self, _prog: &mut Program) -> Option<Instruction> {
            None
        }

        fn generate_next_instruction(&mut self, _prog: &mut Program) -> Instruction {
            Instruction::exit()
        }
    }

    /// Strategy that generates a bare exit and touches no registers.
    struct ExitOnlyGenerator;

    impl Generator for ExitOnlyGenerator {
        fn generate(&mut self, _prog: &mut Program) -> Option<Instruction> {
            Some(Instruction::exit())
        }

        fn generate_next_instruction(&mut self, _prog: &mut Program) -> Instruction {
            Instruction::exit()
        }
    }

    // =========================================================================
    // REGISTER TESTS
    // =========================================================================

    #[test]
    fn register_number_round_trip() {
        for n in 0..=10u8 {
            let reg = Register::from_number(n).unwrap();
            assert_eq!(reg.number(), n);
        }
    }

    #[test]
    fn register_unknown_numbers_rejected() {
        for n in [11u8, 42, NO_REGISTER] {
            let err = Register::from_number(n).unwrap_err();
            assert_eq!(err.kind, ErrorKind::UnknownRegister);
        }
    }

    #[test]
    fn register_display() {
        assert_eq!(Register::R3.to_string(), "r3");
        assert_eq!(Register::R10.to_string(), "r10");
    }

    // =========================================================================
    // ENCODING TESTS
    // =========================================================================

    #[test]
    fn encode_mov64_imm_reference_word() {
        let word = encode(ALU_MOV | BPF_K | INS_CLASS_ALU64, 0, 0, 0, 0);
        assert_eq!(word, MOV64_IMM_R0_0);
    }

    #[test]
    fn encode_exit_reference_word() {
        let word = encode(JMP_EXIT | BPF_K | INS_CLASS_JMP, 0, 0, 0, 0);
        assert_eq!(word, EXIT_WORD);
    }

    #[test]
    fn encode_field_placement() {
        let word = encode(0x25, 1, 2, 3, 4);
        assert_eq!(word, 0x25 | (1 << 8) | (2 << 12) | (3 << 16) | (4 << 32));
        assert_eq!(word_opcode(word), 0x25);
        assert_eq!(word_dst(word), 1);
        assert_eq!(word_offset(word), 3);
        assert_eq!(word_imm(word), 4);
    }

    #[test]
    fn encode_negative_fields_wrap() {
        let word = encode(0, 0, 0, -1, -1);
        assert_eq!(word, 0xffff_ffff_ffff_0000);
        assert_eq!(word_offset(word), -1);
        assert_eq!(word_imm(word), -1);
    }

    #[test]
    fn conditional_jump_classification() {
        assert!(!is_conditional_jump(JMP_EXIT));
        assert!(!is_conditional_jump(JMP_CALL));
        assert!(!is_conditional_jump(JMP_JA));
        assert!(is_conditional_jump(JMP_JEQ));
        assert!(is_conditional_jump(JMP_JGT));
    }

    // =========================================================================
    // INSTRUCTION AST TESTS
    // =========================================================================

    #[test]
    fn exit_emits_single_word() {
        let exit = Instruction::exit();
        assert_eq!(exit.emit(), vec![EXIT_WORD]);
    }

    #[test]
    fn set_next_appends_at_the_tail() {
        let mut root = Instruction::mov64_imm(Register::R1, 1);
        root.set_next(Instruction::mov64_imm(Register::R2, 2));
        root.set_next(Instruction::mov64_imm(Register::R3, 3));

        let nodes = chain(&root);
        assert_eq!(nodes.len(), 3);
        let words: Vec<u64> = root.emit();
        assert_eq!(word_dst(words[0]), 1);
        assert_eq!(word_dst(words[1]), 2);
        assert_eq!(word_dst(words[2]), 3);
    }

    #[test]
    fn number_assigns_sequential_indices() {
        let mut root = Instruction::mov64_imm(Register::R1, 1);
        root.set_next(Instruction::mov64_imm(Register::R2, 2));
        root.set_next(Instruction::exit());

        let count = root.number(0);
        assert_eq!(count, 3);
        let indices: Vec<u32> = chain(&root).iter().map(|i| i.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(root.emit().len(), 3);
    }

    #[test]
    fn number_walks_false_branch_before_true_branch() {
        let instructions = vec![
            Instruction::jmp_gt(Register::R1, 0, 1),
            Instruction::mov64_imm(Register::R0, 7),
            Instruction::exit(),
        ];
        let mut root = instruction_sequence(instructions).unwrap().unwrap();
        assert_eq!(root.number(0), 3);
        assert_eq!(root.index(), 0);
        assert_eq!(root.false_branch().unwrap().index(), 1);
        assert_eq!(root.true_branch().unwrap().index(), 2);
    }

    #[test]
    fn mul64_helper_encodes_multiply() {
        let words = Instruction::mul64_imm(Register::R4, 3).emit();
        assert_eq!(word_opcode(words[0]), 0x27); // BPF_MUL | BPF_K | BPF_ALU64
        assert_eq!(word_dst(words[0]), 4);
        assert_eq!(word_imm(words[0]), 3);
    }

    #[test]
    fn jump_helpers_honor_destination_register() {
        let words = Instruction::jmp_gt(Register::R7, 3, 1).emit();
        assert_eq!(word_dst(words[0]), 7);
        assert_eq!(word_imm(words[0]), 3);

        let words = Instruction::jmp_lt_reg(Register::R6, Register::R2, 1).emit();
        assert_eq!(word_opcode(words[0]), 0xad); // BPF_JLT | BPF_X | BPF_JMP
        assert_eq!(word_dst(words[0]), 6);
    }

    // =========================================================================
    // SEQUENCE BUILDER TESTS
    // =========================================================================

    #[test]
    fn two_node_program_builds_and_emits() {
        let instructions = vec![Instruction::mov64_imm(Register::R0, 0), Instruction::exit()];
        let root = instruction_sequence(instructions).unwrap().unwrap();
        assert_eq!(root.emit(), vec![MOV64_IMM_R0_0, EXIT_WORD]);
        assert!(root.next().unwrap().is_exit());
    }

    #[test]
    fn branch_splits_into_false_and_true_subtrees() {
        let instructions = vec![
            Instruction::mov64_imm(Register::R1, 5),
            Instruction::jmp_gt(Register::R1, 3, 1),
            Instruction::mov64_imm(Register::R0, 7),
            Instruction::exit(),
        ];
        let root = instruction_sequence(instructions).unwrap().unwrap();

        let jump = root.next().unwrap();
        let false_head = jump.false_branch().unwrap();
        let true_head = jump.true_branch().unwrap();
        assert!(matches!(
            false_head,
            Instruction::AluImm { imm: 7, .. }
        ));
        assert!(false_head.next().is_none());
        assert!(true_head.is_exit());

        let words = root.emit();
        assert_eq!(words.len(), 4);
        assert_eq!(word_imm(words[0]), 5);
        assert_eq!(word_offset(words[1]), 1); // skip one word on false path
        assert_eq!(word_imm(words[1]), 3);
        assert_eq!(word_imm(words[2]), 7);
        assert_eq!(words[3], EXIT_WORD);
    }

    #[test]
    fn zero_offset_conditional_rejected() {
        let err = instruction_sequence(vec![Instruction::jmp_gt(Register::R0, 0, 0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidZeroOffset);
    }

    #[test]
    fn zero_offset_register_jump_rejected() {
        let err =
            instruction_sequence(vec![Instruction::jmp_lt_reg(Register::R0, Register::R1, 0)])
                .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidZeroOffset);
    }

    #[test]
    fn jump_past_the_end_rejected() {
        let instructions = vec![
            Instruction::jmp_gt(Register::R0, 0, 5),
            Instruction::mov64_imm(Register::R0, 1),
            Instruction::exit(),
        ];
        let err = instruction_sequence(instructions).unwrap_err();
        assert_eq!(err.kind, ErrorKind::JumpOutOfBounds);
    }

    #[test]
    fn unconditional_jump_splits_like_a_conditional() {
        let instructions = vec![
            Instruction::jmp(1),
            Instruction::mov64_imm(Register::R1, 1),
            Instruction::exit(),
        ];
        let root = instruction_sequence(instructions).unwrap().unwrap();
        let words = root.emit();
        assert_eq!(word_opcode(words[0]), 0x05); // BPF_JA | BPF_JMP
        assert_eq!(word_offset(words[0]), 1);
        assert!(root.true_branch().unwrap().is_exit());
    }

    #[test]
    fn empty_sequence_builds_nothing() {
        assert!(instruction_sequence(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn nested_subtrees_equal_independent_builds() {
        // [A, JMP(2), B1, B2, C1, C2]: the false subtree must equal the
        // tree built from [B1, B2], the true subtree the one from [C1, C2].
        let false_list = || {
            vec![
                Instruction::mov64_imm(Register::R2, 2),
                Instruction::mov64_imm(Register::R3, 3),
            ]
        };
        let true_list = || vec![Instruction::mov64_imm(Register::R0, 0), Instruction::exit()];

        let mut instructions = vec![
            Instruction::mov64_imm(Register::R1, 1),
            Instruction::jmp_gt(Register::R1, 0, 2),
        ];
        instructions.extend(false_list());
        instructions.extend(true_list());

        let root = instruction_sequence(instructions).unwrap().unwrap();
        let jump = root.next().unwrap();

        let false_alone = instruction_sequence(false_list()).unwrap().unwrap();
        let true_alone = instruction_sequence(true_list()).unwrap().unwrap();
        assert_eq!(jump.false_branch().unwrap().emit(), false_alone.emit());
        assert_eq!(jump.true_branch().unwrap().emit(), true_alone.emit());
    }

    #[test]
    fn jumps_nest_recursively() {
        let instructions = vec![
            Instruction::jmp_gt(Register::R1, 0, 3),
            Instruction::jmp_gt(Register::R2, 0, 1),
            Instruction::mov64_imm(Register::R4, 4),
            Instruction::mov64_imm(Register::R5, 5),
            Instruction::exit(),
        ];
        let outer = instruction_sequence(instructions).unwrap().unwrap();

        let inner = outer.false_branch().unwrap();
        assert!(matches!(inner, Instruction::ImmJmp { .. }));
        assert!(matches!(
            inner.false_branch().unwrap(),
            Instruction::AluImm { imm: 4, .. }
        ));
        assert!(matches!(
            inner.true_branch().unwrap(),
            Instruction::AluImm { imm: 5, .. }
        ));
        assert!(outer.true_branch().unwrap().is_exit());

        // The outer offset spans the whole emitted false subtree.
        let words = outer.emit();
        assert_eq!(words.len(), 5);
        assert_eq!(word_offset(words[0]), 3);
        assert_eq!(word_offset(words[1]), 1);
    }

    // =========================================================================
    // RNG TESTS
    // =========================================================================

    #[test]
    fn rng_is_deterministic_under_a_seed() {
        let mut a = NumGen::with_seed(42);
        let mut b = NumGen::with_seed(42);
        for _ in 0..100 {
            assert_eq!(a.rand_range(0, 1000), b.rand_range(0, 1000));
        }
    }

    #[test]
    fn rng_range_is_inclusive() {
        let mut rng = NumGen::with_seed(7);
        for _ in 0..50 {
            assert_eq!(rng.rand_range(5, 5), 5);
        }
        let mut seen = [false; 2];
        for _ in 0..200 {
            seen[rng.rand_range(0, 1) as usize] = true;
        }
        assert!(seen[0] && seen[1]);
    }

    // =========================================================================
    // MAP TESTS
    // =========================================================================

    #[test]
    fn map_creation_succeeds_or_reports_kind() {
        // Creating a real map needs CAP_BPF; accept both outcomes but pin
        // the error classification.
        match LogMap::create(4) {
            Ok(map) => {
                assert!(map.fd() >= 0);
                assert_eq!(map.max_entries(), 4);
            }
            Err(err) => assert_eq!(err.kind, ErrorKind::MapCreationFailed),
        }
    }

    #[test]
    fn map_wraps_existing_fd() {
        let map = test_map();
        assert!(map.fd() >= 0);
        assert_eq!(map.max_entries(), 16);
    }

    // =========================================================================
    // PROGRAM TESTS
    // =========================================================================

    #[test]
    fn empty_generator_is_an_error() {
        let err = Program::seeded(Box::new(NullGenerator), test_map(), 1, 9, 42).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyProgram);
    }

    #[test]
    fn no_initialized_registers_yields_sentinel() {
        let mut prog = seeded_program(Box::new(ExitOnlyGenerator), 42);
        assert_eq!(prog.get_random_register(), NO_REGISTER);
    }

    #[test]
    fn out_of_bounds_registers_are_not_tracked() {
        let mut prog = seeded_program(Box::new(ExitOnlyGenerator), 42);
        prog.mark_register_initialized(0); // below min
        prog.mark_register_initialized(10); // above max
        assert!(!prog.is_register_initialized(0));
        assert!(!prog.is_register_initialized(10));

        prog.mark_register_initialized(5);
        assert!(prog.is_register_initialized(5));
        assert_eq!(prog.get_random_register(), 5);
    }

    #[test]
    fn duplicate_marks_collapse() {
        let mut prog = seeded_program(Box::new(ExitOnlyGenerator), 42);
        prog.mark_register_initialized(5);
        prog.mark_register_initialized(5);
        assert_eq!(prog.initialized_registers(), &[5]);
    }

    #[test]
    fn bytecode_length_matches_numbered_size() {
        let prog = seeded_program(Box::new(RandomAluGenerator::new(12)), 42);
        let words = prog.generate_bytecode();
        assert_eq!(words.len() as u32, prog.size());
        // Seed MOV + 12 random + exit.
        assert_eq!(prog.size(), 14);

        let prog = seeded_program(Box::new(RandomJumpGenerator::new(3)), 42);
        assert_eq!(prog.generate_bytecode().len() as u32, prog.size());
    }

    #[test]
    fn same_seed_same_program() {
        let a = seeded_program(Box::new(RandomAluGenerator::new(20)), 1234);
        let b = seeded_program(Box::new(RandomAluGenerator::new(20)), 1234);
        assert_eq!(a.generate_bytecode(), b.generate_bytecode());

        let c = seeded_program(Box::new(RandomAluGenerator::new(20)), 1235);
        assert_ne!(a.generate_bytecode(), c.generate_bytecode());
    }

    #[test]
    fn emission_is_pure() {
        let prog = seeded_program(Box::new(RandomAluGenerator::new(8)), 42);
        assert_eq!(prog.generate_bytecode(), prog.generate_bytecode());
    }

    // =========================================================================
    // RANDOM FACTORY TESTS
    // =========================================================================

    #[test]
    fn alu_draws_cover_ops_and_respect_widths() {
        let mut prog = seeded_program(Box::new(RandomAluGenerator::new(1)), 42);

        let mut ops_seen = [false; 13];
        let mut classes_seen = (false, false);
        for _ in 0..1000 {
            let insn = random_alu_instruction(&mut prog).unwrap();
            match insn {
                Instruction::AluImm {
                    opcode, class, imm, ..
                } => {
                    ops_seen[(opcode >> 4) as usize] = true;
                    match class {
                        INS_CLASS_ALU => classes_seen.0 = true,
                        INS_CLASS_ALU64 => classes_seen.1 = true,
                        other => panic!("unexpected class {:#04x}", other),
                    }
                    if opcode == ALU_LSH || opcode == ALU_RSH || opcode == ALU_ARSH {
                        let width = if class == INS_CLASS_ALU { 32 } else { 64 };
                        assert!((0..width).contains(&imm), "shift {} out of range", imm);
                    }
                    if opcode == ALU_NEG {
                        assert_eq!(imm, 0);
                    }
                }
                Instruction::AluReg { opcode, class, .. } => {
                    ops_seen[(opcode >> 4) as usize] = true;
                    match class {
                        INS_CLASS_ALU => classes_seen.0 = true,
                        INS_CLASS_ALU64 => classes_seen.1 = true,
                        other => panic!("unexpected class {:#04x}", other),
                    }
                    assert_ne!(opcode, ALU_NEG, "NEG has no register form");
                }
                other => panic!("unexpected instruction {:?}", other),
            }
        }
        assert!(ops_seen.iter().all(|&seen| seen), "ops: {:?}", ops_seen);
        assert!(classes_seen.0 && classes_seen.1);
    }

    #[test]
    fn register_jumps_use_distinct_conditional_operands() {
        let mut prog = seeded_program(Box::new(RandomAluGenerator::new(10)), 42);
        prog.mark_register_initialized(2);
        prog.mark_register_initialized(3);

        for _ in 0..200 {
            let insn = random_jmp_reg_instruction(
                &mut prog,
                Box::new(|_| Instruction::exit()),
                Box::new(|_| (Instruction::exit(), 1)),
            )
            .unwrap();
            match insn {
                Instruction::RegJmp {
                    opcode,
                    dst_reg,
                    src_reg,
                    true_branch_gen,
                    false_branch_gen,
                    ..
                } => {
                    assert_ne!(dst_reg, src_reg);
                    assert!(opcode != JMP_EXIT && opcode != JMP_CALL && opcode != JMP_JA);
                    assert!(true_branch_gen.is_some() && false_branch_gen.is_some());
                }
                other => panic!("unexpected instruction {:?}", other),
            }
        }
    }

    #[test]
    fn register_jump_needs_two_distinct_registers() {
        let mut prog = seeded_program(Box::new(ExitOnlyGenerator), 42);
        prog.mark_register_initialized(5);

        let err = random_jmp_reg_instruction(
            &mut prog,
            Box::new(|_| Instruction::exit()),
            Box::new(|_| (Instruction::exit(), 1)),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownRegister);
    }

    #[test]
    fn generated_programs_keep_register_discipline() {
        // Over a long straight-line program: destinations stay in bounds,
        // only MOV targets fresh registers, and every source was
        // initialized earlier on the path.
        let prog = seeded_program(Box::new(RandomAluGenerator::new(50)), 42);
        let root = prog.root().unwrap();

        let mut initialized: Vec<u8> = Vec::new();
        for insn in chain(root) {
            match insn {
                Instruction::AluImm {
                    opcode, dst_reg, ..
                } => {
                    let dst = dst_reg.number();
                    assert!((1..=9).contains(&dst));
                    if *opcode == ALU_MOV {
                        if !initialized.contains(&dst) {
                            initialized.push(dst);
                        }
                    } else {
                        assert!(initialized.contains(&dst), "uninitialized dst r{}", dst);
                    }
                }
                Instruction::AluReg {
                    opcode,
                    dst_reg,
                    src_reg,
                    ..
                } => {
                    let dst = dst_reg.number();
                    let src = src_reg.number();
                    assert!((1..=9).contains(&dst));
                    assert!(initialized.contains(&src), "uninitialized src r{}", src);
                    if *opcode == ALU_MOV {
                        if !initialized.contains(&dst) {
                            initialized.push(dst);
                        }
                    } else {
                        assert!(initialized.contains(&dst), "uninitialized dst r{}", dst);
                    }
                }
                _ => {}
            }
        }
        assert!(!initialized.is_empty());
    }

    // =========================================================================
    // DEFERRED BRANCH MATERIALIZATION TESTS
    // =========================================================================

    #[test]
    fn deferred_jump_branches_materialize() {
        let prog = seeded_program(Box::new(RandomJumpGenerator::new(3)), 42);
        let root = prog.root().unwrap();

        // mov, mov, then the jump.
        let nodes = chain(root);
        assert_eq!(nodes.len(), 3);
        let jump = nodes[2];
        match jump {
            Instruction::RegJmp {
                false_branch_size,
                true_branch_gen,
                false_branch_gen,
                ..
            } => {
                // 3 ALU instructions plus the exit on the false path.
                assert_eq!(*false_branch_size, 4);
                assert!(true_branch_gen.is_none(), "generator not consumed");
                assert!(false_branch_gen.is_none(), "generator not consumed");
            }
            other => panic!("expected a register jump, got {:?}", other),
        }
        assert!(jump.false_branch().is_some());
        assert!(jump.true_branch().is_some());

        // 2 movs + jump + two 4-instruction branches.
        assert_eq!(prog.size(), 11);
        let words = prog.generate_bytecode();
        assert_eq!(words.len(), 11);
        assert_eq!(word_offset(words[2]), 4);
    }

    // =========================================================================
    // POC EMISSION TESTS
    // =========================================================================

    #[test]
    fn poc_source_lists_bytecode_and_map() {
        use crate::poc::{CSourceEmitter, PocEmitter};

        let prog = seeded_program(Box::new(RandomAluGenerator::new(4)), 42);
        let source = CSourceEmitter.emit(&prog).unwrap();

        for word in prog.generate_bytecode() {
            assert!(source.contains(&format!("{:#018x}ULL", word)));
        }
        assert!(source.contains("map_attr.max_entries = 16;"));
        assert!(source.contains("BPF_PROG_LOAD"));
    }

    // =========================================================================
    // ERROR TESTS
    // =========================================================================

    #[test]
    fn error_display_includes_kind_and_message() {
        let err = crate::error::Error::invalid_zero_offset("bad jump");
        assert_eq!(err.to_string(), "InvalidZeroOffset: bad jump");
    }
}
