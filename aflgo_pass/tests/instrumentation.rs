mod common;

use aflgo_pass::{
    abi::{AUTOMATA_HANDLER, GET_DISTANCE_TO_TARGET, PROPOSITION_HANDLER, STATE_HANDLER},
    config::EnvConfig,
    exec::cur_loc_of,
    ir::{BasicBlock, Function, Instruction, IntType, Op, Operand, Param, Type},
    tables::DistanceTable,
    AflGoPass, InstrumentationStats, Module, PassOptions, PassReport, ProbeExecutor,
    RuntimeServices,
};
use common::{br, chain, located_block, module, quiet_env, ret, unlocated_block, write_input};

#[derive(Debug, Default)]
struct Runtime {
    lookups: Vec<String>,
    events: Vec<(i32, i32)>,
}

impl RuntimeServices for Runtime {
    fn distance_to_target(&mut self, bb_name: &str) -> i32 {
        self.lookups.push(bb_name.to_string());
        50
    }

    fn automata_handler(&mut self, input: i32, output: i32) {
        self.events.push((input, output));
    }
}

fn instrument(module: &mut Module, options: PassOptions, env: EnvConfig) -> InstrumentationStats {
    match AflGoPass::with_seed(options, env, 0x5eed).run_on_module(module) {
        Ok(PassReport::Instrumented(stats)) => stats,
        other => panic!("expected instrumentation, got {other:?}"),
    }
}

fn calls_in<'b>(bb: &'b BasicBlock, name: &str) -> Vec<&'b Instruction> {
    bb.instructions
        .iter()
        .filter(|inst| inst.called_function() == Some(name))
        .collect()
}

#[test]
fn test_distance_block_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let distance = write_input(dir.path(), "distance.cfg.txt", "foo.c:10:,0.5\n");
    assert_eq!(
        DistanceTable::from_file(&distance)
            .unwrap()
            .get(&aflgo_pass::LocationId::new("foo.c", 10)),
        Some(50)
    );

    let mut module = module(vec![Function::new(
        "bar",
        vec![],
        vec![located_block("/src/foo.c", 10, ret())],
    )]);
    let options = PassOptions::builder().distance(&distance).build();
    let stats = instrument(&mut module, options, quiet_env());
    assert_eq!(stats.inst_blocks, 1);
    assert_eq!(stats.distance_blocks, 1);

    let bar = module.function("bar").unwrap();
    assert_eq!(calls_in(&bar.blocks[0], GET_DISTANCE_TO_TARGET).len(), 1);

    let mut executor = ProbeExecutor::new(module.symbols.pointer_width);
    let mut runtime = Runtime::default();
    executor
        .execute_path(&module.symbols, bar, &[0], &mut runtime)
        .unwrap();
    assert_eq!(runtime.lookups, vec!["foo.c:10"]);
    assert_eq!(executor.region().visit_count(), 1);
    assert_eq!(executor.region().distance_sum(), 50);
    assert_eq!(executor.region().count_hit_edges(), 1);
}

#[test]
fn test_automaton_event_reported_once_per_block() {
    let dir = tempfile::tempdir().unwrap();
    let distance = write_input(dir.path(), "distance.cfg.txt", "foo.c:30,1.0\n");
    let revents = write_input(dir.path(), "revents.txt", "/src/foo.c:20:3\n");

    let block = BasicBlock::new(vec![
        Instruction::new(Op::Other {
            opcode: "icmp".into(),
            operands: vec![],
        })
        .with_loc("src/foo.c", 20),
        Instruction::new(Op::Other {
            opcode: "icmp".into(),
            operands: vec![],
        })
        .with_loc("src/foo.c", 20),
        Instruction::new(br(1)).with_loc("src/foo.c", 20),
    ]);
    let mut module = module(vec![Function::new(
        "step",
        vec![Param {
            name: "input".into(),
            ty: Type::Int(IntType::I32),
        }],
        vec![block, unlocated_block(ret())],
    )]);
    let options = PassOptions::builder()
        .distance(&distance)
        .revents(&revents)
        .build();
    let stats = instrument(&mut module, options, quiet_env());
    assert_eq!(stats.monitor.automaton_events, 1);
    assert_eq!(stats.monitor.finalizers, 0);

    let step = module.function("step").unwrap();
    let reports = calls_in(&step.blocks[0], AUTOMATA_HANDLER);
    assert_eq!(reports.len(), 1);
    let Op::Call { args, .. } = &reports[0].op else {
        unreachable!()
    };
    assert_eq!(
        args,
        &vec![Operand::Param(0), Operand::const_int(IntType::I32, 3)]
    );
    assert_eq!(calls_in(&step.blocks[0], STATE_HANDLER).len(), 1);

    let report_at = step.blocks[0]
        .instructions
        .iter()
        .position(|inst| inst.called_function() == Some(AUTOMATA_HANDLER))
        .unwrap();
    let state_at = step.blocks[0]
        .instructions
        .iter()
        .position(|inst| inst.called_function() == Some(STATE_HANDLER))
        .unwrap();
    assert!(report_at < state_at);
    assert!(module.symbols.declaration(AUTOMATA_HANDLER).is_some());

    let mut executor = ProbeExecutor::new(64);
    let mut runtime = Runtime::default();
    executor
        .execute_path(&module.symbols, step, &[0, 1], &mut runtime)
        .unwrap();
    assert_eq!(runtime.events, vec![(0, 3)]);
}

#[test]
fn test_consecutive_edges_hash() {
    let mut module = module(vec![Function::new(
        "f",
        vec![],
        vec![unlocated_block(br(1)), unlocated_block(ret())],
    )]);
    let stats = instrument(&mut module, PassOptions::default(), quiet_env());
    assert_eq!(stats.inst_blocks, 2);
    assert_eq!(stats.distance_blocks, 0);

    let f = module.function("f").unwrap();
    let a = cur_loc_of(&f.blocks[0]).unwrap() as usize;
    let b = cur_loc_of(&f.blocks[1]).unwrap() as usize;

    let mut executor = ProbeExecutor::new(64);
    executor
        .execute_path(&module.symbols, f, &[0, 1], &mut Runtime::default())
        .unwrap();
    let edges = executor.region().edges();
    assert!(edges[a] >= 1);
    assert!(edges[(a >> 1) ^ b] >= 1);
    assert_eq!(executor.prev_loc() as usize, b >> 1);
    assert!(calls_in(&f.blocks[0], GET_DISTANCE_TO_TARGET).is_empty());
}

#[test]
fn test_selective_skips_blocks_without_distance() {
    let dir = tempfile::tempdir().unwrap();
    let distance = write_input(dir.path(), "distance.cfg.txt", "foo.c:1,2.5\n");
    let mut func = chain("f", "foo.c", 3);
    func.blocks.push(unlocated_block(ret()));
    let mut module = module(vec![func]);
    let sizes: Vec<usize> = module.functions[0]
        .blocks
        .iter()
        .map(|bb| bb.instructions.len())
        .collect();

    let env = EnvConfig {
        selective: true,
        ..quiet_env()
    };
    let options = PassOptions::builder().distance(&distance).build();
    let stats = instrument(&mut module, options, env);
    assert_eq!(stats.skipped_blocks, 2);
    assert_eq!(stats.inst_blocks, 2);
    assert_eq!(stats.distance_blocks, 1);

    let blocks = &module.functions[0].blocks;
    assert!(blocks[0].instructions.len() > sizes[0]);
    assert_eq!(blocks[1].instructions.len(), sizes[1]);
    assert_eq!(blocks[2].instructions.len(), sizes[2]);
    assert!(cur_loc_of(&blocks[3]).is_some());
}

#[test]
fn test_inst_ratio_bounds() {
    let blocks = 2000;

    let mut sparse = module(vec![chain("f", "big.c", blocks)]);
    let env = EnvConfig {
        inst_ratio: 1,
        ..quiet_env()
    };
    let stats = instrument(&mut sparse, PassOptions::default(), env);
    assert!(stats.inst_blocks < blocks / 20, "{}", stats.inst_blocks);

    let mut dense = module(vec![chain("f", "big.c", blocks)]);
    let stats = instrument(&mut dense, PassOptions::default(), quiet_env());
    assert_eq!(stats.inst_blocks, blocks);
    assert!(dense.functions[0]
        .blocks
        .iter()
        .all(|bb| cur_loc_of(bb).is_some()));
}

#[test]
fn test_distance_ratio_bounds() {
    let blocks = 2000;
    let dir = tempfile::tempdir().unwrap();
    let table: String = (1..=blocks).map(|line| format!("big.c:{line},1.5\n")).collect();
    let distance = write_input(dir.path(), "distance.cfg.txt", &table);

    let mut module = module(vec![chain("f", "big.c", blocks)]);
    let env = EnvConfig {
        dinst_ratio: 1,
        ..quiet_env()
    };
    let options = PassOptions::builder().distance(&distance).build();
    let stats = instrument(&mut module, options, env);
    assert_eq!(stats.inst_blocks, blocks);
    assert!(stats.distance_blocks < blocks / 20, "{}", stats.distance_blocks);

    let mut dense = common::module(vec![chain("f", "big.c", blocks)]);
    let options = PassOptions::builder().distance(&distance).build();
    let stats = instrument(&mut dense, options, quiet_env());
    assert_eq!(stats.distance_blocks, blocks);
}

fn other_at(file: &str, line: u32) -> Instruction {
    Instruction::new(Op::Other {
        opcode: "icmp".into(),
        operands: vec![],
    })
    .with_loc(file, line)
}

#[test]
fn test_first_matching_event_wins_across_tables() {
    let dir = tempfile::tempdir().unwrap();
    let distance = write_input(dir.path(), "distance.cfg.txt", "proto.c:1,1.0\n");
    let revents = write_input(dir.path(), "revents.txt", "proto.c:2:4\nproto.c:5:7\n");
    let pevents = write_input(
        dir.path(),
        "pevents.txt",
        "proto.c:1:handshake_done\nproto.c:5:ready\n",
    );

    let mixed = BasicBlock::new(vec![
        other_at("proto.c", 1),
        other_at("proto.c", 2),
        Instruction::new(br(1)).with_loc("proto.c", 2),
    ]);
    let shared = BasicBlock::new(vec![
        other_at("proto.c", 5),
        Instruction::new(ret()).with_loc("proto.c", 5),
    ]);
    let mut module = module(vec![Function::new("serve", vec![], vec![mixed, shared])]);
    let options = PassOptions::builder()
        .distance(&distance)
        .revents(&revents)
        .pevents(&pevents)
        .build();
    let stats = instrument(&mut module, options, quiet_env());
    assert_eq!(stats.monitor.propositions, 1);
    assert_eq!(stats.monitor.automaton_events, 1);

    let serve = module.function("serve").unwrap();
    assert_eq!(calls_in(&serve.blocks[0], PROPOSITION_HANDLER).len(), 1);
    assert!(calls_in(&serve.blocks[0], AUTOMATA_HANDLER).is_empty());

    assert_eq!(calls_in(&serve.blocks[1], AUTOMATA_HANDLER).len(), 1);
    assert!(calls_in(&serve.blocks[1], PROPOSITION_HANDLER).is_empty());
}

#[test]
fn test_blacklisted_functions_not_instrumented() {
    let mut module = module(vec![
        Function::new("asan.module_ctor", vec![], vec![located_block("a.c", 1, ret())]),
        Function::new("__ubsan_handle_add_overflow", vec![], vec![unlocated_block(ret())]),
        Function::new("work", vec![], vec![located_block("a.c", 2, ret())]),
    ]);
    let before = module.functions[..2].to_vec();
    let stats = instrument(&mut module, PassOptions::default(), quiet_env());
    assert_eq!(stats.inst_blocks, 1);
    assert_eq!(module.functions[..2], before[..]);
}

#[test]
fn test_empty_module_instruments_nothing() {
    let mut module = module(vec![Function::new("decl_only", vec![], vec![])]);
    let stats = instrument(&mut module, PassOptions::default(), quiet_env());
    assert_eq!(stats, InstrumentationStats::default());
}

#[test]
fn test_missing_distance_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut module = module(vec![chain("f", "foo.c", 2)]);
    let before = module.clone();
    let options = PassOptions::builder()
        .distance(dir.path().join("distance.cfg.txt"))
        .build();
    assert!(AflGoPass::with_seed(options, quiet_env(), 0)
        .run_on_module(&mut module)
        .is_err());
    assert_eq!(module, before);
}
