//! LTL monitor probes.
//!
//! Every located instruction of a block first snapshots the local variables.
//! The first instruction whose location is an event then reports it:
//!
//! * automaton events call `automata_handler(input, event)`, snapshot the
//!   globals and hand both snapshots to `state_handler`
//! * protocol propositions call `proposition_handler(name)`, snapshot the
//!   globals, call `state_handler` and `evaluate_trace(TRACE_CONTINUE)`
//!
//! Later matches in the same block report nothing. With automaton events
//! loaded, every return of `main` is preceded by `evaluate_trace(TRACE_FINALIZE)`.

use crate::{
    abi::{
        declare_monitor_runtime, AUTOMATA_HANDLER, EVALUATE_TRACE, LTL_GLOBAL_COUNT,
        LTL_GLOBAL_SIZE_VEC, LTL_GLOBAL_VEC, LTL_LOCAL_COUNT, LTL_LOCAL_VEC, PROPOSITION_HANDLER,
        STATE_HANDLER, STORE_GLOBAL_VARIABLES, STORE_LOCAL_VARIABLES, TRACE_CONTINUE,
        TRACE_FINALIZE,
    },
    builder::{IrBuilder, IrWriter},
    ir::{Function, IntType, Operand, SymbolTable, Type},
    location::{instruction_location, LocationId},
    mode::MonitorTables,
};

/// What the monitor probes of a run amounted to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// `automata_handler` calls
    pub automaton_events: usize,
    /// `proposition_handler` calls
    pub propositions: usize,
    /// `evaluate_trace(TRACE_FINALIZE)` calls
    pub finalizers: usize,
}

enum Event<'t> {
    Automaton(i32),
    Proposition(&'t str),
}

fn match_event<'t>(tables: &'t MonitorTables, loc: &LocationId) -> Option<Event<'t>> {
    if let Some(code) = tables.automaton.as_ref().and_then(|t| t.get(loc)) {
        return Some(Event::Automaton(*code));
    }
    tables
        .protocol
        .as_ref()
        .and_then(|t| t.get(loc))
        .map(|name| Event::Proposition(name))
}

fn insert_state_handler<W: IrWriter>(irb: &mut W) {
    let i32_ty = Type::Int(IntType::I32);
    irb.insert_call(STORE_GLOBAL_VARIABLES, vec![]);
    let global_vec = irb.load_global(LTL_GLOBAL_VEC, Type::Ptr);
    let global_size_vec = irb.load_global(LTL_GLOBAL_SIZE_VEC, Type::Ptr);
    let global_count = irb.load_global(LTL_GLOBAL_COUNT, i32_ty);
    let local_vec = irb.load_global(LTL_LOCAL_VEC, Type::Ptr);
    let local_count = irb.load_global(LTL_LOCAL_COUNT, i32_ty);
    irb.insert_call(
        STATE_HANDLER,
        vec![global_vec, global_size_vec, global_count, local_vec, local_count],
    );
}

fn evaluate_trace<W: IrWriter>(irb: &mut W, flag: u64) {
    irb.insert_call(
        EVALUATE_TRACE,
        vec![Operand::const_int(IntType::I32, flag)],
    );
}

/// Inserts the monitor probes into block `block` of `func`.
///
/// Each probe goes right before the instruction it belongs to.
pub fn instrument_block(
    symbols: &mut SymbolTable,
    func: &mut Function,
    block: usize,
    tables: &MonitorTables,
    stats: &mut MonitorStats,
) {
    let input = if func.params.is_empty() {
        Operand::const_int(IntType::I32, 0)
    } else {
        Operand::Param(0)
    };
    let finalize_returns = func.name == "main" && tables.automaton.is_some();

    let mut is_traversed = false;
    let mut index = 0;
    while index < func.blocks[block].instructions.len() {
        let inst = &func.blocks[block].instructions[index];
        let loc = inst
            .is_insertion_point()
            .then(|| instruction_location(inst))
            .flatten();
        let finalize = finalize_returns && inst.is_return();
        if loc.is_none() && !finalize {
            index += 1;
            continue;
        }

        let mut irb = IrBuilder::new(symbols, func, block, index);
        declare_monitor_runtime(&mut irb);

        if let Some(loc) = &loc {
            irb.insert_call(STORE_LOCAL_VARIABLES, vec![]);
            if !is_traversed {
                match match_event(tables, loc) {
                    Some(Event::Automaton(code)) => {
                        irb.insert_call(
                            AUTOMATA_HANDLER,
                            vec![
                                input.clone(),
                                Operand::const_int(IntType::I32, code as u64),
                            ],
                        );
                        insert_state_handler(&mut irb);
                        stats.automaton_events += 1;
                        is_traversed = true;
                    }
                    Some(Event::Proposition(name)) => {
                        log::debug!("Capturing global and local state at {loc} for `{name}`");
                        let name = irb.global_string(name);
                        irb.insert_call(PROPOSITION_HANDLER, vec![name]);
                        insert_state_handler(&mut irb);
                        evaluate_trace(&mut irb, TRACE_CONTINUE);
                        stats.propositions += 1;
                        is_traversed = true;
                    }
                    None => {}
                }
            }
        }

        if finalize {
            evaluate_trace(&mut irb, TRACE_FINALIZE);
            stats.finalizers += 1;
        }

        // Step past the probes and the instruction they precede
        index = irb.cursor() + 1;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        abi::{
            AUTOMATA_HANDLER, EVALUATE_TRACE, PROPOSITION_HANDLER, STATE_HANDLER,
            STORE_LOCAL_VARIABLES,
        },
        ir::{BasicBlock, Function, Instruction, IntType, Op, Operand, Param, SymbolTable, Type},
        mode::MonitorTables,
        monitor::{instrument_block, MonitorStats},
        tables::{AutomatonEvents, PropositionEvents},
    };

    fn calls_to<'f>(func: &'f Function, name: &str) -> Vec<&'f [Operand]> {
        func.blocks[0]
            .instructions
            .iter()
            .filter(|i| i.called_function() == Some(name))
            .filter_map(|i| match &i.op {
                Op::Call { args, .. } => Some(args.as_slice()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_protocol_block() {
        let tables = MonitorTables {
            automaton: None,
            protocol: Some(PropositionEvents::from_reader("s.c:5:hello\n".as_bytes()).unwrap()),
        };
        let mut func = Function::new(
            "handle",
            vec![],
            vec![BasicBlock::new(vec![
                Instruction::new(Op::Unreachable).with_loc("s.c", 5),
                Instruction::new(Op::Unreachable).with_loc("s.c", 5),
                Instruction::new(Op::Ret { value: None }),
            ])],
        );
        let mut symbols = SymbolTable::default();
        let mut stats = MonitorStats::default();
        instrument_block(&mut symbols, &mut func, 0, &tables, &mut stats);

        assert_eq!(stats.propositions, 1);
        assert_eq!(calls_to(&func, STORE_LOCAL_VARIABLES).len(), 2);
        assert_eq!(calls_to(&func, PROPOSITION_HANDLER).len(), 1);
        assert_eq!(calls_to(&func, STATE_HANDLER).len(), 1);
        assert_eq!(
            calls_to(&func, EVALUATE_TRACE),
            vec![&[Operand::const_int(IntType::I32, 1)][..]]
        );
        assert!(func.blocks[0].instructions.last().unwrap().is_return());
    }

    #[test]
    fn test_main_finalizes_every_return() {
        let tables = MonitorTables {
            automaton: Some(AutomatonEvents::from_reader("m.c:3:7\n".as_bytes()).unwrap()),
            protocol: None,
        };
        let mut func = Function::new(
            "main",
            vec![Param {
                name: "argc".into(),
                ty: Type::Int(IntType::I32),
            }],
            vec![BasicBlock::new(vec![
                Instruction::new(Op::Unreachable).with_loc("m.c", 3),
                Instruction::new(Op::Ret { value: None }),
            ])],
        );
        let mut symbols = SymbolTable::default();
        let mut stats = MonitorStats::default();
        instrument_block(&mut symbols, &mut func, 0, &tables, &mut stats);

        assert_eq!(stats.automaton_events, 1);
        assert_eq!(stats.finalizers, 1);
        assert_eq!(
            calls_to(&func, AUTOMATA_HANDLER),
            vec![&[Operand::Param(0), Operand::const_int(IntType::I32, 7)][..]]
        );
        let insts = &func.blocks[0].instructions;
        let finalize = insts.len() - 2;
        assert_eq!(insts[finalize].called_function(), Some(EVALUATE_TRACE));
        assert!(insts[finalize + 1].is_return());
    }
}
