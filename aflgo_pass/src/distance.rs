//! The distance probe: adds the block's distance to the target to a running
//! sum and bumps a visit counter, both right behind the coverage map.
//!
//! The fuzzer reads `sum / count` after a run as the mean distance of the
//! path the input took. The value added comes from the runtime's
//! `get_distance_to_target`; the table loaded at compile time only decides
//! which blocks get a probe.

use aflgo_bolts::{rands::Rand, region::slot_width};

use crate::{
    abi::{declare_distance_lookup, GET_DISTANCE_TO_TARGET, MAP_SIZE},
    builder::IrWriter,
    ir::{IntType, Operand, Type},
    location::LocationId,
    tables::DistanceTable,
};

/// What a block gets in distance instrumentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceDecision {
    /// Selective mode and the block has no distance: leave it alone entirely
    Skip,
    /// Coverage probe only
    CoverageOnly,
    /// Coverage and distance probes; carries the scaled table distance
    Probe(i64),
}

/// Decides the fate of a block.
///
/// The distance ratio is rolled only for blocks that have a distance, so
/// blocks outside the table never consume a draw.
pub fn decide<R: Rand>(
    distances: &DistanceTable,
    block: Option<&LocationId>,
    selective: bool,
    dinst_ratio: u32,
    rand: &mut R,
) -> DistanceDecision {
    let Some(block) = block else {
        return DistanceDecision::CoverageOnly;
    };
    match distances.get(block) {
        None if selective => DistanceDecision::Skip,
        None => DistanceDecision::CoverageOnly,
        Some(distance) => {
            if rand.percent(dinst_ratio) && distance >= 0 {
                DistanceDecision::Probe(distance)
            } else {
                DistanceDecision::CoverageOnly
            }
        }
    }
}

/// Emits the distance probe for block `bb_name`, right after its coverage
/// probe. `map_ptr` is the region base the coverage probe loaded.
pub fn insert_distance_probe<W: IrWriter>(
    irb: &mut W,
    map_ptr: Operand,
    bb_name: &str,
    pointer_width: u32,
) {
    let slot = IntType::for_pointer_width(pointer_width);

    declare_distance_lookup(irb);
    let name = irb.global_string(bb_name);
    let distance = irb
        .insert_call(GET_DISTANCE_TO_TARGET, vec![name])
        .unwrap_or(Operand::const_int(IntType::I32, 0));

    let dist_ptr = irb.gep(map_ptr.clone(), Operand::const_int(slot, MAP_SIZE as u64));
    let sum = irb.load(Type::Int(slot), dist_ptr.clone());
    let distance = irb.zext(distance, slot);
    let sum = irb.add(slot, sum, distance);
    irb.store(sum, dist_ptr);

    let count_ptr = irb.gep(
        map_ptr,
        Operand::const_int(slot, (MAP_SIZE + slot_width(pointer_width)) as u64),
    );
    let count = irb.load(Type::Int(slot), count_ptr.clone());
    let count = irb.add(slot, count, Operand::const_int(slot, 1));
    irb.store(count, count_ptr);
}

#[cfg(test)]
mod tests {
    use aflgo_bolts::rands::StdRand;

    use crate::{
        builder::{IrBuilder, IrWriter},
        distance::{decide, insert_distance_probe, DistanceDecision},
        ir::{BasicBlock, Function, Instruction, IntType, Op, Operand, SymbolTable, Type},
        location::LocationId,
        tables::DistanceTable,
    };

    #[test]
    fn test_decisions() {
        let table =
            DistanceTable::from_reader("foo.c:10:,0.5\nfoo.c:11,-1\n".as_bytes()).unwrap();
        let mut rand = StdRand::with_seed(1);
        let known = LocationId::new("foo.c", 10);
        let negative = LocationId::new("foo.c", 11);
        let unknown = LocationId::new("foo.c", 12);

        assert_eq!(
            decide(&table, Some(&known), false, 100, &mut rand),
            DistanceDecision::Probe(50)
        );
        assert_eq!(
            decide(&table, Some(&negative), false, 100, &mut rand),
            DistanceDecision::CoverageOnly
        );
        assert_eq!(
            decide(&table, Some(&unknown), false, 100, &mut rand),
            DistanceDecision::CoverageOnly
        );
        assert_eq!(
            decide(&table, Some(&unknown), true, 100, &mut rand),
            DistanceDecision::Skip
        );
        assert_eq!(
            decide(&table, None, true, 100, &mut rand),
            DistanceDecision::CoverageOnly
        );
    }

    #[test]
    fn test_probe_uses_native_slots() {
        for (pointer_width, slot, count_offset) in
            [(64, IntType::I64, 65544), (32, IntType::I32, 65540)]
        {
            let mut symbols = SymbolTable {
                pointer_width,
                ..SymbolTable::default()
            };
            let mut func = Function::new(
                "f",
                vec![],
                vec![BasicBlock::new(vec![Instruction::new(Op::Ret { value: None })])],
            );
            {
                let mut irb = IrBuilder::at_first_insertion_point(&mut symbols, &mut func, 0);
                irb.set_nosanitize(true);
                let map_ptr = Operand::Global("map".into());
                insert_distance_probe(&mut irb, map_ptr, "foo.c:10", pointer_width);
            }
            let insts = &func.blocks[0].instructions;
            assert!(matches!(&insts[0].op, Op::Call { ret: Type::Int(IntType::I32), .. }));
            assert!(insts.iter().any(|i| matches!(
                &i.op,
                Op::Gep { offset: Operand::Const { value, ty }, .. }
                    if *value == count_offset && *ty == slot
            )));
            assert!(insts
                .iter()
                .any(|i| matches!(&i.op, Op::Load { ty: Type::Int(t), .. } if *t == slot)));
            let name = symbols.globals.iter().find_map(|g| symbols.string_value(&g.name));
            assert_eq!(name, Some("foo.c:10"));
        }
    }
}
