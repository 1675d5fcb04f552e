//! The AFL edge coverage probe.
//!
//! ```text
//! map[prev_loc ^ cur_loc]++;
//! prev_loc = cur_loc >> 1;
//! ```
//!
//! `cur_loc` is a random constant per site. Collisions between sites are
//! accepted; the shift keeps `A -> B` apart from `B -> A` and from `A -> A`.

use aflgo_bolts::rands::Rand;

use crate::{
    abi::{AFL_AREA_PTR, AFL_PREV_LOC, MAP_SIZE},
    builder::IrWriter,
    ir::{IntType, Operand, Type},
};

/// Draws the location constant of a new site.
#[allow(clippy::cast_possible_truncation)]
pub fn draw_cur_loc<R: Rand>(rand: &mut R) -> u32 {
    rand.below(MAP_SIZE as u64) as u32
}

/// Emits the coverage probe for a site with constant `cur_loc`.
///
/// Returns the loaded base pointer of the shared region so the distance
/// probe can reuse it. The caller decides whether loads and stores are
/// marked `nosanitize`.
pub fn insert_coverage_probe<W: IrWriter>(irb: &mut W, cur_loc: u32) -> Operand {
    let cur = Operand::const_int(IntType::I32, u64::from(cur_loc));

    let prev_loc = irb.load_global(AFL_PREV_LOC, Type::Int(IntType::I32));
    let prev_loc = irb.zext(prev_loc, IntType::I32);

    let map_ptr = irb.load_global(AFL_AREA_PTR, Type::Ptr);
    let index = irb.xor(IntType::I32, prev_loc, cur);
    let counter_ptr = irb.gep(map_ptr.clone(), index);

    let counter = irb.load(Type::Int(IntType::I8), counter_ptr.clone());
    let incr = irb.add(IntType::I8, counter, Operand::const_int(IntType::I8, 1));
    irb.store(incr, counter_ptr);

    irb.store_global(
        AFL_PREV_LOC,
        Operand::const_int(IntType::I32, u64::from(cur_loc >> 1)),
    );

    map_ptr
}
