//! Symbols shared with the fuzzing runtime the probes call into.

use crate::{
    builder::IrWriter,
    ir::{IntType, SymbolTable, Type},
};

pub use aflgo_bolts::region::{MAP_SIZE, MAP_SIZE_POW2};

/// Pointer to the shared region, mapped by the runtime at startup
pub const AFL_AREA_PTR: &str = "__afl_area_ptr";
/// Thread-local previous location of the edge hash
pub const AFL_PREV_LOC: &str = "__afl_prev_loc";

/// `i32 get_distance_to_target(i8 *bb_name)`
pub const GET_DISTANCE_TO_TARGET: &str = "get_distance_to_target";
/// `void llvm_profiling_call(i8 *bb_name)`
pub const LLVM_PROFILING_CALL: &str = "llvm_profiling_call";

/// `void automata_handler(i32 input, i32 output)`
pub const AUTOMATA_HANDLER: &str = "automata_handler";
/// `void proposition_handler(i8 *prop)`
pub const PROPOSITION_HANDLER: &str = "proposition_handler";
/// `void store_global_variables()`
pub const STORE_GLOBAL_VARIABLES: &str = "store_global_variables";
/// `void store_local_variables()`
pub const STORE_LOCAL_VARIABLES: &str = "store_local_variables";
/// `void state_handler(i32 *global_vec, i32 *global_size_vec, i32 gsize, i32 *local_vec, i32 lsize)`
pub const STATE_HANDLER: &str = "state_handler";
/// `void evaluate_trace(i32 flag)`
pub const EVALUATE_TRACE: &str = "evaluate_trace";

/// Captured global values
pub const LTL_GLOBAL_VEC: &str = "__ltl_global_vec";
/// Sizes of the captured globals
pub const LTL_GLOBAL_SIZE_VEC: &str = "__ltl_global_size_vec";
/// Number of captured globals
pub const LTL_GLOBAL_COUNT: &str = "__ltl_global_count";
/// Captured local values
pub const LTL_LOCAL_VEC: &str = "__ltl_local_vec";
/// Number of captured locals
pub const LTL_LOCAL_COUNT: &str = "__ltl_local_count";

/// `evaluate_trace` flag: the program is exiting, check the whole trace
pub const TRACE_FINALIZE: u64 = 0;
/// `evaluate_trace` flag: check what was seen so far
pub const TRACE_CONTINUE: u64 = 1;

const I32: Type = Type::Int(IntType::I32);

/// Declares the globals the coverage and distance probes touch.
pub fn declare_coverage_globals(symbols: &mut SymbolTable) {
    symbols.get_or_insert_global(AFL_AREA_PTR, Type::Ptr, false);
    symbols.get_or_insert_global(AFL_PREV_LOC, I32, true);
}

/// Declares `get_distance_to_target`.
pub fn declare_distance_lookup<W: IrWriter>(irb: &mut W) {
    irb.declare_function(GET_DISTANCE_TO_TARGET, I32, &[Type::Ptr]);
}

/// Declares the monitor runtime and the state vectors it fills.
pub fn declare_monitor_runtime<W: IrWriter>(irb: &mut W) {
    irb.declare_function(AUTOMATA_HANDLER, Type::Void, &[I32, I32]);
    irb.declare_function(PROPOSITION_HANDLER, Type::Void, &[Type::Ptr]);
    irb.declare_function(STORE_GLOBAL_VARIABLES, Type::Void, &[]);
    irb.declare_function(STORE_LOCAL_VARIABLES, Type::Void, &[]);
    irb.declare_function(
        STATE_HANDLER,
        Type::Void,
        &[Type::Ptr, Type::Ptr, I32, Type::Ptr, I32],
    );
    irb.declare_function(EVALUATE_TRACE, Type::Void, &[I32]);
}

/// Declares the monitor's state vector globals.
pub fn declare_monitor_globals(symbols: &mut SymbolTable) {
    symbols.get_or_insert_global(LTL_GLOBAL_VEC, Type::Ptr, false);
    symbols.get_or_insert_global(LTL_GLOBAL_SIZE_VEC, Type::Ptr, false);
    symbols.get_or_insert_global(LTL_GLOBAL_COUNT, I32, false);
    symbols.get_or_insert_global(LTL_LOCAL_VEC, Type::Ptr, false);
    symbols.get_or_insert_global(LTL_LOCAL_COUNT, I32, false);
}
