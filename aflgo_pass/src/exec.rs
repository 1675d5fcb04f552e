//! Runs the probes of instrumented blocks against a [`SharedRegion`].
//!
//! This models what the injected code does at run time: the edge counters,
//! the previous location, the distance slots and the calls into the
//! monitor runtime. Instructions that read anything the probes do not own
//! (parameters, program memory, results of program calls) are ignored, and
//! so is everything depending on them.

use aflgo_bolts::{region::SharedRegion, Error};
use hashbrown::HashMap;

use crate::{
    abi::{
        AFL_AREA_PTR, AFL_PREV_LOC, AUTOMATA_HANDLER, EVALUATE_TRACE, GET_DISTANCE_TO_TARGET,
        LLVM_PROFILING_CALL, PROPOSITION_HANDLER, STATE_HANDLER, STORE_GLOBAL_VARIABLES,
        STORE_LOCAL_VARIABLES,
    },
    ir::{BasicBlock, BinaryOp, Callee, Function, IntType, Op, Operand, SymbolTable, Type, ValueId},
};

/// The runtime the probes call into.
///
/// Only the distance lookup has to be provided, the monitor callbacks
/// default to doing nothing.
pub trait RuntimeServices {
    /// `get_distance_to_target(bb_name)`
    fn distance_to_target(&mut self, bb_name: &str) -> i32;

    /// `automata_handler(input, output)`
    fn automata_handler(&mut self, _input: i32, _output: i32) {}

    /// `proposition_handler(prop)`
    fn proposition_handler(&mut self, _prop: &str) {}

    /// `store_global_variables()`
    fn store_global_variables(&mut self) {}

    /// `store_local_variables()`
    fn store_local_variables(&mut self) {}

    /// `state_handler(...)`
    fn state_handler(&mut self) {}

    /// `evaluate_trace(flag)`
    fn evaluate_trace(&mut self, _flag: i32) {}

    /// `llvm_profiling_call(bb_name)`
    fn profiling_call(&mut self, _bb_name: &str) {}
}

/// A run-time value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtValue {
    /// An integer, zero-extended
    Int {
        /// Its type, which is also the width it is stored with
        ty: IntType,
        /// Its value
        value: u64,
    },
    /// A byte offset into the shared region
    Region(usize),
    /// The address of a global the probes do not own
    Global(String),
}

impl RtValue {
    fn int(ty: IntType, value: u64) -> Self {
        RtValue::Int {
            ty,
            value: value & ty.mask(),
        }
    }
}

/// Executes probe code for one thread of an instrumented process.
#[derive(Debug)]
pub struct ProbeExecutor {
    region: SharedRegion,
    prev_loc: u32,
}

impl ProbeExecutor {
    /// An executor for a fresh process with the given target pointer width
    #[must_use]
    pub fn new(pointer_width: u32) -> Self {
        Self {
            region: SharedRegion::new(pointer_width),
            prev_loc: 0,
        }
    }

    /// The shared region
    #[must_use]
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// The shared region, mutable
    pub fn region_mut(&mut self) -> &mut SharedRegion {
        &mut self.region
    }

    /// Current value of `__afl_prev_loc`
    #[must_use]
    pub fn prev_loc(&self) -> u32 {
        self.prev_loc
    }

    /// Starts a new run: clears the region and the previous location.
    pub fn reset(&mut self) {
        self.region.reset();
        self.prev_loc = 0;
    }

    /// Runs the blocks of `func` at `path`, in order.
    pub fn execute_path<S: RuntimeServices>(
        &mut self,
        symbols: &SymbolTable,
        func: &Function,
        path: &[usize],
        services: &mut S,
    ) -> Result<(), Error> {
        for &block in path {
            let bb = func.blocks.get(block).ok_or_else(|| {
                Error::key_not_found(format!("{} has no block {block}", func.name))
            })?;
            self.execute_block(symbols, bb, services)?;
        }
        Ok(())
    }

    /// Runs the probes of one block.
    pub fn execute_block<S: RuntimeServices>(
        &mut self,
        symbols: &SymbolTable,
        bb: &BasicBlock,
        services: &mut S,
    ) -> Result<(), Error> {
        let mut values: HashMap<ValueId, RtValue> = HashMap::new();
        for inst in &bb.instructions {
            let result = self.step(symbols, &inst.op, &values, services)?;
            if let (Some(id), Some(value)) = (inst.result, result) {
                values.insert(id, value);
            }
        }
        Ok(())
    }

    fn step<S: RuntimeServices>(
        &mut self,
        symbols: &SymbolTable,
        op: &Op,
        values: &HashMap<ValueId, RtValue>,
        services: &mut S,
    ) -> Result<Option<RtValue>, Error> {
        let resolve = |operand: &Operand| -> Option<RtValue> {
            match operand {
                Operand::Value(id) => values.get(id).cloned(),
                Operand::Const { ty, value } => Some(RtValue::int(*ty, *value)),
                Operand::Global(name) => Some(RtValue::Global(name.clone())),
                Operand::Param(_) | Operand::Null => None,
            }
        };

        Ok(match op {
            Op::Load { ty, ptr } => match (ty, resolve(ptr)) {
                (_, Some(RtValue::Global(name))) if name == AFL_AREA_PTR => {
                    Some(RtValue::Region(0))
                }
                (Type::Int(ty), Some(RtValue::Global(name))) if name == AFL_PREV_LOC => {
                    Some(RtValue::int(*ty, u64::from(self.prev_loc)))
                }
                (Type::Int(ty), Some(RtValue::Global(_))) => Some(RtValue::int(*ty, 0)),
                (Type::Int(ty), Some(RtValue::Region(offset))) => {
                    let value = self.region.read(offset, ty.bytes()).ok_or_else(|| {
                        Error::illegal_state(format!(
                            "Load of {ty:?} at {offset} is out of the region"
                        ))
                    })?;
                    Some(RtValue::int(*ty, value))
                }
                _ => None,
            },
            Op::Store { value, ptr } => {
                match (resolve(value), resolve(ptr)) {
                    (Some(RtValue::Int { value, .. }), Some(RtValue::Global(name)))
                        if name == AFL_PREV_LOC =>
                    {
                        self.prev_loc = (value & IntType::I32.mask()) as u32;
                    }
                    (Some(RtValue::Int { ty, value }), Some(RtValue::Region(offset))) => {
                        if !self.region.write(offset, ty.bytes(), value) {
                            return Err(Error::illegal_state(format!(
                                "Store of {ty:?} at {offset} is out of the region"
                            )));
                        }
                    }
                    _ => {}
                }
                None
            }
            Op::Binary { op, ty, lhs, rhs } => match (resolve(lhs), resolve(rhs)) {
                (Some(RtValue::Int { value: lhs, .. }), Some(RtValue::Int { value: rhs, .. })) => {
                    Some(RtValue::int(
                        *ty,
                        match op {
                            BinaryOp::Add => lhs.wrapping_add(rhs),
                            BinaryOp::Xor => lhs ^ rhs,
                        },
                    ))
                }
                _ => None,
            },
            Op::ZExt { value, ty } => match resolve(value) {
                Some(RtValue::Int { value, .. }) => Some(RtValue::int(*ty, value)),
                _ => None,
            },
            Op::Gep { base, offset } => match (resolve(base), resolve(offset)) {
                (Some(RtValue::Region(base)), Some(RtValue::Int { value: offset, .. })) => {
                    usize::try_from(offset)
                        .ok()
                        .and_then(|offset| base.checked_add(offset))
                        .map(RtValue::Region)
                }
                _ => None,
            },
            Op::Call {
                callee: Callee::Direct(name),
                args,
                ..
            } => {
                let args: Vec<Option<RtValue>> = args.iter().map(resolve).collect();
                Self::call(symbols, name, &args, services)
            }
            _ => None,
        })
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn call<S: RuntimeServices>(
        symbols: &SymbolTable,
        name: &str,
        args: &[Option<RtValue>],
        services: &mut S,
    ) -> Option<RtValue> {
        let string_arg = |idx: usize| match args.get(idx) {
            Some(Some(RtValue::Global(global))) => symbols.string_value(global),
            _ => None,
        };
        let int_arg = |idx: usize| match args.get(idx) {
            Some(Some(RtValue::Int { value, .. })) => Some(*value as u32 as i32),
            _ => None,
        };

        match name {
            GET_DISTANCE_TO_TARGET => {
                let distance = services.distance_to_target(string_arg(0)?);
                Some(RtValue::int(IntType::I32, u64::from(distance as u32)))
            }
            AUTOMATA_HANDLER => {
                // The input is whatever the function got, unknown here
                services.automata_handler(int_arg(0).unwrap_or(0), int_arg(1)?);
                None
            }
            PROPOSITION_HANDLER => {
                services.proposition_handler(string_arg(0)?);
                None
            }
            STORE_GLOBAL_VARIABLES => {
                services.store_global_variables();
                None
            }
            STORE_LOCAL_VARIABLES => {
                services.store_local_variables();
                None
            }
            STATE_HANDLER => {
                services.state_handler();
                None
            }
            EVALUATE_TRACE => {
                services.evaluate_trace(int_arg(0)?);
                None
            }
            LLVM_PROFILING_CALL => {
                services.profiling_call(string_arg(0)?);
                None
            }
            _ => None,
        }
    }
}

/// The `cur_loc` constant of the coverage probe in `bb`, if it has one.
#[must_use]
pub fn cur_loc_of(bb: &BasicBlock) -> Option<u32> {
    bb.instructions.iter().find_map(|inst| match &inst.op {
        Op::Binary {
            op: BinaryOp::Xor,
            ty: IntType::I32,
            rhs: Operand::Const { value, .. },
            ..
        } => u32::try_from(*value).ok(),
        _ => None,
    })
}
