//! Injection primitives: the [`IrWriter`] seam and the in-tree [`IrBuilder`].

use crate::ir::{
    BinaryOp, Callee, Function, Instruction, IntType, Op, Operand, SymbolTable, Type,
};

/// The primitives the probes are assembled from.
///
/// Implementations insert each new instruction at their current position and
/// advance past it, so consecutive calls produce straight-line code in call
/// order.
pub trait IrWriter {
    /// Declares an external function the probes are going to call.
    fn declare_function(&mut self, name: &str, ret: Type, params: &[Type]);

    /// Calls `callee` with `args`. Returns the call's value unless the
    /// callee is declared `void` (or not declared at all).
    fn insert_call(&mut self, callee: &str, args: Vec<Operand>) -> Option<Operand>;

    /// Loads the value of a global variable.
    fn load_global(&mut self, name: &str, ty: Type) -> Operand;

    /// Stores `value` into a global variable.
    fn store_global(&mut self, name: &str, value: Operand);

    /// Loads a `ty` from `ptr`.
    fn load(&mut self, ty: Type, ptr: Operand) -> Operand;

    /// Stores `value` to `ptr`.
    fn store(&mut self, value: Operand, ptr: Operand);

    /// Integer arithmetic.
    fn binary(&mut self, op: BinaryOp, ty: IntType, lhs: Operand, rhs: Operand) -> Operand;

    /// Zero-extends `value` to `ty`.
    fn zext(&mut self, value: Operand, ty: IntType) -> Operand;

    /// `base + offset` bytes.
    fn gep(&mut self, base: Operand, offset: Operand) -> Operand;

    /// A pointer to a private, NUL-terminated copy of `value`.
    fn global_string(&mut self, value: &str) -> Operand;

    /// While set, every emitted load and store is tagged `nosanitize`.
    fn set_nosanitize(&mut self, nosanitize: bool);

    /// Exclusive or
    fn xor(&mut self, ty: IntType, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinaryOp::Xor, ty, lhs, rhs)
    }

    /// Wrapping addition
    fn add(&mut self, ty: IntType, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinaryOp::Add, ty, lhs, rhs)
    }
}

/// Writes into one block of a [`Function`], declaring symbols in the module's [`SymbolTable`].
#[derive(Debug)]
pub struct IrBuilder<'a> {
    symbols: &'a mut SymbolTable,
    func: &'a mut Function,
    block: usize,
    cursor: usize,
    nosanitize: bool,
}

impl<'a> IrBuilder<'a> {
    /// A builder inserting before instruction `index` of `block`.
    ///
    /// `index` may equal the block length to append.
    #[must_use]
    pub fn new(
        symbols: &'a mut SymbolTable,
        func: &'a mut Function,
        block: usize,
        index: usize,
    ) -> Self {
        let len = func.blocks[block].instructions.len();
        Self {
            symbols,
            func,
            block,
            cursor: index.min(len),
            nosanitize: false,
        }
    }

    /// A builder positioned at the block's first safe insertion point.
    #[must_use]
    pub fn at_first_insertion_point(
        symbols: &'a mut SymbolTable,
        func: &'a mut Function,
        block: usize,
    ) -> Self {
        let index = func.blocks[block].first_insertion_point();
        Self::new(symbols, func, block, index)
    }

    /// A builder positioned right before the block's terminator.
    #[must_use]
    pub fn before_terminator(
        symbols: &'a mut SymbolTable,
        func: &'a mut Function,
        block: usize,
    ) -> Self {
        let bb = &func.blocks[block];
        let index = if bb.terminator().is_some() {
            bb.instructions.len() - 1
        } else {
            bb.instructions.len()
        };
        Self::new(symbols, func, block, index)
    }

    /// Index the next instruction will be inserted at
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The function being written
    #[must_use]
    pub fn function(&self) -> &Function {
        self.func
    }

    fn emit(&mut self, op: Op, defines: bool) -> Option<Operand> {
        let result = defines.then(|| self.func.fresh_value());
        let nosanitize = self.nosanitize && matches!(op, Op::Load { .. } | Op::Store { .. });
        let inst = Instruction {
            result,
            op,
            loc: None,
            nosanitize,
        };
        self.func.blocks[self.block]
            .instructions
            .insert(self.cursor, inst);
        self.cursor += 1;
        result.map(Operand::Value)
    }

    fn emit_value(&mut self, op: Op) -> Operand {
        self.emit(op, true).unwrap_or(Operand::Null)
    }
}

impl IrWriter for IrBuilder<'_> {
    fn declare_function(&mut self, name: &str, ret: Type, params: &[Type]) {
        self.symbols.get_or_insert_function(name, ret, params);
    }

    fn insert_call(&mut self, callee: &str, args: Vec<Operand>) -> Option<Operand> {
        let ret = self
            .symbols
            .declaration(callee)
            .map_or(Type::Void, |decl| decl.ret);
        self.emit(
            Op::Call {
                callee: Callee::Direct(callee.into()),
                ret,
                args,
            },
            ret != Type::Void,
        )
    }

    fn load_global(&mut self, name: &str, ty: Type) -> Operand {
        self.load(ty, Operand::Global(name.into()))
    }

    fn store_global(&mut self, name: &str, value: Operand) {
        self.store(value, Operand::Global(name.into()));
    }

    fn load(&mut self, ty: Type, ptr: Operand) -> Operand {
        self.emit_value(Op::Load { ty, ptr })
    }

    fn store(&mut self, value: Operand, ptr: Operand) {
        self.emit(Op::Store { value, ptr }, false);
    }

    fn binary(&mut self, op: BinaryOp, ty: IntType, lhs: Operand, rhs: Operand) -> Operand {
        self.emit_value(Op::Binary { op, ty, lhs, rhs })
    }

    fn zext(&mut self, value: Operand, ty: IntType) -> Operand {
        self.emit_value(Op::ZExt { value, ty })
    }

    fn gep(&mut self, base: Operand, offset: Operand) -> Operand {
        self.emit_value(Op::Gep { base, offset })
    }

    fn global_string(&mut self, value: &str) -> Operand {
        Operand::Global(self.symbols.global_string(value))
    }

    fn set_nosanitize(&mut self, nosanitize: bool) {
        self.nosanitize = nosanitize;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        builder::{IrBuilder, IrWriter},
        ir::{
            BasicBlock, Function, Instruction, IntType, Op, Operand, SymbolTable, Type, ValueId,
        },
    };

    fn block_with_phi() -> Function {
        Function::new(
            "f",
            vec![],
            vec![BasicBlock::new(vec![
                Instruction::new(Op::Phi {
                    ty: Type::Int(IntType::I32),
                    incoming: vec![],
                })
                .with_result(ValueId(1)),
                Instruction::new(Op::Ret { value: None }),
            ])],
        )
    }

    #[test]
    fn test_inserts_after_phis_in_order() {
        let mut symbols = SymbolTable::default();
        let mut func = block_with_phi();
        {
            let mut irb = IrBuilder::at_first_insertion_point(&mut symbols, &mut func, 0);
            irb.set_nosanitize(true);
            let v = irb.load_global("g", Type::Int(IntType::I32));
            irb.store_global("g", v);
            assert_eq!(irb.cursor(), 3);
        }
        let insts = &func.blocks[0].instructions;
        assert_eq!(insts.len(), 4);
        assert!(matches!(insts[1].op, Op::Load { .. }));
        assert!(matches!(insts[2].op, Op::Store { .. }));
        assert!(insts[1].nosanitize && insts[2].nosanitize);
        assert_eq!(insts[1].result, Some(ValueId(2)));
        assert!(insts[3].is_return());
    }

    #[test]
    fn test_call_result_follows_declaration() {
        let mut symbols = SymbolTable::default();
        let mut func = block_with_phi();
        let mut irb = IrBuilder::before_terminator(&mut symbols, &mut func, 0);
        irb.declare_function("get", Type::Int(IntType::I32), &[Type::Ptr]);
        let s = irb.global_string("a.c:1");
        assert!(irb.insert_call("get", vec![s]).is_some());
        assert!(irb
            .insert_call("undeclared", vec![Operand::const_int(IntType::I32, 0)])
            .is_none());
        assert_eq!(irb.function().blocks[0].instructions.len(), 4);
    }
}
