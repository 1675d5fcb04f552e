//! A small SSA-style module representation the pass reads and rewrites.
//!
//! It mirrors the parts of a compiler IR the instrumentation cares about:
//! functions made of basic blocks, instructions with optional debug
//! locations, direct calls, terminators and the handful of memory and integer
//! operations the probes are built from. Everything else is carried through
//! untouched as [`Op::Other`].

use aflgo_bolts::Error;
use serde::{Deserialize, Serialize};

/// Integer types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntType {
    /// 1-bit boolean
    I1,
    /// 8-bit
    I8,
    /// 16-bit
    I16,
    /// 32-bit
    I32,
    /// 64-bit
    I64,
}

impl IntType {
    /// Width in bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            IntType::I1 => 1,
            IntType::I8 => 8,
            IntType::I16 => 16,
            IntType::I32 => 32,
            IntType::I64 => 64,
        }
    }

    /// Storage size in bytes
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            IntType::I1 | IntType::I8 => 1,
            IntType::I16 => 2,
            IntType::I32 => 4,
            IntType::I64 => 8,
        }
    }

    /// Mask selecting the bits of a value of this type
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            IntType::I64 => u64::MAX,
            _ => (1 << self.bits()) - 1,
        }
    }

    /// The largest integer type the target loads and stores natively.
    #[must_use]
    pub const fn for_pointer_width(pointer_width: u32) -> Self {
        if pointer_width == 64 {
            IntType::I64
        } else {
            IntType::I32
        }
    }
}

/// First-class types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No value
    Void,
    /// An integer
    Int(IntType),
    /// An opaque pointer
    Ptr,
}

/// Identifies the value an instruction defines, unique within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// An instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// The result of another instruction
    Value(ValueId),
    /// An integer constant
    Const {
        /// Its type
        ty: IntType,
        /// Its value, zero-extended
        value: u64,
    },
    /// The address of a global variable
    Global(String),
    /// A parameter of the enclosing function, by position
    Param(u32),
    /// The null pointer
    Null,
}

impl Operand {
    /// An integer constant, truncated to `ty`
    #[must_use]
    pub fn const_int(ty: IntType, value: u64) -> Self {
        Operand::Const {
            ty,
            value: value & ty.mask(),
        }
    }
}

/// A source location attached to an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugLoc {
    /// The file, as recorded by the frontend (may carry directories)
    pub file: String,
    /// 1-based line, 0 when unknown
    pub line: u32,
}

impl DebugLoc {
    /// A new location
    #[must_use]
    pub fn new<S: Into<String>>(file: S, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// Two-operand integer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Wrapping addition
    Add,
    /// Exclusive or
    Xor,
}

/// The target of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    /// A statically known function
    Direct(String),
    /// A function pointer
    Indirect(Operand),
}

/// Operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// SSA merge, always at the head of a block
    Phi {
        /// Result type
        ty: Type,
        /// `(value, predecessor block index)` pairs
        incoming: Vec<(Operand, usize)>,
    },
    /// Exception landing pad, always at the head of a block
    LandingPad,
    /// Memory load
    Load {
        /// Loaded type
        ty: Type,
        /// Address
        ptr: Operand,
    },
    /// Memory store
    Store {
        /// Stored value
        value: Operand,
        /// Address
        ptr: Operand,
    },
    /// Integer arithmetic
    Binary {
        /// Which operation
        op: BinaryOp,
        /// Operand and result type
        ty: IntType,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Zero extension
    ZExt {
        /// Extended value
        value: Operand,
        /// Result type
        ty: IntType,
    },
    /// Byte-offset pointer arithmetic
    Gep {
        /// Base pointer
        base: Operand,
        /// Offset in bytes
        offset: Operand,
    },
    /// Function call
    Call {
        /// Callee
        callee: Callee,
        /// Return type
        ret: Type,
        /// Arguments
        args: Vec<Operand>,
    },
    /// Unconditional branch
    Br {
        /// Destination block index
        dest: usize,
    },
    /// Two-way branch
    CondBr {
        /// Condition
        cond: Operand,
        /// Taken when `cond` is true
        then_dest: usize,
        /// Taken otherwise
        else_dest: usize,
    },
    /// Multi-way branch
    Switch {
        /// Scrutinee
        cond: Operand,
        /// Fallback block index
        default: usize,
        /// `(case value, block index)` pairs
        cases: Vec<(u64, usize)>,
    },
    /// Function return
    Ret {
        /// Returned value
        value: Option<Operand>,
    },
    /// Unreachable code
    Unreachable,
    /// Anything the pass has no business looking into
    Other {
        /// Opcode name
        opcode: String,
        /// Operands
        operands: Vec<Operand>,
    },
}

impl Op {
    /// Whether this operation ends a block
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Br { .. } | Op::CondBr { .. } | Op::Switch { .. } | Op::Ret { .. } | Op::Unreachable
        )
    }

    /// Successor block indices, in branch order and without duplicates
    #[must_use]
    pub fn successors(&self) -> Vec<usize> {
        let mut succs = match self {
            Op::Br { dest } => vec![*dest],
            Op::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            Op::Switch { default, cases, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|(_, dest)| *dest));
                succs
            }
            _ => vec![],
        };
        let mut seen = Vec::with_capacity(succs.len());
        succs.retain(|s| {
            if seen.contains(s) {
                false
            } else {
                seen.push(*s);
                true
            }
        });
        succs
    }
}

/// An instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// The value this instruction defines, if any
    #[serde(default)]
    pub result: Option<ValueId>,
    /// What it does
    pub op: Op,
    /// Where it came from
    #[serde(default)]
    pub loc: Option<DebugLoc>,
    /// Set on probe memory accesses that sanitizers must leave alone
    #[serde(default)]
    pub nosanitize: bool,
}

impl Instruction {
    /// A new instruction without result or location
    #[must_use]
    pub fn new(op: Op) -> Self {
        Self {
            result: None,
            op,
            loc: None,
            nosanitize: false,
        }
    }

    /// Attaches a debug location
    #[must_use]
    pub fn with_loc<S: Into<String>>(mut self, file: S, line: u32) -> Self {
        self.loc = Some(DebugLoc::new(file, line));
        self
    }

    /// Sets the defined value
    #[must_use]
    pub fn with_result(mut self, id: ValueId) -> Self {
        self.result = Some(id);
        self
    }

    /// The name of the statically known callee, if this is a direct call
    #[must_use]
    pub fn called_function(&self) -> Option<&str> {
        match &self.op {
            Op::Call {
                callee: Callee::Direct(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    /// Whether this is a call, direct or not
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.op, Op::Call { .. })
    }

    /// Whether this is a return
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self.op, Op::Ret { .. })
    }

    /// Whether new code may be placed right before this instruction
    #[must_use]
    pub fn is_insertion_point(&self) -> bool {
        !matches!(self.op, Op::Phi { .. } | Op::LandingPad)
    }
}

/// A basic block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Block label; preprocessing overwrites it with `file:line:`
    #[serde(default)]
    pub name: Option<String>,
    /// The instructions, terminator last
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// A new, unnamed block
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            name: None,
            instructions,
        }
    }

    /// Index of the first instruction code may be inserted before.
    ///
    /// Skips the leading phi nodes and landing pads. Equals the block length
    /// for a block made only of those.
    #[must_use]
    pub fn first_insertion_point(&self) -> usize {
        self.instructions
            .iter()
            .position(Instruction::is_insertion_point)
            .unwrap_or(self.instructions.len())
    }

    /// The terminator, if the block is well formed
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.op.is_terminator())
    }

    /// Successor block indices
    #[must_use]
    pub fn successors(&self) -> Vec<usize> {
        self.terminator()
            .map(|term| term.op.successors())
            .unwrap_or_default()
    }
}

/// A formal parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Source name, may be empty
    #[serde(default)]
    pub name: String,
    /// Type
    pub ty: Type,
}

/// A function; one without blocks is a declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name
    pub name: String,
    /// Formal parameters
    #[serde(default)]
    pub params: Vec<Param>,
    /// Body, entry block first
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
    #[serde(skip)]
    next_value: u32,
}

impl Function {
    /// A new function
    #[must_use]
    pub fn new<S: Into<String>>(name: S, params: Vec<Param>, blocks: Vec<BasicBlock>) -> Self {
        Self {
            name: name.into(),
            params,
            blocks,
            next_value: 0,
        }
    }

    /// Whether this function has no body
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Hands out a value id not used anywhere in this function yet.
    pub fn fresh_value(&mut self) -> ValueId {
        if self.next_value == 0 {
            self.next_value = self
                .blocks
                .iter()
                .flat_map(|bb| bb.instructions.iter())
                .filter_map(|i| i.result)
                .map(|ValueId(id)| id + 1)
                .max()
                .unwrap_or(0)
                .max(1);
        }
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }
}

/// Linkage of a global symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Resolved at link time, possibly in another module or the runtime
    #[default]
    External,
    /// Local to this module
    Private,
}

/// Initial value of a global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    /// A NUL-terminated string
    Str(String),
    /// An integer
    Int(u64),
}

/// A global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    /// Symbol name
    pub name: String,
    /// Type of the stored value
    pub ty: Type,
    /// Whether each thread gets its own copy
    #[serde(default)]
    pub thread_local: bool,
    /// Linkage
    #[serde(default)]
    pub linkage: Linkage,
    /// Initial value, `None` for external definitions
    #[serde(default)]
    pub initializer: Option<Initializer>,
}

/// A function the module calls but does not define
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Symbol name
    pub name: String,
    /// Return type
    pub ret: Type,
    /// Parameter types
    pub params: Vec<Type>,
}

fn default_pointer_width() -> u32 {
    64
}

/// Module-level symbols: target info, globals and external declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    /// Pointer width of the compilation target, in bits
    #[serde(default = "default_pointer_width")]
    pub pointer_width: u32,
    /// Global variables
    #[serde(default)]
    pub globals: Vec<GlobalVariable>,
    /// External function declarations
    #[serde(default)]
    pub declarations: Vec<FunctionDecl>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            pointer_width: default_pointer_width(),
            globals: vec![],
            declarations: vec![],
        }
    }
}

impl SymbolTable {
    /// Looks a global variable up by name
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Looks a function declaration up by name
    #[must_use]
    pub fn declaration(&self, name: &str) -> Option<&FunctionDecl> {
        self.declarations.iter().find(|d| d.name == name)
    }

    /// Declares an external global unless one of that name exists already.
    pub fn get_or_insert_global(&mut self, name: &str, ty: Type, thread_local: bool) {
        if self.global(name).is_none() {
            self.globals.push(GlobalVariable {
                name: name.into(),
                ty,
                thread_local,
                linkage: Linkage::External,
                initializer: None,
            });
        }
    }

    /// Declares an external function unless one of that name exists already.
    pub fn get_or_insert_function(&mut self, name: &str, ret: Type, params: &[Type]) {
        if self.declaration(name).is_none() {
            self.declarations.push(FunctionDecl {
                name: name.into(),
                ret,
                params: params.to_vec(),
            });
        }
    }

    /// Interns a private string constant and returns its symbol name.
    pub fn global_string(&mut self, value: &str) -> String {
        if let Some(existing) = self.globals.iter().find(|g| {
            g.linkage == Linkage::Private
                && matches!(&g.initializer, Some(Initializer::Str(s)) if s == value)
        }) {
            return existing.name.clone();
        }
        let name = format!(".str.aflgo.{}", self.globals.len());
        self.globals.push(GlobalVariable {
            name: name.clone(),
            ty: Type::Ptr,
            thread_local: false,
            linkage: Linkage::Private,
            initializer: Some(Initializer::Str(value.into())),
        });
        name
    }

    /// The string a private string constant was created with
    #[must_use]
    pub fn string_value(&self, name: &str) -> Option<&str> {
        match &self.global(name)?.initializer {
            Some(Initializer::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// One compiled translation unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier, usually the source file
    pub name: String,
    /// Globals, declarations and target info
    #[serde(default)]
    pub symbols: SymbolTable,
    /// Defined functions
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Module {
    /// A new, empty module for a 64-bit target
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            symbols: SymbolTable::default(),
            functions: vec![],
        }
    }

    /// Looks a defined function up by name
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Parses a module from its json form
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes this module to json
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
