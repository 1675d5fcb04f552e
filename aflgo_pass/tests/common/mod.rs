#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use aflgo_pass::{
    ir::{BasicBlock, Callee, Function, Instruction, Op, Type},
    EnvConfig, Module,
};

/// A block whose instructions are all located at `file:line`
pub fn located_block(file: &str, line: u32, terminator: Op) -> BasicBlock {
    BasicBlock::new(vec![
        Instruction::new(Op::Other {
            opcode: "add".into(),
            operands: vec![],
        })
        .with_loc(file, line),
        Instruction::new(terminator).with_loc(file, line),
    ])
}

/// A block without any debug location
pub fn unlocated_block(terminator: Op) -> BasicBlock {
    BasicBlock::new(vec![Instruction::new(terminator)])
}

/// A direct call to `callee` at `file:line`
pub fn call_at(callee: &str, file: &str, line: u32) -> Instruction {
    Instruction::new(Op::Call {
        callee: Callee::Direct(callee.into()),
        ret: Type::Void,
        args: vec![],
    })
    .with_loc(file, line)
}

pub fn ret() -> Op {
    Op::Ret { value: None }
}

pub fn br(dest: usize) -> Op {
    Op::Br { dest }
}

pub fn module(functions: Vec<Function>) -> Module {
    let mut module = Module::new("test.c");
    module.functions = functions;
    module
}

/// A long straight-line function, one located block per line
pub fn chain(name: &str, file: &str, blocks: usize) -> Function {
    let blocks = (0..blocks)
        .map(|idx| {
            let terminator = if idx + 1 == blocks { ret() } else { br(idx + 1) };
            located_block(file, idx as u32 + 1, terminator)
        })
        .collect();
    Function::new(name, vec![], blocks)
}

pub fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

pub fn quiet_env() -> EnvConfig {
    EnvConfig {
        quiet: true,
        ..EnvConfig::default()
    }
}
