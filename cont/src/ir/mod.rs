//! The op-based intermediate representation
//!
//! The parser lowers source text into one flat `Vec<Op>` per program.
//! Every op carries an opcode, an operand whose meaning depends on the
//! opcode, and a source location. Structured control constructs share a
//! `Block` record between their opening and closing ops; the checker
//! writes addresses and stack-effect metadata back into those records
//! for the code generators.

pub mod span;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use span::{Loc, Span};

use crate::types::{StructId, StructTable, Type};

/// Index of a `Block` in [`Program::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// Index of a `Proc` in [`Program::procs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcId(pub usize);

/// Index of a `Memory` in [`Program::memories`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub usize);

/// Index of a `Var` in [`Program::vars`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

/// Opcode tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    PushInt,
    PushStr,
    PushNullStr,
    PushMemory,
    PushLocalMem,
    PushVar,
    PushVarPtr,
    PushBind,
    PushProc,
    If,
    Else,
    EndIf,
    While,
    EndWhile,
    For,
    EndFor,
    Bind,
    Unbind,
    Call,
    CallAddr,
    Proc,
    EndProc,
    Return,
    Operator,
    Syscall,
    PackStruct,
    UnpackStruct,
    MoveStruct,
    PushField,
    PushFieldPtr,
    Upcast,
    AutoInit,
    SizeOf,
    CastPtr,
    CastInt,
    Asm,
    Index,
    IndexPtr,
    Nop,
}

/// Sub-opcodes of [`OpType::Operator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Dup,
    Drop,
    Swap,
    Rot,
    Lt,
    Gt,
    Eq,
    Le,
    Ge,
    Ne,
    Store,
    Load,
    Store8,
    Load8,
    Print,
}

impl Operator {
    /// The struct method name that overloads this operator, if any.
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            Operator::Add => Some("__add__"),
            Operator::Sub => Some("__sub__"),
            Operator::Mul => Some("__mul__"),
            Operator::Div => Some("__div__"),
            Operator::Lt => Some("__lt__"),
            Operator::Gt => Some("__gt__"),
            Operator::Eq => Some("__eq__"),
            Operator::Le => Some("__le__"),
            Operator::Ge => Some("__ge__"),
            Operator::Ne => Some("__ne__"),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "div",
            Operator::Dup => "dup",
            Operator::Drop => "drop",
            Operator::Swap => "swap",
            Operator::Rot => "rot",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Eq => "=",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
            Operator::Store => "!",
            Operator::Load => "@",
            Operator::Store8 => "!8",
            Operator::Load8 => "@8",
            Operator::Print => "print",
        }
    }
}

/// Inline assembly escape: the stack effect is declared, not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsmBlock {
    pub code: String,
    pub in_types: Vec<Type>,
    pub out_types: Vec<Type>,
}

/// Operand of an op; which variant is legal depends on the opcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Int(i64),
    Str(String),
    Block(BlockId),
    Proc(ProcId),
    Struct(StructId),
    Memory(MemoryId),
    Var(VarId),
    Type(Type),
    Operator(Operator),
    Asm(AsmBlock),
}

/// One instruction of the linear IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub typ: OpType,
    pub operand: Operand,
    pub loc: Loc,
}

impl Op {
    pub fn new(typ: OpType, operand: Operand, loc: Loc) -> Self {
        Self { typ, operand, loc }
    }

    /// An op synthesized by the checker during desugaring.
    pub fn generated(typ: OpType, operand: Operand) -> Self {
        Self::new(typ, operand, Loc::generated())
    }

    pub fn operator(op: Operator, loc: Loc) -> Self {
        Self::new(OpType::Operator, Operand::Operator(op), loc)
    }
}

/// Kind of a structured control block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    If,
    While,
    For,
    Proc,
}

/// A structured control construct, shared by its opening and closing ops.
///
/// `start`/`end` are indices into the checked op sequence, assigned by
/// the checker while it emits ops (desugaring shifts addresses, so the
/// parser's indices cannot be trusted). `arm_effects` records the net
/// operand-stack depth change of each arm, which the backends need for
/// stack-pointer adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub typ: BlockType,
    pub start: usize,
    pub end: usize,
    pub arm_effects: Vec<i64>,
}

impl Block {
    pub fn new(typ: BlockType) -> Self {
        Self {
            typ,
            start: 0,
            end: 0,
            arm_effects: Vec::new(),
        }
    }
}

/// A procedure signature, owned by the parser's symbol table.
///
/// `in_stack`/`out_stack` may contain type variables; the checker
/// resolves them per call site and guarantees none survive checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub name: String,
    pub in_stack: Vec<Type>,
    pub out_stack: Vec<Type>,
    /// Set when this proc is a struct method
    pub owner: Option<StructId>,
}

impl Proc {
    pub fn new(name: impl Into<String>, in_stack: Vec<Type>, out_stack: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            in_stack,
            out_stack,
            owner: None,
        }
    }
}

/// A named static memory region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub name: String,
    pub size: usize,
}

/// A typed global variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
    pub typ: Type,
}

/// A whole program as handed over by the parser.
///
/// The symbol tables are populated before checking begins and are
/// read-only during the pass, except for the block write-backs and the
/// checker-owned `runtime_locs` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub ops: Vec<Op>,
    pub blocks: Vec<Block>,
    pub procs: Vec<Proc>,
    pub memories: Vec<Memory>,
    pub vars: Vec<Var>,
    pub structs: StructTable,
    /// Source locations referenced by runtime guard stubs, appended
    /// monotonically by the checker when guards are enabled.
    pub runtime_locs: Vec<String>,
    /// Proc name -> id, for allocator lookup and diagnostics
    pub proc_names: HashMap<String, ProcId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() - 1)
    }

    pub fn add_proc(&mut self, proc: Proc) -> ProcId {
        let id = ProcId(self.procs.len());
        self.proc_names.insert(proc.name.clone(), id);
        self.procs.push(proc);
        id
    }

    pub fn add_memory(&mut self, memory: Memory) -> MemoryId {
        self.memories.push(memory);
        MemoryId(self.memories.len() - 1)
    }

    pub fn add_var(&mut self, var: Var) -> VarId {
        self.vars.push(var);
        VarId(self.vars.len() - 1)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn proc(&self, id: ProcId) -> &Proc {
        &self.procs[id.0]
    }

    pub fn lookup_proc(&self, name: &str) -> Option<ProcId> {
        self.proc_names.get(name).copied()
    }
}

/// Render the op list as JSON for `--dump`-style debugging.
pub fn dump_ops(program: &Program) -> String {
    serde_json::to_string_pretty(&program.ops).unwrap_or_else(|e| format!("<dump failed: {e}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_dunder_names() {
        assert_eq!(Operator::Add.dunder(), Some("__add__"));
        assert_eq!(Operator::Ne.dunder(), Some("__ne__"));
        assert_eq!(Operator::Dup.dunder(), None);
        assert_eq!(Operator::Store.dunder(), None);
    }

    #[test]
    fn test_program_proc_lookup() {
        let mut program = Program::new();
        let id = program.add_proc(Proc::new("main", vec![], vec![]));
        assert_eq!(program.lookup_proc("main"), Some(id));
        assert_eq!(program.lookup_proc("missing"), None);
    }

    #[test]
    fn test_block_arena() {
        let mut program = Program::new();
        let id = program.add_block(Block::new(BlockType::If));
        program.block_mut(id).start = 3;
        program.block_mut(id).end = 9;
        assert_eq!(program.block(id).start, 3);
        assert_eq!(program.block(id).end, 9);
    }

    #[test]
    fn test_asm_block_compares_by_content() {
        let a = AsmBlock {
            code: "pop rax".to_string(),
            in_types: vec![Type::Int],
            out_types: vec![Type::ptr_any()],
        };
        assert_eq!(a, a.clone());
        let mut b = a.clone();
        b.out_types = vec![Type::Int];
        assert_ne!(a, b);
    }

    #[test]
    fn test_dump_ops_is_json() {
        let mut program = Program::new();
        program.ops.push(Op::generated(OpType::PushInt, Operand::Int(42)));
        let dump = dump_ops(&program);
        assert!(dump.contains("PushInt"));
        assert!(dump.contains("42"));
    }
}
