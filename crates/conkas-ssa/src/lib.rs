// SPDX-License-Identifier: AGPL-3.0

//! The SSA control-flow graph the executor consumes.
//!
//! An external lifter turns raw runtime bytecode into this shape: a set of
//! functions, each a set of basic blocks holding SSA instructions whose
//! operands are either concrete constants or SSA register references.
//! Blocks carry a fallthrough edge and explicit jump edges; functions are
//! connected by the synthetic `InternalCall`/`ConditionalInternalCall`
//! instructions. Blocks and functions live in arenas and are addressed by
//! id, so back edges never create ownership cycles.

use num_bigint::BigUint;
use std::fmt;

/// Handle of a basic block in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Handle of a function in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

/// A stack operand: a concrete literal or a reference to an SSA register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Concrete(BigUint),
    Ssa(usize),
}

impl StackValue {
    pub fn concrete(value: u64) -> Self {
        Self::Concrete(BigUint::from(value))
    }

    /// The SSA index when this operand is a register reference.
    pub fn ssa_index(&self) -> Option<usize> {
        match self {
            Self::Ssa(idx) => Some(*idx),
            Self::Concrete(_) => None,
        }
    }

    /// Sort key used by PHI resolution: register index for references,
    /// the literal value for constants.
    pub fn phi_key(&self) -> BigUint {
        match self {
            Self::Concrete(v) => v.clone(),
            Self::Ssa(idx) => BigUint::from(*idx),
        }
    }
}

/// Instruction mnemonics, including the lifter's synthetic operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    SDiv,
    Mod,
    SMod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    Sha3,
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ExtCodeCopy,
    ReturnDataSize,
    ReturnDataCopy,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    Difficulty,
    GasLimit,
    ChainId,
    SelfBalance,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    Pc,
    MSize,
    Gas,
    JumpDest,
    Push,
    Log0,
    Log1,
    Log2,
    Log3,
    Log4,
    Create,
    Call,
    CallCode,
    Return,
    DelegateCall,
    Create2,
    StaticCall,
    Revert,
    Invalid,
    SelfDestruct,
    /// Unconditional transfer into another function's entry block.
    InternalCall(FuncId),
    /// Conditional transfer into another function's entry block.
    ConditionalInternalCall(FuncId),
    /// SSA merge of values flowing in from different predecessors.
    Phi,
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Stop => "STOP",
            Opcode::Add => "ADD",
            Opcode::Mul => "MUL",
            Opcode::Sub => "SUB",
            Opcode::Div => "DIV",
            Opcode::SDiv => "SDIV",
            Opcode::Mod => "MOD",
            Opcode::SMod => "SMOD",
            Opcode::AddMod => "ADDMOD",
            Opcode::MulMod => "MULMOD",
            Opcode::Exp => "EXP",
            Opcode::SignExtend => "SIGNEXTEND",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Slt => "SLT",
            Opcode::Sgt => "SGT",
            Opcode::Eq => "EQ",
            Opcode::IsZero => "ISZERO",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Not => "NOT",
            Opcode::Byte => "BYTE",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Sar => "SAR",
            Opcode::Sha3 => "SHA3",
            Opcode::Address => "ADDRESS",
            Opcode::Balance => "BALANCE",
            Opcode::Origin => "ORIGIN",
            Opcode::Caller => "CALLER",
            Opcode::CallValue => "CALLVALUE",
            Opcode::CallDataLoad => "CALLDATALOAD",
            Opcode::CallDataSize => "CALLDATASIZE",
            Opcode::CallDataCopy => "CALLDATACOPY",
            Opcode::CodeSize => "CODESIZE",
            Opcode::CodeCopy => "CODECOPY",
            Opcode::GasPrice => "GASPRICE",
            Opcode::ExtCodeSize => "EXTCODESIZE",
            Opcode::ExtCodeCopy => "EXTCODECOPY",
            Opcode::ReturnDataSize => "RETURNDATASIZE",
            Opcode::ReturnDataCopy => "RETURNDATACOPY",
            Opcode::ExtCodeHash => "EXTCODEHASH",
            Opcode::BlockHash => "BLOCKHASH",
            Opcode::Coinbase => "COINBASE",
            Opcode::Timestamp => "TIMESTAMP",
            Opcode::Number => "NUMBER",
            Opcode::Difficulty => "DIFFICULTY",
            Opcode::GasLimit => "GASLIMIT",
            Opcode::ChainId => "CHAINID",
            Opcode::SelfBalance => "SELFBALANCE",
            Opcode::MLoad => "MLOAD",
            Opcode::MStore => "MSTORE",
            Opcode::MStore8 => "MSTORE8",
            Opcode::SLoad => "SLOAD",
            Opcode::SStore => "SSTORE",
            Opcode::Jump => "JUMP",
            Opcode::JumpI => "JUMPI",
            Opcode::Pc => "PC",
            Opcode::MSize => "MSIZE",
            Opcode::Gas => "GAS",
            Opcode::JumpDest => "JUMPDEST",
            Opcode::Push => "PUSH",
            Opcode::Log0 => "LOG0",
            Opcode::Log1 => "LOG1",
            Opcode::Log2 => "LOG2",
            Opcode::Log3 => "LOG3",
            Opcode::Log4 => "LOG4",
            Opcode::Create => "CREATE",
            Opcode::Call => "CALL",
            Opcode::CallCode => "CALLCODE",
            Opcode::Return => "RETURN",
            Opcode::DelegateCall => "DELEGATECALL",
            Opcode::Create2 => "CREATE2",
            Opcode::StaticCall => "STATICCALL",
            Opcode::Revert => "REVERT",
            Opcode::Invalid => "INVALID",
            Opcode::SelfDestruct => "SELFDESTRUCT",
            Opcode::InternalCall(_) => "ICALL",
            Opcode::ConditionalInternalCall(_) => "CONDICALL",
            Opcode::Phi => "PHI",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// One SSA instruction: operands in, at most one register out.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode in the original bytecode.
    pub offset: usize,
    /// Ordinal of the instruction in the lifted program.
    pub instruction_offset: usize,
    pub opcode: Opcode,
    pub arguments: Vec<StackValue>,
    pub return_value: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub function: FuncId,
    /// Byte offset of the block's first instruction.
    pub offset: usize,
    pub insns: Vec<Instruction>,
    pub fallthrough: Option<BlockId>,
    pub jump_edges: Vec<BlockId>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    /// Byte offset of the function's entry block.
    pub offset: usize,
    pub entry: BlockId,
    pub blocks: Vec<BlockId>,
}

/// A lifted contract: arenas of functions and blocks plus the raw
/// ASCII-hex runtime code the environment exposes.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<u8>,
    pub functions: Vec<Function>,
    pub blocks: Vec<BasicBlock>,
}

impl Program {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    pub fn function_name(&self, block: BlockId) -> &str {
        &self.function(self.block(block).function).name
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.functions.first().and_then(|f| f.blocks.first().copied())
    }

    /// Resolve a jump destination among a block's jump edges by byte
    /// offset. Anything but exactly one match yields `None`.
    pub fn jump_target(&self, from: BlockId, destination: usize) -> Option<BlockId> {
        let candidates: Vec<BlockId> = self
            .block(from)
            .jump_edges
            .iter()
            .copied()
            .filter(|id| self.block(*id).offset == destination)
            .collect();
        if candidates.len() == 1 {
            Some(candidates[0])
        } else {
            None
        }
    }
}

/// Incremental construction of a [`Program`], used by the lifter and by
/// tests that hand-build control-flow graphs.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    next_instruction: usize,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.program.code = code;
        self
    }

    pub fn add_function(&mut self, name: &str, offset: usize) -> FuncId {
        let id = FuncId(self.program.functions.len());
        self.program.functions.push(Function {
            id,
            name: name.to_string(),
            offset,
            // Patched by the first add_block for this function.
            entry: BlockId(usize::MAX),
            blocks: Vec::new(),
        });
        id
    }

    pub fn add_block(&mut self, function: FuncId, offset: usize) -> BlockId {
        let id = BlockId(self.program.blocks.len());
        self.program.blocks.push(BasicBlock {
            id,
            function,
            offset,
            insns: Vec::new(),
            fallthrough: None,
            jump_edges: Vec::new(),
        });
        let func = &mut self.program.functions[function.0];
        if func.blocks.is_empty() {
            func.entry = id;
        }
        func.blocks.push(id);
        id
    }

    pub fn set_fallthrough(&mut self, block: BlockId, target: BlockId) {
        self.program.blocks[block.0].fallthrough = Some(target);
    }

    pub fn add_jump_edge(&mut self, block: BlockId, target: BlockId) {
        self.program.blocks[block.0].jump_edges.push(target);
    }

    pub fn push_insn(
        &mut self,
        block: BlockId,
        offset: usize,
        opcode: Opcode,
        arguments: Vec<StackValue>,
        return_value: Option<usize>,
    ) {
        let instruction_offset = self.next_instruction;
        self.next_instruction += 1;
        self.program.blocks[block.0].insns.push(Instruction {
            offset,
            instruction_offset,
            opcode,
            arguments,
            return_value,
        });
    }

    pub fn build(self) -> Program {
        self.program
    }
}
