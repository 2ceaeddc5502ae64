//! SSA form for translated callables.
//!
//! Functions are an explicit CFG of basic blocks. Values are produced
//! exactly once; values that merge at a join point are passed as block
//! parameters instead of phi nodes:
//! ```text
//! merge(%result: f32):
//!     ...
//! then_block:
//!     br merge(%then_val)
//! else_block:
//!     br merge(%else_val)
//! ```
//! Named source variables never become SSA values directly. They live in
//! `alloca` slots hoisted to the entry block, so loops need no block
//! parameters and only expression-level joins (`?:`, `&&`, `||`) use them.

use std::collections::HashSet;
use std::fmt;

use crate::types::Type;

// =============================================================================
// ID Types
// =============================================================================

/// SSA value - defined exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ValueId {
    fn from(id: u32) -> Self {
        ValueId(id)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Instruction within a function's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for InstId {
    fn from(id: u32) -> Self {
        InstId(id)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Basic block within a function.
///
/// BlockId(0) is always the entry block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The entry block is always BlockId(0).
    pub const ENTRY: BlockId = BlockId(0);
}

impl From<u32> for BlockId {
    fn from(id: u32) -> Self {
        BlockId(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

// =============================================================================
// Basic Blocks
// =============================================================================

/// Structured control flow header information for SPIR-V lowering.
///
/// Attached to the block that ends in the construct's branch; lowered to
/// `OpLoopMerge` / `OpSelectionMerge` right before that branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlHeader {
    Loop {
        /// Where the loop exits to.
        merge: BlockId,
        /// The block that branches back to the header.
        continue_block: BlockId,
    },
    Selection {
        /// Where both arms reconverge.
        merge: BlockId,
    },
}

impl ControlHeader {
    /// Blocks the construct declares structurally, whether or not any
    /// branch reaches them.
    pub fn structural_targets(&self) -> Vec<BlockId> {
        match self {
            ControlHeader::Loop { merge, continue_block } => vec![*merge, *continue_block],
            ControlHeader::Selection { merge } => vec![*merge],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Block parameters; each predecessor passes arguments at its branch.
    pub params: Vec<BlockParam>,
    /// Instructions in execution order.
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
    pub control: Option<ControlHeader>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: Vec<BlockParam>) -> Self {
        Block {
            params,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockParam {
    pub value: ValueId,
    pub ty: Type,
    pub name: Option<String>,
}

/// How control leaves a basic block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Branch {
        target: BlockId,
        args: Vec<ValueId>,
    },
    CondBranch {
        cond: ValueId,
        then_target: BlockId,
        then_args: Vec<ValueId>,
        else_target: BlockId,
        else_args: Vec<ValueId>,
    },
    Return(ValueId),
    ReturnVoid,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch { target, .. } => vec![*target],
            Terminator::CondBranch {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Terminator::Return(_) | Terminator::ReturnVoid | Terminator::Unreachable => vec![],
        }
    }

    /// (target, args) for every outgoing edge.
    pub fn edges(&self) -> Vec<(BlockId, &[ValueId])> {
        match self {
            Terminator::Branch { target, args } => vec![(*target, args.as_slice())],
            Terminator::CondBranch {
                then_target,
                then_args,
                else_target,
                else_args,
                ..
            } => vec![(*then_target, then_args.as_slice()), (*else_target, else_args.as_slice())],
            _ => vec![],
        }
    }

    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Terminator::Branch { args, .. } => args.clone(),
            Terminator::CondBranch {
                cond,
                then_args,
                else_args,
                ..
            } => std::iter::once(*cond).chain(then_args.iter().copied()).chain(else_args.iter().copied()).collect(),
            Terminator::Return(v) => vec![*v],
            Terminator::ReturnVoid | Terminator::Unreachable => vec![],
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

#[derive(Debug, Clone)]
pub struct Inst {
    /// The value this instruction produces, if any.
    pub result: Option<ValueId>,
    /// Type of the result (void if no result).
    pub result_ty: Type,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Integer constant; the result type picks width and signedness.
    Int(i64),
    /// Float constant; the result type picks the width.
    Float(f64),
    Bool(bool),
    /// Zero value of the result type.
    Null,

    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        op: UnOp,
        operand: ValueId,
    },
    Convert {
        op: ConvertOp,
        value: ValueId,
    },
    Select {
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    },
    /// Extended math instruction.
    Math {
        op: MathOp,
        args: Vec<ValueId>,
    },

    /// Function-local storage slot. Only valid at the top of the entry block.
    Alloca {
        elem_ty: Type,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    /// Pointer to a component of `*base`. The walk starts at the pointee
    /// itself, so `&arr[i]` on an array slot is `AccessChain(arr, [i])`;
    /// this is the two-index `(0, i)` form of pointer arithmetic.
    AccessChain {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    /// Pointer arithmetic on an element pointer, `&base[element]`, then
    /// walking `indices` into that element.
    PtrAccessChain {
        base: ValueId,
        element: ValueId,
        indices: Vec<ValueId>,
    },
    /// Call a function of the same module by name.
    Call {
        func: String,
        args: Vec<ValueId>,
    },
}

impl InstKind {
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            InstKind::Int(_) | InstKind::Float(_) | InstKind::Bool(_) | InstKind::Null => vec![],
            InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Unary { operand, .. } => vec![*operand],
            InstKind::Convert { value, .. } => vec![*value],
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => vec![*cond, *then_value, *else_value],
            InstKind::Math { args, .. } => args.clone(),
            InstKind::Alloca { .. } => vec![],
            InstKind::Load { ptr } => vec![*ptr],
            InstKind::Store { ptr, value } => vec![*ptr, *value],
            InstKind::AccessChain { base, indices } => std::iter::once(*base).chain(indices.iter().copied()).collect(),
            InstKind::PtrAccessChain {
                base,
                element,
                indices,
            } => [*base, *element].into_iter().chain(indices.iter().copied()).collect(),
            InstKind::Call { args, .. } => args.clone(),
        }
    }
}

/// Binary instructions. Each variant names one instruction family; the
/// translator picks it from the operand kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    FAdd,
    IAdd,
    FSub,
    ISub,
    FMul,
    IMul,
    FDiv,
    SDiv,
    UDiv,
    FRem,
    SRem,
    UMod,
    FOrdLt,
    FOrdLe,
    FOrdGt,
    FOrdGe,
    FOrdEq,
    /// Unordered: true when either side is NaN, matching C++ `!=`.
    FUnordNe,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
    IEq,
    INe,
    LogicalEq,
    LogicalNe,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    ShrArith,
    ShrLogical,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::FAdd => "fadd",
            BinOp::IAdd => "iadd",
            BinOp::FSub => "fsub",
            BinOp::ISub => "isub",
            BinOp::FMul => "fmul",
            BinOp::IMul => "imul",
            BinOp::FDiv => "fdiv",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::FRem => "frem",
            BinOp::SRem => "srem",
            BinOp::UMod => "umod",
            BinOp::FOrdLt => "folt",
            BinOp::FOrdLe => "fole",
            BinOp::FOrdGt => "fogt",
            BinOp::FOrdGe => "foge",
            BinOp::FOrdEq => "foeq",
            BinOp::FUnordNe => "fune",
            BinOp::SLt => "slt",
            BinOp::SLe => "sle",
            BinOp::SGt => "sgt",
            BinOp::SGe => "sge",
            BinOp::ULt => "ult",
            BinOp::ULe => "ule",
            BinOp::UGt => "ugt",
            BinOp::UGe => "uge",
            BinOp::IEq => "ieq",
            BinOp::INe => "ine",
            BinOp::LogicalEq => "leq",
            BinOp::LogicalNe => "lne",
            BinOp::BitAnd => "band",
            BinOp::BitOr => "bor",
            BinOp::BitXor => "bxor",
            BinOp::Shl => "shl",
            BinOp::ShrArith => "ashr",
            BinOp::ShrLogical => "lshr",
        }
    }

    /// Comparisons produce bool regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::FOrdLt
                | BinOp::FOrdLe
                | BinOp::FOrdGt
                | BinOp::FOrdGe
                | BinOp::FOrdEq
                | BinOp::FUnordNe
                | BinOp::SLt
                | BinOp::SLe
                | BinOp::SGt
                | BinOp::SGe
                | BinOp::ULt
                | BinOp::ULe
                | BinOp::UGt
                | BinOp::UGe
                | BinOp::IEq
                | BinOp::INe
                | BinOp::LogicalEq
                | BinOp::LogicalNe
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    FNegate,
    SNegate,
    LogicalNot,
    /// Bitwise complement.
    Not,
}

impl UnOp {
    pub fn name(self) -> &'static str {
        match self {
            UnOp::FNegate => "fneg",
            UnOp::SNegate => "sneg",
            UnOp::LogicalNot => "lnot",
            UnOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertOp {
    FToS,
    FToU,
    SToF,
    UToF,
    /// Float width change.
    FConvert,
    /// Same-width reinterpretation between signed and unsigned integers.
    Bitcast,
}

impl ConvertOp {
    pub fn name(self) -> &'static str {
        match self {
            ConvertOp::FToS => "ftos",
            ConvertOp::FToU => "ftou",
            ConvertOp::SToF => "stof",
            ConvertOp::UToF => "utof",
            ConvertOp::FConvert => "fconvert",
            ConvertOp::Bitcast => "bitcast",
        }
    }
}

/// Math instructions from the GLSL.std.450 extended set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathOp {
    FAbs,
    SAbs,
    Floor,
    Ceil,
    Sin,
    Cos,
    Tan,
    Pow,
    Exp,
    Log,
    Sqrt,
}

impl MathOp {
    /// GLSL.std.450 defines the trigonometric, exponential and power
    /// instructions for 16- and 32-bit floats only.
    pub fn accepts_f64(self) -> bool {
        matches!(self, MathOp::FAbs | MathOp::SAbs | MathOp::Floor | MathOp::Ceil | MathOp::Sqrt)
    }

    /// Instruction number in GLSL.std.450.
    pub fn glsl_opcode(self) -> u32 {
        match self {
            MathOp::FAbs => 4,
            MathOp::SAbs => 5,
            MathOp::Floor => 8,
            MathOp::Ceil => 9,
            MathOp::Sin => 13,
            MathOp::Cos => 14,
            MathOp::Tan => 15,
            MathOp::Pow => 26,
            MathOp::Exp => 27,
            MathOp::Log => 28,
            MathOp::Sqrt => 31,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MathOp::FAbs => "fabs",
            MathOp::SAbs => "sabs",
            MathOp::Floor => "floor",
            MathOp::Ceil => "ceil",
            MathOp::Sin => "sin",
            MathOp::Cos => "cos",
            MathOp::Tan => "tan",
            MathOp::Pow => "pow",
            MathOp::Exp => "exp",
            MathOp::Log => "log",
            MathOp::Sqrt => "sqrt",
        }
    }

    /// Whether the operation works on integers rather than floats.
    pub fn is_integer(self) -> bool {
        matches!(self, MathOp::SAbs)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// A function body in SSA form.
#[derive(Debug, Clone)]
pub struct FuncBody {
    pub name: String,
    /// Function parameters: (value, type, name).
    pub params: Vec<(ValueId, Type, String)>,
    pub return_ty: Type,
    /// Basic blocks. BlockId(i) indexes this vector.
    pub blocks: Vec<Block>,
    /// Instruction arena. InstId(i) indexes this vector.
    pub insts: Vec<Inst>,
    /// Type of every value. ValueId(i) indexes this vector.
    value_types: Vec<Type>,
}

impl FuncBody {
    /// Create a body with an empty entry block.
    pub fn new(name: &str, params: Vec<(Type, String)>, return_ty: Type) -> Self {
        let mut body = FuncBody {
            name: name.to_string(),
            params: Vec::new(),
            return_ty,
            blocks: vec![Block::new()],
            insts: Vec::new(),
            value_types: Vec::new(),
        };
        for (ty, name) in params {
            let value = body.alloc_value(ty.clone());
            body.params.push((value, ty, name));
        }
        body
    }

    pub fn alloc_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        id
    }

    pub fn get_block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn get_inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn get_value_type(&self, id: ValueId) -> &Type {
        &self.value_types[id.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_values(&self) -> usize {
        self.value_types.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|(_, ty, _)| ty.clone()).collect()
    }

    /// Successors along real control-flow edges.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.get_block(id).terminator.as_ref().map(Terminator::successors).unwrap_or_default()
    }

    /// Blocks that branch to `id`.
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.block_ids().filter(|&b| self.successors(b).contains(&id)).collect()
    }

    /// Blocks reachable from the entry. With `structural`, merge and continue
    /// targets declared by construct headers count as reachable too.
    pub fn reachable_blocks(&self, structural: bool) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut stack = vec![BlockId::ENTRY];
        while let Some(block) = stack.pop() {
            if block.index() >= self.blocks.len() || !seen.insert(block) {
                continue;
            }
            stack.extend(self.successors(block));
            if structural {
                if let Some(control) = &self.get_block(block).control {
                    stack.extend(control.structural_targets());
                }
            }
        }
        seen
    }

    /// Emission order: reverse post-order over real edges, so every block
    /// comes after its dominators. Blocks only reachable structurally (dead
    /// merges and continues) follow in index order.
    pub fn block_order(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut post = Vec::new();
        // Iterative DFS keeping (block, next successor index)
        let mut stack = vec![(BlockId::ENTRY, 0usize)];
        visited.insert(BlockId::ENTRY);
        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if succ.index() < self.blocks.len() && visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post.push(block);
            }
        }
        post.reverse();
        post.extend(self.block_ids().filter(|b| !visited.contains(b)));
        post
    }
}

/// The functions of one kernel.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Functions in definition order; callees precede their callers.
    pub functions: Vec<FuncBody>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, body: FuncBody) {
        self.functions.push(body);
    }

    /// Find a function by exact name.
    pub fn get(&self, name: &str) -> Option<&FuncBody> {
        self.functions.iter().find(|f| f.name == name)
    }
}
