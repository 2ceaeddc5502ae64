//! SSA function builder.
//!
//! Provides a safe API for constructing SSA functions, ensuring:
//! - Blocks are properly terminated before switching
//! - Nothing is appended to a terminated block
//! - Storage slots land at the top of the entry block

use crate::types::{self, AddressSpace, Type};

use super::ssa::{
    BinOp, Block, BlockId, BlockParam, ControlHeader, ConvertOp, FuncBody, Inst, InstId, InstKind, MathOp,
    Terminator, UnOp, ValueId,
};

/// Error during function building.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderError {
    /// Tried to add instructions without selecting a block.
    NoCurrentBlock,
    /// A block was left without a terminator.
    UnterminatedBlock(BlockId),
    /// Instructions or a terminator were added after the block was terminated.
    BlockAlreadyTerminated(BlockId),
    /// Load or store through a value that is not a pointer.
    NotAPointer(ValueId),
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderError::NoCurrentBlock => write!(f, "No current block selected"),
            BuilderError::UnterminatedBlock(id) => write!(f, "Block {} has no terminator", id),
            BuilderError::BlockAlreadyTerminated(id) => {
                write!(f, "Block {} already terminated", id)
            }
            BuilderError::NotAPointer(v) => write!(f, "Value {} is not a pointer", v),
        }
    }
}

impl std::error::Error for BuilderError {}

/// Insertion state captured by [`FuncBuilder::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    block: BlockId,
    insts: usize,
    allocas: usize,
    blocks: usize,
}

/// Builder for constructing SSA functions.
///
/// # Example
///
/// ```ignore
/// let mut builder = FuncBuilder::new("add_one", vec![(types::i32(), "x".to_string())], types::i32());
///
/// // Entry block is current by default
/// let x = builder.get_param(0);
/// let one = builder.push_int(1, types::i32())?;
/// let result = builder.push_binop(BinOp::IAdd, x, one)?;
/// builder.terminate(Terminator::Return(result))?;
///
/// let body = builder.finish()?;
/// ```
pub struct FuncBuilder {
    body: FuncBody,
    current_block: Option<BlockId>,
    /// Number of allocas at the head of the entry block.
    alloca_count: usize,
}

impl FuncBuilder {
    /// Create a new function builder.
    ///
    /// The entry block (BlockId(0)) is created automatically and set as current.
    pub fn new(name: &str, params: Vec<(Type, String)>, return_ty: Type) -> Self {
        FuncBuilder {
            body: FuncBody::new(name, params, return_ty),
            current_block: Some(BlockId::ENTRY),
            alloca_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.body.name
    }

    /// Get the value for a function parameter by index.
    pub fn get_param(&self, index: usize) -> ValueId {
        self.body.params[index].0
    }

    pub fn return_ty(&self) -> &Type {
        &self.body.return_ty
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        self.body.get_value_type(value)
    }

    /// Create a new basic block with no parameters.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.body.blocks.len() as u32);
        self.body.blocks.push(Block::new());
        id
    }

    /// Create a new basic block with parameters.
    ///
    /// Returns the block ID and the values defined by the parameters.
    pub fn create_block_with_params(&mut self, param_types: Vec<Type>) -> (BlockId, Vec<ValueId>) {
        let id = BlockId(self.body.blocks.len() as u32);

        let mut params = Vec::new();
        let mut values = Vec::new();

        for ty in param_types {
            let value = self.body.alloc_value(ty.clone());
            params.push(BlockParam { value, ty, name: None });
            values.push(value);
        }

        self.body.blocks.push(Block::with_params(params));
        (id, values)
    }

    /// Switch to building in the specified block.
    ///
    /// The previous block must be terminated.
    pub fn switch_to_block(&mut self, block: BlockId) -> Result<(), BuilderError> {
        if let Some(prev) = self.current_block {
            if self.body.get_block(prev).terminator.is_none() {
                return Err(BuilderError::UnterminatedBlock(prev));
            }
        }
        self.current_block = Some(block);
        Ok(())
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    pub fn is_current_terminated(&self) -> bool {
        self.current_block.map(|b| self.is_terminated(b)).unwrap_or(false)
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.body.get_block(block).terminator.is_some()
    }

    /// Whether any terminated block branches to `block`.
    pub fn has_predecessors(&self, block: BlockId) -> bool {
        !self.body.predecessors(block).is_empty()
    }

    fn push_inst_internal(
        &mut self,
        kind: InstKind,
        result_ty: Type,
        has_result: bool,
    ) -> Result<(InstId, Option<ValueId>), BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;

        if self.body.get_block(block_id).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated(block_id));
        }

        let result = if has_result { Some(self.body.alloc_value(result_ty.clone())) } else { None };

        let inst_id = InstId(self.body.insts.len() as u32);
        self.body.insts.push(Inst {
            result,
            result_ty,
            kind,
        });
        self.body.get_block_mut(block_id).insts.push(inst_id);

        Ok((inst_id, result))
    }

    /// Push an instruction that produces a value.
    pub fn push_inst(&mut self, kind: InstKind, ty: Type) -> Result<ValueId, BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        match self.push_inst_internal(kind, ty, true)? {
            (_, Some(value)) => Ok(value),
            (_, None) => Err(BuilderError::BlockAlreadyTerminated(block_id)),
        }
    }

    /// Push an instruction that produces no value (e.g., Store).
    pub fn push_void_inst(&mut self, kind: InstKind) -> Result<InstId, BuilderError> {
        let (inst_id, _) = self.push_inst_internal(kind, types::void(), false)?;
        Ok(inst_id)
    }

    /// Allocate a function-local slot for `elem_ty` at the top of the entry
    /// block, regardless of the current insertion point.
    pub fn push_alloca(&mut self, elem_ty: Type) -> ValueId {
        let ptr_ty = types::pointer(AddressSpace::Function, elem_ty.clone());
        let result = self.body.alloc_value(ptr_ty.clone());
        let inst_id = InstId(self.body.insts.len() as u32);
        self.body.insts.push(Inst {
            result: Some(result),
            result_ty: ptr_ty,
            kind: InstKind::Alloca { elem_ty },
        });
        let entry = self.body.get_block_mut(BlockId::ENTRY);
        entry.insts.insert(self.alloca_count, inst_id);
        self.alloca_count += 1;
        result
    }

    /// Set the terminator for the current block.
    pub fn terminate(&mut self, term: Terminator) -> Result<(), BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;

        if self.body.get_block(block_id).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated(block_id));
        }

        self.body.get_block_mut(block_id).terminator = Some(term);
        Ok(())
    }

    /// Mark the current block as the header of a selection merging at `merge`.
    pub fn mark_selection_header(&mut self, merge: BlockId) -> Result<(), BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        self.body.get_block_mut(block_id).control = Some(ControlHeader::Selection { merge });
        Ok(())
    }

    /// Mark the current block as a loop header.
    pub fn mark_loop_header(&mut self, merge: BlockId, continue_block: BlockId) -> Result<(), BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        self.body.get_block_mut(block_id).control = Some(ControlHeader::Loop { merge, continue_block });
        Ok(())
    }

    /// Record the current insertion state so a failed statement can be undone.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let block = self.current_block?;
        Some(Checkpoint {
            block,
            insts: self.body.get_block(block).insts.len(),
            allocas: self.alloca_count,
            blocks: self.body.blocks.len(),
        })
    }

    /// Discard everything emitted since `checkpoint`: blocks created after it
    /// and instructions appended to its block. Storage slots stay, since
    /// bindings made before the failure may still refer to them.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.body.blocks.truncate(checkpoint.blocks);
        let hoisted = if checkpoint.block == BlockId::ENTRY { self.alloca_count - checkpoint.allocas } else { 0 };
        let block = self.body.get_block_mut(checkpoint.block);
        block.insts.truncate(checkpoint.insts + hoisted);
        block.terminator = None;
        block.control = None;
        self.current_block = Some(checkpoint.block);
    }

    /// Finish building and return the function body.
    ///
    /// All blocks must be terminated.
    pub fn finish(self) -> Result<FuncBody, BuilderError> {
        for (i, block) in self.body.blocks.iter().enumerate() {
            if block.terminator.is_none() {
                return Err(BuilderError::UnterminatedBlock(BlockId(i as u32)));
            }
        }
        Ok(self.body)
    }

    // =========================================================================
    // Convenience methods for common instructions
    // =========================================================================

    pub fn push_int(&mut self, value: i64, ty: Type) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Int(value), ty)
    }

    pub fn push_float(&mut self, value: f64, ty: Type) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Float(value), ty)
    }

    pub fn push_bool(&mut self, value: bool) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Bool(value), types::bool())
    }

    pub fn push_null(&mut self, ty: Type) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Null, ty)
    }

    /// Push a binary operation. Comparisons yield bool, everything else the
    /// type of `lhs`.
    pub fn push_binop(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> Result<ValueId, BuilderError> {
        let ty = if op.is_comparison() { types::bool() } else { self.value_type(lhs).clone() };
        self.push_inst(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn push_unary(&mut self, op: UnOp, operand: ValueId) -> Result<ValueId, BuilderError> {
        let ty = self.value_type(operand).clone();
        self.push_inst(InstKind::Unary { op, operand }, ty)
    }

    pub fn push_convert(&mut self, op: ConvertOp, value: ValueId, ty: Type) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Convert { op, value }, ty)
    }

    pub fn push_select(
        &mut self,
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    ) -> Result<ValueId, BuilderError> {
        let ty = self.value_type(then_value).clone();
        self.push_inst(
            InstKind::Select {
                cond,
                then_value,
                else_value,
            },
            ty,
        )
    }

    pub fn push_math(&mut self, op: MathOp, args: Vec<ValueId>, ty: Type) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::Math { op, args }, ty)
    }

    /// Load through a pointer; the result has the pointee type.
    pub fn push_load(&mut self, ptr: ValueId) -> Result<ValueId, BuilderError> {
        let ty = types::pointee(self.value_type(ptr)).cloned().ok_or(BuilderError::NotAPointer(ptr))?;
        self.push_inst(InstKind::Load { ptr }, ty)
    }

    pub fn push_store(&mut self, ptr: ValueId, value: ValueId) -> Result<InstId, BuilderError> {
        if !types::is_pointer(self.value_type(ptr)) {
            return Err(BuilderError::NotAPointer(ptr));
        }
        self.push_void_inst(InstKind::Store { ptr, value })
    }

    /// Pointer to a component; `ptr_ty` is the resulting pointer type.
    pub fn push_access_chain(
        &mut self,
        base: ValueId,
        indices: Vec<ValueId>,
        ptr_ty: Type,
    ) -> Result<ValueId, BuilderError> {
        self.push_inst(InstKind::AccessChain { base, indices }, ptr_ty)
    }

    pub fn push_ptr_access_chain(&mut self, base: ValueId, element: ValueId) -> Result<ValueId, BuilderError> {
        let ty = self.value_type(base).clone();
        self.push_inst(
            InstKind::PtrAccessChain {
                base,
                element,
                indices: vec![],
            },
            ty,
        )
    }

    /// Call `func`. Void calls produce no value.
    pub fn push_call(
        &mut self,
        func: &str,
        args: Vec<ValueId>,
        ret_ty: Type,
    ) -> Result<Option<ValueId>, BuilderError> {
        let kind = InstKind::Call {
            func: func.to_string(),
            args,
        };
        if types::is_void(&ret_ty) {
            self.push_void_inst(kind)?;
            Ok(None)
        } else {
            self.push_inst(kind, ret_ty).map(Some)
        }
    }
}
