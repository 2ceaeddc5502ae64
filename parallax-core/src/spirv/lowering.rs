//! Lowering of one IR function body to SPIR-V.
//!
//! Blocks are emitted in dominance order. Block parameters become `OpPhi`
//! nodes, inserted once every predecessor has been emitted; allocas become
//! `OpVariable`s at the top of the first block.

use std::collections::HashMap;

use rspirv::dr::{InsertPoint, Instruction, Operand};
use rspirv::spirv::{self, StorageClass};

use super::Constructor;
use crate::diags::TranslationWarning;
use crate::error::{CompilerError, Result};
use crate::ir::ssa::{BinOp, Block, BlockId, ControlHeader, ConvertOp, FuncBody, Inst, InstKind, Terminator, UnOp, ValueId};
use crate::types;
use crate::{bail_spirv, bail_unsupported, err_spirv};

/// Lower `body` into the function id pre-allocated for its name.
pub(super) fn lower_function(constructor: &mut Constructor, body: &FuncBody) -> Result<()> {
    let mut ctx = FunctionLowering {
        constructor,
        body,
        value_map: HashMap::new(),
        block_map: HashMap::new(),
        block_indices: HashMap::new(),
        phi_inputs: Vec::new(),
    };
    ctx.lower()?;
    log::debug!("lowered '{}' ({} blocks)", body.name, body.num_blocks());
    Ok(())
}

struct FunctionLowering<'a> {
    constructor: &'a mut Constructor,
    body: &'a FuncBody,
    value_map: HashMap<ValueId, spirv::Word>,
    /// Label of each IR block.
    block_map: HashMap<BlockId, spirv::Word>,
    /// Position of each emitted block in the SPIR-V function, for phi insertion.
    block_indices: HashMap<BlockId, usize>,
    /// (target block, param index, value, predecessor label)
    phi_inputs: Vec<(BlockId, usize, spirv::Word, spirv::Word)>,
}

impl FunctionLowering<'_> {
    fn lower(&mut self) -> Result<()> {
        let body = self.body;
        let func_id = self.constructor.function_id(&body.name)?;
        let return_ty = self.constructor.spirv_type(&body.return_ty)?;
        let fn_ty = self.constructor.function_type(&body.return_ty, &body.param_types())?;
        self.constructor.builder.begin_function(return_ty, Some(func_id), spirv::FunctionControl::NONE, fn_ty)?;

        for (value, ty, name) in &body.params {
            let ty_id = self.constructor.spirv_type(ty)?;
            let param = self.constructor.builder.function_parameter(ty_id)?;
            self.constructor.builder.name(param, name.clone());
            self.value_map.insert(*value, param);
        }

        for block_id in body.block_ids() {
            let label = self.constructor.builder.id();
            self.block_map.insert(block_id, label);
            // Phi ids are allocated now so forward uses resolve
            for param in &body.get_block(block_id).params {
                let phi = self.constructor.builder.id();
                self.value_map.insert(param.value, phi);
            }
        }

        for block_id in body.block_order() {
            let block = body.get_block(block_id);
            self.constructor.builder.begin_block(Some(self.block_map[&block_id]))?;
            if let Some(idx) = self.constructor.builder.selected_block() {
                self.block_indices.insert(block_id, idx);
            }
            if block_id == BlockId::ENTRY {
                self.declare_variables()?;
            }
            for &inst_id in &block.insts {
                self.lower_inst(body.get_inst(inst_id))?;
            }
            self.lower_terminator(block_id, block)?;
        }

        self.insert_phi_nodes()?;
        self.constructor.builder.end_function()?;
        Ok(())
    }

    /// Every alloca of the function, as Function-storage variables.
    fn declare_variables(&mut self) -> Result<()> {
        let body = self.body;
        for inst in &body.insts {
            if let (InstKind::Alloca { .. }, Some(result)) = (&inst.kind, inst.result) {
                let ptr_ty = self.constructor.spirv_type(&inst.result_ty)?;
                let var = self.constructor.builder.variable(ptr_ty, None, StorageClass::Function, None);
                self.value_map.insert(result, var);
            }
        }
        Ok(())
    }

    fn get_value(&self, value: ValueId) -> Result<spirv::Word> {
        self.value_map.get(&value).copied().ok_or_else(|| err_spirv!("unknown SSA value {}", value))
    }

    fn get_values(&self, values: &[ValueId]) -> Result<Vec<spirv::Word>> {
        values.iter().map(|&v| self.get_value(v)).collect()
    }

    fn lower_inst(&mut self, inst: &Inst) -> Result<()> {
        let lowered = match self.lower_inst_kind(inst) {
            Ok(id) => id,
            Err(CompilerError::Unsupported(detail)) if !self.constructor.is_strict() => {
                self.constructor.diags.warn(TranslationWarning::UnhandledInstruction {
                    function: self.body.name.clone(),
                    detail,
                });
                match inst.result {
                    Some(_) => {
                        let ty = self.constructor.spirv_type(&inst.result_ty).unwrap_or(self.constructor.u32_type);
                        Some(self.constructor.builder.undef(ty, None))
                    }
                    None => None,
                }
            }
            Err(err) => return Err(err),
        };
        if let (Some(result), Some(id)) = (inst.result, lowered) {
            self.value_map.insert(result, id);
        }
        Ok(())
    }

    /// The SPIR-V result of `inst`, or None for instructions without one.
    fn lower_inst_kind(&mut self, inst: &Inst) -> Result<Option<spirv::Word>> {
        let ty = &inst.result_ty;
        let id = match &inst.kind {
            InstKind::Int(value) => self.constructor.const_int(ty, *value)?,
            InstKind::Float(value) => self.constructor.const_float(ty, *value)?,
            InstKind::Bool(value) => self.constructor.const_bool(*value),
            InstKind::Null => self.constructor.const_null(ty)?,

            InstKind::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (self.get_value(*lhs)?, self.get_value(*rhs)?);
                let result_ty = self.constructor.spirv_type(ty)?;
                self.lower_binop(*op, result_ty, lhs, rhs)?
            }
            InstKind::Unary { op, operand } => {
                let operand = self.get_value(*operand)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                let b = &mut self.constructor.builder;
                match op {
                    UnOp::FNegate => b.f_negate(result_ty, None, operand)?,
                    UnOp::SNegate => b.s_negate(result_ty, None, operand)?,
                    UnOp::LogicalNot => b.logical_not(result_ty, None, operand)?,
                    UnOp::Not => b.not(result_ty, None, operand)?,
                }
            }
            InstKind::Convert { op, value } => {
                let value = self.get_value(*value)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                let b = &mut self.constructor.builder;
                match op {
                    ConvertOp::FToS => b.convert_f_to_s(result_ty, None, value)?,
                    ConvertOp::FToU => b.convert_f_to_u(result_ty, None, value)?,
                    ConvertOp::SToF => b.convert_s_to_f(result_ty, None, value)?,
                    ConvertOp::UToF => b.convert_u_to_f(result_ty, None, value)?,
                    ConvertOp::FConvert => b.f_convert(result_ty, None, value)?,
                    ConvertOp::Bitcast => b.bitcast(result_ty, None, value)?,
                }
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let (cond, a, b) = (self.get_value(*cond)?, self.get_value(*then_value)?, self.get_value(*else_value)?);
                let result_ty = self.constructor.spirv_type(ty)?;
                self.constructor.builder.select(result_ty, None, cond, a, b)?
            }
            InstKind::Math { op, args } => {
                if types::is_float64(ty) && !op.accepts_f64() {
                    bail_unsupported!("{} on f64", op.name());
                }
                let operands: Vec<Operand> = self.get_values(args)?.into_iter().map(Operand::IdRef).collect();
                let result_ty = self.constructor.spirv_type(ty)?;
                let glsl = self.constructor.glsl_ext_inst_id;
                self.constructor.builder.ext_inst(result_ty, None, glsl, op.glsl_opcode(), operands)?
            }

            // Declared up front by declare_variables
            InstKind::Alloca { .. } => return Ok(inst.result.and_then(|r| self.value_map.get(&r).copied())),
            InstKind::Load { ptr } => {
                let ptr = self.get_value(*ptr)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                self.constructor.builder.load(result_ty, None, ptr, None, [])?
            }
            InstKind::Store { ptr, value } => {
                let (ptr, value) = (self.get_value(*ptr)?, self.get_value(*value)?);
                self.constructor.builder.store(ptr, value, None, [])?;
                return Ok(None);
            }
            InstKind::AccessChain { base, indices } => {
                let base = self.get_value(*base)?;
                let indices = self.get_values(indices)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                self.constructor.builder.access_chain(result_ty, None, base, indices)?
            }
            InstKind::PtrAccessChain { base, element, indices } => {
                // The base pointer type needs a stride for the element step
                let base_ty = self.body.get_value_type(*base).clone();
                let base_ty_id = self.constructor.spirv_type(&base_ty)?;
                match types::pointee(&base_ty) {
                    Some(pointee) => {
                        let pointee = pointee.clone();
                        self.constructor.decorate_stride(base_ty_id, &pointee);
                    }
                    None => bail_spirv!("pointer arithmetic on non-pointer {}", types::format_type(&base_ty)),
                }
                let (base, element) = (self.get_value(*base)?, self.get_value(*element)?);
                let indices = self.get_values(indices)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                self.constructor.builder.ptr_access_chain(result_ty, None, base, element, indices)?
            }
            InstKind::Call { func, args } => {
                let Some(&func_id) = self.constructor.functions.get(func) else {
                    bail_unsupported!("call to '{}', which is not part of the kernel", func);
                };
                let args = self.get_values(args)?;
                let result_ty = self.constructor.spirv_type(ty)?;
                let id = self.constructor.builder.function_call(result_ty, None, func_id, args)?;
                if types::is_void(ty) {
                    return Ok(None);
                }
                id
            }
        };
        Ok(Some(id))
    }

    fn lower_binop(&mut self, op: BinOp, ty: spirv::Word, lhs: spirv::Word, rhs: spirv::Word) -> Result<spirv::Word> {
        let bool_ty = self.constructor.bool_type;
        let b = &mut self.constructor.builder;
        let id = match op {
            BinOp::FAdd => b.f_add(ty, None, lhs, rhs)?,
            BinOp::IAdd => b.i_add(ty, None, lhs, rhs)?,
            BinOp::FSub => b.f_sub(ty, None, lhs, rhs)?,
            BinOp::ISub => b.i_sub(ty, None, lhs, rhs)?,
            BinOp::FMul => b.f_mul(ty, None, lhs, rhs)?,
            BinOp::IMul => b.i_mul(ty, None, lhs, rhs)?,
            BinOp::FDiv => b.f_div(ty, None, lhs, rhs)?,
            BinOp::SDiv => b.s_div(ty, None, lhs, rhs)?,
            BinOp::UDiv => b.u_div(ty, None, lhs, rhs)?,
            BinOp::FRem => b.f_rem(ty, None, lhs, rhs)?,
            BinOp::SRem => b.s_rem(ty, None, lhs, rhs)?,
            BinOp::UMod => b.u_mod(ty, None, lhs, rhs)?,
            BinOp::FOrdLt => b.f_ord_less_than(bool_ty, None, lhs, rhs)?,
            BinOp::FOrdLe => b.f_ord_less_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::FOrdGt => b.f_ord_greater_than(bool_ty, None, lhs, rhs)?,
            BinOp::FOrdGe => b.f_ord_greater_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::FOrdEq => b.f_ord_equal(bool_ty, None, lhs, rhs)?,
            BinOp::FUnordNe => b.f_unord_not_equal(bool_ty, None, lhs, rhs)?,
            BinOp::SLt => b.s_less_than(bool_ty, None, lhs, rhs)?,
            BinOp::SLe => b.s_less_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::SGt => b.s_greater_than(bool_ty, None, lhs, rhs)?,
            BinOp::SGe => b.s_greater_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::ULt => b.u_less_than(bool_ty, None, lhs, rhs)?,
            BinOp::ULe => b.u_less_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::UGt => b.u_greater_than(bool_ty, None, lhs, rhs)?,
            BinOp::UGe => b.u_greater_than_equal(bool_ty, None, lhs, rhs)?,
            BinOp::IEq => b.i_equal(bool_ty, None, lhs, rhs)?,
            BinOp::INe => b.i_not_equal(bool_ty, None, lhs, rhs)?,
            BinOp::LogicalEq => b.logical_equal(bool_ty, None, lhs, rhs)?,
            BinOp::LogicalNe => b.logical_not_equal(bool_ty, None, lhs, rhs)?,
            BinOp::BitAnd => b.bitwise_and(ty, None, lhs, rhs)?,
            BinOp::BitOr => b.bitwise_or(ty, None, lhs, rhs)?,
            BinOp::BitXor => b.bitwise_xor(ty, None, lhs, rhs)?,
            BinOp::Shl => b.shift_left_logical(ty, None, lhs, rhs)?,
            BinOp::ShrArith => b.shift_right_arithmetic(ty, None, lhs, rhs)?,
            BinOp::ShrLogical => b.shift_right_logical(ty, None, lhs, rhs)?,
        };
        Ok(id)
    }

    fn lower_terminator(&mut self, block_id: BlockId, block: &Block) -> Result<()> {
        let Some(term) = &block.terminator else {
            bail_spirv!("block {} of '{}' has no terminator", block_id, self.body.name);
        };
        let current = self.block_map[&block_id];

        for (target, args) in term.edges() {
            for (param_idx, &arg) in args.iter().enumerate() {
                let arg_id = self.get_value(arg)?;
                self.phi_inputs.push((target, param_idx, arg_id, current));
            }
        }

        // Emit structured control flow merge instructions if this is a header block
        if let Some(control) = &block.control {
            match control {
                ControlHeader::Loop {
                    merge,
                    continue_block,
                } => {
                    let (merge, continue_block) = (self.block_map[merge], self.block_map[continue_block]);
                    self.constructor.builder.loop_merge(merge, continue_block, spirv::LoopControl::NONE, [])?;
                }
                ControlHeader::Selection { merge } => {
                    let merge = self.block_map[merge];
                    self.constructor.builder.selection_merge(merge, spirv::SelectionControl::NONE)?;
                }
            }
        }

        match term {
            Terminator::Branch { target, .. } => self.constructor.builder.branch(self.block_map[target])?,
            Terminator::CondBranch {
                cond,
                then_target,
                else_target,
                ..
            } => {
                let cond = self.get_value(*cond)?;
                let (then_label, else_label) = (self.block_map[then_target], self.block_map[else_target]);
                self.constructor.builder.branch_conditional(cond, then_label, else_label, [])?;
            }
            Terminator::Return(value) => {
                let value = self.get_value(*value)?;
                self.constructor.builder.ret_value(value)?;
            }
            Terminator::ReturnVoid => self.constructor.builder.ret()?,
            Terminator::Unreachable => self.constructor.builder.unreachable()?,
        }
        Ok(())
    }

    fn insert_phi_nodes(&mut self) -> Result<()> {
        let mut phi_map: HashMap<(BlockId, usize), Vec<(spirv::Word, spirv::Word)>> = HashMap::new();
        for (target, param_idx, value, source) in &self.phi_inputs {
            phi_map.entry((*target, *param_idx)).or_default().push((*value, *source));
        }

        let body = self.body;
        for block_id in body.block_ids() {
            let Some(&block_idx) = self.block_indices.get(&block_id) else {
                continue;
            };
            let params = &body.get_block(block_id).params;
            if params.is_empty() {
                continue;
            }
            self.constructor.builder.select_block(Some(block_idx))?;
            // Reverse so that inserting at the block start keeps parameter order
            for (param_idx, param) in params.iter().enumerate().rev() {
                let ty_id = self.constructor.spirv_type(&param.ty)?;
                let phi_id = self.get_value(param.value)?;
                match phi_map.remove(&(block_id, param_idx)) {
                    Some(incoming) => {
                        self.constructor.builder.insert_phi(InsertPoint::Begin, ty_id, Some(phi_id), incoming)?;
                    }
                    None => {
                        // No predecessor was emitted; the block is dead
                        let undef = Instruction::new(spirv::Op::Undef, Some(ty_id), Some(phi_id), vec![]);
                        self.constructor.builder.insert_into_block(InsertPoint::Begin, undef)?;
                    }
                }
            }
            self.constructor.builder.select_block(None)?;
        }
        Ok(())
    }
}
