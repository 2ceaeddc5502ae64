//! Expression lowering.

use crate::algorithm::MathFunction;
use crate::ast::{BinaryOp, Expr, ExprKind, SourceType, UnaryOp};
use crate::error::Result;
use crate::ir::ssa::{BinOp, MathOp, UnOp};
use crate::ir::{Terminator, ValueId};
use crate::types::{self, format_type, AddressSpace, NumericKind, Type};
use crate::{bail_translate, bail_unsupported, err_translate, err_unsupported};

use super::{ops, Access, BindingKind, FunctionTranslator, MethodSignature, ParamKind};

/// Whether `expr` denotes storage in C++.
pub(crate) fn is_lvalue(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::DeclRef(_) | ExprKind::Subscript { .. } | ExprKind::Member { .. } => true,
        ExprKind::CompoundAssign { .. } => true,
        ExprKind::Unary { op, .. } => matches!(op, UnaryOp::Deref | UnaryOp::PreInc | UnaryOp::PreDec),
        ExprKind::Binary { op: BinaryOp::Assign, .. } => true,
        ExprKind::Binary { op: BinaryOp::Comma, rhs, .. } => is_lvalue(rhs),
        ExprKind::Paren(inner) => is_lvalue(inner),
        ExprKind::Cast { operand } => is_lvalue(operand) && operand.ty.non_reference() == expr.ty.non_reference(),
        _ => false,
    }
}

fn math_op(func: MathFunction) -> Option<MathOp> {
    match func {
        MathFunction::Sin => Some(MathOp::Sin),
        MathFunction::Cos => Some(MathOp::Cos),
        MathFunction::Tan => Some(MathOp::Tan),
        MathFunction::Sqrt => Some(MathOp::Sqrt),
        MathFunction::Exp => Some(MathOp::Exp),
        MathFunction::Log => Some(MathOp::Log),
        MathFunction::Pow => Some(MathOp::Pow),
        MathFunction::Abs => Some(MathOp::FAbs),
        MathFunction::Floor => Some(MathOp::Floor),
        MathFunction::Ceil => Some(MathOp::Ceil),
        MathFunction::Min | MathFunction::Max | MathFunction::Cbrt => None,
    }
}

impl<'a> FunctionTranslator<'a> {
    /// Translate an expression in the current block. Returns None, with
    /// anything partially emitted discarded, when the expression uses a
    /// construct outside the translatable subset.
    pub fn translate_expr(&mut self, expr: &Expr, access: Access) -> Result<Option<ValueId>> {
        let checkpoint = self.builder.checkpoint();
        match self.lower_expr(expr, access) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_recoverable() => {
                log::warn!("in '{}': {}", self.function_name(), err);
                if let Some(checkpoint) = checkpoint {
                    self.builder.rollback(checkpoint);
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn lower_expr(&mut self, expr: &Expr, access: Access) -> Result<ValueId> {
        match &expr.kind {
            ExprKind::IntLit(value) => {
                Self::rvalue_only(access, "integer literal")?;
                let ty = self.value_type(&expr.ty);
                self.constant_int(*value, &ty)
            }
            ExprKind::FloatLit(value) => {
                Self::rvalue_only(access, "floating literal")?;
                let ty = self.value_type(&expr.ty);
                self.constant_float(*value, &ty)
            }
            ExprKind::BoolLit(value) => {
                Self::rvalue_only(access, "boolean literal")?;
                Ok(self.builder.push_bool(*value)?)
            }
            ExprKind::DeclRef(name) => self.lower_decl_ref(name, access),
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, expr, access),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, expr, access),
            ExprKind::CompoundAssign { op, lhs, rhs } => self.lower_compound_assign(*op, lhs, rhs, access),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                Self::rvalue_only(access, "conditional expression")?;
                self.lower_conditional(cond, then_expr, else_expr, expr)
            }
            ExprKind::Subscript { base, index } => {
                let ptr = self.lower_subscript(base, index)?;
                self.finish_place(ptr, access)
            }
            ExprKind::Member { base, field, arrow } => {
                let ptr = self.lower_member(base.as_deref(), field, *arrow)?;
                self.finish_place(ptr, access)
            }
            ExprKind::Call { callee, args } => {
                Self::rvalue_only(access, "call result")?;
                match self.lower_call(callee, args, expr)? {
                    Some(value) => Ok(value),
                    None => bail_translate!("result of void call to '{}' used as a value", callee),
                }
            }
            ExprKind::Cast { operand } => self.lower_cast(operand, expr, access),
            ExprKind::Paren(inner) => self.lower_expr(inner, access),
        }
    }

    /// Evaluate an expression for its side effects only.
    pub(crate) fn lower_discarded(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                self.lower_call(callee, args, expr)?;
            }
            ExprKind::Paren(inner) => self.lower_discarded(inner)?,
            ExprKind::Cast { operand } if expr.ty == SourceType::Void => self.lower_discarded(operand)?,
            ExprKind::Binary {
                op: BinaryOp::Comma,
                lhs,
                rhs,
            } => {
                self.lower_discarded(lhs)?;
                self.lower_discarded(rhs)?;
            }
            _ => {
                self.lower_expr(expr, Access::Value)?;
            }
        }
        Ok(())
    }

    fn rvalue_only(access: Access, what: &str) -> Result<()> {
        if access == Access::Place {
            bail_unsupported!("{} is not addressable", what);
        }
        Ok(())
    }

    fn finish_place(&mut self, ptr: ValueId, access: Access) -> Result<ValueId> {
        match access {
            Access::Place => Ok(ptr),
            Access::Value => Ok(self.builder.push_load(ptr)?),
        }
    }

    fn ir_type_of(&self, value: ValueId) -> Type {
        self.builder.value_type(value).clone()
    }

    // =========================================================================
    // Constants and conversions
    // =========================================================================

    pub(crate) fn constant_int(&mut self, value: i64, ty: &Type) -> Result<ValueId> {
        match NumericKind::of(ty) {
            NumericKind::SignedInt | NumericKind::UnsignedInt => Ok(self.builder.push_int(value, ty.clone())?),
            NumericKind::Float => Ok(self.builder.push_float(value as f64, ty.clone())?),
            NumericKind::Bool => Ok(self.builder.push_bool(value != 0)?),
            _ => bail_unsupported!("integer constant of type {}", format_type(ty)),
        }
    }

    pub(crate) fn constant_float(&mut self, value: f64, ty: &Type) -> Result<ValueId> {
        match NumericKind::of(ty) {
            NumericKind::Float => Ok(self.builder.push_float(value, ty.clone())?),
            NumericKind::SignedInt | NumericKind::UnsignedInt => {
                Ok(self.builder.push_int(value.trunc() as i64, ty.clone())?)
            }
            NumericKind::Bool => Ok(self.builder.push_bool(value != 0.0)?),
            _ => bail_unsupported!("floating constant of type {}", format_type(ty)),
        }
    }

    /// Zero value of any type.
    pub(crate) fn zero(&mut self, ty: &Type) -> Result<ValueId> {
        if types::is_scalar(ty) { self.constant_int(0, ty) } else { Ok(self.builder.push_null(ty.clone())?) }
    }

    /// Convert `value` to `target` with C++ conversion semantics.
    pub(crate) fn coerce(&mut self, value: ValueId, target: &Type) -> Result<ValueId> {
        let from = self.ir_type_of(value);
        if &from == target {
            return Ok(value);
        }
        let (from_kind, to_kind) = (NumericKind::of(&from), NumericKind::of(target));
        if to_kind == NumericKind::Bool && from_kind.is_arithmetic() {
            let zero = self.zero(&from)?;
            // NaN is truthy, so floats compare unordered
            let op = if from_kind == NumericKind::Float { BinOp::FUnordNe } else { BinOp::INe };
            return Ok(self.builder.push_binop(op, value, zero)?);
        }
        if from_kind == NumericKind::Bool && to_kind.is_arithmetic() {
            let one = self.constant_int(1, target)?;
            let zero = self.zero(target)?;
            return Ok(self.builder.push_select(value, one, zero)?);
        }
        match ops::conversion(from_kind, to_kind) {
            Some(op) => Ok(self.builder.push_convert(op, value, target.clone())?),
            None => bail_unsupported!("cannot convert {} to {}", format_type(&from), format_type(target)),
        }
    }

    pub(crate) fn to_bool(&mut self, value: ValueId) -> Result<ValueId> {
        self.coerce(value, &types::bool())
    }

    /// Integral promotion of bool operands.
    fn promote(&mut self, value: ValueId) -> Result<ValueId> {
        if types::is_bool(self.builder.value_type(value)) { self.coerce(value, &types::i32()) } else { Ok(value) }
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn lower_decl_ref(&mut self, name: &str, access: Access) -> Result<ValueId> {
        let binding = self
            .env
            .get(name)
            .or_else(|| self.members.get(name))
            .copied()
            .ok_or_else(|| err_unsupported!("reference to unknown name '{}'", name))?;
        match (binding, access) {
            (BindingKind::Slot(ptr), access) => self.finish_place(ptr, access),
            (BindingKind::PointerValue(value), Access::Value) => Ok(value),
            (BindingKind::PointerValue(_), Access::Place) => {
                bail_unsupported!("pointer variable '{}' cannot be assigned or addressed", name)
            }
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr, expr: &Expr, access: Access) -> Result<ValueId> {
        match op {
            UnaryOp::Deref => {
                let ptr = self.lower_expr(operand, Access::Value)?;
                if !types::is_pointer(self.builder.value_type(ptr)) {
                    bail_unsupported!("dereference of a non-pointer value");
                }
                self.finish_place(ptr, access)
            }
            UnaryOp::AddrOf => {
                Self::rvalue_only(access, "address-of result")?;
                self.lower_expr(operand, Access::Place)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                self.lower_increment(op, operand, access)
            }
            UnaryOp::Not => {
                Self::rvalue_only(access, "'!' result")?;
                let value = self.lower_expr(operand, Access::Value)?;
                let cond = self.to_bool(value)?;
                Ok(self.builder.push_unary(UnOp::LogicalNot, cond)?)
            }
            UnaryOp::Minus | UnaryOp::Plus | UnaryOp::BitNot => {
                Self::rvalue_only(access, "unary operator result")?;
                let value = self.lower_expr(operand, Access::Value)?;
                let value = self.promote(value)?;
                let kind = NumericKind::of(self.builder.value_type(value));
                let result = match (op, kind) {
                    (UnaryOp::Plus, kind) if kind.is_arithmetic() => value,
                    (UnaryOp::Minus, NumericKind::Float) => self.builder.push_unary(UnOp::FNegate, value)?,
                    (UnaryOp::Minus, kind) if kind.is_integer() => self.builder.push_unary(UnOp::SNegate, value)?,
                    (UnaryOp::BitNot, kind) if kind.is_integer() => self.builder.push_unary(UnOp::Not, value)?,
                    _ => bail_unsupported!("unary {:?} on {:?} operand", op, kind),
                };
                let target = self.value_type(&expr.ty);
                self.coerce(result, &target)
            }
        }
    }

    fn lower_increment(&mut self, op: UnaryOp, operand: &Expr, access: Access) -> Result<ValueId> {
        let ptr = self.lower_expr(operand, Access::Place)?;
        let old = self.builder.push_load(ptr)?;
        let ty = self.ir_type_of(old);
        let increment = matches!(op, UnaryOp::PreInc | UnaryOp::PostInc);
        let bin = match (NumericKind::of(&ty), increment) {
            (NumericKind::Float, true) => BinOp::FAdd,
            (NumericKind::Float, false) => BinOp::FSub,
            (kind, true) if kind.is_integer() => BinOp::IAdd,
            (kind, false) if kind.is_integer() => BinOp::ISub,
            (kind, _) => bail_unsupported!("increment of {:?} operand", kind),
        };
        let one = self.constant_int(1, &ty)?;
        let new = self.builder.push_binop(bin, old, one)?;
        self.builder.push_store(ptr, new)?;
        match (op, access) {
            (UnaryOp::PreInc | UnaryOp::PreDec, Access::Place) => Ok(ptr),
            (UnaryOp::PreInc | UnaryOp::PreDec, Access::Value) => Ok(new),
            (_, Access::Place) => bail_unsupported!("postfix increment result is not addressable"),
            (_, Access::Value) => Ok(old),
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, expr: &Expr, access: Access) -> Result<ValueId> {
        match op {
            BinaryOp::Assign => self.lower_assign(lhs, rhs, access),
            BinaryOp::Comma => {
                self.lower_discarded(lhs)?;
                self.lower_expr(rhs, access)
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                Self::rvalue_only(access, "logical operator result")?;
                self.lower_short_circuit(op, lhs, rhs)
            }
            _ => {
                Self::rvalue_only(access, "arithmetic result")?;
                let l = self.lower_expr(lhs, Access::Value)?;
                let r = self.lower_expr(rhs, Access::Value)?;
                let result = self.arith(op, l, r)?;
                if op.is_comparison() {
                    return Ok(result);
                }
                let target = self.value_type(&expr.ty);
                self.coerce(result, &target)
            }
        }
    }

    /// Apply an arithmetic, bitwise or comparison operator after the usual
    /// arithmetic conversions.
    fn arith(&mut self, op: BinaryOp, l: ValueId, r: ValueId) -> Result<ValueId> {
        let (lt, rt) = (self.ir_type_of(l), self.ir_type_of(r));
        let operand_ty = if (op == BinaryOp::Eq || op == BinaryOp::Ne) && types::is_bool(&lt) && types::is_bool(&rt) {
            types::bool()
        } else if op.is_shift() {
            // The result has the promoted type of the left operand
            if types::is_bool(&lt) { types::i32() } else { lt.clone() }
        } else {
            types::common_arithmetic_type(&lt, &rt).ok_or_else(|| {
                err_unsupported!("operator '{}' on {} and {}", op.symbol(), format_type(&lt), format_type(&rt))
            })?
        };
        let l = self.coerce(l, &operand_ty)?;
        let r = self.coerce(r, &operand_ty)?;
        let kind = NumericKind::of(&operand_ty);
        let ir_op = ops::binary_op(op, kind)
            .ok_or_else(|| err_unsupported!("operator '{}' on {:?} operands", op.symbol(), kind))?;
        log::trace!("'{}' on {} lowered to {}", op.symbol(), format_type(&operand_ty), ir_op.name());
        Ok(self.builder.push_binop(ir_op, l, r)?)
    }

    fn lower_assign(&mut self, lhs: &Expr, rhs: &Expr, access: Access) -> Result<ValueId> {
        // The right operand is sequenced first
        let value = self.lower_expr(rhs, Access::Value)?;
        let ptr = self.lower_expr(lhs, Access::Place)?;
        let target = types::pointee(self.builder.value_type(ptr))
            .cloned()
            .ok_or_else(|| err_translate!("assignment target is not a pointer"))?;
        let value = self.coerce(value, &target)?;
        self.builder.push_store(ptr, value)?;
        Ok(if access == Access::Place { ptr } else { value })
    }

    fn lower_compound_assign(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, access: Access) -> Result<ValueId> {
        let value = self.lower_expr(rhs, Access::Value)?;
        let ptr = self.lower_expr(lhs, Access::Place)?;
        let old = self.builder.push_load(ptr)?;
        let target = self.ir_type_of(old);
        let result = self.arith(op, old, value)?;
        let result = self.coerce(result, &target)?;
        self.builder.push_store(ptr, result)?;
        Ok(if access == Access::Place { ptr } else { result })
    }

    fn lower_short_circuit(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<ValueId> {
        let l = self.lower_expr(lhs, Access::Value)?;
        let l = self.to_bool(l)?;
        let rhs_block = self.builder.create_block();
        let (merge, params) = self.builder.create_block_with_params(vec![types::bool()]);
        let is_and = op == BinaryOp::LogicalAnd;
        // Value of the whole expression when the right side is skipped
        let short = self.builder.push_bool(!is_and)?;
        self.builder.mark_selection_header(merge)?;
        let term = if is_and {
            Terminator::CondBranch {
                cond: l,
                then_target: rhs_block,
                then_args: vec![],
                else_target: merge,
                else_args: vec![short],
            }
        } else {
            Terminator::CondBranch {
                cond: l,
                then_target: merge,
                then_args: vec![short],
                else_target: rhs_block,
                else_args: vec![],
            }
        };
        self.builder.terminate(term)?;

        self.builder.switch_to_block(rhs_block)?;
        let r = self.lower_expr(rhs, Access::Value)?;
        let r = self.to_bool(r)?;
        self.builder.terminate(Terminator::Branch {
            target: merge,
            args: vec![r],
        })?;
        self.builder.switch_to_block(merge)?;
        Ok(params[0])
    }

    fn lower_conditional(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr, expr: &Expr) -> Result<ValueId> {
        let ty = self.value_type(&expr.ty);
        if types::is_void(&ty) {
            bail_unsupported!("conditional expression of type void");
        }
        let c = self.lower_expr(cond, Access::Value)?;
        let c = self.to_bool(c)?;
        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let (merge, params) = self.builder.create_block_with_params(vec![ty.clone()]);
        self.builder.mark_selection_header(merge)?;
        self.builder.terminate(Terminator::CondBranch {
            cond: c,
            then_target: then_block,
            then_args: vec![],
            else_target: else_block,
            else_args: vec![],
        })?;

        for (block, arm) in [(then_block, then_expr), (else_block, else_expr)] {
            self.builder.switch_to_block(block)?;
            let value = self.lower_expr(arm, Access::Value)?;
            let value = self.coerce(value, &ty)?;
            self.builder.terminate(Terminator::Branch {
                target: merge,
                args: vec![value],
            })?;
        }
        self.builder.switch_to_block(merge)?;
        Ok(params[0])
    }

    // =========================================================================
    // Addressing
    // =========================================================================

    fn lower_subscript(&mut self, base: &Expr, index: &Expr) -> Result<ValueId> {
        let idx = self.lower_expr(index, Access::Value)?;
        let idx = self.promote(idx)?;
        if !NumericKind::of(self.builder.value_type(idx)).is_integer() {
            bail_unsupported!("array subscript is not an integer");
        }
        match base.ty.non_reference() {
            SourceType::Array { .. } => {
                let base_ptr = self.lower_expr(base, Access::Place)?;
                let ptr_ty = self.ir_type_of(base_ptr);
                let (space, elem) = match (types::address_space(&ptr_ty), types::pointee(&ptr_ty).and_then(types::element)) {
                    (Some(space), Some(elem)) => (space, elem.clone()),
                    _ => bail_unsupported!("subscript base is not an array ({})", format_type(&ptr_ty)),
                };
                Ok(self.builder.push_access_chain(base_ptr, vec![idx], types::pointer(space, elem))?)
            }
            SourceType::Pointer { .. } => {
                let ptr = self.lower_expr(base, Access::Value)?;
                if types::address_space(self.builder.value_type(ptr)) != Some(AddressSpace::StorageBuffer) {
                    bail_unsupported!("pointer arithmetic outside the element buffer");
                }
                Ok(self.builder.push_ptr_access_chain(ptr, idx)?)
            }
            other => bail_unsupported!("subscript on '{}'", other.spelling()),
        }
    }

    fn lower_member(&mut self, base: Option<&Expr>, field: &str, arrow: bool) -> Result<ValueId> {
        let Some(base) = base else {
            let binding = self
                .members
                .get(field)
                .cloned()
                .ok_or_else(|| err_unsupported!("'{}' is not a member of the enclosing class", field))?;
            return match binding {
                BindingKind::Slot(ptr) => Ok(ptr),
                BindingKind::PointerValue(_) => bail_unsupported!("member '{}' is a pointer", field),
            };
        };

        let (base_ptr, record_ty) = if arrow {
            match base.ty.non_reference() {
                SourceType::Pointer { pointee } => (self.lower_expr(base, Access::Value)?, pointee.as_ref()),
                other => bail_unsupported!("'->' on '{}'", other.spelling()),
            }
        } else {
            (self.lower_expr(base, Access::Place)?, base.ty.non_reference())
        };
        let SourceType::Record(record) = record_ty else {
            bail_unsupported!("member access on '{}'", record_ty.spelling());
        };
        let index = record
            .field_index(field)
            .ok_or_else(|| err_unsupported!("'{}' has no field '{}'", record.name, field))?;

        let ptr_ty = self.ir_type_of(base_ptr);
        let space = types::address_space(&ptr_ty)
            .ok_or_else(|| err_translate!("member base of '{}' is not a pointer", field))?;
        let field_ty = types::pointee(&ptr_ty)
            .and_then(|agg| types::component(agg, Some(index as u32)))
            .cloned()
            .ok_or_else(|| err_unsupported!("layout of '{}' is not available on the device", record.name))?;
        let index_value = self.builder.push_int(index as i64, types::i32())?;
        Ok(self.builder.push_access_chain(base_ptr, vec![index_value], types::pointer(space, field_ty))?)
    }

    fn lower_cast(&mut self, operand: &Expr, expr: &Expr, access: Access) -> Result<ValueId> {
        let target = self.value_type(&expr.ty);
        if access == Access::Place {
            if is_lvalue(expr) {
                return self.lower_expr(operand, Access::Place);
            }
            bail_unsupported!("cast result is not addressable");
        }
        if types::is_void(&target) {
            bail_translate!("void cast used as a value");
        }
        let value = self.lower_expr(operand, Access::Value)?;
        self.coerce(value, &target)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Lower a call. Void calls produce no value.
    pub(crate) fn lower_call(&mut self, callee: &str, args: &[Expr], expr: &Expr) -> Result<Option<ValueId>> {
        let methods = self.methods;
        if let Some(signature) = methods.get(callee) {
            return self.lower_method_call(callee, signature, args);
        }
        if let Some(func) = MathFunction::lookup(callee) {
            return self.lower_math(func, args, expr).map(Some);
        }
        match self.class {
            Some(class) => bail_unsupported!("'{}' is neither a member of '{}' nor a device math function", callee, class.name),
            None => bail_unsupported!("call to '{}' is not supported on the device", callee),
        }
    }

    fn lower_math(&mut self, func: MathFunction, args: &[Expr], expr: &Expr) -> Result<ValueId> {
        if args.len() != func.arity() {
            bail_unsupported!("{:?} expects {} arguments, got {}", func, func.arity(), args.len());
        }
        let result_ty = self.value_type(&expr.ty);
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.lower_expr(arg, Access::Value)?);
        }

        let result_kind = NumericKind::of(&result_ty);
        match func {
            MathFunction::Abs if result_kind.is_integer() => {
                let value = self.coerce(values[0], &result_ty)?;
                Ok(self.builder.push_math(MathOp::SAbs, vec![value], result_ty)?)
            }
            MathFunction::Min | MathFunction::Max => {
                let ty = if result_kind.is_arithmetic() {
                    result_ty
                } else {
                    let (a, b) = (self.ir_type_of(values[0]), self.ir_type_of(values[1]));
                    types::common_arithmetic_type(&a, &b)
                        .ok_or_else(|| err_unsupported!("{:?} on non-arithmetic operands", func))?
                };
                let a = self.coerce(values[0], &ty)?;
                let b = self.coerce(values[1], &ty)?;
                let lt = ops::binary_op(BinaryOp::Lt, NumericKind::of(&ty))
                    .ok_or_else(|| err_unsupported!("{:?} on {} operands", func, format_type(&ty)))?;
                // min(a, b) is (b < a) ? b : a and max(a, b) is (a < b) ? b : a
                if func == MathFunction::Min {
                    let cond = self.builder.push_binop(lt, b, a)?;
                    Ok(self.builder.push_select(cond, b, a)?)
                } else {
                    let cond = self.builder.push_binop(lt, a, b)?;
                    Ok(self.builder.push_select(cond, b, a)?)
                }
            }
            _ => {
                let float_ty = if result_kind == NumericKind::Float { result_ty.clone() } else { types::f32() };
                // cbrt goes through pow
                let device_op = math_op(func).unwrap_or(MathOp::Pow);
                if types::is_float64(&float_ty) && !device_op.accepts_f64() {
                    bail_unsupported!("{:?} has no double-precision form on the device", func);
                }
                let mut operands = Vec::with_capacity(values.len());
                for value in values {
                    operands.push(self.coerce(value, &float_ty)?);
                }
                let result = match math_op(func) {
                    Some(op) => self.builder.push_math(op, operands, float_ty)?,
                    None => self.lower_cbrt(operands[0], &float_ty)?,
                };
                self.coerce(result, &result_ty)
            }
        }
    }

    /// Real cube root through pow, mirrored for negative inputs.
    fn lower_cbrt(&mut self, x: ValueId, ty: &Type) -> Result<ValueId> {
        let third = self.constant_float(1.0 / 3.0, ty)?;
        let magnitude = self.builder.push_math(MathOp::FAbs, vec![x], ty.clone())?;
        let root = self.builder.push_math(MathOp::Pow, vec![magnitude, third], ty.clone())?;
        let negated = self.builder.push_unary(UnOp::FNegate, root)?;
        let zero = self.zero(ty)?;
        let is_negative = self.builder.push_binop(BinOp::FOrdLt, x, zero)?;
        Ok(self.builder.push_select(is_negative, negated, root)?)
    }

    fn lower_method_call(
        &mut self,
        name: &str,
        signature: &MethodSignature,
        args: &[Expr],
    ) -> Result<Option<ValueId>> {
        if args.len() != signature.params.len() {
            bail_unsupported!("'{}' called with {} arguments, expects {}", name, args.len(), signature.params.len());
        }
        let mut call_args = Vec::with_capacity(args.len() + self.members.len());
        let mut copy_back = Vec::new();
        for (param, arg) in signature.params.iter().zip(args) {
            match param.kind {
                ParamKind::Value => {
                    let value = self.lower_expr(arg, Access::Value)?;
                    call_args.push(self.coerce(value, &param.ty)?);
                }
                ParamKind::Pointer => {
                    let value = self.lower_expr(arg, Access::Value)?;
                    if self.builder.value_type(value) != &param.ty {
                        bail_unsupported!("pointer argument for '{}' has the wrong type", param.name);
                    }
                    call_args.push(value);
                }
                ParamKind::Place => {
                    let arg_ptr = self.lower_reference_arg(param, arg, &mut copy_back)?;
                    call_args.push(arg_ptr);
                }
            }
        }

        let member_slots: Vec<ValueId> = self
            .members
            .values()
            .filter_map(|b| match *b {
                BindingKind::Slot(ptr) => Some(ptr),
                BindingKind::PointerValue(_) => None,
            })
            .collect();
        for slot in member_slots {
            call_args.push(self.builder.push_load(slot)?);
        }

        let result = self.builder.push_call(name, call_args, signature.return_ty.clone())?;
        for (place, tmp) in copy_back {
            let value = self.builder.push_load(tmp)?;
            self.builder.push_store(place, value)?;
        }
        Ok(result)
    }

    /// Pointer to pass for a reference parameter. Arguments that are not
    /// local objects of exactly the parameter type travel through a
    /// temporary, copied back afterwards when they denote storage.
    fn lower_reference_arg(
        &mut self,
        param: &super::ParamSpec,
        arg: &Expr,
        copy_back: &mut Vec<(ValueId, ValueId)>,
    ) -> Result<ValueId> {
        let pointee = types::pointee(&param.ty)
            .cloned()
            .ok_or_else(|| err_translate!("reference parameter '{}' is not a pointer", param.name))?;
        let local = types::address_space(&param.ty) == Some(AddressSpace::Function);

        if is_lvalue(arg) {
            let place = self.lower_expr(arg, Access::Place)?;
            let place_ty = self.ir_type_of(place);
            if place_ty == param.ty && self.slots.contains(&place) {
                return Ok(place);
            }
            if !local {
                bail_unsupported!("argument for '{}' cannot be passed by reference", param.name);
            }
            let tmp = self.temporary(&pointee)?;
            let value = self.builder.push_load(place)?;
            let value = self.coerce(value, &pointee)?;
            self.builder.push_store(tmp, value)?;
            if types::pointee(&place_ty) == Some(&pointee) {
                copy_back.push((place, tmp));
            }
            return Ok(tmp);
        }

        if !local {
            bail_unsupported!("temporary bound to reference parameter '{}'", param.name);
        }
        let value = self.lower_expr(arg, Access::Value)?;
        let value = self.coerce(value, &pointee)?;
        let tmp = self.temporary(&pointee)?;
        self.builder.push_store(tmp, value)?;
        Ok(tmp)
    }

    fn temporary(&mut self, ty: &Type) -> Result<ValueId> {
        let slot = self.builder.push_alloca(ty.clone());
        self.slots.insert(slot);
        Ok(slot)
    }
}
