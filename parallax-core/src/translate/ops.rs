//! Operator dispatch.
//!
//! Operands are classified once by [`NumericKind`]; the tables below map
//! (source operator, kind) to the IR instruction family. A missing entry
//! means the operator is not defined for that kind.

use crate::ast::BinaryOp;
use crate::ir::ssa::{BinOp, ConvertOp};
use crate::types::NumericKind;

use NumericKind::{Bool, Float, SignedInt, UnsignedInt};

const BINARY_OPS: &[(BinaryOp, NumericKind, BinOp)] = &[
    (BinaryOp::Add, Float, BinOp::FAdd),
    (BinaryOp::Add, SignedInt, BinOp::IAdd),
    (BinaryOp::Add, UnsignedInt, BinOp::IAdd),
    (BinaryOp::Sub, Float, BinOp::FSub),
    (BinaryOp::Sub, SignedInt, BinOp::ISub),
    (BinaryOp::Sub, UnsignedInt, BinOp::ISub),
    (BinaryOp::Mul, Float, BinOp::FMul),
    (BinaryOp::Mul, SignedInt, BinOp::IMul),
    (BinaryOp::Mul, UnsignedInt, BinOp::IMul),
    (BinaryOp::Div, Float, BinOp::FDiv),
    (BinaryOp::Div, SignedInt, BinOp::SDiv),
    (BinaryOp::Div, UnsignedInt, BinOp::UDiv),
    (BinaryOp::Rem, Float, BinOp::FRem),
    (BinaryOp::Rem, SignedInt, BinOp::SRem),
    (BinaryOp::Rem, UnsignedInt, BinOp::UMod),
    (BinaryOp::Lt, Float, BinOp::FOrdLt),
    (BinaryOp::Lt, SignedInt, BinOp::SLt),
    (BinaryOp::Lt, UnsignedInt, BinOp::ULt),
    (BinaryOp::Le, Float, BinOp::FOrdLe),
    (BinaryOp::Le, SignedInt, BinOp::SLe),
    (BinaryOp::Le, UnsignedInt, BinOp::ULe),
    (BinaryOp::Gt, Float, BinOp::FOrdGt),
    (BinaryOp::Gt, SignedInt, BinOp::SGt),
    (BinaryOp::Gt, UnsignedInt, BinOp::UGt),
    (BinaryOp::Ge, Float, BinOp::FOrdGe),
    (BinaryOp::Ge, SignedInt, BinOp::SGe),
    (BinaryOp::Ge, UnsignedInt, BinOp::UGe),
    (BinaryOp::Eq, Float, BinOp::FOrdEq),
    (BinaryOp::Eq, SignedInt, BinOp::IEq),
    (BinaryOp::Eq, UnsignedInt, BinOp::IEq),
    (BinaryOp::Eq, Bool, BinOp::LogicalEq),
    // Unordered so NaN != NaN holds
    (BinaryOp::Ne, Float, BinOp::FUnordNe),
    (BinaryOp::Ne, SignedInt, BinOp::INe),
    (BinaryOp::Ne, UnsignedInt, BinOp::INe),
    (BinaryOp::Ne, Bool, BinOp::LogicalNe),
    (BinaryOp::BitAnd, SignedInt, BinOp::BitAnd),
    (BinaryOp::BitAnd, UnsignedInt, BinOp::BitAnd),
    (BinaryOp::BitOr, SignedInt, BinOp::BitOr),
    (BinaryOp::BitOr, UnsignedInt, BinOp::BitOr),
    (BinaryOp::BitXor, SignedInt, BinOp::BitXor),
    (BinaryOp::BitXor, UnsignedInt, BinOp::BitXor),
    (BinaryOp::Shl, SignedInt, BinOp::Shl),
    (BinaryOp::Shl, UnsignedInt, BinOp::Shl),
    (BinaryOp::Shr, SignedInt, BinOp::ShrArith),
    (BinaryOp::Shr, UnsignedInt, BinOp::ShrLogical),
];

/// IR instruction for `op` applied to operands of `kind`.
pub fn binary_op(op: BinaryOp, kind: NumericKind) -> Option<BinOp> {
    BINARY_OPS.iter().find(|(o, k, _)| *o == op && *k == kind).map(|(_, _, ir)| *ir)
}

/// How a value converts between two non-bool arithmetic kinds. Width
/// changes between floats use `FConvert`; signedness changes between
/// same-width integers are bit reinterpretations.
pub fn conversion(from: NumericKind, to: NumericKind) -> Option<ConvertOp> {
    match (from, to) {
        (Float, SignedInt) => Some(ConvertOp::FToS),
        (Float, UnsignedInt) => Some(ConvertOp::FToU),
        (SignedInt, Float) => Some(ConvertOp::SToF),
        (UnsignedInt, Float) => Some(ConvertOp::UToF),
        (Float, Float) => Some(ConvertOp::FConvert),
        (SignedInt, UnsignedInt) | (UnsignedInt, SignedInt) => Some(ConvertOp::Bitcast),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_follows_operand_kind() {
        assert_eq!(binary_op(BinaryOp::Mul, Float), Some(BinOp::FMul));
        assert_eq!(binary_op(BinaryOp::Mul, SignedInt), Some(BinOp::IMul));
        assert_eq!(binary_op(BinaryOp::Div, UnsignedInt), Some(BinOp::UDiv));
        assert_eq!(binary_op(BinaryOp::Lt, UnsignedInt), Some(BinOp::ULt));
        assert_eq!(binary_op(BinaryOp::Shr, SignedInt), Some(BinOp::ShrArith));
        assert_eq!(binary_op(BinaryOp::Ne, Float), Some(BinOp::FUnordNe));
    }

    #[test]
    fn test_undefined_combinations() {
        assert_eq!(binary_op(BinaryOp::BitAnd, Float), None);
        assert_eq!(binary_op(BinaryOp::Add, NumericKind::Pointer), None);
        assert_eq!(binary_op(BinaryOp::Assign, Float), None);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(conversion(Float, SignedInt), Some(ConvertOp::FToS));
        assert_eq!(conversion(UnsignedInt, Float), Some(ConvertOp::UToF));
        assert_eq!(conversion(SignedInt, UnsignedInt), Some(ConvertOp::Bitcast));
        assert_eq!(conversion(Bool, Float), None);
    }
}
