#![cfg(test)]

use indexmap::IndexMap;

use crate::ast::build::*;
use crate::ast::{BinaryOp, Field, RecordType, SourceType, UnaryOp};
use crate::config::FailureMode;
use crate::diags::TranslationWarning;
use crate::error::CompilerError;
use crate::ir::ssa::{BinOp, ConvertOp, InstKind, MathOp, UnOp};
use crate::ir::FuncBody;
use crate::translate::*;
use crate::types::{self, AddressSpace, TypeMapper};

fn translate(lambda: &crate::ast::Lambda) -> Translation {
    let mut mapper = TypeMapper::new();
    translate_lambda(lambda, &mut mapper, FailureMode::Strict).expect("translation failed")
}

/// `[](float x) -> float { return <expr>; }`
fn float_fn(expr: crate::ast::Expr) -> FuncBody {
    let l = lambda(vec![param("x", float())], float(), ret(expr), vec![]);
    let t = translate(&l);
    t.module.get(CALLABLE_NAME).unwrap().clone()
}

fn insts(body: &FuncBody) -> Vec<InstKind> {
    body.block_ids()
        .flat_map(|b| body.get_block(b).insts.iter().map(|&i| body.get_inst(i).kind.clone()).collect::<Vec<_>>())
        .collect()
}

fn has_binop(body: &FuncBody, op: BinOp) -> bool {
    insts(body).iter().any(|k| matches!(k, InstKind::Binary { op: o, .. } if *o == op))
}

fn has_math(body: &FuncBody, op: MathOp) -> bool {
    insts(body).iter().any(|k| matches!(k, InstKind::Math { op: o, .. } if *o == op))
}

fn count_selects(body: &FuncBody) -> usize {
    insts(body).iter().filter(|k| matches!(k, InstKind::Select { .. })).count()
}

#[test]
fn test_float_arithmetic() {
    let x = var("x", float());
    let body = float_fn(binary(BinaryOp::Mul, x, float_lit(2.0), float()));
    assert!(has_binop(&body, BinOp::FMul));
    assert!(!insts(&body).iter().any(|k| matches!(k, InstKind::Convert { .. })));
}

#[test]
fn test_int_operand_converted_to_float() {
    // x * 2 with an int literal
    let x = var("x", float());
    let body = float_fn(binary(BinaryOp::Mul, x, int_lit(2), float()));
    assert!(insts(&body).iter().any(|k| matches!(k, InstKind::Convert { op: ConvertOp::SToF, .. })));
    assert!(has_binop(&body, BinOp::FMul));
}

#[test]
fn test_unsigned_comparison() {
    let uint = SourceType::uint();
    let l = lambda(
        vec![param("n", uint.clone())],
        SourceType::Bool,
        ret(binary(BinaryOp::Lt, var("n", uint), int_lit(10), SourceType::Bool)),
        vec![],
    );
    let body = translate(&l).module.functions[0].clone();
    // The int literal is converted to the common unsigned type
    assert!(has_binop(&body, BinOp::ULt));
    assert!(!has_binop(&body, BinOp::SLt));
}

#[test]
fn test_float_inequality_is_unordered() {
    let body = float_fn(conditional(
        binary(BinaryOp::Ne, var("x", float()), var("x", float()), SourceType::Bool),
        float_lit(1.0),
        float_lit(0.0),
        float(),
    ));
    assert!(has_binop(&body, BinOp::FUnordNe));
}

#[test]
fn test_logical_and_short_circuits() {
    let x = || var("x", float());
    let cond = binary(
        BinaryOp::LogicalAnd,
        binary(BinaryOp::Gt, x(), float_lit(0.0), SourceType::Bool),
        binary(BinaryOp::Lt, x(), float_lit(1.0), SourceType::Bool),
        SourceType::Bool,
    );
    let body = float_fn(conditional(cond, x(), float_lit(0.0), float()));
    let bool_merges = body
        .blocks
        .iter()
        .filter(|b| b.params.len() == 1 && b.params[0].ty == types::bool())
        .count();
    assert_eq!(bool_merges, 1);
    // The right operand is evaluated in its own block, after the header branch
    let entry = body.get_block(crate::ir::BlockId::ENTRY);
    assert!(matches!(entry.control, Some(crate::ir::ssa::ControlHeader::Selection { .. })));
}

#[test]
fn test_conditional_yields_block_param() {
    let x = var("x", float());
    let body = float_fn(conditional(
        binary(BinaryOp::Gt, x.clone(), float_lit(0.0), SourceType::Bool),
        x,
        float_lit(0.0),
        float(),
    ));
    let merge = body.blocks.iter().find(|b| !b.params.is_empty()).expect("no merge block");
    assert_eq!(merge.params[0].ty, types::f32());
    assert!(matches!(merge.terminator, Some(crate::ir::Terminator::Return(v)) if v == merge.params[0].value));
}

#[test]
fn test_float_truthiness() {
    // !x on a float compares against zero, unordered
    let body = float_fn(conditional(
        unary(UnaryOp::Not, var("x", float()), SourceType::Bool),
        float_lit(1.0),
        float_lit(2.0),
        float(),
    ));
    assert!(has_binop(&body, BinOp::FUnordNe));
    assert!(insts(&body).iter().any(|k| matches!(k, InstKind::Unary { op: UnOp::LogicalNot, .. })));
}

#[test]
fn test_assignment_through_element_reference() {
    let x = || var("x", float());
    let l = lambda(
        vec![param("x", float_ref())],
        SourceType::Void,
        expr_stmt(assign(x(), binary(BinaryOp::Add, x(), float_lit(1.0), float()))),
        vec![],
    );
    let t = translate(&l);
    assert_eq!(t.element, ElementPassing::ByPointer);
    let body = t.module.get(CALLABLE_NAME).unwrap();
    assert_eq!(body.params[0].1, types::pointer(AddressSpace::StorageBuffer, types::f32()));
    let element = body.params[0].0;
    // No local copy of the element: loads and stores go straight to the parameter
    assert!(insts(body).iter().any(|k| matches!(k, InstKind::Store { ptr, .. } if *ptr == element)));
    assert!(insts(body).iter().any(|k| matches!(k, InstKind::Load { ptr } if *ptr == element)));
    assert!(!insts(body).iter().any(|k| matches!(k, InstKind::Alloca { .. })));
}

#[test]
fn test_compound_assign_and_increment() {
    let x = || var("x", float());
    let l = lambda(
        vec![param("x", float_ref())],
        SourceType::Void,
        block(vec![
            expr_stmt(compound(BinaryOp::Mul, x(), float_lit(2.0))),
            expr_stmt(unary(UnaryOp::PostInc, x(), float())),
        ]),
        vec![],
    );
    let t = translate(&l);
    let body = t.module.get(CALLABLE_NAME).unwrap();
    assert!(has_binop(body, BinOp::FMul));
    assert!(has_binop(body, BinOp::FAdd));
    let stores = insts(body).iter().filter(|k| matches!(k, InstKind::Store { .. })).count();
    assert_eq!(stores, 2);
}

#[test]
fn test_post_increment_yields_old_value() {
    let l = lambda(
        vec![param("x", float_ref())],
        float(),
        ret(unary(UnaryOp::PostInc, var("x", float()), float())),
        vec![],
    );
    let t = translate(&l);
    let body = t.module.get(CALLABLE_NAME).unwrap();
    let entry = body.get_block(crate::ir::BlockId::ENTRY);
    let Some(crate::ir::Terminator::Return(returned)) = entry.terminator else {
        panic!("expected a value return");
    };
    let producer = entry.insts.iter().map(|&i| body.get_inst(i)).find(|i| i.result == Some(returned)).unwrap();
    assert!(matches!(producer.kind, InstKind::Load { .. }));
}

#[test]
fn test_math_functions() {
    let x = || var("x", float());
    let body = float_fn(call("std::sqrt", vec![x()], float()));
    assert!(has_math(&body, MathOp::Sqrt));

    let body = float_fn(call("powf", vec![x(), float_lit(2.0)], float()));
    assert!(has_math(&body, MathOp::Pow));

    let body = float_fn(call("fabs", vec![x()], float()));
    assert!(has_math(&body, MathOp::FAbs));

    let body = float_fn(call("std::min", vec![x(), float_lit(1.0)], float()));
    assert!(has_binop(&body, BinOp::FOrdLt));
    assert_eq!(count_selects(&body), 1);
}

#[test]
fn test_integer_abs() {
    let l = lambda(
        vec![param("n", int())],
        int(),
        ret(call("abs", vec![var("n", int())], int())),
        vec![],
    );
    let body = translate(&l).module.functions[0].clone();
    assert!(has_math(&body, MathOp::SAbs));
    assert!(!has_math(&body, MathOp::FAbs));
}

#[test]
fn test_cbrt_keeps_sign() {
    let body = float_fn(call("cbrt", vec![var("x", float())], float()));
    assert!(has_math(&body, MathOp::Pow));
    assert!(has_math(&body, MathOp::FAbs));
    assert!(has_binop(&body, BinOp::FOrdLt));
    assert_eq!(count_selects(&body), 1);
}

#[test]
fn test_double_math_stays_double() {
    let l = lambda(
        vec![param("x", double())],
        double(),
        ret(call("sin", vec![var("x", double())], double())),
        vec![],
    );
    let body = translate(&l).module.functions[0].clone();
    let math = body.insts.iter().find(|i| matches!(i.kind, InstKind::Math { .. })).unwrap();
    assert_eq!(math.result_ty, types::f64());
}

#[test]
fn test_unknown_call_fails_strict_translation() {
    let l = lambda(
        vec![param("x", float())],
        float(),
        ret(call("printf", vec![], int())),
        vec![],
    );
    let mut mapper = TypeMapper::new();
    let err = translate_lambda(&l, &mut mapper, FailureMode::Strict).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)), "got {err}");
}

#[test]
fn test_translate_expr_rolls_back_unsupported() {
    let mut mapper = TypeMapper::new();
    let methods = IndexMap::new();
    let mut translator =
        FunctionTranslator::new("f", &[], &[], types::void(), &mut mapper, FailureMode::Strict, None, &methods)
            .unwrap();

    let unsupported = binary(BinaryOp::Add, int_lit(1), call("rand", vec![], int()), int());
    assert_eq!(translator.translate_expr(&unsupported, Access::Value).unwrap(), None);
    assert_eq!(translator.builder.current_block(), Some(crate::ir::BlockId::ENTRY));
    assert!(!translator.builder.is_current_terminated());

    let supported = translator.translate_expr(&int_lit(7), Access::Value).unwrap();
    assert!(supported.is_some());
    // Literals have no address
    assert_eq!(translator.translate_expr(&int_lit(7), Access::Place).unwrap(), None);
}

#[test]
fn test_local_array_subscript() {
    let arr_ty = SourceType::array(float(), 3);
    let l = lambda(
        vec![param("x", float())],
        float(),
        block(vec![
            decl_list("a", arr_ty.clone(), vec![var("x", float()), float_lit(1.0)]),
            ret(subscript(var("a", arr_ty), int_lit(1), float())),
        ]),
        vec![],
    );
    let t = translate(&l);
    let body = t.module.get(CALLABLE_NAME).unwrap();
    let chains: Vec<_> = body.insts.iter().filter(|i| matches!(i.kind, InstKind::AccessChain { .. })).collect();
    // Two initializer stores plus the subscript
    assert_eq!(chains.len(), 3);
    for chain in chains {
        assert_eq!(chain.result_ty, types::pointer(AddressSpace::Function, types::f32()));
    }
    // Short list zero-fills first
    assert!(body.insts.iter().any(|i| matches!(i.kind, InstKind::Null)));
}

#[test]
fn test_member_access_on_element_record() {
    let base = RecordType {
        name: "Base".to_string(),
        bases: vec![],
        fields: vec![Field { name: "id".to_string(), ty: int() }],
    };
    let particle = RecordType {
        name: "Particle".to_string(),
        bases: vec![base],
        fields: vec![
            Field { name: "x".to_string(), ty: float() },
            Field { name: "v".to_string(), ty: float() },
        ],
    };
    let record = SourceType::Record(particle);
    let p = || var("p", record.clone());
    let l = lambda(
        vec![param("p", SourceType::reference(record.clone()))],
        SourceType::Void,
        expr_stmt(compound(BinaryOp::Add, member(p(), "x", float()), member(p(), "v", float()))),
        vec![],
    );
    let t = translate(&l);
    let body = t.module.get(CALLABLE_NAME).unwrap();
    let indices: Vec<i64> = body
        .insts
        .iter()
        .filter_map(|i| match &i.kind {
            InstKind::AccessChain { indices, .. } => Some(indices[0]),
            _ => None,
        })
        .map(|idx| {
            let producer = body.insts.iter().find(|i| i.result == Some(idx)).unwrap();
            match producer.kind {
                InstKind::Int(v) => v,
                ref other => panic!("non-constant field index {other:?}"),
            }
        })
        .collect();
    // Base fields come first, so x is field 1 and v is field 2
    assert_eq!(indices, vec![2, 1]);
    for inst in body.insts.iter().filter(|i| matches!(i.kind, InstKind::AccessChain { .. })) {
        assert_eq!(types::address_space(&inst.result_ty), Some(AddressSpace::StorageBuffer));
    }
}

#[test]
fn test_reference_capture_is_downgraded() {
    let l = lambda(
        vec![param("x", float())],
        float(),
        ret(binary(BinaryOp::Mul, var("x", float()), var("scale", float()), float())),
        vec![capture("scale", float(), false), capture("total", float(), true)],
    );
    let t = translate(&l);
    assert_eq!(t.captures, vec![("scale".to_string(), types::f32()), ("total".to_string(), types::u32())]);
    assert!(t.diagnostics.warnings().iter().any(|w| matches!(
        w,
        TranslationWarning::CaptureDowngraded { name, .. } if name == "total"
    )));
    let body = t.module.get(CALLABLE_NAME).unwrap();
    assert_eq!(body.params.len(), 3);
}
