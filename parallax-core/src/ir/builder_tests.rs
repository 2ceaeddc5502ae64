#![cfg(test)]

use crate::ir::builder::*;
use crate::ir::ssa::{BinOp, BlockId, ControlHeader, InstKind, Terminator};
use crate::types::{self, AddressSpace};

#[test]
fn test_simple_function() {
    // fn add(x: i32, y: i32) -> i32 { x + y }
    let mut builder = FuncBuilder::new(
        "add",
        vec![(types::i32(), "x".to_string()), (types::i32(), "y".to_string())],
        types::i32(),
    );

    let x = builder.get_param(0);
    let y = builder.get_param(1);
    let sum = builder.push_binop(BinOp::IAdd, x, y).unwrap();
    builder.terminate(Terminator::Return(sum)).unwrap();

    let body = builder.finish().unwrap();
    assert_eq!(body.name, "add");
    assert_eq!(body.params.len(), 2);
    assert_eq!(body.num_blocks(), 1);
    assert_eq!(body.get_value_type(sum), &types::i32());
}

#[test]
fn test_comparison_yields_bool() {
    let mut builder = FuncBuilder::new("lt", vec![(types::f32(), "x".to_string())], types::bool());
    let x = builder.get_param(0);
    let zero = builder.push_float(0.0, types::f32()).unwrap();
    let lt = builder.push_binop(BinOp::FOrdLt, x, zero).unwrap();
    assert_eq!(builder.value_type(lt), &types::bool());
}

#[test]
fn test_switch_requires_termination() {
    let mut builder = FuncBuilder::new("f", vec![], types::void());
    let next = builder.create_block();
    assert_eq!(
        builder.switch_to_block(next),
        Err(BuilderError::UnterminatedBlock(BlockId::ENTRY))
    );

    builder.terminate(Terminator::Branch { target: next, args: vec![] }).unwrap();
    builder.switch_to_block(next).unwrap();
    builder.terminate(Terminator::ReturnVoid).unwrap();
    assert!(builder.finish().is_ok());
}

#[test]
fn test_no_push_after_terminator() {
    let mut builder = FuncBuilder::new("f", vec![], types::void());
    builder.terminate(Terminator::ReturnVoid).unwrap();
    assert_eq!(
        builder.push_int(1, types::i32()),
        Err(BuilderError::BlockAlreadyTerminated(BlockId::ENTRY))
    );
    assert_eq!(
        builder.terminate(Terminator::Unreachable),
        Err(BuilderError::BlockAlreadyTerminated(BlockId::ENTRY))
    );
}

#[test]
fn test_finish_rejects_unterminated_block() {
    let mut builder = FuncBuilder::new("f", vec![], types::void());
    let dangling = builder.create_block();
    builder.terminate(Terminator::ReturnVoid).unwrap();
    assert_eq!(builder.finish().err(), Some(BuilderError::UnterminatedBlock(dangling)));
}

#[test]
fn test_alloca_hoisted_to_entry() {
    let mut builder = FuncBuilder::new("f", vec![], types::void());
    let one = builder.push_int(1, types::i32()).unwrap();
    let body_block = builder.create_block();
    builder.terminate(Terminator::Branch { target: body_block, args: vec![] }).unwrap();
    builder.switch_to_block(body_block).unwrap();

    // Requested from a later block, still lands first in the entry block
    let slot = builder.push_alloca(types::i32());
    builder.push_store(slot, one).unwrap();
    builder.terminate(Terminator::ReturnVoid).unwrap();

    let body = builder.finish().unwrap();
    assert_eq!(body.get_value_type(slot), &types::pointer(AddressSpace::Function, types::i32()));
    let entry = body.get_block(BlockId::ENTRY);
    let first = body.get_inst(entry.insts[0]);
    assert!(matches!(first.kind, InstKind::Alloca { .. }));
    assert_eq!(first.result, Some(slot));
    assert!(body.get_block(body_block).insts.iter().all(|&i| !matches!(body.get_inst(i).kind, InstKind::Alloca { .. })));
}

#[test]
fn test_load_requires_pointer() {
    let mut builder = FuncBuilder::new("f", vec![(types::i32(), "x".to_string())], types::void());
    let x = builder.get_param(0);
    assert_eq!(builder.push_load(x), Err(BuilderError::NotAPointer(x)));

    let slot = builder.push_alloca(types::f32());
    let loaded = builder.push_load(slot).unwrap();
    assert_eq!(builder.value_type(loaded), &types::f32());
}

#[test]
fn test_block_params() {
    let mut builder = FuncBuilder::new("f", vec![(types::bool(), "c".to_string())], types::i32());
    let c = builder.get_param(0);
    let then_block = builder.create_block();
    let else_block = builder.create_block();
    let (merge, values) = builder.create_block_with_params(vec![types::i32()]);
    builder.mark_selection_header(merge).unwrap();
    builder
        .terminate(Terminator::CondBranch {
            cond: c,
            then_target: then_block,
            then_args: vec![],
            else_target: else_block,
            else_args: vec![],
        })
        .unwrap();

    for (block, value) in [(then_block, 1), (else_block, 2)] {
        builder.switch_to_block(block).unwrap();
        let v = builder.push_int(value, types::i32()).unwrap();
        builder.terminate(Terminator::Branch { target: merge, args: vec![v] }).unwrap();
    }
    builder.switch_to_block(merge).unwrap();
    builder.terminate(Terminator::Return(values[0])).unwrap();

    let body = builder.finish().unwrap();
    assert_eq!(
        body.get_block(BlockId::ENTRY).control,
        Some(ControlHeader::Selection { merge })
    );
    assert_eq!(body.predecessors(merge), vec![then_block, else_block]);
    assert_eq!(body.block_order()[0], BlockId::ENTRY);
    assert_eq!(body.block_order().last(), Some(&merge));
}

#[test]
fn test_void_call_has_no_value() {
    let mut builder = FuncBuilder::new("f", vec![], types::void());
    assert_eq!(builder.push_call("g", vec![], types::void()).unwrap(), None);
    assert!(builder.push_call("h", vec![], types::f32()).unwrap().is_some());
}

#[test]
fn test_rollback_discards_partial_statement() {
    let mut builder = FuncBuilder::new("f", vec![(types::bool(), "c".to_string())], types::void());
    let kept = builder.push_int(1, types::i32()).unwrap();
    let checkpoint = builder.checkpoint().unwrap();

    // A half-built selection: header terminated, arm open, merge never finished
    let slot = builder.push_alloca(types::f32());
    let c = builder.get_param(0);
    let then_block = builder.create_block();
    let merge = builder.create_block();
    builder.push_int(2, types::i32()).unwrap();
    builder.mark_selection_header(merge).unwrap();
    builder
        .terminate(Terminator::CondBranch {
            cond: c,
            then_target: then_block,
            then_args: vec![],
            else_target: merge,
            else_args: vec![],
        })
        .unwrap();
    builder.switch_to_block(then_block).unwrap();

    builder.rollback(checkpoint);
    assert_eq!(builder.current_block(), Some(BlockId::ENTRY));
    assert!(!builder.is_current_terminated());
    builder.terminate(Terminator::ReturnVoid).unwrap();

    let body = builder.finish().unwrap();
    assert_eq!(body.num_blocks(), 1);
    let entry = body.get_block(BlockId::ENTRY);
    assert_eq!(entry.control, None);
    let results: Vec<_> = entry.insts.iter().map(|&i| body.get_inst(i).result).collect();
    assert_eq!(results, vec![Some(slot), Some(kept)]);
}
