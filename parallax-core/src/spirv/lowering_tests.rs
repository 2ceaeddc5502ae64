use rspirv::dr::{self, Instruction, Operand};
use rspirv::spirv::{Capability, Decoration, Op};

use super::{generate, generate_with_diagnostics};
use crate::algorithm::ParallelAlgorithm;
use crate::ast::build::*;
use crate::ast::{BinaryOp, CallSite, Callable, Field, MethodDecl, SourceType};
use crate::config::GeneratorConfig;
use crate::diags::{Diagnostics, TranslationWarning};
use crate::error::CompilerError;
use crate::ir::{FuncBuilder, Module, Terminator};
use crate::kernel::{Dispatch, KernelCompiler, KernelModule};
use crate::layout::PushConstantLayout;
use crate::translate::ElementPassing;
use crate::types;

fn kernel_for(site: &CallSite, config: &GeneratorConfig) -> KernelModule {
    let algorithm = ParallelAlgorithm::from_qualified_name(&site.algorithm).unwrap();
    let compiler = KernelCompiler::new(config.clone());
    compiler.build_module(site, algorithm, "test_kernel").unwrap().0
}

fn compile(site: &CallSite) -> dr::Module {
    compile_with(site, &GeneratorConfig::default())
}

fn compile_with(site: &CallSite, config: &GeneratorConfig) -> dr::Module {
    let words = generate(&kernel_for(site, config), config).unwrap();
    assert_eq!(words[0], 0x07230203);
    dr::load_words(&words).unwrap()
}

fn lambda_site(algorithm: &str, param_ty: SourceType, return_ty: SourceType, body: crate::ast::Stmt) -> CallSite {
    let callable = Callable::Lambda(lambda(vec![param("x", param_ty)], return_ty, body, vec![]));
    call_site(algorithm, 7, float(), callable)
}

/// `[](float& x) { x *= 2.0f; }`
fn doubling() -> CallSite {
    let body = expr_stmt(compound(BinaryOp::Mul, var("x", float()), float_lit(2.0)));
    lambda_site("std::for_each", float_ref(), SourceType::Void, body)
}

/// `[](float x) -> float { return x + 1.0f; }`
fn increment() -> CallSite {
    let body = ret(binary(BinaryOp::Add, var("x", float()), float_lit(1.0), float()));
    lambda_site("std::transform", float(), float(), body)
}

fn function_insts(module: &dr::Module) -> impl Iterator<Item = &Instruction> {
    module.functions.iter().flat_map(|f| f.blocks.iter()).flat_map(|b| b.instructions.iter())
}

fn count_op(module: &dr::Module, op: Op) -> usize {
    function_insts(module).filter(|i| i.class.opcode == op).count()
}

fn has_capability(module: &dr::Module, capability: Capability) -> bool {
    module.capabilities.iter().any(|i| i.operands.first() == Some(&Operand::Capability(capability)))
}

/// (decoration, first literal) pairs applied to `target`.
fn decorations(module: &dr::Module, target: u32) -> Vec<(Decoration, Option<u32>)> {
    module
        .annotations
        .iter()
        .filter(|i| i.class.opcode == Op::Decorate && i.operands.first() == Some(&Operand::IdRef(target)))
        .filter_map(|i| match (&i.operands[1], i.operands.get(2)) {
            (Operand::Decoration(d), Some(Operand::LiteralBit32(n))) => Some((*d, Some(*n))),
            (Operand::Decoration(d), _) => Some((*d, None)),
            _ => None,
        })
        .collect()
}

fn global_variables(module: &dr::Module) -> Vec<&Instruction> {
    module.types_global_values.iter().filter(|i| i.class.opcode == Op::Variable).collect()
}

#[test]
fn test_header_and_entry_point() {
    let module = compile(&doubling());
    let header = module.header.as_ref().unwrap();
    assert_eq!(header.version(), (1, 3));

    let entry = &module.entry_points[0];
    assert_eq!(entry.operands[0], Operand::ExecutionModel(rspirv::spirv::ExecutionModel::GLCompute));
    assert_eq!(entry.operands[2], Operand::LiteralString("main".to_string()));
    let mode = &module.execution_modes[0];
    assert_eq!(
        &mode.operands[1..],
        &[
            Operand::ExecutionMode(rspirv::spirv::ExecutionMode::LocalSize),
            Operand::LiteralBit32(256),
            Operand::LiteralBit32(1),
            Operand::LiteralBit32(1),
        ]
    );
}

#[test]
fn test_config_overrides_entry() {
    let config = GeneratorConfig {
        local_size: [64, 1, 1],
        entry_point: "run".to_string(),
        ..GeneratorConfig::default()
    };
    let module = compile_with(&doubling(), &config);
    assert_eq!(module.entry_points[0].operands[2], Operand::LiteralString("run".to_string()));
    assert_eq!(module.execution_modes[0].operands[2], Operand::LiteralBit32(64));
}

#[test]
fn test_in_place_buffer_binding() {
    let module = compile(&doubling());
    let buffers: Vec<_> = global_variables(&module)
        .into_iter()
        .filter(|v| v.operands[0] == Operand::StorageClass(rspirv::spirv::StorageClass::StorageBuffer))
        .collect();
    assert_eq!(buffers.len(), 1);
    let decos = decorations(&module, buffers[0].result_id.unwrap());
    assert!(decos.contains(&(Decoration::DescriptorSet, Some(0))));
    assert!(decos.contains(&(Decoration::Binding, Some(0))));
    assert!(!decos.iter().any(|(d, _)| *d == Decoration::NonWritable));
}

#[test]
fn test_transform_binds_two_buffers() {
    let module = compile(&increment());
    let buffers: Vec<u32> = global_variables(&module)
        .into_iter()
        .filter(|v| v.operands[0] == Operand::StorageClass(rspirv::spirv::StorageClass::StorageBuffer))
        .filter_map(|v| v.result_id)
        .collect();
    assert_eq!(buffers.len(), 2);
    assert!(decorations(&module, buffers[0]).contains(&(Decoration::NonWritable, None)));
    assert!(decorations(&module, buffers[1]).contains(&(Decoration::Binding, Some(1))));
    // Element loaded from binding 0, result stored to binding 1
    assert!(count_op(&module, Op::Store) >= 1);
    assert_eq!(count_op(&module, Op::FAdd), 1);
}

#[test]
fn test_buffer_layout_decorations() {
    let module = compile(&doubling());
    let strides: Vec<_> = module
        .annotations
        .iter()
        .filter(|i| i.operands.get(1) == Some(&Operand::Decoration(Decoration::ArrayStride)))
        .collect();
    assert!(strides.iter().any(|i| i.operands.get(2) == Some(&Operand::LiteralBit32(4))));
    let blocks =
        module.annotations.iter().filter(|i| i.operands.get(1) == Some(&Operand::Decoration(Decoration::Block))).count();
    // Element buffer block and push-constant block
    assert_eq!(blocks, 2);
}

#[test]
fn test_push_constant_offsets() {
    let mut site = doubling();
    let Callable::Lambda(l) = &mut site.callable else { unreachable!() };
    l.captures = vec![capture("scale", float(), false), capture("bias", double(), false)];
    let module = compile(&site);

    let offsets: Vec<(u32, u32)> = module
        .annotations
        .iter()
        .filter(|i| i.class.opcode == Op::MemberDecorate)
        .filter(|i| i.operands.get(2) == Some(&Operand::Decoration(Decoration::Offset)))
        .filter_map(|i| match (&i.operands[1], &i.operands[3]) {
            (Operand::LiteralBit32(member), Operand::LiteralBit32(offset)) => Some((*member, *offset)),
            _ => None,
        })
        .collect();
    for expected in [(0, 0), (1, 4), (2, 8)] {
        assert!(offsets.contains(&expected), "missing {:?} in {:?}", expected, offsets);
    }
    assert!(has_capability(&module, Capability::Float64));
}

#[test]
fn test_capabilities() {
    let by_ref = compile(&doubling());
    assert!(has_capability(&by_ref, Capability::Shader));
    assert!(has_capability(&by_ref, Capability::VariablePointersStorageBuffer));
    assert!(!has_capability(&by_ref, Capability::Float64));
    assert!(by_ref.extensions.iter().any(|i| i.operands[0] == Operand::LiteralString("SPV_KHR_variable_pointers".into())));

    let by_value = compile(&increment());
    assert!(!has_capability(&by_value, Capability::VariablePointersStorageBuffer));
    assert!(by_value.ext_inst_imports.iter().any(|i| i.operands[0] == Operand::LiteralString("GLSL.std.450".into())));
}

#[test]
fn test_conditional_becomes_phi() {
    // [](float x) -> float { return x > 0.0f ? x : -x; }
    let x = || var("x", float());
    let cond = binary(BinaryOp::Gt, x(), float_lit(0.0), SourceType::Bool);
    let neg = unary(crate::ast::UnaryOp::Minus, x(), float());
    let body = ret(conditional(cond, x(), neg, float()));
    let module = compile(&lambda_site("std::transform", float(), float(), body));
    assert_eq!(count_op(&module, Op::Phi), 1);
    // One for the bounds check, one for the conditional
    assert_eq!(count_op(&module, Op::SelectionMerge), 2);
}

#[test]
fn test_loop_gets_loop_merge() {
    // [](float& x) { int i = 0; while (i < 4) { x += 1.0f; i += 1; } }
    let i = || var("i", int());
    let body = block(vec![
        decl("i", int(), Some(int_lit(0))),
        while_loop(
            binary(BinaryOp::Lt, i(), int_lit(4), SourceType::Bool),
            block(vec![
                expr_stmt(compound(BinaryOp::Add, var("x", float()), float_lit(1.0))),
                expr_stmt(compound(BinaryOp::Add, i(), int_lit(1))),
            ]),
        ),
    ]);
    let module = compile(&lambda_site("std::for_each", float_ref(), SourceType::Void, body));
    assert_eq!(count_op(&module, Op::LoopMerge), 1);
    assert_eq!(count_op(&module, Op::SLessThan), 1);
}

#[test]
fn test_locals_declared_in_first_block() {
    let body = block(vec![
        decl("t", float(), Some(var("x", float()))),
        expr_stmt(assign(var("x", float()), var("t", float()))),
    ]);
    let module = compile(&lambda_site("std::for_each", float_ref(), SourceType::Void, body));
    for func in &module.functions {
        for (i, block) in func.blocks.iter().enumerate() {
            let vars = block.instructions.iter().filter(|inst| inst.class.opcode == Op::Variable).count();
            if i > 0 {
                assert_eq!(vars, 0, "OpVariable outside the first block");
            }
        }
    }
    assert!(count_op(&module, Op::Variable) >= 1);
}

#[test]
fn test_functor_dispatches_through_wrapper() {
    let omega = this_member("omega", float());
    let class = crate::ast::ClassContext {
        name: "Damp".to_string(),
        fields: vec![Field {
            name: "omega".to_string(),
            ty: float(),
        }],
        methods: vec![MethodDecl {
            name: "operator()".to_string(),
            params: vec![param("x", float_ref())],
            return_ty: SourceType::Void,
            body: expr_stmt(compound(BinaryOp::Mul, var("x", float()), omega)),
        }],
    };
    let site = call_site("std::for_each", 3, float(), Callable::Functor(class));
    let kernel = kernel_for(&site, &GeneratorConfig::default());
    assert_eq!(
        kernel.dispatch,
        Dispatch::Wrapper {
            wrapper: "kernel_Damp".to_string()
        }
    );
    let module = compile(&site);
    // main -> wrapper -> operator()
    assert_eq!(count_op(&module, Op::FunctionCall), 2);
    assert_eq!(module.functions.len(), 3);
}

fn kernel_calling_missing() -> KernelModule {
    let mut builder = FuncBuilder::new("callable", vec![(types::f32(), "x".to_string())], types::f32());
    let x = builder.get_param(0);
    let result = builder.push_call("missing", vec![x], types::f32()).unwrap().unwrap();
    builder.terminate(Terminator::Return(result)).unwrap();
    let mut functions = Module::new();
    functions.add(builder.finish().unwrap());
    KernelModule {
        name: "k".to_string(),
        algorithm: ParallelAlgorithm::Transform,
        element_ty: types::f32(),
        output_ty: Some(types::f32()),
        functions,
        dispatch: Dispatch::Direct {
            callable: "callable".to_string(),
            element: ElementPassing::ByValue,
        },
        push_constants: PushConstantLayout::new(&[]).unwrap(),
    }
}

#[test]
fn test_unhandled_instruction_strict() {
    let err = generate(&kernel_calling_missing(), &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(ref msg) if msg.contains("missing")), "got {err}");
}

#[test]
fn test_unhandled_instruction_best_effort() {
    let config = GeneratorConfig::default().best_effort();
    let mut diags = Diagnostics::new();
    let words = generate_with_diagnostics(&kernel_calling_missing(), &config, &mut diags).unwrap();
    let module = dr::load_words(&words).unwrap();
    assert_eq!(count_op(&module, Op::Undef), 1);
    assert!(matches!(
        diags.warnings(),
        [TranslationWarning::UnhandledInstruction { function, .. }] if function == "callable"
    ));
}

#[test]
fn test_generation_is_deterministic() {
    let site = increment();
    let config = GeneratorConfig::default();
    let first = generate(&kernel_for(&site, &config), &config).unwrap();
    let second = generate(&kernel_for(&site, &config), &config).unwrap();
    assert_eq!(first, second);
}

/// `[](double x) -> double { return <func>(x); }` over a `double` range.
fn double_math(func: &str) -> CallSite {
    let body = ret(call(func, vec![var("x", double())], double()));
    let callable = Callable::Lambda(lambda(vec![param("x", double())], double(), body, vec![]));
    call_site("std::transform", 31, double(), callable)
}

#[test]
fn test_double_sqrt_stays_double() {
    let module = compile(&double_math("std::sqrt"));
    assert!(has_capability(&module, Capability::Float64));
    let f64_id = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::TypeFloat && i.operands[0] == Operand::LiteralBit32(64))
        .and_then(|i| i.result_id)
        .expect("f64 is declared");
    let sqrt = function_insts(&module).find(|i| i.class.opcode == Op::ExtInst).expect("sqrt is emitted");
    assert_eq!(sqrt.operands[1], Operand::LiteralExtInstInteger(31));
    assert_eq!(sqrt.result_type, Some(f64_id));
}

#[test]
fn test_double_transcendentals_declined() {
    let compiler = KernelCompiler::new(GeneratorConfig::default());
    for func in ["std::sin", "cos", "tan", "exp", "log", "std::cbrt"] {
        let site = double_math(func);
        let err = compiler.build_module(&site, ParallelAlgorithm::Transform, "k").unwrap_err();
        assert!(matches!(err, CompilerError::Unsupported(_)), "{func}: got {err}");
    }
    let pow = ret(call("pow", vec![var("x", double()), double_lit(2.0)], double()));
    let callable = Callable::Lambda(lambda(vec![param("x", double())], double(), pow, vec![]));
    let site = call_site("std::transform", 32, double(), callable);
    let err = compiler.build_module(&site, ParallelAlgorithm::Transform, "k").unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)), "got {err}");
}

#[test]
fn test_float_sin_still_emitted() {
    let body = ret(call("std::sin", vec![var("x", float())], float()));
    let module = compile(&lambda_site("std::transform", float(), float(), body));
    let sin = function_insts(&module).find(|i| i.class.opcode == Op::ExtInst).expect("sin is emitted");
    assert_eq!(sin.operands[1], Operand::LiteralExtInstInteger(13));
    assert!(!has_capability(&module, Capability::Float64));
}

#[test]
fn test_double_sin_in_ir_rejected() {
    let mut builder = FuncBuilder::new("callable", vec![(types::f64(), "x".to_string())], types::f64());
    let x = builder.get_param(0);
    let result = builder.push_math(crate::ir::ssa::MathOp::Sin, vec![x], types::f64()).unwrap();
    builder.terminate(Terminator::Return(result)).unwrap();
    let mut kernel = kernel_calling_missing();
    kernel.element_ty = types::f64();
    kernel.output_ty = Some(types::f64());
    kernel.functions = Module::new();
    kernel.functions.add(builder.finish().unwrap());

    let err = generate(&kernel, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(ref msg) if msg.contains("sin")), "got {err}");
}

/// Id that OpName gives `name`.
fn named(module: &dr::Module, name: &str) -> u32 {
    module
        .debug_names
        .iter()
        .find(|i| i.class.opcode == Op::Name && i.operands.get(1) == Some(&Operand::LiteralString(name.to_string())))
        .and_then(|i| match i.operands[0] {
            Operand::IdRef(id) => Some(id),
            _ => None,
        })
        .unwrap_or_else(|| panic!("nothing named {name}"))
}

fn member_offsets(module: &dr::Module, target: u32) -> Vec<(u32, u32)> {
    module
        .annotations
        .iter()
        .filter(|i| i.class.opcode == Op::MemberDecorate && i.operands[0] == Operand::IdRef(target))
        .filter_map(|i| match (&i.operands[1], &i.operands[2], i.operands.get(3)) {
            (Operand::LiteralBit32(m), Operand::Decoration(Decoration::Offset), Some(Operand::LiteralBit32(o))) => {
                Some((*m, *o))
            }
            _ => None,
        })
        .collect()
}

fn pair_record() -> crate::ast::RecordType {
    crate::ast::RecordType {
        name: "Pair".to_string(),
        bases: vec![],
        fields: vec![
            Field {
                name: "a".to_string(),
                ty: float(),
            },
            Field {
                name: "n".to_string(),
                ty: int(),
            },
        ],
    }
}

#[test]
fn test_local_array_has_no_explicit_layout() {
    // [](float& x) { float t[3] = {x, 1.0f, 2.0f}; x = t[1]; }
    let table = SourceType::array(float(), 3);
    let body = block(vec![
        decl_list("t", table.clone(), vec![var("x", float()), float_lit(1.0), float_lit(2.0)]),
        expr_stmt(assign(var("x", float()), subscript(var("t", table), int_lit(1), float()))),
    ]);
    let module = compile(&lambda_site("std::for_each", float_ref(), SourceType::Void, body));

    let local = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::TypeArray)
        .and_then(|i| i.result_id)
        .expect("local array type");
    assert!(decorations(&module, local).is_empty(), "{:?}", decorations(&module, local));

    let runtime = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::TypeRuntimeArray)
        .and_then(|i| i.result_id)
        .expect("buffer array type");
    assert_eq!(decorations(&module, runtime), vec![(Decoration::ArrayStride, Some(4))]);
}

#[test]
fn test_local_record_has_no_member_offsets() {
    // [](float& x) { Pair q; q.a = x; x = q.a; }
    let pair = SourceType::Record(pair_record());
    let q = || var("q", pair.clone());
    let body = block(vec![
        decl("q", pair.clone(), None),
        expr_stmt(assign(member(q(), "a", float()), var("x", float()))),
        expr_stmt(assign(var("x", float()), member(q(), "a", float()))),
    ]);
    let module = compile(&lambda_site("std::for_each", float_ref(), SourceType::Void, body));
    assert!(member_offsets(&module, named(&module, "Pair")).is_empty());
    assert!(!decorations(&module, named(&module, "Pair")).iter().any(|(d, _)| *d == Decoration::Block));
}

#[test]
fn test_record_elements_laid_out() {
    // std::for_each over Pair elements: [](Pair& p) { p.a *= 2.0f; }
    let pair = SourceType::Record(pair_record());
    let body = expr_stmt(compound(BinaryOp::Mul, member(var("p", pair.clone()), "a", float()), float_lit(2.0)));
    let callable =
        Callable::Lambda(lambda(vec![param("p", SourceType::reference(pair.clone()))], SourceType::Void, body, vec![]));
    let module = compile(&call_site("std::for_each", 8, pair, callable));

    let record = named(&module, "Pair");
    assert_eq!(member_offsets(&module, record), vec![(0, 0), (1, 4)]);
    let runtime = module
        .types_global_values
        .iter()
        .find(|i| i.class.opcode == Op::TypeRuntimeArray)
        .and_then(|i| i.result_id)
        .unwrap();
    assert_eq!(decorations(&module, runtime), vec![(Decoration::ArrayStride, Some(8))]);
}
