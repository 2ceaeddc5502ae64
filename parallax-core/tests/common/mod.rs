//! Shared helpers for the integration tests.

#![allow(dead_code)]

use parallax_core::ast::CallSite;
use parallax_core::{CompiledKernel, GeneratorConfig, InMemoryKernelCache, KernelCompiler, Offload};
use rspirv::dr::{self, Function, Instruction, Operand};
use rspirv::spirv::{Op, Word};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compile `site` with the default configuration. Panics if it is declined.
pub fn compile(site: &CallSite) -> CompiledKernel {
    compile_with(site, GeneratorConfig::default())
}

pub fn compile_with(site: &CallSite, config: GeneratorConfig) -> CompiledKernel {
    init_logging();
    let compiler = KernelCompiler::new(config);
    match compiler.compile_call_site(site, &mut InMemoryKernelCache::new()) {
        Ok(Offload::Kernel(kernel)) => (*kernel).clone(),
        Ok(Offload::Declined(reason)) => panic!("call site declined: {}", reason),
        Err(e) => panic!("compilation failed: {}", e),
    }
}

pub fn load(words: &[u32]) -> dr::Module {
    dr::load_words(words).expect("generated module does not parse")
}

/// The function named by the entry point.
pub fn entry_function(module: &dr::Module) -> &Function {
    let id = match module.entry_points[0].operands[1] {
        Operand::IdRef(id) => id,
        ref other => panic!("unexpected entry point operand {:?}", other),
    };
    module.functions.iter().find(|f| f.def_id() == Some(id)).expect("entry function missing")
}

/// The function carrying debug name `name`.
pub fn function_named<'a>(module: &'a dr::Module, name: &str) -> &'a Function {
    let id = module
        .debug_names
        .iter()
        .find(|i| i.class.opcode == Op::Name && i.operands.get(1) == Some(&Operand::LiteralString(name.to_string())))
        .and_then(|i| match i.operands[0] {
            Operand::IdRef(id) => Some(id),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no name '{}'", name));
    module.functions.iter().find(|f| f.def_id() == Some(id)).unwrap_or_else(|| panic!("'{}' is not a function", name))
}

pub fn instructions(func: &Function) -> impl Iterator<Item = &Instruction> {
    func.blocks.iter().flat_map(|b| b.instructions.iter())
}

pub fn count(func: &Function, op: Op) -> usize {
    instructions(func).filter(|i| i.class.opcode == op).count()
}

/// Global instruction defining `id`.
pub fn global_def(module: &dr::Module, id: Word) -> Option<&Instruction> {
    module.types_global_values.iter().find(|i| i.result_id == Some(id))
}

/// Id of the global variable with debug name `name`.
pub fn global_named(module: &dr::Module, name: &str) -> Word {
    module
        .debug_names
        .iter()
        .filter(|i| i.operands.get(1) == Some(&Operand::LiteralString(name.to_string())))
        .filter_map(|i| match i.operands[0] {
            Operand::IdRef(id) => Some(id),
            _ => None,
        })
        .find(|id| global_def(module, *id).map(|d| d.class.opcode) == Some(Op::Variable))
        .unwrap_or_else(|| panic!("no global '{}'", name))
}

/// Whether `id` is an OpConstant holding the f32 `value`.
pub fn is_f32_constant(module: &dr::Module, id: Word, value: f32) -> bool {
    global_def(module, id).is_some_and(|def| {
        def.class.opcode == Op::Constant && def.operands.first() == Some(&Operand::LiteralBit32(value.to_bits()))
    })
}

pub fn id_operand(inst: &Instruction, index: usize) -> Word {
    match inst.operands[index] {
        Operand::IdRef(id) => id,
        ref other => panic!("operand {} of {:?} is {:?}", index, inst.class.opcode, other),
    }
}
