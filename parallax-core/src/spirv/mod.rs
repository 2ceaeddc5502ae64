//! SPIR-V code generation backend.
//!
//! [`generate`] turns one [`KernelModule`] into a GLCompute module: the
//! translated functions (see `lowering`), the element buffers, the
//! push-constant block and a `main` that bounds-checks the invocation index
//! before dispatching to the callable or its wrapper.

mod lowering;
#[cfg(test)]
mod lowering_tests;

use std::collections::{HashMap, HashSet};

use polytype::Type as PolyType;
use rspirv::binary::Assemble;
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{self, AddressingModel, Capability, Decoration, MemoryModel, StorageClass};

use crate::algorithm::ParallelAlgorithm;
use crate::config::{FailureMode, GeneratorConfig};
use crate::diags::Diagnostics;
use crate::error::Result;
use crate::ir::ssa::InstKind;
use crate::kernel::{Dispatch, KernelModule};
use crate::layout::{self, PushConstantLayout};
use crate::translate::ElementPassing;
use crate::types::{self, AddressSpace, Type, TypeName};
use crate::{bail_spirv, err_spirv};

/// Extension enabling element pointers into storage buffers to cross calls.
const VARIABLE_POINTERS_EXT: &str = "SPV_KHR_variable_pointers";

/// StorageBuffer is core only from SPIR-V 1.3 on.
const STORAGE_BUFFER_EXT: &str = "SPV_KHR_storage_buffer_storage_class";

/// Generate the SPIR-V words for `kernel`.
pub fn generate(kernel: &KernelModule, config: &GeneratorConfig) -> Result<Vec<u32>> {
    let mut diags = Diagnostics::new();
    generate_with_diagnostics(kernel, config, &mut diags)
}

/// Like [`generate`], recording best-effort fallbacks in `diags`.
pub fn generate_with_diagnostics(
    kernel: &KernelModule,
    config: &GeneratorConfig,
    diags: &mut Diagnostics,
) -> Result<Vec<u32>> {
    let mut constructor = Constructor::new(config);

    if needs_variable_pointers(kernel) {
        constructor.require(Capability::VariablePointersStorageBuffer);
        constructor.builder.extension(VARIABLE_POINTERS_EXT);
    }
    if config.version < (1, 3) {
        constructor.builder.extension(STORAGE_BUFFER_EXT);
    }

    // Pre-allocate function ids so calls may precede their callee's definition
    for func in &kernel.functions.functions {
        let id = constructor.builder.id();
        constructor.builder.name(id, func.name.clone());
        constructor.functions.insert(func.name.clone(), id);
    }

    let globals = constructor.declare_globals(kernel)?;
    for func in &kernel.functions.functions {
        lowering::lower_function(&mut constructor, func)?;
    }
    let main_id = constructor.lower_dispatch(kernel, &globals, &config.entry_point)?;

    let mut interface = vec![globals.invocation_id];
    // From 1.4 on the interface lists every global the entry point touches
    if config.version >= (1, 4) {
        interface.extend(globals.buffers.iter().copied());
        interface.push(globals.push_constants);
    }
    constructor.builder.entry_point(spirv::ExecutionModel::GLCompute, main_id, config.entry_point.clone(), interface);
    constructor.builder.execution_mode(main_id, spirv::ExecutionMode::LocalSize, config.local_size);

    diags.extend(std::mem::take(&mut constructor.diags));
    let words = constructor.builder.module().assemble();
    log::debug!("generated '{}': {} words", kernel.name, words.len());
    Ok(words)
}

/// Whether any storage-buffer element pointer is passed to a function or
/// offset with pointer arithmetic.
fn needs_variable_pointers(kernel: &KernelModule) -> bool {
    kernel.functions.functions.iter().any(|func| {
        let element_param = func.params.iter().any(|(_, ty, _)| {
            types::address_space(ty) == Some(AddressSpace::StorageBuffer)
                && types::pointee(ty).is_some_and(|p| !is_buffer_block(p))
        });
        element_param || func.insts.iter().any(|inst| matches!(inst.kind, InstKind::PtrAccessChain { .. }))
    })
}

fn is_buffer_block(ty: &Type) -> bool {
    matches!(ty, PolyType::Constructed(TypeName::Struct(name), _) if name == types::BUFFER_BLOCK)
}

fn storage_class(space: AddressSpace) -> StorageClass {
    match space {
        AddressSpace::Function => StorageClass::Function,
        AddressSpace::Input => StorageClass::Input,
        AddressSpace::StorageBuffer => StorageClass::StorageBuffer,
        AddressSpace::PushConstant => StorageClass::PushConstant,
    }
}

/// Module-scope variables of a kernel.
struct Globals {
    /// Element buffers by binding.
    buffers: Vec<spirv::Word>,
    push_constants: spirv::Word,
    invocation_id: spirv::Word,
}

// =============================================================================
// Constructor - SPIR-V Builder Wrapper
// =============================================================================

/// Constructor wraps rspirv::Builder with type and constant caches and
/// tracks what the module must declare up front (capabilities, function ids).
struct Constructor {
    builder: Builder,
    mode: FailureMode,

    void_type: spirv::Word,
    bool_type: spirv::Word,
    u32_type: spirv::Word,
    glsl_ext_inst_id: spirv::Word,

    type_cache: HashMap<Type, spirv::Word>,
    /// Type ids that already carry their layout decorations. rspirv folds
    /// structurally equal types into one id, so this is keyed by id.
    decorated: HashSet<spirv::Word>,
    /// Integer and float constants keyed by (type id, bit pattern).
    const_cache: HashMap<(spirv::Word, u64), spirv::Word>,
    bool_const_cache: HashMap<bool, spirv::Word>,
    null_const_cache: HashMap<spirv::Word, spirv::Word>,
    capabilities: HashSet<Capability>,

    /// Function map: name -> function ID
    functions: HashMap<String, spirv::Word>,
    diags: Diagnostics,
}

impl Constructor {
    fn new(config: &GeneratorConfig) -> Self {
        let mut builder = Builder::new();
        builder.set_version(config.version.0, config.version.1);
        builder.capability(Capability::Shader);
        let glsl_ext_inst_id = builder.ext_inst_import("GLSL.std.450");
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let void_type = builder.type_void();
        let bool_type = builder.type_bool();
        let u32_type = builder.type_int(32, 0);

        Constructor {
            builder,
            mode: config.failure_mode,
            void_type,
            bool_type,
            u32_type,
            glsl_ext_inst_id,
            type_cache: HashMap::new(),
            decorated: HashSet::new(),
            const_cache: HashMap::new(),
            bool_const_cache: HashMap::new(),
            null_const_cache: HashMap::new(),
            capabilities: HashSet::from([Capability::Shader]),
            functions: HashMap::new(),
            diags: Diagnostics::new(),
        }
    }

    /// Declare a capability once.
    fn require(&mut self, capability: Capability) {
        if self.capabilities.insert(capability) {
            self.builder.capability(capability);
        }
    }

    fn is_strict(&self) -> bool {
        self.mode == FailureMode::Strict
    }

    /// Convert an IR type to a SPIR-V type ID, declaring it on first use.
    fn spirv_type(&mut self, ty: &Type) -> Result<spirv::Word> {
        if let Some(&id) = self.type_cache.get(ty) {
            return Ok(id);
        }
        let id = match ty {
            PolyType::Variable(v) => bail_spirv!("unresolved type variable ?{} reached lowering", v),
            PolyType::Constructed(name, args) => match name {
                TypeName::Void => self.void_type,
                TypeName::Bool => self.bool_type,
                TypeName::Int(bits) | TypeName::UInt(bits) => {
                    match bits {
                        8 => self.require(Capability::Int8),
                        16 => self.require(Capability::Int16),
                        64 => self.require(Capability::Int64),
                        _ => {}
                    }
                    let signed = matches!(name, TypeName::Int(_)) as u32;
                    self.builder.type_int(*bits, signed)
                }
                TypeName::Float(bits) => {
                    match bits {
                        16 => self.require(Capability::Float16),
                        64 => self.require(Capability::Float64),
                        _ => {}
                    }
                    self.builder.type_float(*bits)
                }
                TypeName::Array(len) => {
                    let elem = args.first().ok_or_else(|| err_spirv!("array type without element"))?;
                    let elem_id = self.spirv_type(elem)?;
                    let len_id = self.const_u32(*len);
                    self.builder.type_array(elem_id, len_id)
                }
                TypeName::RuntimeArray => {
                    let elem = args.first().ok_or_else(|| err_spirv!("runtime array type without element"))?;
                    let elem_id = self.spirv_type(elem)?;
                    self.builder.type_runtime_array(elem_id)
                }
                TypeName::Pointer(space) => {
                    let pointee = args.first().ok_or_else(|| err_spirv!("pointer type without pointee"))?;
                    let pointee_id = self.spirv_type(pointee)?;
                    if matches!(space, AddressSpace::StorageBuffer | AddressSpace::PushConstant) {
                        self.decorate_layout(pointee)?;
                    }
                    self.builder.type_pointer(None, storage_class(*space), pointee_id)
                }
                TypeName::Struct(struct_name) => {
                    let field_ids = args.iter().map(|f| self.spirv_type(f)).collect::<Result<Vec<_>>>()?;
                    // A fresh id per record keeps Block-decorated buffer structs
                    // apart from plain records with the same members
                    let id = self.builder.id();
                    self.builder.type_struct_id(Some(id), field_ids);
                    self.builder.name(id, struct_name.clone());
                    id
                }
                TypeName::Arrow => bail_spirv!("function type {} has no storage", types::format_type(ty)),
            },
        };
        self.type_cache.insert(ty.clone(), id);
        Ok(id)
    }

    /// Explicit std430 layout for a type reached through a storage-buffer or
    /// push-constant pointer, and for every aggregate nested in it. Types that
    /// only ever live in function memory stay undecorated.
    fn decorate_layout(&mut self, ty: &Type) -> Result<()> {
        let PolyType::Constructed(name, args) = ty else {
            return Ok(());
        };
        match name {
            TypeName::Array(_) | TypeName::RuntimeArray => {
                let elem = args.first().ok_or_else(|| err_spirv!("array type without element"))?;
                let id = self.spirv_type(ty)?;
                self.decorate_stride(id, elem);
                self.decorate_layout(elem)
            }
            TypeName::Struct(struct_name) => {
                let id = self.spirv_type(ty)?;
                if self.decorated.insert(id) {
                    if let Some(offsets) = layout::struct_offsets(args) {
                        for (member, offset) in offsets.into_iter().enumerate() {
                            self.builder.member_decorate(
                                id,
                                member as u32,
                                Decoration::Offset,
                                [Operand::LiteralBit32(offset)],
                            );
                        }
                    }
                    if struct_name == types::BUFFER_BLOCK {
                        self.builder.decorate(id, Decoration::Block, []);
                    }
                }
                args.iter().try_for_each(|field| self.decorate_layout(field))
            }
            _ => Ok(()),
        }
    }

    /// ArrayStride for an array-like type id. Types without a memory layout
    /// (bool elements) stay undecorated.
    fn decorate_stride(&mut self, id: spirv::Word, elem: &Type) {
        let Some(stride) = layout::array_stride(elem) else {
            return;
        };
        if self.decorated.insert(id) {
            self.builder.decorate(id, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
        }
    }

    fn ptr_type(&mut self, space: AddressSpace, pointee: &Type) -> Result<spirv::Word> {
        self.spirv_type(&types::pointer(space, pointee.clone()))
    }

    fn function_type(&mut self, return_ty: &Type, params: &[Type]) -> Result<spirv::Word> {
        let ret = self.spirv_type(return_ty)?;
        let params = params.iter().map(|p| self.spirv_type(p)).collect::<Result<Vec<_>>>()?;
        Ok(self.builder.type_function(ret, params))
    }

    /// Get or create an integer constant of the given IR type.
    fn const_int(&mut self, ty: &Type, value: i64) -> Result<spirv::Word> {
        let ty_id = self.spirv_type(ty)?;
        let wide = matches!(ty, PolyType::Constructed(TypeName::Int(64) | TypeName::UInt(64), _));
        let bits = if wide { value as u64 } else { value as u32 as u64 };
        Ok(self.constant_bits(ty_id, bits, wide))
    }

    /// Get or create a float constant of the given IR type.
    fn const_float(&mut self, ty: &Type, value: f64) -> Result<spirv::Word> {
        let ty_id = self.spirv_type(ty)?;
        if types::is_float64(ty) {
            Ok(self.constant_bits(ty_id, value.to_bits(), true))
        } else {
            Ok(self.constant_bits(ty_id, (value as f32).to_bits() as u64, false))
        }
    }

    fn const_u32(&mut self, value: u32) -> spirv::Word {
        self.constant_bits(self.u32_type, value as u64, false)
    }

    fn constant_bits(&mut self, ty_id: spirv::Word, bits: u64, wide: bool) -> spirv::Word {
        if let Some(&id) = self.const_cache.get(&(ty_id, bits)) {
            return id;
        }
        let id = if wide {
            self.builder.constant_bit64(ty_id, bits)
        } else {
            self.builder.constant_bit32(ty_id, bits as u32)
        };
        self.const_cache.insert((ty_id, bits), id);
        id
    }

    /// Get or create a bool constant
    fn const_bool(&mut self, value: bool) -> spirv::Word {
        if let Some(&id) = self.bool_const_cache.get(&value) {
            return id;
        }
        let id = if value {
            self.builder.constant_true(self.bool_type)
        } else {
            self.builder.constant_false(self.bool_type)
        };
        self.bool_const_cache.insert(value, id);
        id
    }

    fn const_null(&mut self, ty: &Type) -> Result<spirv::Word> {
        let ty_id = self.spirv_type(ty)?;
        if let Some(&id) = self.null_const_cache.get(&ty_id) {
            return Ok(id);
        }
        let id = self.builder.constant_null(ty_id);
        self.null_const_cache.insert(ty_id, id);
        Ok(id)
    }

    fn function_id(&self, name: &str) -> Result<spirv::Word> {
        self.functions.get(name).copied().ok_or_else(|| err_spirv!("call to unknown function '{}'", name))
    }

    // -------------------------------------------------------------------------
    // Kernel interface
    // -------------------------------------------------------------------------

    /// Declare the element buffers, the push-constant block and the
    /// invocation id input.
    fn declare_globals(&mut self, kernel: &KernelModule) -> Result<Globals> {
        let mut buffers = Vec::new();
        let mut elements = vec![kernel.element_ty.clone()];
        if kernel.algorithm == ParallelAlgorithm::Transform {
            let output = kernel.output_ty.clone().ok_or_else(|| err_spirv!("transform kernel without output type"))?;
            elements.push(output);
        }
        for (binding, elem) in elements.iter().enumerate() {
            if layout::array_stride(elem).is_none() {
                bail_spirv!("element type {} has no buffer layout", types::format_type(elem));
            }
            let ptr_ty = self.ptr_type(AddressSpace::StorageBuffer, &types::buffer_block(elem.clone()))?;
            let var = self.builder.variable(ptr_ty, None, StorageClass::StorageBuffer, None);
            self.builder.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
            self.builder.decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding as u32)]);
            if elements.len() > 1 && binding == 0 {
                self.builder.decorate(var, Decoration::NonWritable, []);
            }
            self.builder.name(var, if binding == 0 { "input" } else { "output" });
            buffers.push(var);
        }

        let push_constants = self.declare_push_constants(&kernel.push_constants)?;

        let uvec3 = self.builder.type_vector(self.u32_type, 3);
        let gid_ptr = self.builder.type_pointer(None, StorageClass::Input, uvec3);
        let invocation_id = self.builder.variable(gid_ptr, None, StorageClass::Input, None);
        self.builder.decorate(
            invocation_id,
            Decoration::BuiltIn,
            [Operand::BuiltIn(spirv::BuiltIn::GlobalInvocationId)],
        );
        self.builder.name(invocation_id, "gl_GlobalInvocationID");

        Ok(Globals {
            buffers,
            push_constants,
            invocation_id,
        })
    }

    /// The push-constant block: `u32 count` then the capture slots, at the
    /// offsets the layout assigned.
    fn declare_push_constants(&mut self, layout: &PushConstantLayout) -> Result<spirv::Word> {
        let field_types = layout.field_types();
        let field_ids = field_types.iter().map(|t| self.spirv_type(t)).collect::<Result<Vec<_>>>()?;
        for ty in &field_types {
            self.decorate_layout(ty)?;
        }
        let block = self.builder.id();
        self.builder.type_struct_id(Some(block), field_ids);
        self.builder.decorate(block, Decoration::Block, []);
        self.builder.name(block, "PushConstants");
        let offsets = std::iter::once(layout::COUNT_OFFSET).chain(layout.slots.iter().map(|s| s.offset));
        for (member, offset) in offsets.enumerate() {
            self.builder.member_decorate(block, member as u32, Decoration::Offset, [Operand::LiteralBit32(offset)]);
        }
        self.builder.member_name(block, 0, "count");
        for (i, slot) in layout.slots.iter().enumerate() {
            self.builder.member_name(block, i as u32 + 1, slot.name.clone());
        }

        let ptr = self.builder.type_pointer(None, StorageClass::PushConstant, block);
        let var = self.builder.variable(ptr, None, StorageClass::PushConstant, None);
        self.builder.name(var, "push_constants");
        Ok(var)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Emit `main`: one invocation per element, guarded by `x < count`.
    fn lower_dispatch(&mut self, kernel: &KernelModule, globals: &Globals, entry_name: &str) -> Result<spirv::Word> {
        let fn_ty = self.builder.type_function(self.void_type, vec![]);
        let main_id = self.builder.begin_function(self.void_type, None, spirv::FunctionControl::NONE, fn_ty)?;
        self.builder.name(main_id, entry_name);

        let body_label = self.builder.id();
        let merge_label = self.builder.id();
        self.builder.begin_block(None)?;

        let uvec3 = self.builder.type_vector(self.u32_type, 3);
        let gid = self.builder.load(uvec3, None, globals.invocation_id, None, [])?;
        let index = self.builder.composite_extract(self.u32_type, None, gid, [0])?;
        let count = self.load_push_constant(globals.push_constants, 0, &types::u32())?;
        let in_range = self.builder.u_less_than(self.bool_type, None, index, count)?;
        self.builder.selection_merge(merge_label, spirv::SelectionControl::NONE)?;
        self.builder.branch_conditional(in_range, body_label, merge_label, [])?;

        self.builder.begin_block(Some(body_label))?;
        let mut captures = Vec::with_capacity(kernel.push_constants.slots.len());
        for (i, slot) in kernel.push_constants.slots.iter().enumerate() {
            let stored = self.load_push_constant(globals.push_constants, i as u32 + 1, &slot.storage_ty)?;
            let value = if slot.storage_ty != slot.value_ty {
                // bool travels as u32
                let zero = self.const_u32(0);
                self.builder.i_not_equal(self.bool_type, None, stored, zero)?
            } else {
                stored
            };
            captures.push(value);
        }

        match &kernel.dispatch {
            Dispatch::Direct { callable, element } => {
                self.dispatch_direct(kernel, globals, index, callable, *element, captures)?
            }
            Dispatch::Wrapper { wrapper } => {
                let func_id = self.function_id(wrapper)?;
                let mut args = globals.buffers.clone();
                args.push(index);
                args.extend(captures);
                self.builder.function_call(self.void_type, None, func_id, args)?;
            }
        }
        self.builder.branch(merge_label)?;

        self.builder.begin_block(Some(merge_label))?;
        self.builder.ret()?;
        self.builder.end_function()?;
        Ok(main_id)
    }

    fn load_push_constant(&mut self, block: spirv::Word, member: u32, ty: &Type) -> Result<spirv::Word> {
        let ptr_ty = self.ptr_type(AddressSpace::PushConstant, ty)?;
        let ty_id = self.spirv_type(ty)?;
        let member_id = self.const_u32(member);
        let ptr = self.builder.access_chain(ptr_ty, None, block, [member_id])?;
        Ok(self.builder.load(ty_id, None, ptr, None, [])?)
    }

    /// Address of element `index` in the buffer bound to `var`.
    fn element_address(&mut self, var: spirv::Word, elem: &Type, index: spirv::Word) -> Result<spirv::Word> {
        let ptr_ty = self.ptr_type(AddressSpace::StorageBuffer, elem)?;
        let member = self.const_u32(0);
        Ok(self.builder.access_chain(ptr_ty, None, var, [member, index])?)
    }

    /// Call a lambda's translated body straight from `main`.
    fn dispatch_direct(
        &mut self,
        kernel: &KernelModule,
        globals: &Globals,
        index: spirv::Word,
        callable: &str,
        element: ElementPassing,
        captures: Vec<spirv::Word>,
    ) -> Result<()> {
        let func = kernel
            .functions
            .get(callable)
            .ok_or_else(|| err_spirv!("kernel '{}' has no function '{}'", kernel.name, callable))?;
        let func_id = self.function_id(callable)?;
        let return_ty = func.return_ty.clone();

        let input = globals.buffers.first().copied().ok_or_else(|| err_spirv!("kernel has no input buffer"))?;
        let elem_ptr = self.element_address(input, &kernel.element_ty, index)?;
        let arg = match element {
            ElementPassing::ByPointer => elem_ptr,
            ElementPassing::ByValue => {
                let elem_ty = self.spirv_type(&kernel.element_ty)?;
                self.builder.load(elem_ty, None, elem_ptr, None, [])?
            }
        };
        let mut args = vec![arg];
        args.extend(captures);
        let return_id = self.spirv_type(&return_ty)?;
        let result = self.builder.function_call(return_id, None, func_id, args)?;

        match kernel.algorithm {
            ParallelAlgorithm::Transform => {
                let (Some(&output), Some(out_ty)) = (globals.buffers.get(1), kernel.output_ty.as_ref()) else {
                    bail_spirv!("transform kernel '{}' has no output buffer", kernel.name);
                };
                if return_ty != *out_ty {
                    bail_spirv!(
                        "callable returns {} but the output holds {}",
                        types::format_type(&return_ty),
                        types::format_type(out_ty)
                    );
                }
                let out_ptr = self.element_address(output, out_ty, index)?;
                self.builder.store(out_ptr, result, None, [])?;
            }
            ParallelAlgorithm::ForEach => {
                if element == ElementPassing::ByValue && return_ty == kernel.element_ty {
                    self.builder.store(elem_ptr, result, None, [])?;
                }
            }
        }
        Ok(())
    }
}
