//! Kernel interface extraction for JSON output.
//!
//! Describes what the launcher must bind for a compiled kernel: the element
//! buffers, the push-constant block with every capture's offset, and the
//! entry point with its workgroup size.

use serde::Serialize;

use crate::algorithm::ParallelAlgorithm;
use crate::config::GeneratorConfig;
use crate::kernel::{Dispatch, KernelModule};
use crate::layout::{self, COUNT_OFFSET};
use crate::types;

/// Complete kernel interface description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelInterface {
    /// Interface format version.
    pub version: String,
    pub kernel_name: String,
    pub algorithm: ParallelAlgorithm,
    /// "direct" for lambdas, "wrapper" for function objects.
    pub dispatch: String,
    pub entry_point: EntryPointInfo,
    /// Buffer bindings, input first.
    pub buffers: Vec<BufferBindingInfo>,
    pub push_constants: PushConstantInfo,
}

/// Information about the compute entry point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPointInfo {
    pub name: String,
    /// Execution model; always "compute".
    pub execution_model: String,
    pub workgroup_size: [u32; 3],
}

/// Information about a buffer binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferBindingInfo {
    pub name: String,
    /// Descriptor set number.
    pub set: u32,
    /// Binding number within the set.
    pub binding: u32,
    /// Memory layout; always std430.
    pub layout: String,
    /// Access mode (readonly, readwrite).
    pub access: String,
    pub element_type: String,
    /// Bytes between consecutive elements.
    pub stride: u32,
}

/// The push-constant block: the element count, then the captures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushConstantInfo {
    /// Block size in bytes.
    pub size: u32,
    pub fields: Vec<PushConstantFieldInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushConstantFieldInfo {
    pub name: String,
    pub type_name: String,
    /// Byte offset within the block.
    pub offset: u32,
}

/// Extract the interface of `kernel` as `config` compiles it.
pub fn extract_interface(kernel: &KernelModule, config: &GeneratorConfig) -> KernelInterface {
    let mut buffers = vec![buffer_info("input", 0, &kernel.element_ty, kernel.algorithm == ParallelAlgorithm::ForEach)];
    if let Some(output) = &kernel.output_ty {
        buffers.push(buffer_info("output", 1, output, true));
    }

    let mut fields = vec![PushConstantFieldInfo {
        name: "count".to_string(),
        type_name: "u32".to_string(),
        offset: COUNT_OFFSET,
    }];
    fields.extend(kernel.push_constants.slots.iter().map(|slot| PushConstantFieldInfo {
        name: slot.name.clone(),
        type_name: types::format_type(&slot.storage_ty),
        offset: slot.offset,
    }));

    let dispatch = match kernel.dispatch {
        Dispatch::Direct { .. } => "direct",
        Dispatch::Wrapper { .. } => "wrapper",
    };

    KernelInterface {
        version: "0.1.0".to_string(),
        kernel_name: kernel.name.clone(),
        algorithm: kernel.algorithm,
        dispatch: dispatch.to_string(),
        entry_point: EntryPointInfo {
            name: config.entry_point.clone(),
            execution_model: "compute".to_string(),
            workgroup_size: config.local_size,
        },
        buffers,
        push_constants: PushConstantInfo {
            size: kernel.push_constants.size,
            fields,
        },
    }
}

fn buffer_info(name: &str, binding: u32, element: &types::Type, writable: bool) -> BufferBindingInfo {
    BufferBindingInfo {
        name: name.to_string(),
        set: 0,
        binding,
        layout: "std430".to_string(),
        access: if writable { "readwrite" } else { "readonly" }.to_string(),
        element_type: types::format_type(element),
        stride: layout::array_stride(element).unwrap_or(0),
    }
}

/// Serialize interface to JSON string.
pub fn to_json(interface: &KernelInterface) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(interface)
}
