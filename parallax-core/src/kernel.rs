//! Per-call-site pipeline.
//!
//! [`KernelCompiler::compile_call_site`] takes one parallel-algorithm call
//! through type mapping, translation, wrapper synthesis (function objects)
//! and SPIR-V generation. Any error leaves the call site on the CPU path;
//! sequential policies and unknown algorithms are declined up front.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::algorithm::{ExecutionPolicy, ParallelAlgorithm};
use crate::ast::{CallSite, Callable};
use crate::bail_unsupported;
use crate::config::GeneratorConfig;
use crate::diags::{Diagnostics, TranslationWarning};
use crate::error::Result;
use crate::interface::{self, KernelInterface};
use crate::ir;
use crate::layout::PushConstantLayout;
use crate::spirv;
use crate::translate::{self, ElementPassing, Translation};
use crate::types::{self, Type, TypeMapper};
use crate::wrapper;

/// How `main` reaches the translated code.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A lambda: `main` calls the callable with the element and the captures.
    Direct { callable: String, element: ElementPassing },
    /// A function object: `main` calls the synthesized wrapper with the
    /// buffers, the invocation index and the members.
    Wrapper { wrapper: String },
}

/// Everything the generator needs for one kernel.
#[derive(Debug, Clone)]
pub struct KernelModule {
    pub name: String,
    pub algorithm: ParallelAlgorithm,
    /// Element type of the input (for_each: the only) buffer.
    pub element_ty: Type,
    /// Element type of the output buffer; transform only.
    pub output_ty: Option<Type>,
    pub functions: ir::Module,
    pub dispatch: Dispatch,
    pub push_constants: PushConstantLayout,
}

/// A finished kernel.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub words: Vec<u32>,
    pub interface: KernelInterface,
    pub warnings: Vec<TranslationWarning>,
}

/// Outcome for one call site.
#[derive(Debug, Clone)]
pub enum Offload {
    Kernel(Arc<CompiledKernel>),
    /// Left on the CPU without attempting translation.
    Declined(String),
}

/// Storage for kernels already compiled, shared across call sites.
pub trait KernelCache {
    fn get(&self, key: &str) -> Option<Arc<CompiledKernel>>;
    fn insert(&mut self, key: String, kernel: Arc<CompiledKernel>);
}

#[derive(Debug, Default)]
pub struct InMemoryKernelCache {
    kernels: IndexMap<String, Arc<CompiledKernel>>,
}

impl InMemoryKernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }
}

impl KernelCache for InMemoryKernelCache {
    fn get(&self, key: &str) -> Option<Arc<CompiledKernel>> {
        self.kernels.get(key).cloned()
    }

    fn insert(&mut self, key: String, kernel: Arc<CompiledKernel>) {
        self.kernels.insert(key, kernel);
    }
}

/// Name of the kernel generated for a call on `line`.
pub fn kernel_name(algorithm: ParallelAlgorithm, line: u32) -> String {
    format!("__parallax_kernel_{}_{}", algorithm.name(), line)
}

/// Kernels are shared only between call sites that would compile to the
/// same module: same name, types, callable and generator settings.
fn cache_key(
    algorithm: ParallelAlgorithm,
    kernel_name: &str,
    site: &CallSite,
    config: &GeneratorConfig,
) -> Result<String> {
    // f64 literals rule out a derived Hash, so hash the serialized form
    let encoded = serde_json::to_vec(&(&site.element_ty, &site.output_ty, &site.callable, config))?;
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Ok(format!("{}:{}:{:016x}", algorithm.name(), kernel_name, hasher.finish()))
}

pub struct KernelCompiler {
    config: GeneratorConfig,
}

impl KernelCompiler {
    pub fn new(config: GeneratorConfig) -> Self {
        KernelCompiler { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Compile `site`, or fetch it from `cache` when a kernel with the same
    /// signature was compiled before.
    pub fn compile_call_site(&self, site: &CallSite, cache: &mut dyn KernelCache) -> Result<Offload> {
        let Some(algorithm) = ParallelAlgorithm::from_qualified_name(&site.algorithm) else {
            log::debug!("line {}: '{}' is not an offloadable algorithm", site.line, site.algorithm);
            return Ok(Offload::Declined(format!("unrecognized algorithm '{}'", site.algorithm)));
        };
        match ExecutionPolicy::from_qualified_name(&site.policy) {
            Some(policy) if policy.allows_offload() => {}
            _ => {
                log::debug!("line {}: policy '{}' keeps the call sequential", site.line, site.policy);
                return Ok(Offload::Declined(format!("policy '{}' does not permit offload", site.policy)));
            }
        }

        let name = kernel_name(algorithm, site.line);
        let key = cache_key(algorithm, &name, site, &self.config)?;
        if let Some(kernel) = cache.get(&key) {
            log::debug!("reusing cached kernel '{}'", key);
            return Ok(Offload::Kernel(kernel));
        }

        let (module, mut diags) = self.build_module(site, algorithm, &name)?;
        let words = spirv::generate_with_diagnostics(&module, &self.config, &mut diags)?;
        let kernel = Arc::new(CompiledKernel {
            words,
            interface: interface::extract_interface(&module, &self.config),
            warnings: diags.into_warnings(),
        });
        log::info!("compiled '{}' ({} warnings)", name, kernel.warnings.len());
        cache.insert(key, Arc::clone(&kernel));
        Ok(Offload::Kernel(kernel))
    }

    /// Translate the callable of `site` into a kernel module, without
    /// generating SPIR-V.
    pub fn build_module(
        &self,
        site: &CallSite,
        algorithm: ParallelAlgorithm,
        name: &str,
    ) -> Result<(KernelModule, Diagnostics)> {
        let mut mapper = TypeMapper::new();
        let mode = self.config.failure_mode;
        let element_ty = mapper.map(site.element_ty.non_reference());
        let output_ty = match algorithm {
            ParallelAlgorithm::Transform => {
                let source = site.output_ty.as_ref().unwrap_or(&site.element_ty);
                Some(mapper.map(source.non_reference()))
            }
            ParallelAlgorithm::ForEach => None,
        };

        let (translation, dispatch) = match &site.callable {
            Callable::Lambda(lambda) => {
                let translation = translate::translate_lambda(lambda, &mut mapper, mode)?;
                let dispatch = Dispatch::Direct {
                    callable: translation.entry.clone(),
                    element: translation.element,
                };
                (translation, dispatch)
            }
            Callable::Functor(class) => {
                let mut translation = translate::translate_functor(class, &mut mapper, mode)?;
                let wrapper = wrapper::generate_wrapper(class, algorithm, &mut translation.module)?;
                (translation, Dispatch::Wrapper { wrapper })
            }
        };
        check_signature(&translation, &element_ty, output_ty.as_ref())?;

        let push_constants = PushConstantLayout::new(&translation.captures)?;
        let mut diags = translation.diagnostics;
        diags.extend(mapper.take_diagnostics());
        log::debug!(
            "'{}': {} functions, {} push-constant bytes",
            name,
            translation.module.functions.len(),
            push_constants.size
        );

        let module = KernelModule {
            name: name.to_string(),
            algorithm,
            element_ty,
            output_ty,
            functions: translation.module,
            dispatch,
            push_constants,
        };
        Ok((module, diags))
    }
}

/// The callable must accept the range's element and, for transform,
/// produce the output range's element.
fn check_signature(translation: &Translation, element_ty: &Type, output_ty: Option<&Type>) -> Result<()> {
    let Some(entry) = translation.module.get(&translation.entry) else {
        // Reported by the wrapper generator
        return Ok(());
    };
    if let Some((_, param_ty, param)) = entry.params.first() {
        let accepted = types::pointee(param_ty).unwrap_or(param_ty);
        if accepted != element_ty {
            bail_unsupported!(
                "'{}' takes {} but the range holds {}",
                param,
                types::format_type(accepted),
                types::format_type(element_ty)
            );
        }
    }
    if let Some(output_ty) = output_ty {
        if entry.return_ty != *output_ty {
            bail_unsupported!(
                "callable returns {} but the output range holds {}",
                types::format_type(&entry.return_ty),
                types::format_type(output_ty)
            );
        }
    }
    Ok(())
}
