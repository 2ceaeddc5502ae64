//! Callable to IR translation.
//!
//! One [`FunctionTranslator`] lowers one function body. Every named source
//! variable is a storage slot: by-value parameters, captures and members
//! are spilled to entry-block allocas, references bind straight to the
//! pointer they arrive as. Expressions ask for either the value or the
//! place of a subexpression (see [`Access`]), so loads happen only where
//! C++ performs lvalue-to-rvalue conversion.

pub mod expr;
pub mod ops;
pub mod stmt;

#[cfg(test)]
mod expr_tests;

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{ClassContext, Lambda, MethodDecl, Param, SourceType};
use crate::config::FailureMode;
use crate::diags::{Diagnostics, TranslationWarning};
use crate::error::Result;
use crate::ir::{self, FuncBuilder, ValueId};
use crate::types::{self, AddressSpace, Type, TypeMapper};
use crate::{bail_translate, bail_unsupported};

/// Name of the function a lambda body is translated into.
pub const CALLABLE_NAME: &str = "callable";

/// Name of a function object's call operator.
pub const CALL_OPERATOR: &str = "operator()";

/// Whether an expression is wanted as a value or as the storage it denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Value,
    Place,
}

/// How the element reaches the callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementPassing {
    /// The element is loaded and passed by value.
    ByValue,
    /// The callable takes a reference; it receives the buffer address.
    ByPointer,
}

/// A translated callable with everything the kernel needs to invoke it.
#[derive(Debug)]
pub struct Translation {
    pub module: ir::Module,
    /// Function the dispatcher or wrapper calls.
    pub entry: String,
    pub element: ElementPassing,
    /// Extra arguments after the element, in order: captures for lambdas,
    /// members for function objects.
    pub captures: Vec<(String, Type)>,
    pub diagnostics: Diagnostics,
}

/// How a translated function receives one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    /// Spilled to a local slot on entry.
    Value,
    /// Already a pointer to the referenced object.
    Place,
    /// A C++ pointer variable; bound as a pointer value.
    Pointer,
}

#[derive(Debug, Clone)]
pub(crate) struct ParamSpec {
    pub name: String,
    pub ty: Type,
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Parameter spec for a declared parameter. References point into `space`.
    fn declared(param: &Param, mapper: &mut TypeMapper, space: AddressSpace) -> Self {
        let kind = if param.ty.is_reference() {
            ParamKind::Place
        } else if param.ty.is_pointer() {
            ParamKind::Pointer
        } else {
            ParamKind::Value
        };
        ParamSpec {
            name: param.name.clone(),
            ty: mapper.map_in(&param.ty, space),
            kind,
        }
    }

    /// Spec for a capture or member. Anything address-like becomes a 32-bit
    /// placeholder, since device code cannot dereference host addresses.
    fn captured(name: &str, ty: &SourceType, by_ref: bool, mapper: &mut TypeMapper, diags: &mut Diagnostics) -> Self {
        if by_ref || ty.is_reference() || ty.is_pointer() {
            let source = if by_ref && !ty.is_reference() {
                SourceType::reference(ty.clone()).spelling()
            } else {
                ty.spelling()
            };
            diags.warn(TranslationWarning::CaptureDowngraded {
                name: name.to_string(),
                source,
            });
            return ParamSpec {
                name: name.to_string(),
                ty: types::u32(),
                kind: ParamKind::Value,
            };
        }
        ParamSpec {
            name: name.to_string(),
            ty: mapper.map(ty),
            kind: ParamKind::Value,
        }
    }
}

/// What a name resolves to inside a function.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BindingKind {
    /// Pointer to the variable's storage.
    Slot(ValueId),
    /// A pointer variable's value.
    PointerValue(ValueId),
}

/// Signature of a member function as seen by its callers.
#[derive(Debug, Clone)]
pub(crate) struct MethodSignature {
    pub params: Vec<ParamSpec>,
    pub return_ty: Type,
}

/// Loop targets for `break` and `continue`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTargets {
    pub merge: ir::BlockId,
    pub continue_block: ir::BlockId,
}

/// Lowers one function body into IR.
pub struct FunctionTranslator<'a> {
    pub(crate) builder: FuncBuilder,
    pub(crate) env: IndexMap<String, BindingKind>,
    /// Members of the enclosing function object, reached through implicit `this`.
    pub(crate) members: IndexMap<String, BindingKind>,
    /// Values that are memory object declarations (locals and pointer parameters).
    pub(crate) slots: HashSet<ValueId>,
    pub(crate) mapper: &'a mut TypeMapper,
    pub(crate) diags: Diagnostics,
    pub(crate) mode: FailureMode,
    pub(crate) class: Option<&'a ClassContext>,
    /// Member-function signatures, by name.
    pub(crate) methods: &'a IndexMap<String, MethodSignature>,
    pub(crate) loops: Vec<LoopTargets>,
}

impl<'a> FunctionTranslator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        params: &[ParamSpec],
        members: &[ParamSpec],
        return_ty: Type,
        mapper: &'a mut TypeMapper,
        mode: FailureMode,
        class: Option<&'a ClassContext>,
        methods: &'a IndexMap<String, MethodSignature>,
    ) -> Result<Self> {
        let signature = params.iter().chain(members).map(|p| (p.ty.clone(), p.name.clone())).collect();
        let builder = FuncBuilder::new(name, signature, return_ty);
        let mut translator = FunctionTranslator {
            builder,
            env: IndexMap::new(),
            members: IndexMap::new(),
            slots: HashSet::new(),
            mapper,
            diags: Diagnostics::new(),
            mode,
            class,
            methods,
            loops: Vec::new(),
        };

        for (index, spec) in params.iter().enumerate() {
            let binding = translator.bind_param(index, spec)?;
            translator.env.insert(spec.name.clone(), binding);
        }
        for (offset, spec) in members.iter().enumerate() {
            let binding = translator.bind_param(params.len() + offset, spec)?;
            translator.members.insert(spec.name.clone(), binding);
        }
        log::debug!("translating '{}' ({} params, {} members)", name, params.len(), members.len());
        Ok(translator)
    }

    fn bind_param(&mut self, index: usize, spec: &ParamSpec) -> Result<BindingKind> {
        let value = self.builder.get_param(index);
        let kind = match spec.kind {
            ParamKind::Value => {
                let slot = self.builder.push_alloca(spec.ty.clone());
                self.builder.push_store(slot, value)?;
                self.slots.insert(slot);
                BindingKind::Slot(slot)
            }
            ParamKind::Place => {
                self.slots.insert(value);
                BindingKind::Slot(value)
            }
            ParamKind::Pointer => BindingKind::PointerValue(value),
        };
        Ok(kind)
    }

    pub(crate) fn function_name(&self) -> String {
        self.builder.name().to_string()
    }

    /// IR type of a source type, references stripped.
    pub(crate) fn value_type(&mut self, ty: &SourceType) -> Type {
        self.mapper.map(ty.non_reference())
    }

    /// Translate `body` and finish the function.
    pub(crate) fn translate_body(mut self, body: &crate::ast::Stmt) -> Result<(ir::FuncBody, Diagnostics)> {
        self.translate_stmt(body)?;
        self.finish_function()?;
        let func = self.builder.finish()?;
        if let Err(errors) = ir::verify_func(&func) {
            return Err(crate::error::CompilerError::Verify {
                function: func.name.clone(),
                errors,
            });
        }
        Ok((func, self.diags))
    }
}

/// Translate a lambda into a single function named [`CALLABLE_NAME`] taking
/// the element followed by every capture.
pub fn translate_lambda(lambda: &Lambda, mapper: &mut TypeMapper, mode: FailureMode) -> Result<Translation> {
    if lambda.params.len() != 1 {
        bail_unsupported!("lambda takes {} parameters; exactly one element is expected", lambda.params.len());
    }
    if lambda.return_ty.is_reference() {
        bail_unsupported!("lambda returns a reference ('{}')", lambda.return_ty.spelling());
    }

    let mut diags = Diagnostics::new();
    let element = ParamSpec::declared(&lambda.params[0], mapper, AddressSpace::StorageBuffer);
    let passing = element_passing(&element)?;
    let captures: Vec<ParamSpec> = lambda
        .captures
        .iter()
        .map(|c| ParamSpec::captured(&c.name, &c.ty, c.by_ref, mapper, &mut diags))
        .collect();
    let return_ty = mapper.map(&lambda.return_ty);

    let no_methods = IndexMap::new();
    let translator =
        FunctionTranslator::new(CALLABLE_NAME, &[element], &captures, return_ty, mapper, mode, None, &no_methods)?;
    let (func, body_diags) = translator.translate_body(&lambda.body)?;
    diags.extend(body_diags);

    let mut module = ir::Module::new();
    module.add(func);
    Ok(Translation {
        module,
        entry: CALLABLE_NAME.to_string(),
        element: passing,
        captures: captures.into_iter().map(|c| (c.name, c.ty)).collect(),
        diagnostics: diags,
    })
}

/// Translate every member function of a function object. Each one takes its
/// declared parameters followed by one value per member variable.
pub fn translate_functor(class: &ClassContext, mapper: &mut TypeMapper, mode: FailureMode) -> Result<Translation> {
    let mut diags = Diagnostics::new();
    let members: Vec<ParamSpec> =
        class.fields.iter().map(|f| ParamSpec::captured(&f.name, &f.ty, false, mapper, &mut diags)).collect();

    let mut methods = IndexMap::new();
    let mut decls: Vec<&MethodDecl> = Vec::new();
    for decl in &class.methods {
        if methods.contains_key(&decl.name) {
            log::debug!("ignoring overload of '{}::{}'", class.name, decl.name);
            continue;
        }
        methods.insert(decl.name.clone(), method_signature(decl, mapper)?);
        decls.push(decl);
    }

    let element = match methods.get(CALL_OPERATOR) {
        Some(signature) => match signature.params.as_slice() {
            [element] => element_passing(element)?,
            params => bail_unsupported!(
                "'{}::operator()' takes {} parameters; exactly one element is expected",
                class.name,
                params.len()
            ),
        },
        // Reported by the wrapper generator
        None => ElementPassing::ByValue,
    };

    // Helpers first so callees precede callers in the module
    decls.sort_by_key(|d| d.name == CALL_OPERATOR);

    let mut module = ir::Module::new();
    for decl in decls {
        let signature = &methods[&decl.name];
        let translator = FunctionTranslator::new(
            &decl.name,
            &signature.params,
            &members,
            signature.return_ty.clone(),
            mapper,
            mode,
            Some(class),
            &methods,
        )?;
        let (func, body_diags) = translator.translate_body(&decl.body)?;
        diags.extend(body_diags);
        module.add(func);
    }

    Ok(Translation {
        module,
        entry: CALL_OPERATOR.to_string(),
        element,
        captures: members.into_iter().map(|m| (m.name, m.ty)).collect(),
        diagnostics: diags,
    })
}

fn method_signature(decl: &MethodDecl, mapper: &mut TypeMapper) -> Result<MethodSignature> {
    if decl.return_ty.is_reference() {
        bail_unsupported!("'{}' returns a reference", decl.name);
    }
    // The call operator's reference parameter is the buffer element itself
    let space = if decl.name == CALL_OPERATOR { AddressSpace::StorageBuffer } else { AddressSpace::Function };
    Ok(MethodSignature {
        params: decl.params.iter().map(|p| ParamSpec::declared(p, mapper, space)).collect(),
        return_ty: mapper.map(&decl.return_ty),
    })
}

fn element_passing(element: &ParamSpec) -> Result<ElementPassing> {
    match element.kind {
        ParamKind::Value => Ok(ElementPassing::ByValue),
        ParamKind::Place => Ok(ElementPassing::ByPointer),
        ParamKind::Pointer => bail_translate!("element parameter '{}' is a pointer", element.name),
    }
}
