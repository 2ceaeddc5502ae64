//! Entry function for function objects.
//!
//! A translated `operator()` takes the element and one value per member. The
//! wrapper adapts that to what the dispatcher has at hand: the buffer(s), the
//! invocation index and the member values from the push-constant block.

use crate::algorithm::ParallelAlgorithm;
use crate::ast::ClassContext;
use crate::bail_wrapper;
use crate::error::{CompilerError, Result};
use crate::ir::{self, FuncBuilder, Terminator};
use crate::translate::CALL_OPERATOR;
use crate::types::{self, AddressSpace, Type};

/// Name of the wrapper generated for `class`.
pub fn wrapper_name(class: &ClassContext) -> String {
    format!("kernel_{}", class.name)
}

/// Append the wrapper for `class` to `module`, which must already hold the
/// translated call operator. Returns the wrapper's name.
///
/// Parameters: the input buffer, the output buffer (transform only), the
/// invocation index, then one value per member in layout order.
pub fn generate_wrapper(class: &ClassContext, algorithm: ParallelAlgorithm, module: &mut ir::Module) -> Result<String> {
    let Some(op) = module.get(CALL_OPERATOR) else {
        bail_wrapper!("'{}' has no operator()", class.name);
    };
    if op.params.len() != class.fields.len() + 1 {
        bail_wrapper!(
            "operator() of '{}' takes {} parameters; expected the element and {} members",
            class.name,
            op.params.len(),
            class.fields.len()
        );
    }

    let element_param = &op.params[0].1;
    let (elem_ty, by_pointer) = match types::pointee(element_param) {
        Some(pointee) => (pointee.clone(), true),
        None => (element_param.clone(), false),
    };
    let return_ty = op.return_ty.clone();
    let members: Vec<(Type, String)> = op.params[1..].iter().map(|(_, ty, name)| (ty.clone(), name.clone())).collect();

    let buffer = |ty: &Type| types::pointer(AddressSpace::StorageBuffer, types::buffer_block(ty.clone()));
    let mut params = vec![(buffer(&elem_ty), "input".to_string())];
    let output_ty = match algorithm {
        ParallelAlgorithm::Transform => {
            if types::is_void(&return_ty) {
                bail_wrapper!("operator() of '{}' returns void; transform needs a value", class.name);
            }
            params.push((buffer(&return_ty), "output".to_string()));
            Some(return_ty.clone())
        }
        ParallelAlgorithm::ForEach => None,
    };
    let index_param = params.len();
    params.push((types::u32(), "index".to_string()));
    params.extend(members);

    let name = wrapper_name(class);
    let mut builder = FuncBuilder::new(&name, params, types::void());
    let input = builder.get_param(0);
    let index = builder.get_param(index_param);

    let zero = builder.push_int(0, types::i32())?;
    let elem_ptr = builder.push_access_chain(
        input,
        vec![zero, index],
        types::pointer(AddressSpace::StorageBuffer, elem_ty.clone()),
    )?;
    let element = if by_pointer { elem_ptr } else { builder.push_load(elem_ptr)? };

    let mut args = vec![element];
    args.extend((0..class.fields.len()).map(|i| builder.get_param(index_param + 1 + i)));
    let result = builder.push_call(CALL_OPERATOR, args, return_ty.clone())?;

    match (output_ty, result) {
        (Some(out_ty), Some(value)) => {
            let output = builder.get_param(1);
            let out_ptr =
                builder.push_access_chain(output, vec![zero, index], types::pointer(AddressSpace::StorageBuffer, out_ty))?;
            builder.push_store(out_ptr, value)?;
        }
        (None, Some(value)) if !by_pointer && return_ty == elem_ty => {
            builder.push_store(elem_ptr, value)?;
        }
        (None, Some(_)) => {
            log::debug!("result of '{}::operator()' does not fit the element; discarded", class.name);
        }
        _ => {}
    }
    builder.terminate(Terminator::ReturnVoid)?;

    let body = builder.finish()?;
    if let Err(errors) = ir::verify_func(&body) {
        return Err(CompilerError::Verify {
            function: name,
            errors,
        });
    }
    log::debug!("generated wrapper '{}' for '{}'", name, class.name);
    module.add(body);
    Ok(name)
}
