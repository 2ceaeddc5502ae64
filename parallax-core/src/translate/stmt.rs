//! Statement lowering and structured control flow.
//!
//! Every construct that branches records its merge block (and for loops its
//! continue block) on the header, so the emitter can produce structured
//! SPIR-V without rediscovering the shape. A statement that fails is either
//! rolled back and dropped with a warning (best effort) or fails the whole
//! callable (strict).

use crate::ast::{Expr, Init, Stmt, VarDecl};
use crate::config::FailureMode;
use crate::diags::TranslationWarning;
use crate::error::Result;
use crate::ir::{BlockId, Terminator, ValueId};
use crate::types::{self, format_type, AddressSpace, Type, TypeName};
use crate::{bail_unsupported, err_unsupported};

use super::expr::is_lvalue;
use super::{Access, BindingKind, FunctionTranslator, LoopTargets};

impl<'a> FunctionTranslator<'a> {
    /// Translate one statement into the current block.
    pub fn translate_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        if self.builder.is_current_terminated() {
            log::debug!("skipping unreachable statement in '{}'", self.function_name());
            return Ok(());
        }
        let checkpoint = self.builder.checkpoint();
        let env = self.env.clone();
        let depth = self.loops.len();

        match self.lower_stmt(stmt) {
            Ok(()) => Ok(()),
            Err(err) if err.is_recoverable() && self.mode == FailureMode::BestEffort => {
                if let Some(checkpoint) = checkpoint {
                    self.builder.rollback(checkpoint);
                }
                self.env = env;
                self.loops.truncate(depth);
                self.diags.warn(TranslationWarning::DroppedStatement {
                    function: self.function_name(),
                    reason: err.to_string(),
                });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Compound(stmts) => {
                let scope = self.env.clone();
                for stmt in stmts {
                    self.translate_stmt(stmt)?;
                }
                self.env = scope;
                Ok(())
            }
            Stmt::Decl(decls) => {
                for decl in decls {
                    self.lower_decl(decl)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.lower_discarded(expr),
            Stmt::Return(value) => self.lower_return(value.as_ref()),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body } => self.lower_while(cond, body),
            Stmt::DoWhile { body, cond } => self.lower_do_while(body, cond),
            Stmt::For { init, cond, inc, body } => self.lower_for(init.as_deref(), cond.as_ref(), inc.as_ref(), body),
            Stmt::Break => {
                let target = self.loops.last().ok_or_else(|| err_unsupported!("'break' outside a loop"))?.merge;
                self.jump(target)
            }
            Stmt::Continue => {
                let target = self
                    .loops
                    .last()
                    .ok_or_else(|| err_unsupported!("'continue' outside a loop"))?
                    .continue_block;
                self.jump(target)
            }
            Stmt::Null => Ok(()),
        }
    }

    fn jump(&mut self, target: BlockId) -> Result<()> {
        self.builder.terminate(Terminator::Branch { target, args: vec![] })?;
        Ok(())
    }

    fn jump_if_open(&mut self, target: BlockId) -> Result<()> {
        if !self.builder.is_current_terminated() {
            self.jump(target)?;
        }
        Ok(())
    }

    /// Continue in `merge`; it is dead when nothing branches to it.
    fn enter_merge(&mut self, merge: BlockId) -> Result<()> {
        self.builder.switch_to_block(merge)?;
        if !self.builder.has_predecessors(merge) {
            self.builder.terminate(Terminator::Unreachable)?;
        }
        Ok(())
    }

    fn lower_condition(&mut self, cond: &Expr) -> Result<ValueId> {
        let value = self.lower_expr(cond, Access::Value)?;
        self.to_bool(value)
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn lower_decl(&mut self, decl: &VarDecl) -> Result<()> {
        if decl.ty.is_reference() {
            let Some(Init::Expr(init)) = &decl.init else {
                bail_unsupported!("reference '{}' without an initializer", decl.name);
            };
            if !is_lvalue(init) {
                bail_unsupported!("reference '{}' bound to a temporary", decl.name);
            }
            let ptr = self.lower_expr(init, Access::Place)?;
            self.bind(&decl.name, BindingKind::Slot(ptr));
            return Ok(());
        }

        if decl.ty.is_pointer() {
            let Some(Init::Expr(init)) = &decl.init else {
                bail_unsupported!("pointer '{}' without an initializer", decl.name);
            };
            let value = self.lower_expr(init, Access::Value)?;
            if !types::is_pointer(self.builder.value_type(value)) {
                bail_unsupported!("pointer '{}' initialized from a non-pointer", decl.name);
            }
            self.bind(&decl.name, BindingKind::PointerValue(value));
            return Ok(());
        }

        let ty = self.value_type(&decl.ty);
        if types::is_void(&ty) {
            bail_unsupported!("variable '{}' of type void", decl.name);
        }
        let slot = self.builder.push_alloca(ty.clone());
        self.slots.insert(slot);
        match &decl.init {
            None => {}
            Some(Init::Expr(init)) => {
                let value = self.lower_expr(init, Access::Value)?;
                let value = self.coerce(value, &ty)?;
                self.builder.push_store(slot, value)?;
            }
            Some(Init::List(items)) => self.lower_init_list(slot, &ty, items)?,
        }
        // Bound after the initializer, which cannot see the new name
        self.bind(&decl.name, BindingKind::Slot(slot));
        Ok(())
    }

    fn bind(&mut self, name: &str, kind: BindingKind) {
        self.env.insert(name.to_string(), kind);
    }

    /// Brace initialization. Missing trailing elements are zeroed.
    fn lower_init_list(&mut self, slot: ValueId, ty: &Type, items: &[Expr]) -> Result<()> {
        let components: Vec<Type> = match ty {
            Type::Constructed(TypeName::Array(len), args) => match args.first() {
                Some(elem) => vec![elem.clone(); *len as usize],
                None => bail_unsupported!("array type without an element type"),
            },
            Type::Constructed(TypeName::Struct(_), fields) => fields.clone(),
            scalar if types::is_scalar(scalar) => {
                return match items {
                    [] => {
                        let zero = self.zero(scalar)?;
                        self.builder.push_store(slot, zero)?;
                        Ok(())
                    }
                    [item] => {
                        let value = self.lower_expr(item, Access::Value)?;
                        let value = self.coerce(value, scalar)?;
                        self.builder.push_store(slot, value)?;
                        Ok(())
                    }
                    _ => bail_unsupported!("scalar initialized from {} values", items.len()),
                };
            }
            other => bail_unsupported!("brace initialization of {}", format_type(other)),
        };
        if items.len() > components.len() {
            bail_unsupported!("{} initializers for {} elements", items.len(), components.len());
        }
        if items.len() < components.len() {
            let zero = self.builder.push_null(ty.clone())?;
            self.builder.push_store(slot, zero)?;
        }
        for (index, (item, component)) in items.iter().zip(&components).enumerate() {
            let value = self.lower_expr(item, Access::Value)?;
            let value = self.coerce(value, component)?;
            let index = self.builder.push_int(index as i64, types::i32())?;
            let ptr = self.builder.push_access_chain(
                slot,
                vec![index],
                types::pointer(AddressSpace::Function, component.clone()),
            )?;
            self.builder.push_store(ptr, value)?;
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> Result<()> {
        let return_ty = self.builder.return_ty().clone();
        let term = match value {
            // `return f();` in a void function
            Some(expr) if types::is_void(&return_ty) => {
                self.lower_discarded(expr)?;
                Terminator::ReturnVoid
            }
            Some(expr) => {
                let value = self.lower_expr(expr, Access::Value)?;
                Terminator::Return(self.coerce(value, &return_ty)?)
            }
            None if types::is_void(&return_ty) => Terminator::ReturnVoid,
            None => bail_unsupported!("'return;' in a function returning {}", format_type(&return_ty)),
        };
        self.builder.terminate(term)?;
        Ok(())
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn lower_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) -> Result<()> {
        let c = self.lower_condition(cond)?;
        let then_block = self.builder.create_block();
        let else_block = else_branch.is_some().then(|| self.builder.create_block());
        let merge = self.builder.create_block();

        self.builder.mark_selection_header(merge)?;
        self.builder.terminate(Terminator::CondBranch {
            cond: c,
            then_target: then_block,
            then_args: vec![],
            else_target: else_block.unwrap_or(merge),
            else_args: vec![],
        })?;

        self.builder.switch_to_block(then_block)?;
        self.translate_stmt(then_branch)?;
        self.jump_if_open(merge)?;

        if let (Some(block), Some(stmt)) = (else_block, else_branch) {
            self.builder.switch_to_block(block)?;
            self.translate_stmt(stmt)?;
            self.jump_if_open(merge)?;
        }
        self.enter_merge(merge)
    }

    /// Open a loop: branch into a fresh header block marked with its merge
    /// and continue targets. Returns (header, merge, continue).
    fn open_loop(&mut self) -> Result<(BlockId, BlockId, BlockId)> {
        let header = self.builder.create_block();
        let continue_block = self.builder.create_block();
        let merge = self.builder.create_block();
        self.jump(header)?;
        self.builder.switch_to_block(header)?;
        self.builder.mark_loop_header(merge, continue_block)?;
        Ok((header, merge, continue_block))
    }

    fn lower_loop_body(&mut self, block: BlockId, body: &Stmt, merge: BlockId, continue_block: BlockId) -> Result<()> {
        self.builder.switch_to_block(block)?;
        self.loops.push(LoopTargets { merge, continue_block });
        let result = self.translate_stmt(body);
        self.loops.pop();
        result?;
        self.jump_if_open(continue_block)
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt) -> Result<()> {
        let (header, merge, continue_block) = self.open_loop()?;
        let cond_block = self.builder.create_block();
        let body_block = self.builder.create_block();
        self.jump(cond_block)?;

        self.builder.switch_to_block(cond_block)?;
        let c = self.lower_condition(cond)?;
        self.builder.terminate(Terminator::CondBranch {
            cond: c,
            then_target: body_block,
            then_args: vec![],
            else_target: merge,
            else_args: vec![],
        })?;

        self.lower_loop_body(body_block, body, merge, continue_block)?;
        self.builder.switch_to_block(continue_block)?;
        self.jump(header)?;
        self.enter_merge(merge)
    }

    fn lower_do_while(&mut self, body: &Stmt, cond: &Expr) -> Result<()> {
        let (header, merge, continue_block) = self.open_loop()?;
        let body_block = self.builder.create_block();
        self.jump(body_block)?;

        self.lower_loop_body(body_block, body, merge, continue_block)?;
        self.builder.switch_to_block(continue_block)?;
        let c = self.lower_condition(cond)?;
        self.builder.terminate(Terminator::CondBranch {
            cond: c,
            then_target: header,
            then_args: vec![],
            else_target: merge,
            else_args: vec![],
        })?;
        self.enter_merge(merge)
    }

    fn lower_for(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, inc: Option<&Expr>, body: &Stmt) -> Result<()> {
        let scope = self.env.clone();
        // A failing initializer drops the whole loop
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }
        let (header, merge, continue_block) = self.open_loop()?;
        let body_block = self.builder.create_block();
        match cond {
            Some(cond) => {
                let cond_block = self.builder.create_block();
                self.jump(cond_block)?;
                self.builder.switch_to_block(cond_block)?;
                let c = self.lower_condition(cond)?;
                self.builder.terminate(Terminator::CondBranch {
                    cond: c,
                    then_target: body_block,
                    then_args: vec![],
                    else_target: merge,
                    else_args: vec![],
                })?;
            }
            None => self.jump(body_block)?,
        }

        self.lower_loop_body(body_block, body, merge, continue_block)?;
        self.builder.switch_to_block(continue_block)?;
        if let Some(inc) = inc {
            self.lower_discarded(inc)?;
        }
        self.jump(header)?;
        self.env = scope;
        self.enter_merge(merge)
    }

    /// Terminate the final block. Falling off the end of a non-void
    /// function returns zero with a warning.
    pub(crate) fn finish_function(&mut self) -> Result<()> {
        if self.builder.is_current_terminated() {
            return Ok(());
        }
        let return_ty = self.builder.return_ty().clone();
        if types::is_void(&return_ty) {
            self.builder.terminate(Terminator::ReturnVoid)?;
            return Ok(());
        }
        self.diags.warn(TranslationWarning::MissingReturn {
            function: self.function_name(),
        });
        let zero = self.zero(&return_ty)?;
        self.builder.terminate(Terminator::Return(zero))?;
        Ok(())
    }
}
