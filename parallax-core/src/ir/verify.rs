//! SSA verification pass.
//!
//! Verifies that a function body satisfies the invariants the SPIR-V
//! generator relies on:
//! - Every value is defined exactly once and before use in emission order
//! - Every block has a terminator, and branch targets exist
//! - Block argument counts and types match at branch sites
//! - Every block is reachable from the entry (merge/continue declarations count)
//! - Storage slots are declared only at the top of the entry block
//! - Returns match the function's return type

use std::collections::HashMap;

use crate::types::{self, format_type};

use super::ssa::{BlockId, FuncBody, InstKind, Terminator, ValueId};

/// Verification error.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// A value was used before it was defined.
    UseBeforeDef {
        value: ValueId,
        use_block: BlockId,
        use_inst: Option<usize>,
    },
    /// A value was defined multiple times.
    MultipleDef { value: ValueId },
    /// A block has no terminator.
    MissingTerminator { block: BlockId },
    /// A branch or construct header names a block that does not exist.
    InvalidTarget { block: BlockId, target: BlockId },
    /// Branch passes wrong number of arguments to target block.
    BlockArgCountMismatch {
        branch_block: BlockId,
        target_block: BlockId,
        expected: usize,
        got: usize,
    },
    /// Branch passes an argument whose type differs from the block parameter.
    BlockArgTypeMismatch {
        branch_block: BlockId,
        target_block: BlockId,
        index: usize,
    },
    /// A conditional branch on a non-bool value.
    ConditionNotBool { block: BlockId },
    /// A block cannot be reached from the entry.
    UnreachableBlock { block: BlockId },
    /// An alloca outside the leading run of the entry block.
    MisplacedAlloca { block: BlockId, inst: usize },
    /// A return whose value does not match the declared return type.
    ReturnTypeMismatch { block: BlockId, expected: String },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UseBeforeDef {
                value,
                use_block,
                use_inst,
            } => match use_inst {
                Some(inst) => write!(
                    f,
                    "Value {} used before definition in block {} at instruction {}",
                    value, use_block, inst
                ),
                None => write!(f, "Value {} used before definition in block {} (terminator)", value, use_block),
            },
            VerifyError::MultipleDef { value } => write!(f, "Value {} defined multiple times", value),
            VerifyError::MissingTerminator { block } => write!(f, "Block {} has no terminator", block),
            VerifyError::InvalidTarget { block, target } => {
                write!(f, "Block {} refers to missing block {}", block, target)
            }
            VerifyError::BlockArgCountMismatch {
                branch_block,
                target_block,
                expected,
                got,
            } => write!(
                f,
                "Branch from {} to {} passes {} args, but block expects {}",
                branch_block, target_block, got, expected
            ),
            VerifyError::BlockArgTypeMismatch {
                branch_block,
                target_block,
                index,
            } => write!(
                f,
                "Branch from {} to {} passes argument {} with the wrong type",
                branch_block, target_block, index
            ),
            VerifyError::ConditionNotBool { block } => {
                write!(f, "Conditional branch in {} is not on a bool", block)
            }
            VerifyError::UnreachableBlock { block } => write!(f, "Block {} is unreachable", block),
            VerifyError::MisplacedAlloca { block, inst } => {
                write!(f, "Alloca at {} instruction {} is not at the top of the entry block", block, inst)
            }
            VerifyError::ReturnTypeMismatch { block, expected } => {
                write!(f, "Return in {} does not produce {}", block, expected)
            }
        }
    }
}

/// Verify a function body, collecting every violation found.
pub fn verify_func(body: &FuncBody) -> Result<(), Vec<VerifyError>> {
    let mut verifier = Verifier::new(body);
    verifier.verify();
    if verifier.errors.is_empty() { Ok(()) } else { Err(verifier.errors) }
}

struct Verifier<'a> {
    body: &'a FuncBody,
    defined: HashMap<ValueId, BlockId>,
    errors: Vec<VerifyError>,
}

impl<'a> Verifier<'a> {
    fn new(body: &'a FuncBody) -> Self {
        Verifier {
            body,
            defined: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn verify(&mut self) {
        for (value, _, _) in &self.body.params {
            self.define(*value, BlockId::ENTRY);
        }

        if !self.check_targets() {
            // Traversals below assume every target exists
            return;
        }

        for block_id in self.body.block_order() {
            self.verify_block(block_id);
        }

        let reachable = self.body.reachable_blocks(true);
        for block in self.body.block_ids() {
            if !reachable.contains(&block) {
                self.errors.push(VerifyError::UnreachableBlock { block });
            }
        }
    }

    fn check_targets(&mut self) -> bool {
        let count = self.body.num_blocks();
        let before = self.errors.len();
        for block_id in self.body.block_ids() {
            let block = self.body.get_block(block_id);
            let mut targets = block.terminator.as_ref().map(Terminator::successors).unwrap_or_default();
            if let Some(control) = &block.control {
                targets.extend(control.structural_targets());
            }
            for target in targets {
                if target.index() >= count {
                    self.errors.push(VerifyError::InvalidTarget { block: block_id, target });
                }
            }
        }
        self.errors.len() == before
    }

    fn define(&mut self, value: ValueId, block: BlockId) {
        if self.defined.insert(value, block).is_some() {
            self.errors.push(VerifyError::MultipleDef { value });
        }
    }

    fn check_use(&mut self, value: ValueId, block: BlockId, inst: Option<usize>) {
        if !self.defined.contains_key(&value) {
            self.errors.push(VerifyError::UseBeforeDef {
                value,
                use_block: block,
                use_inst: inst,
            });
        }
    }

    fn verify_block(&mut self, block_id: BlockId) {
        let block = self.body.get_block(block_id);

        for param in &block.params {
            self.define(param.value, block_id);
        }

        let mut in_alloca_prefix = block_id == BlockId::ENTRY;
        for (inst_idx, &inst_id) in block.insts.iter().enumerate() {
            let inst = self.body.get_inst(inst_id);
            match &inst.kind {
                InstKind::Alloca { .. } if !in_alloca_prefix => {
                    self.errors.push(VerifyError::MisplacedAlloca {
                        block: block_id,
                        inst: inst_idx,
                    });
                }
                InstKind::Alloca { .. } => {}
                _ => in_alloca_prefix = false,
            }
            for value in inst.kind.uses() {
                self.check_use(value, block_id, Some(inst_idx));
            }
            if let Some(result) = inst.result {
                self.define(result, block_id);
            }
        }

        match &block.terminator {
            None => self.errors.push(VerifyError::MissingTerminator { block: block_id }),
            Some(term) => self.verify_terminator(block_id, term),
        }
    }

    fn verify_terminator(&mut self, block_id: BlockId, term: &Terminator) {
        for value in term.uses() {
            self.check_use(value, block_id, None);
        }

        for (target, args) in term.edges() {
            let params = &self.body.get_block(target).params;
            if params.len() != args.len() {
                self.errors.push(VerifyError::BlockArgCountMismatch {
                    branch_block: block_id,
                    target_block: target,
                    expected: params.len(),
                    got: args.len(),
                });
                continue;
            }
            for (index, (param, arg)) in params.iter().zip(args).enumerate() {
                if arg.index() < self.body.num_values() && self.body.get_value_type(*arg) != &param.ty {
                    self.errors.push(VerifyError::BlockArgTypeMismatch {
                        branch_block: block_id,
                        target_block: target,
                        index,
                    });
                }
            }
        }

        if term.uses().iter().any(|v| v.index() >= self.body.num_values()) {
            return;
        }

        match term {
            Terminator::CondBranch { cond, .. } => {
                if !types::is_bool(self.body.get_value_type(*cond)) {
                    self.errors.push(VerifyError::ConditionNotBool { block: block_id });
                }
            }
            Terminator::Return(value) => {
                if self.body.get_value_type(*value) != &self.body.return_ty {
                    self.errors.push(VerifyError::ReturnTypeMismatch {
                        block: block_id,
                        expected: format_type(&self.body.return_ty),
                    });
                }
            }
            Terminator::ReturnVoid => {
                if !types::is_void(&self.body.return_ty) {
                    self.errors.push(VerifyError::ReturnTypeMismatch {
                        block: block_id,
                        expected: format_type(&self.body.return_ty),
                    });
                }
            }
            Terminator::Branch { .. } | Terminator::Unreachable => {}
        }
    }
}
