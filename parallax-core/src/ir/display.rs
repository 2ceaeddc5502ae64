//! Text form of the IR, used for debugging output and for comparing
//! translations structurally.

use std::fmt::{self, Display, Write};

use crate::types::format_type;

use super::ssa::{ControlHeader, FuncBody, Inst, InstKind, Module, Terminator, ValueId};

fn join(values: &[ValueId]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

impl Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::Int(v) => write!(f, "const {}", v),
            InstKind::Float(v) => write!(f, "const {:?}", v),
            InstKind::Bool(v) => write!(f, "const {}", v),
            InstKind::Null => write!(f, "null"),
            InstKind::Binary { op, lhs, rhs } => write!(f, "{} {}, {}", op.name(), lhs, rhs),
            InstKind::Unary { op, operand } => write!(f, "{} {}", op.name(), operand),
            InstKind::Convert { op, value } => write!(f, "{} {}", op.name(), value),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => write!(f, "select {}, {}, {}", cond, then_value, else_value),
            InstKind::Math { op, args } => write!(f, "{}({})", op.name(), join(args)),
            InstKind::Alloca { elem_ty } => write!(f, "alloca {}", format_type(elem_ty)),
            InstKind::Load { ptr } => write!(f, "load {}", ptr),
            InstKind::Store { ptr, value } => write!(f, "store {}, {}", ptr, value),
            InstKind::AccessChain { base, indices } => write!(f, "access {}[{}]", base, join(indices)),
            InstKind::PtrAccessChain {
                base,
                element,
                indices,
            } => write!(f, "ptr_access {}+{}[{}]", base, element, join(indices)),
            InstKind::Call { func, args } => write!(f, "call {}({})", func, join(args)),
        }
    }
}

impl Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch { target, args } => write!(f, "br {}({})", target, join(args)),
            Terminator::CondBranch {
                cond,
                then_target,
                then_args,
                else_target,
                else_args,
            } => write!(
                f,
                "br_if {}, {}({}), {}({})",
                cond,
                then_target,
                join(then_args),
                else_target,
                join(else_args)
            ),
            Terminator::Return(v) => write!(f, "ret {}", v),
            Terminator::ReturnVoid => write!(f, "ret"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

fn write_inst(out: &mut String, inst: &Inst) -> fmt::Result {
    match inst.result {
        Some(result) => writeln!(out, "    {}: {} = {}", result, format_type(&inst.result_ty), inst.kind),
        None => writeln!(out, "    {}", inst.kind),
    }
}

impl Display for FuncBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self
            .params
            .iter()
            .map(|(v, ty, name)| format!("{} {}: {}", name, v, format_type(ty)))
            .collect();
        writeln!(f, "fn {}({}) -> {} {{", self.name, params.join(", "), format_type(&self.return_ty))?;

        for block_id in self.block_ids() {
            let block = self.get_block(block_id);
            let mut out = String::new();
            let params: Vec<_> =
                block.params.iter().map(|p| format!("{}: {}", p.value, format_type(&p.ty))).collect();
            write!(out, "  {}", block_id)?;
            if !params.is_empty() {
                write!(out, "({})", params.join(", "))?;
            }
            match &block.control {
                Some(ControlHeader::Loop { merge, continue_block }) => {
                    write!(out, ":  ; loop merge {} continue {}", merge, continue_block)?
                }
                Some(ControlHeader::Selection { merge }) => write!(out, ":  ; selection merge {}", merge)?,
                None => write!(out, ":")?,
            }
            out.push('\n');
            for &inst_id in &block.insts {
                write_inst(&mut out, self.get_inst(inst_id))?;
            }
            match &block.terminator {
                Some(term) => writeln!(out, "    {}", term)?,
                None => writeln!(out, "    <no terminator>")?,
            }
            f.write_str(&out)?;
        }
        writeln!(f, "}}")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
