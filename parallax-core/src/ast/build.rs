//! Shorthand constructors for building callable trees by hand.
//!
//! Used by tests and by tools that synthesize call sites without a C++
//! front end.

use super::*;

pub fn float() -> SourceType {
    SourceType::Float
}

pub fn double() -> SourceType {
    SourceType::Double
}

pub fn int() -> SourceType {
    SourceType::int()
}

pub fn float_ref() -> SourceType {
    SourceType::reference(SourceType::Float)
}

pub fn int_lit(value: i64) -> Expr {
    Expr {
        kind: ExprKind::IntLit(value),
        ty: SourceType::int(),
    }
}

pub fn float_lit(value: f64) -> Expr {
    Expr {
        kind: ExprKind::FloatLit(value),
        ty: SourceType::Float,
    }
}

pub fn double_lit(value: f64) -> Expr {
    Expr {
        kind: ExprKind::FloatLit(value),
        ty: SourceType::Double,
    }
}

pub fn bool_lit(value: bool) -> Expr {
    Expr {
        kind: ExprKind::BoolLit(value),
        ty: SourceType::Bool,
    }
}

pub fn var(name: &str, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::DeclRef(name.to_string()),
        ty,
    }
}

pub fn unary(op: UnaryOp, operand: Expr, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        ty,
    }
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    }
}

pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    binary(BinaryOp::Assign, lhs, rhs, ty)
}

pub fn compound(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    Expr {
        kind: ExprKind::CompoundAssign {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    }
}

pub fn conditional(cond: Expr, then_expr: Expr, else_expr: Expr, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Conditional {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        },
        ty,
    }
}

pub fn subscript(base: Expr, index: Expr, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Subscript {
            base: Box::new(base),
            index: Box::new(index),
        },
        ty,
    }
}

pub fn member(base: Expr, field: &str, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Member {
            base: Some(Box::new(base)),
            field: field.to_string(),
            arrow: false,
        },
        ty,
    }
}

/// Implicit `this->field`.
pub fn this_member(field: &str, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Member {
            base: None,
            field: field.to_string(),
            arrow: true,
        },
        ty,
    }
}

pub fn call(callee: &str, args: Vec<Expr>, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Call {
            callee: callee.to_string(),
            args,
        },
        ty,
    }
}

pub fn cast(operand: Expr, ty: SourceType) -> Expr {
    Expr {
        kind: ExprKind::Cast {
            operand: Box::new(operand),
        },
        ty,
    }
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Compound(stmts)
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(expr)
}

pub fn ret(expr: Expr) -> Stmt {
    Stmt::Return(Some(expr))
}

pub fn decl(name: &str, ty: SourceType, init: Option<Expr>) -> Stmt {
    Stmt::Decl(vec![VarDecl {
        name: name.to_string(),
        ty,
        init: init.map(Init::Expr),
    }])
}

pub fn decl_list(name: &str, ty: SourceType, items: Vec<Expr>) -> Stmt {
    Stmt::Decl(vec![VarDecl {
        name: name.to_string(),
        ty,
        init: Some(Init::List(items)),
    }])
}

pub fn if_else(cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    Stmt::If {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    }
}

pub fn while_loop(cond: Expr, body: Stmt) -> Stmt {
    Stmt::While {
        cond,
        body: Box::new(body),
    }
}

pub fn for_loop(init: Option<Stmt>, cond: Option<Expr>, inc: Option<Expr>, body: Stmt) -> Stmt {
    Stmt::For {
        init: init.map(Box::new),
        cond,
        inc,
        body: Box::new(body),
    }
}

pub fn param(name: &str, ty: SourceType) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

pub fn capture(name: &str, ty: SourceType, by_ref: bool) -> Capture {
    Capture {
        name: name.to_string(),
        ty,
        by_ref,
    }
}

pub fn lambda(params: Vec<Param>, return_ty: SourceType, body: Stmt, captures: Vec<Capture>) -> Lambda {
    Lambda {
        params,
        return_ty,
        body,
        captures,
    }
}

pub fn call_site(algorithm: &str, line: u32, element_ty: SourceType, callable: Callable) -> CallSite {
    CallSite {
        algorithm: algorithm.to_string(),
        policy: "std::execution::par".to_string(),
        line,
        element_ty,
        output_ty: None,
        callable,
    }
}
