//! Callable trees handed over by the C++ front end.
//!
//! The front end locates parallel-algorithm call sites, resolves every
//! expression's type and flattens class layouts. What arrives here is the
//! already-typed subset this crate knows how to translate: expression and
//! statement trees, parameter and capture lists, and for function objects
//! the class context (`operator()`, member fields base-first, and the
//! member functions it calls).

pub mod build;

use serde::{Deserialize, Serialize};

/// A C++ type as spelled by the front end, with references and cv-qualifiers
/// already separated out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Void,
    Bool,
    /// Any integer type; `bits` is the host width (8 for char, 64 for long long).
    Integer { bits: u32, signed: bool },
    Float,
    Double,
    Pointer { pointee: Box<SourceType> },
    Reference { pointee: Box<SourceType> },
    Array { element: Box<SourceType>, len: u32 },
    Record(RecordType),
    /// Anything else (templates, unions, std:: containers...), kept by spelling.
    Other { spelling: String },
}

impl SourceType {
    pub fn int() -> Self {
        SourceType::Integer { bits: 32, signed: true }
    }

    pub fn uint() -> Self {
        SourceType::Integer { bits: 32, signed: false }
    }

    pub fn long() -> Self {
        SourceType::Integer { bits: 64, signed: true }
    }

    pub fn reference(pointee: SourceType) -> Self {
        SourceType::Reference { pointee: Box::new(pointee) }
    }

    pub fn pointer(pointee: SourceType) -> Self {
        SourceType::Pointer { pointee: Box::new(pointee) }
    }

    pub fn array(element: SourceType, len: u32) -> Self {
        SourceType::Array { element: Box::new(element), len }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, SourceType::Reference { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, SourceType::Pointer { .. })
    }

    /// The referenced type for references, the type itself otherwise.
    pub fn non_reference(&self) -> &SourceType {
        match self {
            SourceType::Reference { pointee } => pointee,
            other => other,
        }
    }

    pub fn spelling(&self) -> String {
        match self {
            SourceType::Void => "void".to_string(),
            SourceType::Bool => "bool".to_string(),
            SourceType::Integer { bits, signed } => {
                let base = match bits {
                    8 => "char",
                    16 => "short",
                    32 => "int",
                    _ => "long long",
                };
                if *signed { base.to_string() } else { format!("unsigned {}", base) }
            }
            SourceType::Float => "float".to_string(),
            SourceType::Double => "double".to_string(),
            SourceType::Pointer { pointee } => format!("{}*", pointee.spelling()),
            SourceType::Reference { pointee } => format!("{}&", pointee.spelling()),
            SourceType::Array { element, len } => format!("{}[{}]", element.spelling(), len),
            SourceType::Record(record) => record.name.clone(),
            SourceType::Other { spelling } => spelling.clone(),
        }
    }
}

/// A class or struct layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    /// Base classes in declaration order.
    #[serde(default)]
    pub bases: Vec<RecordType>,
    /// Fields declared directly in this record.
    pub fields: Vec<Field>,
}

impl RecordType {
    /// All fields in layout order: base classes first, depth-first.
    pub fn flattened_fields(&self) -> Vec<&Field> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a Field>) {
        for base in &self.bases {
            base.collect_fields(out);
        }
        out.extend(self.fields.iter());
    }

    /// Linear index of a field in `flattened_fields`. Later declarations
    /// shadow earlier ones with the same name, so the search runs backwards.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.flattened_fields().iter().rposition(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: SourceType,
}

// =============================================================================
// Expressions
// =============================================================================

/// A typed expression. `ty` is the front end's type of the expression, with
/// lvalue-ness not encoded (a `float` lvalue has type `float`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    /// Reference to a parameter, capture, local or member by name.
    DeclRef(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs op= rhs`
    CompoundAssign {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `base.field`, `base->field`, or an implicit `this->field` when `base` is absent.
    Member {
        base: Option<Box<Expr>>,
        field: String,
        #[serde(default)]
        arrow: bool,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// Implicit or explicit conversion to `ty`.
    Cast {
        operand: Box<Expr>,
    },
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Deref,
    AddrOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Assign,
    Comma,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Assign => "=",
            BinaryOp::Comma => ",",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Compound(Vec<Stmt>),
    Decl(Vec<VarDecl>),
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        inc: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: SourceType,
    #[serde(default)]
    pub init: Option<Init>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Init {
    Expr(Expr),
    /// Brace-enclosed initializer list for arrays and records.
    List(Vec<Expr>),
}

// =============================================================================
// Callables
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub name: String,
    /// Type of the captured variable (not of the closure member).
    pub ty: SourceType,
    #[serde(default)]
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub return_ty: SourceType,
    pub body: Stmt,
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: SourceType,
    pub body: Stmt,
}

/// Everything the translator needs from a function-object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassContext {
    pub name: String,
    /// Member variables in layout order, base classes first.
    pub fields: Vec<Field>,
    /// Bodies of `operator()` overloads and of every member function they
    /// transitively call. The call operator is found by its exact name.
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callable {
    Lambda(Lambda),
    Functor(ClassContext),
}

/// One parallel-algorithm call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    /// Qualified callee, e.g. `std::for_each`.
    pub algorithm: String,
    /// Qualified execution policy, e.g. `std::execution::par`.
    pub policy: String,
    /// Source line of the call, used to name the kernel.
    pub line: u32,
    /// Element type of the input range.
    pub element_ty: SourceType,
    /// Element type of the output range for transform; defaults to `element_ty`.
    #[serde(default)]
    pub output_ty: Option<SourceType>,
    pub callable: Callable,
}
