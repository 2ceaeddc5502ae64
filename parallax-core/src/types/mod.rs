//! Intermediate types for translated kernels.
//!
//! This module contains:
//! - `TypeName`: the type constructors of the IR type system
//! - Helper functions for creating and inspecting common types
//! - The source-to-IR type mapper (`mapper` submodule)

pub mod mapper;

#[cfg(test)]
mod mapper_tests;

pub use mapper::TypeMapper;

// Type alias for polytype types specialized to our TypeName
pub type Type = polytype::Type<TypeName>;

/// Memory space a pointer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressSpace {
    /// Function-local storage (locals, spilled parameters).
    Function,
    /// Per-invocation builtin inputs.
    Input,
    /// The per-dispatch read/write element buffers.
    StorageBuffer,
    /// The push-constant block.
    PushConstant,
}

impl AddressSpace {
    pub fn name(self) -> &'static str {
        match self {
            AddressSpace::Function => "function",
            AddressSpace::Input => "input",
            AddressSpace::StorageBuffer => "storage",
            AddressSpace::PushConstant => "push_constant",
        }
    }
}

/// Type constructors. Composite constructors carry their components
/// in the type argument vector of `Type::Constructed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeName {
    Void,
    Bool,
    /// Signed integer with bit width.
    Int(u32),
    /// Unsigned integer with bit width.
    UInt(u32),
    /// Float with bit width.
    Float(u32),
    /// Fixed-size array: `Array(len)[elem]`.
    Array(u32),
    /// Unsized array, only valid as the last member of a buffer block: `RuntimeArray[elem]`.
    RuntimeArray,
    /// Pointer: `Pointer(space)[pointee]`.
    Pointer(AddressSpace),
    /// Named struct: `Struct(name)[fields...]`.
    Struct(String),
    /// Function type: `Arrow[params..., ret]`.
    Arrow,
}

impl polytype::Name for TypeName {
    fn arrow() -> Self {
        TypeName::Arrow
    }

    fn show(&self) -> String {
        match self {
            TypeName::Void => "void".to_string(),
            TypeName::Bool => "bool".to_string(),
            TypeName::Int(bits) => format!("i{}", bits),
            TypeName::UInt(bits) => format!("u{}", bits),
            TypeName::Float(bits) => format!("f{}", bits),
            TypeName::Array(len) => format!("[{}]", len),
            TypeName::RuntimeArray => "[]".to_string(),
            TypeName::Pointer(space) => format!("*{}", space.name()),
            TypeName::Struct(name) => name.clone(),
            TypeName::Arrow => "->".to_string(),
        }
    }

    fn is_arrow(&self) -> bool {
        matches!(self, TypeName::Arrow)
    }
}

/// Name of the struct wrapping the runtime array in each element buffer.
pub const BUFFER_BLOCK: &str = "ElementBuffer";

fn scalar(name: TypeName) -> Type {
    Type::Constructed(name, vec![])
}

pub fn void() -> Type {
    scalar(TypeName::Void)
}

pub fn bool() -> Type {
    scalar(TypeName::Bool)
}

pub fn i32() -> Type {
    scalar(TypeName::Int(32))
}

pub fn u32() -> Type {
    scalar(TypeName::UInt(32))
}

pub fn f32() -> Type {
    scalar(TypeName::Float(32))
}

pub fn f64() -> Type {
    scalar(TypeName::Float(64))
}

pub fn array(elem: Type, len: u32) -> Type {
    Type::Constructed(TypeName::Array(len), vec![elem])
}

pub fn runtime_array(elem: Type) -> Type {
    Type::Constructed(TypeName::RuntimeArray, vec![elem])
}

pub fn pointer(space: AddressSpace, pointee: Type) -> Type {
    Type::Constructed(TypeName::Pointer(space), vec![pointee])
}

pub fn record(name: &str, fields: Vec<Type>) -> Type {
    Type::Constructed(TypeName::Struct(name.to_string()), fields)
}

/// The block type bound at each element-buffer binding.
pub fn buffer_block(elem: Type) -> Type {
    record(BUFFER_BLOCK, vec![runtime_array(elem)])
}

pub fn is_void(ty: &Type) -> bool {
    matches!(ty, Type::Constructed(TypeName::Void, _))
}

pub fn is_bool(ty: &Type) -> bool {
    matches!(ty, Type::Constructed(TypeName::Bool, _))
}

pub fn is_pointer(ty: &Type) -> bool {
    matches!(ty, Type::Constructed(TypeName::Pointer(_), _))
}

pub fn is_scalar(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Constructed(
            TypeName::Bool | TypeName::Int(_) | TypeName::UInt(_) | TypeName::Float(_),
            _
        )
    )
}

pub fn is_float64(ty: &Type) -> bool {
    matches!(ty, Type::Constructed(TypeName::Float(64), _))
}

/// Pointee of a pointer type.
pub fn pointee(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Constructed(TypeName::Pointer(_), args) => args.first(),
        _ => None,
    }
}

/// Address space of a pointer type.
pub fn address_space(ty: &Type) -> Option<AddressSpace> {
    match ty {
        Type::Constructed(TypeName::Pointer(space), _) => Some(*space),
        _ => None,
    }
}

/// Element type of a fixed or runtime array.
pub fn element(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Constructed(TypeName::Array(_) | TypeName::RuntimeArray, args) => args.first(),
        _ => None,
    }
}

/// Field types of a struct.
pub fn fields(ty: &Type) -> Option<&[Type]> {
    match ty {
        Type::Constructed(TypeName::Struct(_), args) => Some(args),
        _ => None,
    }
}

/// Type reached by indexing one level into a composite.
pub fn component(ty: &Type, index: Option<u32>) -> Option<&Type> {
    match ty {
        Type::Constructed(TypeName::Array(_) | TypeName::RuntimeArray, args) => args.first(),
        Type::Constructed(TypeName::Struct(_), args) => args.get(index? as usize),
        _ => None,
    }
}

/// How arithmetic on a value of this type behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    SignedInt,
    UnsignedInt,
    Float,
    Bool,
    Pointer,
    Other,
}

impl NumericKind {
    pub fn of(ty: &Type) -> Self {
        match ty {
            Type::Constructed(TypeName::Int(_), _) => NumericKind::SignedInt,
            Type::Constructed(TypeName::UInt(_), _) => NumericKind::UnsignedInt,
            Type::Constructed(TypeName::Float(_), _) => NumericKind::Float,
            Type::Constructed(TypeName::Bool, _) => NumericKind::Bool,
            Type::Constructed(TypeName::Pointer(_), _) => NumericKind::Pointer,
            _ => NumericKind::Other,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, NumericKind::SignedInt | NumericKind::UnsignedInt)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, NumericKind::SignedInt | NumericKind::UnsignedInt | NumericKind::Float)
    }
}

/// Conversion rank used to pick the common type of a binary operation.
/// Higher ranks absorb lower ones, as in the usual arithmetic conversions.
pub fn arithmetic_rank(ty: &Type) -> Option<u32> {
    match ty {
        Type::Constructed(TypeName::Bool, _) => Some(0),
        Type::Constructed(TypeName::Int(_), _) => Some(1),
        Type::Constructed(TypeName::UInt(_), _) => Some(2),
        Type::Constructed(TypeName::Float(32), _) => Some(3),
        Type::Constructed(TypeName::Float(64), _) => Some(4),
        _ => None,
    }
}

/// Common type of two arithmetic operands. Bool promotes to i32.
pub fn common_arithmetic_type(a: &Type, b: &Type) -> Option<Type> {
    let (ra, rb) = (arithmetic_rank(a)?, arithmetic_rank(b)?);
    let winner = if ra >= rb { a } else { b };
    if is_bool(winner) { Some(i32()) } else { Some(winner.clone()) }
}

/// Human-readable rendering, e.g. `*storage f32` or `[4]i32`.
pub fn format_type(ty: &Type) -> String {
    match ty {
        Type::Variable(id) => format!("?{}", id),
        Type::Constructed(name, args) => match name {
            TypeName::Array(len) => format!("[{}]{}", len, args.first().map(format_type).unwrap_or_default()),
            TypeName::RuntimeArray => format!("[]{}", args.first().map(format_type).unwrap_or_default()),
            TypeName::Pointer(space) => {
                format!("*{} {}", space.name(), args.first().map(format_type).unwrap_or_default())
            }
            TypeName::Struct(name) => {
                let fields: Vec<_> = args.iter().map(format_type).collect();
                format!("{}{{{}}}", name, fields.join(", "))
            }
            TypeName::Arrow => {
                let (ret, params) = args.split_last().map(|(r, p)| (format_type(r), p)).unwrap_or_default();
                let params: Vec<_> = params.iter().map(format_type).collect();
                format!("({}) -> {}", params.join(", "), ret)
            }
            other => polytype::Name::show(other),
        },
    }
}
