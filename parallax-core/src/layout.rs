//! std430 size and alignment helpers, and the push-constant block layout.

use crate::error::Result;
use crate::types::{self, Type, TypeName};
use crate::bail_unsupported;

/// Byte size of a host-shareable type. Returns None for types without a
/// defined memory layout (bool, pointers, runtime arrays).
pub fn type_byte_size(ty: &Type) -> Option<u32> {
    match ty {
        Type::Constructed(TypeName::Int(bits) | TypeName::UInt(bits) | TypeName::Float(bits), _) => {
            Some(*bits / 8)
        }
        Type::Constructed(TypeName::Array(len), args) => {
            let stride = array_stride(args.first()?)?;
            Some(stride * len)
        }
        Type::Constructed(TypeName::Struct(_), args) => {
            let offsets = struct_offsets(args)?;
            let (last_offset, last) = offsets.last().copied().zip(args.last())?;
            let end = last_offset + type_byte_size(last)?;
            Some(round_up(end, std430_alignment(ty)?))
        }
        _ => None,
    }
}

/// std430 base alignment.
pub fn std430_alignment(ty: &Type) -> Option<u32> {
    match ty {
        Type::Constructed(TypeName::Int(bits) | TypeName::UInt(bits) | TypeName::Float(bits), _) => {
            Some(*bits / 8)
        }
        Type::Constructed(TypeName::Array(_) | TypeName::RuntimeArray, args) => std430_alignment(args.first()?),
        Type::Constructed(TypeName::Struct(_), args) => {
            args.iter().map(std430_alignment).try_fold(1, |acc, a| a.map(|a| acc.max(a)))
        }
        _ => None,
    }
}

/// Stride between consecutive elements of an array of `elem`.
pub fn array_stride(elem: &Type) -> Option<u32> {
    Some(round_up(type_byte_size(elem)?, std430_alignment(elem)?))
}

/// Member offsets of a struct with the given field types. The last member
/// may be unsized (a runtime array).
pub fn struct_offsets(fields: &[Type]) -> Option<Vec<u32>> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut cursor = 0u32;
    for (i, field) in fields.iter().enumerate() {
        cursor = round_up(cursor, std430_alignment(field)?);
        offsets.push(cursor);
        if i + 1 < fields.len() {
            cursor += type_byte_size(field)?;
        }
    }
    Some(offsets)
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align.max(1)) * align.max(1)
}

/// Byte offset of the element count in the push-constant block.
pub const COUNT_OFFSET: u32 = 0;

/// One scalar capture slot in the push-constant block.
#[derive(Debug, Clone, PartialEq)]
pub struct PushConstantSlot {
    pub name: String,
    /// Type the callable receives.
    pub value_ty: Type,
    /// Type stored in the block. Differs from `value_ty` only for bool,
    /// which has no memory layout and travels as a u32.
    pub storage_ty: Type,
    pub offset: u32,
}

/// Layout of the push-constant block: `u32 count` at offset 0, then one slot
/// per scalar capture in capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct PushConstantLayout {
    pub slots: Vec<PushConstantSlot>,
    pub size: u32,
}

impl PushConstantLayout {
    pub fn new(captures: &[(String, Type)]) -> Result<Self> {
        let mut slots = Vec::with_capacity(captures.len());
        let mut cursor = COUNT_OFFSET + 4;
        for (name, ty) in captures {
            if !types::is_scalar(ty) {
                bail_unsupported!(
                    "capture '{}' of type {} cannot be passed through push constants",
                    name,
                    types::format_type(ty)
                );
            }
            let storage_ty = if types::is_bool(ty) { types::u32() } else { ty.clone() };
            let (size, align) = match (type_byte_size(&storage_ty), std430_alignment(&storage_ty)) {
                (Some(size), Some(align)) => (size, align),
                _ => bail_unsupported!("capture '{}' has no memory layout", name),
            };
            let offset = round_up(cursor, align);
            cursor = offset + size;
            slots.push(PushConstantSlot {
                name: name.clone(),
                value_ty: ty.clone(),
                storage_ty,
                offset,
            });
        }
        let align = slots
            .iter()
            .filter_map(|s| std430_alignment(&s.storage_ty))
            .fold(4, u32::max);
        Ok(PushConstantLayout {
            slots,
            size: round_up(cursor, align),
        })
    }

    /// Field types of the block struct, count first.
    pub fn field_types(&self) -> Vec<Type> {
        std::iter::once(types::u32()).chain(self.slots.iter().map(|s| s.storage_ty.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{array, f32, f64, i32, record};

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(type_byte_size(&f32()), Some(4));
        assert_eq!(type_byte_size(&f64()), Some(8));
        assert_eq!(type_byte_size(&types::bool()), None);
    }

    #[test]
    fn test_struct_padding() {
        let ty = record("S", vec![f32(), f64(), i32()]);
        assert_eq!(struct_offsets(&[f32(), f64(), i32()]), Some(vec![0, 8, 16]));
        assert_eq!(type_byte_size(&ty), Some(24));
        assert_eq!(array_stride(&ty), Some(24));
    }

    #[test]
    fn test_buffer_block_offsets() {
        assert_eq!(struct_offsets(&[types::runtime_array(f32())]), Some(vec![0]));
        assert_eq!(type_byte_size(&types::buffer_block(f32())), None);
    }

    #[test]
    fn test_array_stride() {
        assert_eq!(array_stride(&f32()), Some(4));
        assert_eq!(type_byte_size(&array(f64(), 3)), Some(24));
    }

    #[test]
    fn test_push_constant_slots() {
        let layout = PushConstantLayout::new(&[
            ("omega".to_string(), f32()),
            ("scale".to_string(), f64()),
            ("flag".to_string(), types::bool()),
        ])
        .unwrap();
        let offsets: Vec<_> = layout.slots.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![4, 8, 16]);
        assert_eq!(layout.slots[2].storage_ty, types::u32());
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_push_constant_rejects_aggregates() {
        let result = PushConstantLayout::new(&[("v".to_string(), array(f32(), 2))]);
        assert!(result.is_err());
    }
}
