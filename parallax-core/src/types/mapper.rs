//! Source type to IR type mapping.
//!
//! Mapping never fails: unsupported types degrade to a documented fallback
//! and leave a warning behind. Results are cached per source type, and per
//! address space only for references and pointers, so the same source type
//! always yields the same IR type and each lossy mapping is reported once
//! per call site.

use std::collections::HashMap;

use crate::ast::{RecordType, SourceType};
use crate::diags::{Diagnostics, TranslationWarning};

use super::{AddressSpace, Type};

#[derive(Debug, Default)]
pub struct TypeMapper {
    cache: HashMap<(SourceType, AddressSpace), Type>,
    diags: Diagnostics,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a source type. References and pointers address function-local memory.
    pub fn map(&mut self, ty: &SourceType) -> Type {
        self.map_in(ty, AddressSpace::Function)
    }

    /// Map a source type, giving references and pointers the address space `space`.
    pub fn map_in(&mut self, ty: &SourceType, space: AddressSpace) -> Type {
        // Only references and pointers carry the space into their IR type
        let key_space = if ty.is_reference() || ty.is_pointer() { space } else { AddressSpace::Function };
        let key = (ty.clone(), key_space);
        if let Some(mapped) = self.cache.get(&key) {
            return mapped.clone();
        }
        let mapped = self.map_uncached(ty, space);
        log::trace!("mapped '{}' to {}", ty.spelling(), super::format_type(&mapped));
        self.cache.insert(key, mapped.clone());
        mapped
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diags)
    }

    fn map_uncached(&mut self, ty: &SourceType, space: AddressSpace) -> Type {
        match ty {
            SourceType::Void => super::void(),
            SourceType::Bool => super::bool(),
            SourceType::Integer { bits, signed } => self.map_integer(ty, *bits, *signed),
            SourceType::Float => super::f32(),
            SourceType::Double => super::f64(),
            SourceType::Reference { pointee } => {
                let pointee = self.map_in(pointee, space);
                super::pointer(space, pointee)
            }
            SourceType::Pointer { pointee } => match self.map_storable(pointee) {
                Some(elem) => super::pointer(space, elem),
                None => {
                    self.warn_once(TranslationWarning::PointerElementFallback {
                        source: ty.spelling(),
                    });
                    super::pointer(space, super::f32())
                }
            },
            SourceType::Array { .. } | SourceType::Record(_) => match self.map_storable(ty) {
                Some(mapped) => mapped,
                None => self.fallback(ty),
            },
            SourceType::Other { .. } => self.fallback(ty),
        }
    }

    fn map_integer(&mut self, ty: &SourceType, bits: u32, signed: bool) -> Type {
        let narrowed = match bits {
            0..=32 => false,
            33..=64 => true,
            _ => return self.fallback(ty),
        };
        if narrowed {
            self.diags.warn(TranslationWarning::IntegerNarrowed { source: ty.spelling() });
        }
        if signed { super::i32() } else { super::u32() }
    }

    /// Map a type that can live in memory as a value: scalars, arrays and
    /// records of those. Pointers and references inside aggregates cannot be
    /// expressed with logical addressing.
    fn map_storable(&mut self, ty: &SourceType) -> Option<Type> {
        match ty {
            SourceType::Bool | SourceType::Float | SourceType::Double | SourceType::Integer { .. } => {
                let mapped = self.map(ty);
                super::is_scalar(&mapped).then_some(mapped)
            }
            SourceType::Array { element, len } if *len > 0 => {
                let elem = self.map_storable(element)?;
                Some(super::array(elem, *len))
            }
            SourceType::Record(record) => self.map_record(record),
            _ => None,
        }
    }

    fn map_record(&mut self, record: &RecordType) -> Option<Type> {
        let fields = record.flattened_fields();
        if fields.is_empty() {
            return None;
        }
        let mut mapped = Vec::with_capacity(fields.len());
        for field in fields {
            mapped.push(self.map_storable(&field.ty)?);
        }
        Some(super::record(&record.name, mapped))
    }

    /// Pointers reach here once per address space.
    fn warn_once(&mut self, warning: TranslationWarning) {
        if !self.diags.warnings().contains(&warning) {
            self.diags.warn(warning);
        }
    }

    fn fallback(&mut self, ty: &SourceType) -> Type {
        self.diags.warn(TranslationWarning::UnknownTypeFallback { source: ty.spelling() });
        super::i32()
    }
}
