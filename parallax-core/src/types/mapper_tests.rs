use super::*;
use crate::ast::{Field, RecordType, SourceType};
use crate::diags::TranslationWarning;

fn record(name: &str, fields: Vec<(&str, SourceType)>) -> RecordType {
    RecordType {
        name: name.to_string(),
        bases: vec![],
        fields: fields
            .into_iter()
            .map(|(n, ty)| Field {
                name: n.to_string(),
                ty,
            })
            .collect(),
    }
}

#[test]
fn test_scalars_map_without_warnings() {
    let mut mapper = TypeMapper::new();
    assert_eq!(mapper.map(&SourceType::Void), void());
    assert_eq!(mapper.map(&SourceType::Bool), bool());
    assert_eq!(mapper.map(&SourceType::Float), f32());
    assert_eq!(mapper.map(&SourceType::Double), f64());
    for bits in [8, 16, 32] {
        assert_eq!(mapper.map(&SourceType::Integer { bits, signed: true }), i32());
        assert_eq!(mapper.map(&SourceType::Integer { bits, signed: false }), u32());
    }
    assert!(mapper.diagnostics().warnings().is_empty());
}

#[test]
fn test_long_narrows_with_single_warning() {
    let mut mapper = TypeMapper::new();
    assert_eq!(mapper.map(&SourceType::long()), i32());
    assert_eq!(mapper.map(&SourceType::long()), i32());
    assert_eq!(
        mapper.diagnostics().warnings(),
        &[TranslationWarning::IntegerNarrowed {
            source: "long long".to_string()
        }]
    );
}

#[test]
fn test_reference_maps_to_pointer_in_requested_space() {
    let mut mapper = TypeMapper::new();
    let r = SourceType::reference(SourceType::Float);
    assert_eq!(mapper.map(&r), pointer(AddressSpace::Function, f32()));
    assert_eq!(
        mapper.map_in(&r, AddressSpace::StorageBuffer),
        pointer(AddressSpace::StorageBuffer, f32())
    );
}

#[test]
fn test_unresolvable_pointer_defaults_to_f32() {
    let mut mapper = TypeMapper::new();
    let p = SourceType::pointer(SourceType::Void);
    assert_eq!(mapper.map(&p), pointer(AddressSpace::Function, f32()));
    assert!(matches!(
        mapper.diagnostics().warnings(),
        [TranslationWarning::PointerElementFallback { .. }]
    ));
}

#[test]
fn test_unknown_types_fall_back_to_i32() {
    let mut mapper = TypeMapper::new();
    let vec_ty = SourceType::Other {
        spelling: "std::vector<float>".to_string(),
    };
    assert_eq!(mapper.map(&vec_ty), i32());
    let wide = SourceType::Integer {
        bits: 128,
        signed: true,
    };
    assert_eq!(mapper.map(&wide), i32());
    assert_eq!(mapper.diagnostics().warnings().len(), 2);
}

#[test]
fn test_array_and_record_mapping() {
    let mut mapper = TypeMapper::new();
    assert_eq!(
        mapper.map(&SourceType::array(SourceType::Float, 4)),
        array(f32(), 4)
    );

    let base = record("Base", vec![("a", SourceType::int())]);
    let mut derived = record("Derived", vec![("b", SourceType::Float)]);
    derived.bases.push(base);
    assert_eq!(
        mapper.map(&SourceType::Record(derived)),
        super::record("Derived", vec![i32(), f32()])
    );
}

#[test]
fn test_record_with_pointer_field_falls_back() {
    let mut mapper = TypeMapper::new();
    let rec = record("Node", vec![("next", SourceType::pointer(SourceType::Float))]);
    assert_eq!(mapper.map(&SourceType::Record(rec)), i32());
    assert!(matches!(
        mapper.diagnostics().warnings(),
        [TranslationWarning::UnknownTypeFallback { .. }]
    ));
}

#[test]
fn test_mapping_is_idempotent() {
    let mut mapper = TypeMapper::new();
    let ty = SourceType::array(SourceType::reference(SourceType::Double), 2);
    let first = mapper.map(&ty);
    let second = mapper.map(&ty);
    assert_eq!(first, second);
}

#[test]
fn test_long_in_several_spaces_warns_once() {
    let mut mapper = TypeMapper::new();
    let long = SourceType::long();
    assert_eq!(mapper.map_in(&long, AddressSpace::StorageBuffer), i32());
    assert_eq!(mapper.map_in(&long, AddressSpace::PushConstant), i32());
    assert_eq!(
        mapper.map_in(&SourceType::reference(long.clone()), AddressSpace::StorageBuffer),
        pointer(AddressSpace::StorageBuffer, i32())
    );
    assert_eq!(mapper.map(&SourceType::reference(long)), pointer(AddressSpace::Function, i32()));
    let narrowed = mapper
        .diagnostics()
        .warnings()
        .iter()
        .filter(|w| matches!(w, TranslationWarning::IntegerNarrowed { .. }))
        .count();
    assert_eq!(narrowed, 1);
}

#[test]
fn test_unresolvable_pointer_in_several_spaces_warns_once() {
    let mut mapper = TypeMapper::new();
    let p = SourceType::pointer(SourceType::Void);
    assert_eq!(mapper.map(&p), pointer(AddressSpace::Function, f32()));
    assert_eq!(
        mapper.map_in(&p, AddressSpace::StorageBuffer),
        pointer(AddressSpace::StorageBuffer, f32())
    );
    assert_eq!(mapper.diagnostics().warnings().len(), 1);
}
