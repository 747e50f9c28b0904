use tpas_frontend::diagnostics::Diagnostics;
use tpas_frontend::span::SpanLoc;
use tpas_frontend::typesystem::{
    Field, FuncSignature, MemberFunc, Range, TypeRegistry, TypeSystem, MAX_SET_SIZE,
};

#[test]
fn single_element_range_is_legal() {
    let r = Range::new(5, 5);
    assert_eq!(r.size(), 1);
    assert!(r.contains(5));
    assert!(!r.contains(4));

    let full = Range::new(i32::MIN, i32::MAX);
    assert_eq!(full.size(), 1u64 << 32);
}

#[test]
fn type_equality_is_an_equivalence() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();

    let a = ts.get_array_type(int, vec![Range::new(1, 3)]);
    let b = ts.get_array_type(int, vec![Range::new(1, 3)]);
    let c = ts.get_array_type(int, vec![Range::new(1, 3)]);

    // Reflexive, symmetric, transitive.
    assert!(ts.same_as(a, a));
    assert!(ts.same_as(a, b) && ts.same_as(b, a));
    assert!(ts.same_as(a, b) && ts.same_as(b, c) && ts.same_as(a, c));

    // A different range breaks it.
    let d = ts.get_array_type(int, vec![Range::new(0, 3)]);
    assert!(!ts.same_as(a, d));

    // Records compare by field name and type.
    let real = ts.get_real_type();
    let r1 = ts.get_record_type(
        vec![
            Field {
                name: "x".to_string(),
                ty: int,
            },
            Field {
                name: "y".to_string(),
                ty: real,
            },
        ],
        None,
    );
    let r2 = ts.get_record_type(
        vec![
            Field {
                name: "x".to_string(),
                ty: int,
            },
            Field {
                name: "y".to_string(),
                ty: real,
            },
        ],
        None,
    );
    let r3 = ts.get_record_type(
        vec![
            Field {
                name: "x".to_string(),
                ty: int,
            },
            Field {
                name: "z".to_string(),
                ty: real,
            },
        ],
        None,
    );
    assert!(ts.same_as(r1, r2));
    assert!(!ts.same_as(r1, r3));

    // Subranges need matching host and bounds.
    let s1 = ts.get_subrange_type(int, Range::new(1, 10));
    let s2 = ts.get_subrange_type(int, Range::new(1, 10));
    let s3 = ts.get_subrange_type(int, Range::new(2, 10));
    assert!(ts.same_as(s1, s2));
    assert!(!ts.same_as(s1, s3));

    // Pointers compare by pointee.
    let p1 = ts.get_pointer_type(r1);
    let p2 = ts.get_pointer_type(r2);
    assert!(ts.same_as(p1, p2));

    // Function pointers compare by signature, including passing modes.
    use tpas_frontend::typesystem::Parameter;
    let sig = |by_ref| FuncSignature {
        params: vec![Parameter { ty: int, by_ref }],
        result: real,
    };
    let f1 = ts.get_func_ptr_type(sig(false));
    let f2 = ts.get_func_ptr_type(sig(false));
    let f3 = ts.get_func_ptr_type(sig(true));
    assert!(ts.same_as(f1, f2));
    assert!(!ts.same_as(f1, f3));
}

#[test]
fn assignability_admits_widening() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();
    let int64 = ts.get_int64_type();
    let real = ts.get_real_type();
    let small = ts.get_subrange_type(int, Range::new(1, 10));

    // Every integer type widens into a real location.
    assert!(ts.assignable_type(real, int).is_some());
    assert!(ts.assignable_type(real, int64).is_some());
    assert!(ts.assignable_type(real, small).is_some());
    assert!(ts.assignable_type(int64, int).is_some());

    // Never the other way around.
    assert!(ts.assignable_type(int, real).is_none());
    assert!(ts.assignable_type(int64, real).is_none());
    assert!(ts.assignable_type(small, real).is_none());
}

#[test]
fn array_stride_is_row_major() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();
    let arr = ts.get_array_type(int, vec![Range::new(1, 3), Range::new(2, 5)]);

    // The rightmost index varies fastest.
    assert_eq!(ts.array_strides(arr), vec![4, 1]);
    assert_eq!(ts.array_element_count(arr), 12);

    // Linear index of (i, j) is (i - l1) * (h2 - l2 + 1) + (j - l2).
    let strides = ts.array_strides(arr);
    let ranges = ts.array_ranges(arr).to_vec();
    let (i, j): (i64, i64) = (2, 3);
    let linear = (i - ranges[0].start() as i64) * strides[0] as i64
        + (j - ranges[1].start() as i64) * strides[1] as i64;
    assert_eq!(linear, 5);
}

#[test]
fn set_range_clamps_to_max_size() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();

    // A full integer element range cannot be represented; it is clamped.
    let clamped = ts.set_range_from_element(int).unwrap();
    assert_eq!(clamped.start(), 0);
    assert_eq!(clamped.end(), MAX_SET_SIZE as i32 - 1);
    assert_eq!(clamped.size(), MAX_SET_SIZE as u64);

    let wide = ts.get_subrange_type(int, Range::new(0, 1000));
    let clamped = ts.set_range_from_element(wide).unwrap();
    assert_eq!((clamped.start(), clamped.end()), (0, 511));

    let narrow = ts.get_subrange_type(int, Range::new(0, 7));
    let kept = ts.set_range_from_element(narrow).unwrap();
    assert_eq!((kept.start(), kept.end()), (0, 7));

    let s = ts.get_set_type(Some(int), Some(kept));
    assert_eq!(ts.set_words(s), 1);
    assert_eq!(ts.size_bytes(s), 4);

    let big = ts.get_set_type(Some(int), Some(Range::new(0, 511)));
    assert_eq!(ts.set_words(big), 16);
}

#[test]
fn forward_pointer_fixup_is_idempotent() {
    let mut ts = TypeSystem::new();
    let mut registry = TypeRegistry::new(&ts);
    let int = ts.get_integer_type();

    let ptr = ts.get_incomplete_pointer_type("node");
    assert!(ts.pointer_is_incomplete(ptr));
    assert_eq!(ts.pointer_pointee(ptr), None);

    let node = ts.get_record_type(
        vec![Field {
            name: "v".to_string(),
            ty: int,
        }],
        None,
    );
    registry.add(&ts, "node", node);

    let mut diags = Diagnostics::new();
    registry.fix_up_incomplete(&mut ts, ptr, &mut diags, SpanLoc::new(0, 0));
    assert!(!ts.pointer_is_incomplete(ptr));
    assert_eq!(ts.pointer_pointee(ptr), Some(node));
    assert_eq!(diags.num_error(), 0);

    // A second fixup is a no-op.
    registry.fix_up_incomplete(&mut ts, ptr, &mut diags, SpanLoc::new(0, 0));
    assert_eq!(ts.pointer_pointee(ptr), Some(node));
    assert_eq!(diags.num_error(), 0);

    // A pointer to a type that never shows up stays incomplete.
    let dangling = ts.get_incomplete_pointer_type("missing");
    registry.fix_up_incomplete(&mut ts, dangling, &mut diags, SpanLoc::new(0, 0));
    assert!(ts.pointer_is_incomplete(dangling));
    assert_eq!(diags.num_error(), 1);
}

#[test]
fn registry_levels_shadow_and_restore() {
    let mut ts = TypeSystem::new();
    let mut registry = TypeRegistry::new(&ts);
    let int = ts.get_integer_type();
    let real = ts.get_real_type();

    assert!(registry.is_type_name("integer"));
    assert!(!registry.is_type_name("t"));

    registry.add(&ts, "t", int);
    registry.new_level();
    registry.add(&ts, "t", real);
    assert_eq!(registry.find("t"), Some(real));
    registry.drop_level();
    assert_eq!(registry.find("t"), Some(int));
}

#[test]
fn enum_values_are_registered_with_their_type() {
    let mut ts = TypeSystem::new();
    let mut registry = TypeRegistry::new(&ts);

    let color = ts.get_enum_type(vec![
        "red".to_string(),
        "green".to_string(),
        "blue".to_string(),
    ]);
    registry.add(&ts, "color", color);

    assert!(registry.is_enum_value("green"));
    let blue = registry.find_enum_value("blue").unwrap();
    assert_eq!(blue.value, 2);
    assert_eq!(blue.owner, color);

    let r = ts.get_range(color).unwrap();
    assert_eq!((r.start(), r.end()), (0, 2));

    // Boolean is the predefined two-value enumeration.
    assert_eq!(registry.find_enum_value("true").unwrap().value, 1);
    assert_eq!(registry.find_enum_value("false").unwrap().value, 0);
}

#[test]
fn class_vtable_slots_and_field_lookup() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();
    let real = ts.get_real_type();
    let void = ts.get_void_type();
    let sig = FuncSignature {
        params: vec![],
        result: void,
    };

    let shape = ts.get_class_type(
        "shape",
        None,
        vec![Field {
            name: "x".to_string(),
            ty: int,
        }],
        vec![
            MemberFunc::new("draw", sig.clone()).virtual_(),
            MemberFunc::new("area", sig.clone()).virtual_(),
        ],
        None,
    );
    assert_eq!(ts.class_num_virtual_funcs(shape), 2);
    assert_eq!(
        ts.class_member_func(shape, "draw").unwrap().virt_index,
        Some(0)
    );

    let circle = ts.get_class_type(
        "circle",
        Some(shape),
        vec![Field {
            name: "radius".to_string(),
            ty: real,
        }],
        vec![
            MemberFunc::new("draw", sig.clone()).override_(),
            MemberFunc::new("translate", sig.clone()).virtual_(),
        ],
        None,
    );

    // The override keeps the base slot; the new virtual appends.
    assert_eq!(ts.class_num_virtual_funcs(circle), 3);
    assert_eq!(
        ts.class_member_func(circle, "draw").unwrap().virt_index,
        Some(0)
    );
    assert_eq!(
        ts.class_member_func(circle, "translate").unwrap().virt_index,
        Some(2)
    );
    // Inherited members resolve through the chain.
    assert_eq!(
        ts.class_member_func(circle, "area").unwrap().virt_index,
        Some(1)
    );

    // Field lookup reports the declaring class.
    assert_eq!(
        ts.class_field_lookup(circle, "x"),
        Some(("shape".to_string(), 0))
    );
    assert_eq!(
        ts.class_field_lookup(circle, "radius"),
        Some(("circle".to_string(), 0))
    );
    assert_eq!(ts.class_field_lookup(circle, "nope"), None);
    assert_eq!(ts.class_field_count(circle), 2);
}

#[test]
fn builtin_ranges_and_predicates() {
    let mut ts = TypeSystem::new();

    let char_ty = ts.get_char_type();
    let r = ts.get_range(char_ty).unwrap();
    assert_eq!((r.start(), r.end()), (0, 255));

    let bool_ty = ts.get_boolean_type();
    let r = ts.get_range(bool_ty).unwrap();
    assert_eq!((r.start(), r.end()), (0, 1));

    let int = ts.get_integer_type();
    let r = ts.get_range(int).unwrap();
    assert_eq!((r.start(), r.end()), (i32::MIN, i32::MAX));
    assert_eq!(ts.bits(int), 32);
    assert_eq!(ts.bits(ts.get_int64_type()), 64);
    assert_eq!(ts.bits(char_ty), 8);

    // A string is a char array over [0, N]; slot 0 keeps the length.
    let s = ts.get_string_type(255);
    assert!(ts.is_string_type(s));
    assert!(ts.is_string_like_type(s));
    let r = ts.get_range(s).unwrap();
    assert_eq!((r.start(), r.end()), (0, 255));
    assert_eq!(ts.size_bytes(s), 256);

    let chars = ts.get_array_type(char_ty, vec![Range::new(1, 3)]);
    assert!(ts.is_string_like_type(chars));
    assert!(!ts.is_string_type(chars));

    assert!(ts.is_integral_type(char_ty));
    assert!(ts.is_integral_type(bool_ty));
    assert!(!ts.is_integral_type(ts.get_real_type()));
    assert!(ts.is_unsigned_type(char_ty));
    assert!(!ts.is_unsigned_type(int));
    let neg = ts.get_subrange_type(int, Range::new(-5, 5));
    assert!(!ts.is_unsigned_type(neg));
    let pos = ts.get_subrange_type(int, Range::new(0, 5));
    assert!(ts.is_unsigned_type(pos));
}

#[test]
fn record_layout_and_variant_overlap() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();
    let real = ts.get_real_type();
    let char_ty = ts.get_char_type();

    let variant = ts.get_variant_type(vec![
        Field {
            name: "asreal".to_string(),
            ty: real,
        },
        Field {
            name: "asint".to_string(),
            ty: int,
        },
    ]);
    let rec = ts.get_record_type(
        vec![
            Field {
                name: "tag".to_string(),
                ty: char_ty,
            },
            Field {
                name: "count".to_string(),
                ty: int,
            },
        ],
        Some(variant),
    );

    assert_eq!(ts.record_field_offset(rec, 0), 0);
    assert_eq!(ts.record_field_offset(rec, 1), 4);
    // The variant part starts aligned after the fixed fields and is as
    // large as its largest member.
    assert_eq!(ts.record_variant_offset(rec), 8);
    assert_eq!(ts.size_bytes(variant), 8);
    assert_eq!(ts.size_bytes(rec), 16);
    assert_eq!(ts.record_field_index(rec, "count"), Some(1));
    assert_eq!(ts.record_field_index(variant, "asint"), Some(1));
}

#[test]
fn compatible_type_numeric_lattice() {
    let mut ts = TypeSystem::new();
    let int = ts.get_integer_type();
    let int64 = ts.get_int64_type();
    let real = ts.get_real_type();
    let bool_ty = ts.get_boolean_type();

    let r = ts.compatible_type(int, int).unwrap();
    assert!(ts.is_integer_type(r));
    let r = ts.compatible_type(int, int64).unwrap();
    assert!(ts.is_int64_type(r));
    let r = ts.compatible_type(int, real).unwrap();
    assert!(ts.is_real_type(r));
    let r = ts.compatible_type(real, int64).unwrap();
    assert!(ts.is_real_type(r));

    assert!(ts.compatible_type(bool_ty, int).is_none());
    assert!(ts.compatible_type(bool_ty, bool_ty).is_some());
}
