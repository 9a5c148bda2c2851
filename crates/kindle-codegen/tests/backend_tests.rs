use kindle_codegen::{compile_to_string, mangle, Backend, CodegenConfig, CodegenError, VtableSlot};
use kindle_model::{
    method_body, static_body, BlockId, ClassBuilder, FieldRef, InvocationKind, MethodDescriptor, MethodRef,
    ModelError, Program, ProgramBuilder, ValueType, VariableKind, CONSTRUCTOR_NAME,
};

const OBJECT: &str = "java.lang.Object";

fn init() -> MethodDescriptor {
    MethodDescriptor::new(CONSTRUCTOR_NAME, vec![], ValueType::Void)
}

fn get_x() -> MethodDescriptor {
    MethodDescriptor::new("getX", vec![], ValueType::INT)
}

fn foo() -> MethodDescriptor {
    MethodDescriptor::new("foo", vec![], ValueType::INT)
}

fn main_desc() -> MethodDescriptor {
    MethodDescriptor::new("main", vec![], ValueType::Void)
}

/// Constructor that only chains to the parent's constructor
fn chained_constructor(parent: Option<&str>) -> kindle_model::Body {
    let (mut b, vars) = method_body(&[]);
    if let Some(parent) = parent {
        b.invoke(InvocationKind::Special, MethodRef::new(parent, init()), Some(vars[0]), vec![]);
    }
    b.exit(None);
    b.finish()
}

/// `Base {abstract int getX()}`, `A extends Base implements I {int x = 23}`,
/// `B extends Base {getX() -> 42}`, `interface I {int foo()}`
fn scenario() -> Program {
    let object = ClassBuilder::new(OBJECT).method(init(), chained_constructor(None)).build();

    let base = ClassBuilder::new("Base")
        .extends(OBJECT)
        .abstract_class()
        .method(init(), chained_constructor(Some(OBJECT)))
        .abstract_method(get_x())
        .build();

    let iface = ClassBuilder::interface("I").abstract_method(foo()).build();

    let a_init = {
        let (mut b, vars) = method_body(&[]);
        b.invoke(InvocationKind::Special, MethodRef::new("Base", init()), Some(vars[0]), vec![]);
        let value = b.const_int(23);
        b.put_field(Some(vars[0]), FieldRef::new("A", "x"), value, ValueType::INT);
        b.exit(None);
        b.finish()
    };
    let a_get_x = {
        let (mut b, vars) = method_body(&[]);
        let x = b.get_field(Some(vars[0]), FieldRef::new("A", "x"), ValueType::INT);
        b.exit(Some(x));
        b.finish()
    };
    let a_foo = {
        let (mut b, _) = method_body(&[]);
        let one = b.const_int(1);
        b.exit(Some(one));
        b.finish()
    };
    let a = ClassBuilder::new("A")
        .extends("Base")
        .implements("I")
        .field("x", ValueType::INT)
        .method(init(), a_init)
        .method(get_x(), a_get_x)
        .method(foo(), a_foo)
        .build();

    let b_get_x = {
        let (mut b, _) = method_body(&[]);
        let value = b.const_int(42);
        b.exit(Some(value));
        b.finish()
    };
    let b_class = ClassBuilder::new("B")
        .extends("Base")
        .method(init(), chained_constructor(Some("Base")))
        .method(get_x(), b_get_x)
        .build();

    let main = {
        let (mut b, _) = static_body(&[]);
        let a = b.construct("A");
        b.invoke(InvocationKind::Special, MethodRef::new("A", init()), Some(a), vec![]);
        let bb = b.construct("B");
        b.invoke(InvocationKind::Special, MethodRef::new("B", init()), Some(bb), vec![]);
        b.is_instance(a, ValueType::object("I"));
        b.is_instance(bb, ValueType::object("I"));
        b.invoke(InvocationKind::Virtual, MethodRef::new("Base", get_x()), Some(bb), vec![]);
        b.exit(None);
        b.finish()
    };
    let app = ClassBuilder::new("Main")
        .extends(OBJECT)
        .static_method(main_desc(), main)
        .build();

    ProgramBuilder::new()
        .class(object)
        .class(base)
        .class(iface)
        .class(a)
        .class(b_class)
        .class(app)
        .entry_point(MethodRef::new("Main", main_desc()))
        .build()
        .unwrap()
}

fn function<'a>(ir: &'a str, symbol: &str) -> &'a str {
    let header = format!("@{}(", symbol);
    let start = ir
        .lines()
        .position(|line| line.starts_with("define") && line.contains(&header))
        .unwrap_or_else(|| panic!("no definition of {}", symbol));
    let offset: usize = ir.lines().take(start).map(|l| l.len() + 1).sum();
    let rest = &ir[offset..];
    let end = rest.find("\n}\n").unwrap();
    &rest[..end]
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[test]
fn test_overrides_share_the_declaration_slot() {
    let program = scenario();
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let vtables = backend.vtables();

    let slot = vtables.resolve(&program, &MethodRef::new("Base", get_x())).unwrap();
    assert_eq!(
        slot,
        VtableSlot::Class {
            owner: "Base".to_string(),
            slot: 0
        }
    );
    for class in ["A", "B"] {
        let table = vtables.class_table(class).unwrap();
        let entry = table.entries.iter().find(|e| e.method.desc == get_x()).unwrap();
        assert_eq!(entry.slot, 0, "getX slot of {}", class);
    }
}

#[test]
fn test_interface_membership_by_tags() {
    let program = scenario();
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let tags = backend.tags();
    assert!(tags.is_subtype("A", "I"));
    assert!(!tags.is_subtype("B", "I"));
    assert!(tags.is_subtype("B", "Base"));
    assert_eq!(tags.ranges("I").unwrap(), vec![tags.class_range("A").unwrap()]);
}

#[test]
fn test_scenario_module() {
    let program = scenario();
    let ir = compile_to_string(&program, CodegenConfig::default()).unwrap();

    // B's metadata dispatches getX to B's implementation
    let b_meta = ir.lines().find(|l| l.starts_with("@vtable.1_B = global")).unwrap();
    assert!(b_meta.ends_with(", ptr @m1_B4_getXI }"));
    assert!(!b_meta.contains("foo"));
    let a_meta = ir.lines().find(|l| l.starts_with("@vtable.1_A = global")).unwrap();
    assert!(a_meta.contains("ptr @m1_A3_fooI"));
    assert!(a_meta.ends_with(", ptr @m1_A4_getXI }"));

    // The virtual call loads slot 0 of Base's table from the header
    let main = function(&ir, "m4_Main4_mainV");
    assert!(main.contains("getelementptr %vtable.4_Base, ptr"));
    assert!(main.contains(", i32 0, i32 1\n"));
    assert!(main.contains("call ptr @rt.alloc(ptr @vtable.1_A)"));

    // isInstance(_, I) tests A's tag range
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let range = backend.tags().class_range("A").unwrap();
    assert!(main
        .lines()
        .any(|l| l.contains("icmp sge i32") && l.ends_with(&format!(", {}", range.lower))));
    assert!(main
        .lines()
        .any(|l| l.contains("icmp slt i32") && l.ends_with(&format!(", {}", range.upper))));

    // A's field lives right after the header
    assert!(ir.contains("%class.1_A = type { %rt.Object, i32 }"));
    let getter = function(&ir, "m1_A4_getXI");
    assert!(getter.contains("getelementptr %class.1_A, ptr %v0, i32 0, i32 1"));
    assert!(ir.contains("define i32 @main()"));
}

#[test]
fn test_frame_holds_live_references() {
    let program = scenario();
    let ir = compile_to_string(&program, CodegenConfig::default()).unwrap();
    let main = function(&ir, "m4_Main4_mainV");
    // `a` and `b` are both live across B's constructor
    assert!(main.contains("%frame = alloca { %rt.StackFrame, [2 x ptr] }"));
    assert!(main.contains("store ptr %frame, ptr @rt.stackTop"));
    assert!(main.contains("store ptr %frame.next, ptr @rt.stackTop"));

    // Leaf methods have no frame
    let getter = function(&ir, "m1_B4_getXI");
    assert!(!getter.contains("%frame"));
    assert!(getter.contains("ret i32 %v1"));
}

#[test]
fn test_compilation_is_deterministic() {
    let first = compile_to_string(&scenario(), CodegenConfig::default()).unwrap();
    let second = compile_to_string(&scenario(), CodegenConfig::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_module_section_order() {
    let ir = compile_to_string(&scenario(), CodegenConfig::default()).unwrap();
    let position = |needle: &str| ir.find(needle).unwrap_or_else(|| panic!("missing {}", needle));
    let order = [
        "; ModuleID",
        "%rt.Object = type",
        "%rt.itable = type",
        "%vtable.1_A = type",
        "define void @m1_A",
        "@vtable.1_A = global",
        "@rt.byteArray = global",
        "@rt.stackRoots",
        "define i32 @main()",
        "define void @rt.initStringPool()",
        "@rt.callSites",
        "define i32 @rt.cmp.i32",
    ];
    for pair in order.windows(2) {
        assert!(position(pair[0]) < position(pair[1]), "{} before {}", pair[0], pair[1]);
    }
}

// ============================================================================
// Hierarchy properties
// ============================================================================

fn chain() -> Program {
    let value = MethodDescriptor::new("value", vec![], ValueType::INT);
    let name = MethodDescriptor::new("name", vec![], ValueType::object(OBJECT));
    let returns = |n: i32| {
        let (mut b, _) = method_body(&[]);
        let v = b.const_int(n);
        b.exit(Some(v));
        b.finish()
    };
    let null_name = || {
        let (mut b, _) = method_body(&[]);
        let v = b.const_null();
        b.exit(Some(v));
        b.finish()
    };
    ProgramBuilder::new()
        .class(ClassBuilder::new(OBJECT).build())
        .class(
            ClassBuilder::new("L1")
                .extends(OBJECT)
                .field("a", ValueType::INT)
                .method(value.clone(), returns(1))
                .build(),
        )
        .class(
            ClassBuilder::new("L2")
                .extends("L1")
                .field("b", ValueType::object(OBJECT))
                .method(name.clone(), null_name())
                .build(),
        )
        .class(
            ClassBuilder::new("L3")
                .extends("L2")
                .field("c", ValueType::LONG)
                .method(value, returns(3))
                .method(name, null_name())
                .build(),
        )
        .build()
        .unwrap()
}

#[test]
fn test_slots_stable_across_three_levels() {
    let program = chain();
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let vtables = backend.vtables();
    let l1 = vtables.class_table("L1").unwrap();
    let l2 = vtables.class_table("L2").unwrap();
    let l3 = vtables.class_table("L3").unwrap();

    assert!(l1.len() <= l2.len() && l2.len() <= l3.len());
    for (shorter, longer) in [(l1, l2), (l2, l3)] {
        for (i, entry) in shorter.entries.iter().enumerate() {
            assert_eq!(longer.entries[i].method.desc, entry.method.desc);
            assert_eq!(longer.entries[i].slot, entry.slot);
        }
    }
}

#[test]
fn test_layout_is_prefix_of_subclass_layout() {
    let program = chain();
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let layouts = backend.layouts();
    for (parent, child) in [("L1", "L2"), ("L2", "L3")] {
        let parent = layouts.layout(parent).unwrap();
        let child = layouts.layout(child).unwrap();
        assert_eq!(&child.fields[..parent.fields.len()], &parent.fields[..]);
    }
    assert_eq!(layouts.index_of(&FieldRef::new("L3", "a")), Some(1));
    assert_eq!(layouts.index_of(&FieldRef::new("L3", "c")), Some(3));
}

#[test]
fn test_tag_containment_matches_subtyping() {
    let program = scenario();
    let backend = Backend::new(&program, CodegenConfig::default()).unwrap();
    let classes: Vec<&str> = program
        .classes()
        .iter()
        .filter(|c| !c.is_interface)
        .map(|c| c.name.as_str())
        .collect();
    for sub in &classes {
        for sup in &classes {
            let sub_range = backend.tags().class_range(sub).unwrap();
            let sup_range = backend.tags().class_range(sup).unwrap();
            assert_eq!(
                sup_range.contains(&sub_range),
                program.is_subtype(sub, sup),
                "{} <: {}",
                sub,
                sup
            );
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_parent_is_inconsistent() {
    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Orphan").extends("Nowhere").build())
        .build()
        .unwrap();
    let result = Backend::new(&program, CodegenConfig::default());
    assert!(matches!(result, Err(CodegenError::InconsistentHierarchy { .. })));
}

#[test]
fn test_missing_callee() {
    let main = {
        let (mut b, _) = static_body(&[]);
        b.invoke(
            InvocationKind::Static,
            MethodRef::new("Main", MethodDescriptor::new("gone", vec![], ValueType::Void)),
            None,
            vec![],
        );
        b.exit(None);
        b.finish()
    };
    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Main").static_method(main_desc(), main).build())
        .build()
        .unwrap();
    let result = compile_to_string(&program, CodegenConfig::default());
    assert!(matches!(result, Err(CodegenError::MissingMethod { .. })));
}

#[test]
fn test_returning_wrong_kind() {
    let body = {
        let (mut b, _) = static_body(&[]);
        let v = b.const_long(1);
        b.exit(Some(v));
        b.finish()
    };
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .static_method(MethodDescriptor::new("f", vec![], ValueType::INT), body)
                .build(),
        )
        .build()
        .unwrap();
    let result = compile_to_string(&program, CodegenConfig::default());
    assert!(matches!(result, Err(CodegenError::KindMismatch { .. })));
}

#[test]
fn test_invokedynamic_is_unsupported() {
    let body = {
        let (mut b, _) = static_body(&[]);
        b.emit(kindle_model::Instruction::InvokeDynamic {
            receiver: None,
            name: "bootstrap".to_string(),
            arguments: vec![],
        });
        b.exit(None);
        b.finish()
    };
    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Main").static_method(main_desc(), body).build())
        .build()
        .unwrap();
    let result = compile_to_string(&program, CodegenConfig::default());
    assert!(matches!(result, Err(CodegenError::Unsupported { .. })));
}

/// `try { f(); x = 7; f(); } catch { merged = phi(x) }`: the landing pad
/// is reached from the first call, before `x` exists
#[test]
fn test_handler_phi_from_value_defined_after_call_site() {
    let f = MethodRef::new("Main", MethodDescriptor::new("f", vec![], ValueType::Void));
    let body = {
        let (mut b, _) = static_body(&[]);
        let handler = b.create_block();
        let done = b.create_block();
        b.try_catch(None, handler);
        b.invoke(InvocationKind::Static, f.clone(), None, vec![]);
        let x = b.const_int(7);
        b.invoke(InvocationKind::Static, f.clone(), None, vec![]);
        b.jump(done);

        b.switch_to_block(handler);
        let merged = b.var(VariableKind::Int);
        b.phi(merged, &[(BlockId(0), x)]);
        b.exit(Some(merged));

        b.switch_to_block(done);
        let zero = b.const_int(0);
        b.exit(Some(zero));
        b.finish()
    };
    let leaf = {
        let (mut b, _) = static_body(&[]);
        b.exit(None);
        b.finish()
    };
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .static_method(f.desc.clone(), leaf)
                .static_method(MethodDescriptor::new("g", vec![], ValueType::INT), body)
                .build(),
        )
        .build()
        .unwrap();
    let result = compile_to_string(&program, CodegenConfig::default());
    assert!(matches!(
        result,
        Err(CodegenError::Model(ModelError::MalformedBody { .. }))
    ));
}

#[test]
fn test_mangled_symbols_in_output() {
    let ir = compile_to_string(&scenario(), CodegenConfig::default()).unwrap();
    let constructor = mangle::method_name(&MethodRef::new("A", init()));
    assert_eq!(constructor, "m1_A14__003cinit_003eV");
    assert!(ir.contains(&format!("define void @{}(ptr %v0)", constructor)));
}
