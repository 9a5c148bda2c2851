//! Integration tests for loading programs from JSON

use kindle_model::{
    validate_program, BlockId, ClassBuilder, Instruction, InvocationKind, MethodDescriptor,
    MethodRef, ModelError, Program, ProgramBuilder, Terminator, ValueType, Var, VariableKind,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const COUNTER_JSON: &str = r#"{
  "classes": [
    { "name": "java.lang.Object" },
    {
      "name": "Counter",
      "parent": "java.lang.Object",
      "fields": [
        { "name": "count", "ty": { "primitive": "int" } },
        { "name": "instances", "ty": { "primitive": "int" }, "is_static": true,
          "initial": { "kind": "int", "value": 0 } }
      ],
      "methods": [
        {
          "name": "next",
          "ret": { "primitive": "int" },
          "body": {
            "variables": ["object", "int", "int", "int"],
            "blocks": [
              {
                "instructions": [
                  { "op": "get_field", "receiver": 1, "instance": 0,
                    "field": { "class": "Counter", "name": "count" },
                    "field_type": { "primitive": "int" } },
                  { "op": "int_constant", "receiver": 2, "value": 1 },
                  { "op": "binary", "operator": "add", "receiver": 3, "first": 1, "second": 2,
                    "operand": "int" }
                ],
                "terminator": { "op": "exit", "value": 3 }
              }
            ]
          }
        }
      ]
    }
  ],
  "entry_point": { "class": "Counter", "name": "main", "params": [] }
}"#;

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_load_program_from_json() {
    let program = Program::from_json(COUNTER_JSON).unwrap();

    assert_eq!(program.class_count(), 2);
    let counter = program.lookup("Counter").unwrap();
    assert_eq!(counter.parent.as_deref(), Some("java.lang.Object"));
    assert_eq!(counter.instance_fields().count(), 1);
    assert_eq!(counter.static_fields().count(), 1);

    let next = &counter.methods[0];
    assert_eq!(next.desc.ret, ValueType::INT);
    let body = next.body.as_ref().unwrap();
    assert_eq!(body.variables[0], VariableKind::Object);
    assert_eq!(
        body.blocks[0].terminator,
        Terminator::Exit {
            value: Some(Var(3))
        }
    );

    let entry = program.entry_point().unwrap();
    assert_eq!(entry.name(), "main");
    assert_eq!(entry.desc.ret, ValueType::Void);

    assert!(validate_program(&program).is_ok());
}

#[test]
fn test_malformed_json_is_reported() {
    let truncated = &COUNTER_JSON[..COUNTER_JSON.len() / 2];
    let result = Program::from_json(truncated);
    assert!(matches!(result, Err(ModelError::Json(_))));
}

#[test]
fn test_json_round_trip_preserves_structure() {
    let (mut b, vars) = kindle_model::method_body(&[]);
    let other = b.create_block();
    let value = b.invoke(
        InvocationKind::Virtual,
        MethodRef::new("A", MethodDescriptor::new("get", vec![], ValueType::INT)),
        Some(vars[0]),
        vec![],
    );
    b.jump(other);
    b.switch_to_block(other);
    b.exit(value);

    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Object").build())
        .class(
            ClassBuilder::new("A")
                .extends("Object")
                .method(MethodDescriptor::new("run", vec![], ValueType::INT), b.finish())
                .build(),
        )
        .build()
        .unwrap();

    let reloaded = Program::from_json(&program.to_json().unwrap()).unwrap();
    let body = reloaded.lookup("A").unwrap().methods[0].body.as_ref().unwrap();
    assert_eq!(body.blocks[0].terminator, Terminator::Jump { target: BlockId(1) });
    assert!(matches!(
        body.blocks[0].instructions[0],
        Instruction::Invoke {
            kind: InvocationKind::Virtual,
            ..
        }
    ));
}

#[test]
fn test_invalid_body_fails_validation() {
    let (mut b, _) = kindle_model::static_body(&[]);
    b.jump(BlockId(5));
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("A")
                .static_method(MethodDescriptor::new("f", vec![], ValueType::Void), b.finish())
                .build(),
        )
        .build()
        .unwrap();

    assert!(matches!(
        validate_program(&program),
        Err(ModelError::UnknownBlock { block: 5, .. })
    ));
}
