//! Scope-analysis and code-generation structure tests

use ferret_vm_bytecode::{BlockId, InstructionWalker};
use ferret_vm_compiler::{CompileError, ScriptParser};
use ferret_vm_core::Context;
use oxc_allocator::Allocator;

#[test]
fn test_block_tree_shape() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function f(a){ return a*a; } var x = 1;",
        "test.js",
    )
    .unwrap();

    assert_eq!(ctx.block_count(), 2);
    let root = ctx.block(script.root());
    assert!(root.is_global());
    assert_eq!(root.children.len(), 1);

    let names: Vec<&str> = root
        .identifiers
        .iter()
        .map(|ident| ctx.atoms.resolve(ident.name))
        .collect();
    assert!(names.contains(&"f"));
    assert!(names.contains(&"x"));

    let child = ctx.block(root.children[0]);
    assert!(child.flags.is_function_declaration);
    assert_eq!(child.parameters.len(), 1);
    assert_eq!(ctx.atoms.resolve(child.parameters[0].name), "a");
    assert!(!child.parameters[0].is_heap_allocated);
    assert_eq!(child.identifier_on_stack_count, 1);
}

#[test]
fn test_captured_variable_is_promoted_to_heap() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function outer(){ var n = 0; var local = 1; return function(){ return n; }; }",
        "test.js",
    )
    .unwrap();

    let root = ctx.block(script.root());
    let outer = ctx.block(root.children[0]);
    assert_eq!(outer.identifier_on_heap_count, 1);
    assert_eq!(outer.identifier_on_stack_count, 1);
    assert!(!outer.flags.can_allocate_environment_on_stack);

    let n = outer
        .identifiers
        .iter()
        .find(|ident| ctx.atoms.resolve(ident.name) == "n")
        .unwrap();
    assert!(!n.needs_stack_slot);
    let local = outer
        .identifiers
        .iter()
        .find(|ident| ctx.atoms.resolve(ident.name) == "local")
        .unwrap();
    assert!(local.needs_stack_slot);
}

#[test]
fn test_strict_mode_is_inherited() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "\"use strict\"; function f(){ return 1; }",
        "test.js",
    )
    .unwrap();

    assert!(ctx.block(script.root()).flags.is_strict);
    let child = ctx.block(script.root()).children[0];
    assert!(ctx.block(child).flags.is_strict);
}

#[test]
fn test_scope_flags() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function f(){ try { throw 1; } catch (e) { } with ({}) { } return this; }",
        "test.js",
    )
    .unwrap();

    let child = ctx.block(script.root()).children[0];
    let flags = ctx.block(child).flags;
    assert!(flags.has_catch);
    assert!(flags.has_with);
    assert!(flags.need_to_load_this_value);
    assert!(flags.is_constructor);
    assert!(!flags.is_arrow_function_expression);
}

#[test]
fn test_class_constructor_block_is_the_class_body_block() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "class C { m(){ return 1; } }",
        "test.js",
    )
    .unwrap();

    // Root, synthesized constructor, method.
    assert_eq!(ctx.block_count(), 3);
    let root = script.root();
    let constructor = ctx.block(root).children[0];
    assert!(ctx.block(constructor).flags.is_class_constructor);
    assert!(ctx.block(constructor).flags.is_strict);
    assert_eq!(ctx.atoms.resolve(ctx.block(constructor).function_name), "C");
}

#[test]
fn test_lazy_function_compilation() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function f(){ return 1; }",
        "test.js",
    )
    .unwrap();

    let child = ctx.block(script.root()).children[0];
    assert!(ctx.block(script.root()).bytecode().is_some());
    assert!(ctx.block(child).bytecode().is_none());

    script.ensure_bytecode(&mut ctx, child).unwrap();
    assert!(ctx.block(child).bytecode().is_some());
}

#[test]
fn test_generated_stream_length_agreement() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "for (var i = 0; i < 3; i++) { if (i === 1) continue; print(i); }",
        "test.js",
    )
    .unwrap();

    let code = &ctx.block(script.root()).bytecode().unwrap().code;
    let total: usize = InstructionWalker::new(code)
        .map(|record| record.map(|(_, op)| op.byte_length()))
        .sum::<Result<usize, _>>()
        .unwrap();
    assert_eq!(total, code.len());
}

#[test]
fn test_parse_error_is_reported() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let error =
        ScriptParser::initialize_script(&mut ctx, &allocator, "var = ;", "test.js").unwrap_err();
    assert!(matches!(error, CompileError::Parse(_)));
}

#[test]
fn test_unsupported_construct_is_rejected() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let error = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function f(...rest){ return rest; }",
        "test.js",
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::Unsupported(_)));
}

#[test]
fn test_block_ids_are_in_preorder() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function a(){ function b(){} } function c(){}",
        "test.js",
    )
    .unwrap();

    let order: Vec<BlockId> = script.block_ids().collect();
    for (position, id) in order.iter().enumerate() {
        if let Some(parent) = ctx.block(*id).parent {
            let parent_position = order.iter().position(|other| *other == parent).unwrap();
            assert!(parent_position < position);
        }
    }
}
