//! End-to-end interpreter tests: compile real source and observe `print`

use std::cell::RefCell;
use std::rc::Rc;

use ferret_vm_compiler::ScriptParser;
use ferret_vm_core::Context;
use ferret_vm_exec::execute_program;
use oxc_allocator::Allocator;

fn run(source: &str) -> Vec<String> {
    let mut ctx = Context::new();
    let lines: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = lines.clone();
    ctx.set_print_handler(Box::new(move |line| sink.borrow_mut().push(line.to_string())));

    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(&mut ctx, &allocator, source, "test.js")
        .expect("compiles");
    script.compile_all(&mut ctx).expect("compiles fully");
    execute_program(&mut ctx, script.root()).expect("runs");

    let result = lines.borrow().clone();
    result
}

#[test]
fn test_arithmetic_and_global_variable() {
    assert_eq!(run("var x = 1 + 2; print(x);"), ["3"]);
}

#[test]
fn test_function_call() {
    assert_eq!(run("function f(a){ return a*a; } print(f(7));"), ["49"]);
}

#[test]
fn test_string_concatenation() {
    assert_eq!(run("var s = \"he\" + \"llo\"; print(s);"), ["hello"]);
}

#[test]
fn test_for_loop() {
    assert_eq!(run("for (var i = 0; i < 3; i++) print(i);"), ["0", "1", "2"]);
}

#[test]
fn test_try_catch() {
    assert_eq!(run("try { throw \"e\"; } catch (x) { print(x); }"), ["e"]);
}

#[test]
fn test_class_method() {
    assert_eq!(
        run("class C { m(){ return 1; } } print(new C().m());"),
        ["1"]
    );
}

#[test]
fn test_while_and_if() {
    assert_eq!(
        run("var n = 0; while (n < 5) { n = n + 1; if (n === 3) continue; } print(n);"),
        ["5"]
    );
}

#[test]
fn test_closure_captures_heap_variable() {
    assert_eq!(
        run("function counter(){ var n = 0; return function(){ n = n + 1; return n; }; } \
             var c = counter(); c(); print(c());"),
        ["2"]
    );
}

#[test]
fn test_explicit_class_constructor() {
    assert_eq!(
        run("class P { constructor(x){ this.x = x; } get_x(){ return this.x; } } \
             print(new P(41).get_x());"),
        ["41"]
    );
}

#[test]
fn test_typeof_and_delete() {
    assert_eq!(
        run("var o = { a: 1 }; print(typeof o.a); delete o.a; print(typeof o.a); print(typeof missing);"),
        ["number", "undefined", "undefined"]
    );
}

#[test]
fn test_with_scope_call() {
    assert_eq!(
        run("var o = { f: function(){ return this.v; }, v: 8 }; with (o) { print(f()); }"),
        ["8"]
    );
}

#[test]
fn test_uncaught_throw_is_an_error() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script =
        ScriptParser::initialize_script(&mut ctx, &allocator, "throw \"boom\";", "t.js").unwrap();
    script.compile_all(&mut ctx).unwrap();
    let error = execute_program(&mut ctx, script.root()).unwrap_err();
    assert!(error.to_string().contains("boom"));
}

#[test]
fn test_stack_overflow_is_reported() {
    let mut ctx = Context::new();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(
        &mut ctx,
        &allocator,
        "function f(){ return f(); } f();",
        "t.js",
    )
    .unwrap();
    script.compile_all(&mut ctx).unwrap();
    let error = execute_program(&mut ctx, script.root()).unwrap_err();
    assert!(error.to_string().contains("call stack"));
}
