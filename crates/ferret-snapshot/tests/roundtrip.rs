//! Save/load round-trip tests
//!
//! Every scenario runs twice — once straight from the compiler, once
//! through save→load into a fresh context — and must print the same lines.
//! On top of that the suite checks the structural invariants of the wire
//! format: literal-table contents, block-index monotonicity, opcode-length
//! agreement, jump-target validity, and byte-for-byte idempotence of a
//! double round trip.

use std::cell::RefCell;
use std::rc::Rc;

use ferret_vm_bytecode::{InstructionWalker, OperandKind};
use ferret_vm_compiler::ScriptParser;
use ferret_vm_core::Context;
use ferret_vm_exec::execute_program;
use oxc_allocator::Allocator;

fn capturing_context() -> (Context, Rc<RefCell<Vec<String>>>) {
    let mut ctx = Context::new();
    let lines: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = lines.clone();
    ctx.set_print_handler(Box::new(move |line| sink.borrow_mut().push(line.to_string())));
    (ctx, lines)
}

fn run_direct(source: &str) -> Vec<String> {
    let (mut ctx, lines) = capturing_context();
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(&mut ctx, &allocator, source, "test.js")
        .expect("compiles");
    script.compile_all(&mut ctx).expect("compiles fully");
    execute_program(&mut ctx, script.root()).expect("runs directly");
    let result = lines.borrow().clone();
    result
}

fn snapshot_of(source: &str) -> Vec<u8> {
    let mut ctx = Context::new();
    ferret_snapshot::generate(&mut ctx, "test.js", source).expect("snapshot saves")
}

fn run_snapshot(bytes: &[u8]) -> Vec<String> {
    let (mut ctx, lines) = capturing_context();
    ferret_snapshot::execute(&mut ctx, bytes).expect("snapshot runs");
    let result = lines.borrow().clone();
    result
}

/// Direct execution and the save→load path must be observationally equal
fn assert_roundtrip(source: &str, expected: &[&str]) {
    assert_eq!(run_direct(source), expected, "direct run of {source:?}");
    let bytes = snapshot_of(source);
    assert_eq!(run_snapshot(&bytes), expected, "snapshot run of {source:?}");
}

/// Hand-parse the snapshot's global descriptor: (block count, literal count)
fn global_counts(bytes: &[u8]) -> (u32, u32) {
    let u32_at = |at: usize| u32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap());
    (u32_at(16), u32_at(20))
}

/// Hand-parse the literal table out of a snapshot image
fn literal_table(bytes: &[u8]) -> Vec<String> {
    let u32_at = |at: usize| u32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap());
    let filename_size = u32_at(8) as usize;
    let source_size = u32_at(12) as usize;
    let count = u32_at(20) as usize;
    let mut pos = 24 + filename_size + source_size;
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        let len =
            u64::from_ne_bytes(bytes[pos..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        table.push(String::from_utf8(bytes[pos..pos + len].to_vec()).unwrap());
        pos += len;
    }
    table
}

#[test]
fn test_scenario_arithmetic() {
    let source = "var x = 1 + 2; print(x);";
    assert_roundtrip(source, &["3"]);

    let bytes = snapshot_of(source);
    let (blocks, _) = global_counts(&bytes);
    assert_eq!(blocks, 1);
    let table = literal_table(&bytes);
    assert!(table.iter().any(|s| s == "x"));
    assert!(table.iter().any(|s| s == "print"));
}

#[test]
fn test_scenario_function() {
    let source = "function f(a){ return a*a; } print(f(7));";
    assert_roundtrip(source, &["49"]);

    let bytes = snapshot_of(source);
    let (blocks, _) = global_counts(&bytes);
    assert_eq!(blocks, 2);
    let table = literal_table(&bytes);
    for expected in ["f", "a", "print"] {
        assert!(table.iter().any(|s| s == expected), "missing {expected}");
    }

    let mut ctx = Context::new();
    let loaded = ferret_snapshot::load(&mut ctx, &bytes).unwrap();
    let child = ctx.block(ferret_vm_bytecode::BlockId(loaded.root.0 + 1));
    assert_eq!(child.parent, Some(loaded.root));
}

#[test]
fn test_scenario_string_concat() {
    let source = "var s = \"he\" + \"llo\"; print(s);";
    assert_roundtrip(source, &["hello"]);

    let table = literal_table(&snapshot_of(source));
    assert!(table.iter().any(|s| s == "he"));
    assert!(table.iter().any(|s| s == "llo"));
}

#[test]
fn test_scenario_for_loop() {
    assert_roundtrip("for (var i = 0; i < 3; i++) print(i);", &["0", "1", "2"]);
}

#[test]
fn test_scenario_try_catch() {
    let source = "try { throw \"e\"; } catch (x) { print(x); }";
    assert_roundtrip(source, &["e"]);
    let table = literal_table(&snapshot_of(source));
    assert!(table.iter().any(|s| s == "x"), "catch name is interned");
}

#[test]
fn test_scenario_class() {
    let source = "class C { m(){ return 1; } } print(new C().m());";
    assert_roundtrip(source, &["1"]);

    // Program, class constructor (the class-body block), and the method.
    let bytes = snapshot_of(source);
    let (blocks, _) = global_counts(&bytes);
    assert_eq!(blocks, 3);
}

#[test]
fn test_anonymous_class_uses_name_sentinel() {
    assert_roundtrip(
        "var A = class { m(){ return 2; } }; print(new A().m());",
        &["2"],
    );
}

#[test]
fn test_regex_literal_roundtrip() {
    let source = "var r = /ab+c/gi; print(typeof r);";
    assert_roundtrip(source, &["object"]);
    let table = literal_table(&snapshot_of(source));
    assert!(table.iter().any(|s| s == "ab+c"));
    assert!(table.iter().any(|s| s == "gi"));
}

#[test]
fn test_regex_without_flags_roundtrip() {
    assert_roundtrip("var r = /xy/; print(typeof r);", &["object"]);
}

#[test]
fn test_with_scope_roundtrip() {
    assert_roundtrip(
        "var o = { f: function(){ return 4; } }; with (o) { print(f()); }",
        &["4"],
    );
}

#[test]
fn test_closure_roundtrip() {
    assert_roundtrip(
        "function counter(){ var n = 0; return function(){ n = n + 1; return n; }; } \
         var c = counter(); c(); print(c());",
        &["2"],
    );
}

#[test]
fn test_typeof_delete_roundtrip() {
    assert_roundtrip(
        "var o = { a: 1 }; print(typeof o.a); delete o.a; print(typeof o.a);",
        &["number", "undefined"],
    );
}

#[test]
fn test_tree_shape_roundtrip() {
    let source = "class C { constructor(){ this.v = 9; } m(){ return this.v; } } \
                  function f(a, b){ return a + b; } \
                  print(f(new C().m(), 1));";
    assert_eq!(run_direct(source), ["10"]);

    // Compile directly into one context, load the snapshot into another,
    // and compare the tree shapes block by block.
    let (mut direct_ctx, _) = capturing_context();
    let allocator = Allocator::default();
    let script =
        ScriptParser::initialize_script(&mut direct_ctx, &allocator, source, "test.js").unwrap();
    script.compile_all(&mut direct_ctx).unwrap();
    let bytes =
        ferret_snapshot::generate_from_script(&mut direct_ctx, &script, "test.js", source)
            .unwrap();

    let mut loaded_ctx = Context::new();
    let loaded = ferret_snapshot::load(&mut loaded_ctx, &bytes).unwrap();
    assert_eq!(loaded.root.0, 0);
    assert_eq!(direct_ctx.block_count(), loaded_ctx.block_count());

    for index in 0..direct_ctx.block_count() {
        let id = ferret_vm_bytecode::BlockId(index as u32);
        let a = direct_ctx.block(id);
        let b = loaded_ctx.block(id);
        assert_eq!(a.parent, b.parent, "parent of block {index}");
        assert_eq!(a.children, b.children, "children of block {index}");
        assert_eq!(
            a.parameters.len(),
            b.parameters.len(),
            "parameter count of block {index}"
        );
        assert_eq!(
            a.identifiers.len(),
            b.identifiers.len(),
            "identifier count of block {index}"
        );
        assert_eq!(a.flags, b.flags, "flags of block {index}");
        assert_eq!(a.source, b.source, "source slice of block {index}");
        let a_code = &a.bytecode().unwrap().code;
        let b_code = &b.bytecode().unwrap().code;
        assert_eq!(a_code.len(), b_code.len(), "bytecode length of block {index}");
    }
}

#[test]
fn test_index_monotonicity() {
    let source = "function outer(){ function inner(){ return 1; } return inner(); } \
                  class K { m(){ return outer(); } } print(new K().m());";
    let bytes = snapshot_of(source);
    let mut ctx = Context::new();
    let loaded = ferret_snapshot::load(&mut ctx, &bytes).unwrap();
    for index in 0..ctx.block_count() {
        let id = ferret_vm_bytecode::BlockId(index as u32);
        if let Some(parent) = ctx.block(id).parent {
            assert!(parent.0 < id.0, "parent {parent:?} of {id:?} comes first");
        } else {
            assert_eq!(id, loaded.root);
        }
    }
}

#[test]
fn test_opcode_length_agreement() {
    let source = "for (var i = 0; i < 3; i++) print(i); \
                  try { throw \"e\"; } catch (x) { print(x); }";
    let bytes = snapshot_of(source);
    let mut ctx = Context::new();
    ferret_snapshot::load(&mut ctx, &bytes).unwrap();
    for index in 0..ctx.block_count() {
        let code = &ctx
            .block(ferret_vm_bytecode::BlockId(index as u32))
            .bytecode()
            .unwrap()
            .code;
        let total: usize = InstructionWalker::new(code)
            .map(|record| record.map(|(_, op)| op.byte_length()))
            .sum::<Result<usize, _>>()
            .unwrap();
        assert_eq!(total, code.len());
    }
}

#[test]
fn test_jump_relocation_lands_on_opcode_starts() {
    let source = "for (var i = 0; i < 3; i++) { if (i === 1) continue; print(i); }";
    let bytes = snapshot_of(source);
    let mut ctx = Context::new();
    ferret_snapshot::load(&mut ctx, &bytes).unwrap();

    for index in 0..ctx.block_count() {
        let bytecode = ctx
            .block(ferret_vm_bytecode::BlockId(index as u32))
            .bytecode()
            .unwrap()
            .clone();
        let code = &bytecode.code;
        let starts: Vec<usize> = InstructionWalker::new(code)
            .map(|record| record.map(|(start, _)| start))
            .collect::<Result<_, _>>()
            .unwrap();
        let base = bytecode.base();
        for (start, op) in InstructionWalker::new(code).map(Result::unwrap) {
            for (kind, offset) in op.operand_layout() {
                if kind == OperandKind::Offset {
                    let target =
                        ferret_vm_bytecode::stream::read_u64(code, start + offset) as usize;
                    let relative = target.checked_sub(base).expect("target above base");
                    assert!(
                        starts.contains(&relative),
                        "jump in {} targets byte {relative}, not an opcode start",
                        op.name()
                    );
                }
            }
        }
    }
}

#[test]
fn test_double_roundtrip_is_byte_identical() {
    let source = "class C { m(){ return 1; } } function f(a){ return a + new C().m(); } \
                  for (var i = 0; i < 2; i++) print(f(i));";
    let first = snapshot_of(source);

    let mut ctx = Context::new();
    let loaded = ferret_snapshot::load(&mut ctx, &first).unwrap();
    let second = ferret_snapshot::generate_from_root(
        &mut ctx,
        loaded.root,
        &loaded.filename,
        &loaded.source,
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_save_leaves_the_live_program_runnable() {
    let source = "function f(a){ return a*a; } print(f(7));";
    let (mut ctx, lines) = capturing_context();
    let allocator = Allocator::default();
    let script =
        ScriptParser::initialize_script(&mut ctx, &allocator, source, "test.js").unwrap();

    let before = script
        .block_ids()
        .map(|id| {
            ctx.block(id)
                .bytecode()
                .map(|bytecode| bytecode.code.to_vec())
        })
        .collect::<Vec<_>>();
    let _bytes =
        ferret_snapshot::generate_from_script(&mut ctx, &script, "test.js", source).unwrap();

    // The save compiled the remaining blocks but never rewrote live ones.
    for (id, saved) in script.block_ids().zip(before) {
        if let Some(saved) = saved {
            assert_eq!(
                saved.as_slice(),
                &*ctx.block(id).bytecode().unwrap().code,
                "live bytecode mutated by the saver"
            );
        }
    }

    execute_program(&mut ctx, script.root()).unwrap();
    assert_eq!(lines.borrow().as_slice(), ["49"]);
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut bytes = snapshot_of("print(1);");
    bytes[0] ^= 0xff;
    let mut ctx = Context::new();
    let error = ferret_snapshot::execute(&mut ctx, &bytes).unwrap_err();
    assert!(matches!(error, ferret_snapshot::SnapshotError::BadMagic(_)));
}

#[test]
fn test_bad_version_is_rejected() {
    let mut bytes = snapshot_of("print(1);");
    bytes[4] = 99;
    let mut ctx = Context::new();
    let error = ferret_snapshot::execute(&mut ctx, &bytes).unwrap_err();
    assert!(matches!(error, ferret_snapshot::SnapshotError::BadVersion(99)));
}

#[test]
fn test_truncated_snapshot_is_rejected() {
    let bytes = snapshot_of("print(1);");
    let mut ctx = Context::new();
    let error = ferret_snapshot::execute(&mut ctx, &bytes[..bytes.len() - 5]).unwrap_err();
    assert!(matches!(
        error,
        ferret_snapshot::SnapshotError::Truncated { .. }
    ));
    // A failed load commits nothing to the context.
    assert_eq!(ctx.block_count(), 0);
}

#[test]
fn test_compile_error_fails_the_save() {
    let mut ctx = Context::new();
    let error = ferret_snapshot::generate(&mut ctx, "bad.js", "var = ;").unwrap_err();
    assert!(matches!(error, ferret_snapshot::SnapshotError::Compile(_)));
}

#[test]
fn test_generate_to_file_and_execute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(ferret_snapshot::SNAPSHOT_FILENAME);

    let mut ctx = Context::new();
    ferret_snapshot::generate_to_file(&mut ctx, "test.js", "print(6 * 7);", &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(run_snapshot(&bytes), ["42"]);
}

#[test]
fn test_failed_save_writes_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(ferret_snapshot::SNAPSHOT_FILENAME);

    let mut ctx = Context::new();
    let error =
        ferret_snapshot::generate_to_file(&mut ctx, "bad.js", "var = ;", &path).unwrap_err();
    assert!(matches!(error, ferret_snapshot::SnapshotError::Compile(_)));
    assert!(!path.exists());
}
