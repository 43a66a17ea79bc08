//! The bytecode interpreter

use std::rc::Rc;

use ferret_vm_bytecode::{
    Atom, BlockId, ByteCodeBlock, Literal, Opcode, OperandCursor, Register,
    OPCODE_WORD_SIZE,
};
use ferret_vm_core::object::{get_property, FunctionData, HeapEnv, JsObject, ObjectKind, ObjectRef};
use ferret_vm_core::{Context, RuntimeError, Value};

/// Maximum interpreter call depth
const MAX_CALL_DEPTH: usize = 256;

/// Run a program's top-level block to completion
///
/// The register file is sized to the block's declared width plus one `this`
/// slot plus the block's numeral-literal slots; `this` is the global object
/// and every explicitly declared top-level identifier is created on the
/// global object before the first opcode runs.
pub fn execute_program(ctx: &mut Context, root: BlockId) -> Result<Value, RuntimeError> {
    let this = Value::Object(ctx.global().clone());
    run_frame(ctx, root, this, &[], &[], 0)
}

enum Flow {
    Next,
    Goto(usize),
    Return(Value),
}

enum DynamicEnv {
    Catch { name: Atom, value: Value },
    With { object: ObjectRef },
}

struct TryHandler {
    catch_position: usize,
    catch_name: Atom,
    dynamic_depth: usize,
}

struct Frame {
    values: Vec<Value>,
    required: usize,
    envs: Vec<HeapEnv>,
    dynamic: Vec<DynamicEnv>,
    handlers: Vec<TryHandler>,
}

impl Frame {
    #[inline]
    fn reg(&self, register: Register) -> &Value {
        &self.values[register.0 as usize]
    }

    #[inline]
    fn set_reg(&mut self, register: Register, value: Value) {
        self.values[register.0 as usize] = value;
    }

    #[inline]
    fn stack_slot(&self, slot: u16) -> &Value {
        &self.values[self.required + slot as usize]
    }

    #[inline]
    fn set_stack_slot(&mut self, slot: u16, value: Value) {
        self.values[self.required + slot as usize] = value;
    }
}

fn run_frame(
    ctx: &mut Context,
    block_id: BlockId,
    this: Value,
    args: &[Value],
    captured: &[HeapEnv],
    depth: usize,
) -> Result<Value, RuntimeError> {
    if depth > MAX_CALL_DEPTH {
        return Err(RuntimeError::StackOverflow);
    }

    let block = ctx.block(block_id);
    let bytecode: Rc<ByteCodeBlock> = block
        .bytecode()
        .cloned()
        .ok_or_else(|| RuntimeError::Internal("code block has no bytecode".into()))?;
    let is_global = block.is_global();
    let required = bytecode.required_register_count as usize;
    let stack_count = if is_global {
        0
    } else {
        block.identifier_on_stack_count as usize
    };
    let heap_count = block.identifier_on_heap_count as usize;

    let mut frame = Frame {
        values: vec![Value::Undefined; required + 1 + stack_count + bytecode.numeral_literals.len()],
        required,
        envs: Vec::with_capacity(captured.len() + 1),
        dynamic: Vec::new(),
        handlers: Vec::new(),
    };
    frame.values[required] = this;

    // Numeral literals occupy the register-file tail.
    let numeral_base = required + 1 + stack_count;
    for (position, literal) in bytecode.numeral_literals.iter().enumerate() {
        frame.values[numeral_base + position] = Value::from_literal(*literal)
            .ok_or_else(|| {
                RuntimeError::Internal("snapshot index in a numeral literal".into())
            })?;
    }

    if is_global {
        // Hoisting: every declared top-level name exists on the global
        // object before execution starts.
        let declared: Vec<Atom> = ctx
            .block(block_id)
            .identifiers
            .iter()
            .filter(|ident| ident.is_explicitly_declared_or_parameter)
            .map(|ident| ident.name)
            .collect();
        let global = ctx.global().clone();
        for name in declared {
            if !global.borrow().has_own(name) {
                global.borrow_mut().set(name, Value::Undefined);
            }
        }
    } else {
        frame
            .envs
            .push(Rc::new(std::cell::RefCell::new(vec![Value::Undefined; heap_count])));
        frame.envs.extend(captured.iter().cloned());

        let parameters = ctx.block(block_id).parameters.clone();
        for (position, parameter) in parameters.iter().enumerate() {
            let value = args.get(position).cloned().unwrap_or(Value::Undefined);
            if parameter.is_heap_allocated {
                frame.envs[0].borrow_mut()[parameter.index as usize] = value;
            } else {
                frame.set_stack_slot(parameter.index, value);
            }
        }
    }

    let code = &bytecode.code;
    let base = bytecode.base();
    let mut pc = 0usize;

    while pc < code.len() {
        let word = ferret_vm_bytecode::stream::read_u32(code, pc);
        let op = Opcode::from_u32(word)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown opcode {word}")))?;
        tracing::trace!(target: "ferret::exec", op = op.name(), pc);

        let flow = step(
            ctx, &mut frame, &bytecode, block_id, code, base, pc, op, depth,
        );
        match flow {
            Ok(Flow::Next) => pc += op.byte_length(),
            Ok(Flow::Goto(next)) => pc = next,
            Ok(Flow::Return(value)) => return Ok(value),
            Err(error) => {
                if error.is_catchable() {
                    if let Some(handler) = frame.handlers.pop() {
                        frame.dynamic.truncate(handler.dynamic_depth);
                        frame.dynamic.push(DynamicEnv::Catch {
                            name: handler.catch_name,
                            value: error_value(ctx, error),
                        });
                        pc = handler.catch_position;
                        continue;
                    }
                }
                return Err(error);
            }
        }
    }
    Ok(Value::Undefined)
}

#[allow(clippy::too_many_arguments)]
fn step(
    ctx: &mut Context,
    frame: &mut Frame,
    bytecode: &ByteCodeBlock,
    block_id: BlockId,
    code: &[u8],
    base: usize,
    pc: usize,
    op: Opcode,
    depth: usize,
) -> Result<Flow, RuntimeError> {
    let mut c = OperandCursor::new(code, pc);
    match op {
        Opcode::LoadLiteral => {
            let dst = c.register();
            let literal = c
                .value()
                .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            let value = Value::from_literal(literal).ok_or_else(|| {
                RuntimeError::Internal("snapshot index survived loading".into())
            })?;
            frame.set_reg(dst, value);
        }
        Opcode::Move => {
            let src = c.register();
            let dst = c.register();
            let value = frame.reg(src).clone();
            frame.set_reg(dst, value);
        }
        Opcode::LoadThis => {
            let dst = c.register();
            let this = frame.values[frame.required].clone();
            frame.set_reg(dst, this);
        }
        Opcode::LoadByName => {
            let dst = c.register();
            let name = c.atom();
            let value = lookup_by_name(ctx, frame, block_id, name)?;
            frame.set_reg(dst, value);
        }
        Opcode::StoreByName => {
            let src = c.register();
            let name = c.atom();
            let value = frame.reg(src).clone();
            store_by_name(ctx, frame, block_id, name, value)?;
        }
        Opcode::GetGlobalVariable => {
            let dst = c.register();
            let name = c.atom();
            let value = get_property(ctx.global(), name).ok_or_else(|| {
                RuntimeError::ReferenceError(format!(
                    "{} is not defined",
                    ctx.atoms.resolve(name)
                ))
            })?;
            frame.set_reg(dst, value);
        }
        Opcode::SetGlobalVariable => {
            let src = c.register();
            let name = c.atom();
            let value = frame.reg(src).clone();
            ctx.global().borrow_mut().set(name, value);
        }
        Opcode::LoadByStackIndex => {
            let dst = c.register();
            let slot = c.index();
            let value = frame.stack_slot(slot).clone();
            frame.set_reg(dst, value);
        }
        Opcode::StoreByStackIndex => {
            let src = c.register();
            let slot = c.index();
            let value = frame.reg(src).clone();
            frame.set_stack_slot(slot, value);
        }
        Opcode::LoadByHeapIndex => {
            let dst = c.register();
            let upper = c.index();
            let slot = c.index();
            let value = heap_env(frame, upper)?.borrow()[slot as usize].clone();
            frame.set_reg(dst, value);
        }
        Opcode::StoreByHeapIndex => {
            let src = c.register();
            let upper = c.index();
            let slot = c.index();
            let value = frame.reg(src).clone();
            heap_env(frame, upper)?.borrow_mut()[slot as usize] = value;
        }
        Opcode::BinaryPlus => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let value = binary_plus(ctx, frame.reg(lhs), frame.reg(rhs));
            frame.set_reg(dst, value);
        }
        Opcode::BinaryMinus => {
            arith(ctx, frame, c, |a, b| a - b, i32::checked_sub)?;
        }
        Opcode::BinaryMultiply => {
            arith(ctx, frame, c, |a, b| a * b, i32::checked_mul)?;
        }
        Opcode::BinaryDivision => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let a = frame.reg(lhs).to_number(&ctx.atoms);
            let b = frame.reg(rhs).to_number(&ctx.atoms);
            frame.set_reg(dst, number_value(a / b));
        }
        Opcode::BinaryMod => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let a = frame.reg(lhs).to_number(&ctx.atoms);
            let b = frame.reg(rhs).to_number(&ctx.atoms);
            frame.set_reg(dst, number_value(a % b));
        }
        Opcode::BinaryEqual => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let equal = loose_equals(ctx, frame.reg(lhs), frame.reg(rhs));
            frame.set_reg(dst, Value::Bool(equal));
        }
        Opcode::BinaryNotEqual => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let equal = loose_equals(ctx, frame.reg(lhs), frame.reg(rhs));
            frame.set_reg(dst, Value::Bool(!equal));
        }
        Opcode::BinaryStrictEqual => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let equal = frame.reg(lhs).strict_equals(frame.reg(rhs));
            frame.set_reg(dst, Value::Bool(equal));
        }
        Opcode::BinaryStrictNotEqual => {
            let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
            let equal = frame.reg(lhs).strict_equals(frame.reg(rhs));
            frame.set_reg(dst, Value::Bool(!equal));
        }
        Opcode::BinaryLessThan => {
            compare(ctx, frame, c, |ord| ord == std::cmp::Ordering::Less)?;
        }
        Opcode::BinaryLessThanOrEqual => {
            compare(ctx, frame, c, |ord| ord != std::cmp::Ordering::Greater)?;
        }
        Opcode::BinaryGreaterThan => {
            compare(ctx, frame, c, |ord| ord == std::cmp::Ordering::Greater)?;
        }
        Opcode::BinaryGreaterThanOrEqual => {
            compare(ctx, frame, c, |ord| ord != std::cmp::Ordering::Less)?;
        }
        Opcode::Increment => {
            let (src, dst) = (c.register(), c.register());
            let value = increment(ctx, frame.reg(src), 1);
            frame.set_reg(dst, value);
        }
        Opcode::Decrement => {
            let (src, dst) = (c.register(), c.register());
            let value = increment(ctx, frame.reg(src), -1);
            frame.set_reg(dst, value);
        }
        Opcode::UnaryMinus => {
            let (src, dst) = (c.register(), c.register());
            let number = frame.reg(src).to_number(&ctx.atoms);
            frame.set_reg(dst, number_value(-number));
        }
        Opcode::UnaryNot => {
            let (src, dst) = (c.register(), c.register());
            let truthy = frame.reg(src).to_boolean(&ctx.atoms);
            frame.set_reg(dst, Value::Bool(!truthy));
        }
        Opcode::UnaryTypeof => {
            let (src, dst) = (c.register(), c.register());
            let id = c.atom();
            let value = if id.is_empty() {
                Some(frame.reg(src).clone())
            } else {
                lookup_by_name(ctx, frame, block_id, id).ok()
            };
            let tag = value.map(|v| v.type_of()).unwrap_or("undefined");
            let atom = ctx.intern(tag);
            frame.set_reg(dst, Value::String(atom));
        }
        Opcode::UnaryDelete => {
            let (obj, dst) = (c.register(), c.register());
            let id = c.atom();
            let deleted = if obj.is_none() {
                ctx.global().borrow_mut().delete(id)
            } else {
                match frame.reg(obj) {
                    Value::Object(object) => object.borrow_mut().delete(id),
                    _ => true,
                }
            };
            frame.set_reg(dst, Value::Bool(deleted));
        }
        Opcode::CreateObject => {
            let dst = c.register();
            frame.set_reg(dst, Value::Object(JsObject::ordinary(None)));
        }
        Opcode::GetObject => {
            let (obj, property, dst) = (c.register(), c.register(), c.register());
            let key_text = frame.reg(property).to_display(&ctx.atoms);
            let key = ctx.intern(&key_text);
            let object = expect_object(ctx, frame.reg(obj), "read a property of")?;
            let value = get_property(&object, key).unwrap_or(Value::Undefined);
            frame.set_reg(dst, value);
        }
        Opcode::SetObject => {
            let (obj, property, src) = (c.register(), c.register(), c.register());
            let key_text = frame.reg(property).to_display(&ctx.atoms);
            let key = ctx.intern(&key_text);
            let object = expect_object(ctx, frame.reg(obj), "set a property of")?;
            let value = frame.reg(src).clone();
            object.borrow_mut().set(key, value);
        }
        Opcode::GetObjectPreComputedCase => {
            let (obj, dst) = (c.register(), c.register());
            let name = c.atom();
            let object = expect_object(ctx, frame.reg(obj), "read a property of")?;
            let value = get_property(&object, name).unwrap_or(Value::Undefined);
            frame.set_reg(dst, value);
        }
        Opcode::SetObjectPreComputedCase => {
            let (obj, src) = (c.register(), c.register());
            let name = c.atom();
            let cache = c.cache();
            let object = expect_object(ctx, frame.reg(obj), "set a property of")?;
            let value = frame.reg(src).clone();
            object.borrow_mut().set(name, value);
            if let Some(cache) = bytecode.inline_caches.get(cache as usize) {
                cache.record_hit();
            }
        }
        Opcode::ObjectDefineOwnPropertyWithNameOperation => {
            let (obj, src) = (c.register(), c.register());
            let name = c.atom();
            let object = expect_object(ctx, frame.reg(obj), "define a property of")?;
            let value = frame.reg(src).clone();
            object.borrow_mut().set(name, value);
        }
        Opcode::LoadRegexp => {
            let dst = c.register();
            let body = c.atom();
            let option = c.atom();
            frame.set_reg(dst, Value::Object(JsObject::regex(body, option)));
        }
        Opcode::CreateFunction => {
            let dst = c.register();
            let block = c.block();
            let function = make_function(ctx, frame, block);
            frame.set_reg(dst, function);
        }
        Opcode::DeclareFunctionDeclarations => {
            let block = c.block();
            declare_function_declarations(ctx, frame, block)?;
        }
        Opcode::CreateClass => {
            let dst = c.register();
            let name = c.atom();
            let block = c.block();
            let class = make_function(ctx, frame, block);
            if let Value::Object(object) = &class {
                object.borrow_mut().name = name;
            }
            frame.set_reg(dst, class);
        }
        Opcode::NewOperation => {
            let callee = c.register();
            let argv = c.register();
            let argc = c.index();
            let dst = c.register();
            let args = collect_args(frame, argv, argc);
            let callee_value = frame.reg(callee).clone();
            let value = construct(ctx, &callee_value, &args, depth)?;
            frame.set_reg(dst, value);
        }
        Opcode::CallFunction => {
            let receiver = c.register();
            let callee = c.register();
            let argv = c.register();
            let argc = c.index();
            let dst = c.register();
            let this = if receiver.is_none() {
                Value::Undefined
            } else {
                frame.reg(receiver).clone()
            };
            let args = collect_args(frame, argv, argc);
            let callee_value = frame.reg(callee).clone();
            let value = invoke(ctx, &callee_value, this, &args, depth)?;
            frame.set_reg(dst, value);
        }
        Opcode::CallFunctionInWithScope => {
            let name = c.atom();
            let argv = c.register();
            let argc = c.index();
            let dst = c.register();
            let args = collect_args(frame, argv, argc);
            let (callee_value, this) = resolve_callee_in_scope(ctx, frame, block_id, name)?;
            let value = invoke(ctx, &callee_value, this, &args, depth)?;
            frame.set_reg(dst, value);
        }
        Opcode::Jump => {
            let target = c.offset();
            return Ok(Flow::Goto(relative_target(target, base, code.len())?));
        }
        Opcode::JumpIfTrue => {
            let cond = c.register();
            let target = c.offset();
            if frame.reg(cond).to_boolean(&ctx.atoms) {
                return Ok(Flow::Goto(relative_target(target, base, code.len())?));
            }
        }
        Opcode::JumpIfFalse => {
            let cond = c.register();
            let target = c.offset();
            if !frame.reg(cond).to_boolean(&ctx.atoms) {
                return Ok(Flow::Goto(relative_target(target, base, code.len())?));
            }
        }
        Opcode::TryOperation => {
            let catch_name = c.atom();
            let catch_position = c.offset();
            let _end_position = c.offset();
            frame.handlers.push(TryHandler {
                catch_position: relative_target(catch_position, base, code.len())?,
                catch_name,
                dynamic_depth: frame.dynamic.len(),
            });
        }
        Opcode::EndTryOperation => {
            frame.handlers.pop();
        }
        Opcode::OpenWithEnvironment => {
            let src = c.register();
            let object = expect_object(ctx, frame.reg(src), "use as a with scope")?;
            frame.dynamic.push(DynamicEnv::With { object });
        }
        Opcode::CloseEnvironment => {
            frame.dynamic.pop();
        }
        Opcode::ThrowOperation => {
            let src = c.register();
            let value = frame.reg(src).clone();
            let message = value.to_display(&ctx.atoms);
            return Err(RuntimeError::Thrown { value, message });
        }
        Opcode::ReturnFunctionWithValue => {
            let src = c.register();
            return Ok(Flow::Return(frame.reg(src).clone()));
        }
        Opcode::ReturnFunction => {
            return Ok(Flow::Return(Value::Undefined));
        }
        Opcode::End => {
            let src = c.register();
            return Ok(Flow::Return(frame.reg(src).clone()));
        }
    }
    Ok(Flow::Next)
}

// ---- helpers ---------------------------------------------------------------

fn relative_target(target: usize, base: usize, len: usize) -> Result<usize, RuntimeError> {
    target
        .checked_sub(base)
        .filter(|relative| relative + OPCODE_WORD_SIZE <= len)
        .ok_or_else(|| RuntimeError::Internal("jump target outside the bytecode stream".into()))
}

fn heap_env(frame: &Frame, upper: u16) -> Result<&HeapEnv, RuntimeError> {
    frame
        .envs
        .get(upper as usize)
        .ok_or_else(|| RuntimeError::Internal("heap environment depth out of range".into()))
}

fn collect_args(frame: &Frame, argv: Register, argc: u16) -> Vec<Value> {
    (0..argc)
        .map(|position| frame.reg(Register(argv.0 + position)).clone())
        .collect()
}

fn expect_object(
    ctx: &Context,
    value: &Value,
    action: &str,
) -> Result<ObjectRef, RuntimeError> {
    match value {
        Value::Object(object) => Ok(object.clone()),
        other => Err(RuntimeError::TypeError(format!(
            "cannot {action} {}",
            other.to_display(&ctx.atoms)
        ))),
    }
}

fn error_value(ctx: &mut Context, error: RuntimeError) -> Value {
    match error {
        RuntimeError::Thrown { value, .. } => value,
        other => {
            let atom = ctx.intern(&other.to_string());
            Value::String(atom)
        }
    }
}

fn number_value(number: f64) -> Value {
    match Literal::number(number) {
        Literal::Int32(i) => Value::Int32(i),
        _ => Value::Double(number),
    }
}

fn binary_plus(ctx: &mut Context, lhs: &Value, rhs: &Value) -> Value {
    if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
        let text = format!(
            "{}{}",
            lhs.to_display(&ctx.atoms),
            rhs.to_display(&ctx.atoms)
        );
        return Value::String(ctx.intern(&text));
    }
    if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
        if let Some(sum) = a.checked_add(*b) {
            return Value::Int32(sum);
        }
    }
    number_value(lhs.to_number(&ctx.atoms) + rhs.to_number(&ctx.atoms))
}

fn arith(
    ctx: &mut Context,
    frame: &mut Frame,
    mut c: OperandCursor<'_>,
    double_op: fn(f64, f64) -> f64,
    int_op: fn(i32, i32) -> Option<i32>,
) -> Result<(), RuntimeError> {
    let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
    let value = match (frame.reg(lhs), frame.reg(rhs)) {
        (Value::Int32(a), Value::Int32(b)) => match int_op(*a, *b) {
            Some(result) => Value::Int32(result),
            None => number_value(double_op(*a as f64, *b as f64)),
        },
        (a, b) => number_value(double_op(a.to_number(&ctx.atoms), b.to_number(&ctx.atoms))),
    };
    frame.set_reg(dst, value);
    Ok(())
}

fn compare(
    ctx: &mut Context,
    frame: &mut Frame,
    mut c: OperandCursor<'_>,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<(), RuntimeError> {
    let (lhs, rhs, dst) = (c.register(), c.register(), c.register());
    let result = match (frame.reg(lhs), frame.reg(rhs)) {
        (Value::String(a), Value::String(b)) => {
            let ordering = ctx.atoms.resolve(*a).cmp(ctx.atoms.resolve(*b));
            accept(ordering)
        }
        (a, b) => {
            let a = a.to_number(&ctx.atoms);
            let b = b.to_number(&ctx.atoms);
            a.partial_cmp(&b).map(accept).unwrap_or(false)
        }
    };
    frame.set_reg(dst, Value::Bool(result));
    Ok(())
}

fn loose_equals(ctx: &Context, lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (a, b) => {
            let a = a.to_number(&ctx.atoms);
            let b = b.to_number(&ctx.atoms);
            a == b
        }
    }
}

fn increment(ctx: &Context, value: &Value, delta: i32) -> Value {
    if let Value::Int32(current) = value {
        if let Some(result) = current.checked_add(delta) {
            return Value::Int32(result);
        }
    }
    number_value(value.to_number(&ctx.atoms) + delta as f64)
}

fn make_function(ctx: &mut Context, frame: &Frame, block: BlockId) -> Value {
    let name = ctx.block(block).function_name;
    let function = JsObject::function(
        name,
        FunctionData {
            block,
            envs: frame.envs.clone(),
        },
    );
    let prototype_name = ctx.intern("prototype");
    let constructor_name = ctx.intern("constructor");
    let prototype = JsObject::ordinary(None);
    prototype
        .borrow_mut()
        .set(constructor_name, Value::Object(function.clone()));
    function
        .borrow_mut()
        .set(prototype_name, Value::Object(prototype));
    Value::Object(function)
}

fn declare_function_declarations(
    ctx: &mut Context,
    frame: &mut Frame,
    block: BlockId,
) -> Result<(), RuntimeError> {
    let children = ctx.block(block).children.clone();
    let is_global = ctx.block(block).is_global();
    for child in children {
        if !ctx.block(child).flags.is_function_declaration {
            continue;
        }
        let name = ctx.block(child).function_name;
        let function = make_function(ctx, frame, child);
        if is_global {
            ctx.global().borrow_mut().set(name, function);
        } else {
            match ctx.block(block).find_identifier(name) {
                Some(ident) if ident.needs_stack_slot => {
                    frame.set_stack_slot(ident.stored_index, function);
                }
                Some(ident) => {
                    frame.envs[0].borrow_mut()[ident.stored_index as usize] = function;
                }
                None => {
                    ctx.global().borrow_mut().set(name, function);
                }
            }
        }
    }
    Ok(())
}

fn lookup_by_name(
    ctx: &mut Context,
    frame: &Frame,
    block_id: BlockId,
    name: Atom,
) -> Result<Value, RuntimeError> {
    for env in frame.dynamic.iter().rev() {
        match env {
            DynamicEnv::Catch {
                name: bound,
                value,
            } if *bound == name => return Ok(value.clone()),
            DynamicEnv::With { object } => {
                if let Some(value) = get_property(object, name) {
                    return Ok(value);
                }
            }
            _ => {}
        }
    }

    let mut current = block_id;
    let mut hops = 0usize;
    loop {
        let block = ctx.block(current);
        if block.is_global() {
            break;
        }
        if let Some(ident) = block.find_identifier(name) {
            return if ident.needs_stack_slot {
                if hops == 0 {
                    Ok(frame.stack_slot(ident.stored_index).clone())
                } else {
                    Err(RuntimeError::Internal(
                        "stack identifier referenced across frames".into(),
                    ))
                }
            } else {
                Ok(heap_env(frame, hops as u16)?.borrow()[ident.stored_index as usize].clone())
            };
        }
        match block.parent {
            Some(parent) => {
                current = parent;
                hops += 1;
            }
            None => break,
        }
    }

    get_property(ctx.global(), name).ok_or_else(|| {
        RuntimeError::ReferenceError(format!("{} is not defined", ctx.atoms.resolve(name)))
    })
}

fn store_by_name(
    ctx: &mut Context,
    frame: &mut Frame,
    block_id: BlockId,
    name: Atom,
    value: Value,
) -> Result<(), RuntimeError> {
    for env in frame.dynamic.iter_mut().rev() {
        match env {
            DynamicEnv::Catch {
                name: bound,
                value: slot,
            } if *bound == name => {
                *slot = value;
                return Ok(());
            }
            DynamicEnv::With { object } => {
                if object.borrow().has_own(name) {
                    object.borrow_mut().set(name, value);
                    return Ok(());
                }
            }
            _ => {}
        }
    }

    let mut current = block_id;
    let mut hops = 0usize;
    loop {
        let block = ctx.block(current);
        if block.is_global() {
            break;
        }
        if let Some(ident) = block.find_identifier(name) {
            if ident.needs_stack_slot {
                if hops == 0 {
                    frame.set_stack_slot(ident.stored_index, value);
                    return Ok(());
                }
                return Err(RuntimeError::Internal(
                    "stack identifier referenced across frames".into(),
                ));
            }
            let stored_index = ident.stored_index as usize;
            heap_env(frame, hops as u16)?.borrow_mut()[stored_index] = value;
            return Ok(());
        }
        match block.parent {
            Some(parent) => {
                current = parent;
                hops += 1;
            }
            None => break,
        }
    }

    ctx.global().borrow_mut().set(name, value);
    Ok(())
}

fn resolve_callee_in_scope(
    ctx: &mut Context,
    frame: &Frame,
    block_id: BlockId,
    name: Atom,
) -> Result<(Value, Value), RuntimeError> {
    for env in frame.dynamic.iter().rev() {
        match env {
            DynamicEnv::With { object } => {
                if let Some(callee) = get_property(object, name) {
                    return Ok((callee, Value::Object(object.clone())));
                }
            }
            DynamicEnv::Catch {
                name: bound,
                value,
            } if *bound == name => {
                return Ok((value.clone(), Value::Undefined));
            }
            _ => {}
        }
    }
    let callee = lookup_by_name(ctx, frame, block_id, name)?;
    Ok((callee, Value::Undefined))
}

fn invoke(
    ctx: &mut Context,
    callee: &Value,
    this: Value,
    args: &[Value],
    depth: usize,
) -> Result<Value, RuntimeError> {
    let Value::Object(object) = callee else {
        return Err(RuntimeError::TypeError(format!(
            "{} is not a function",
            callee.to_display(&ctx.atoms)
        )));
    };
    enum Callable {
        Function(FunctionData),
        Native(ferret_vm_core::NativeFunction),
    }
    let callable = match &object.borrow().kind {
        ObjectKind::Function(data) => Callable::Function(data.clone()),
        ObjectKind::Native(func) => Callable::Native(*func),
        _ => {
            return Err(RuntimeError::TypeError("value is not a function".into()));
        }
    };
    match callable {
        Callable::Function(data) => {
            run_frame(ctx, data.block, this, args, &data.envs, depth + 1)
        }
        Callable::Native(func) => func(ctx, &this, args),
    }
}

fn construct(
    ctx: &mut Context,
    callee: &Value,
    args: &[Value],
    depth: usize,
) -> Result<Value, RuntimeError> {
    let Value::Object(object) = callee else {
        return Err(RuntimeError::TypeError(format!(
            "{} is not a constructor",
            callee.to_display(&ctx.atoms)
        )));
    };
    if !object.borrow().is_callable() {
        return Err(RuntimeError::TypeError("value is not a constructor".into()));
    }
    let prototype_name = ctx.intern("prototype");
    let prototype = match get_property(object, prototype_name) {
        Some(Value::Object(proto)) => Some(proto),
        _ => None,
    };
    let instance = JsObject::ordinary(prototype);
    let result = invoke(ctx, callee, Value::Object(instance.clone()), args, depth)?;
    Ok(match result {
        value @ Value::Object(_) => value,
        _ => Value::Object(instance),
    })
}
