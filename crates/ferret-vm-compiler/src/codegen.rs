//! Bytecode generation from the oxc AST
//!
//! One generator run produces the bytecode of exactly one code block.
//! Nested functions are not descended into here; they were given their own
//! blocks by scope analysis and compile through `Script::ensure_bytecode`
//! when first needed.

use ferret_vm_bytecode::{Atom, BlockId, Literal, Opcode, Register};
use ferret_vm_core::Context;
use oxc_ast::ast::*;

use crate::emitter::{ByteCodeEmitter, JumpSite};
use crate::error::{CompileError, CompileResult};
use crate::script::{BlockSource, Script};

/// Maximum expression/statement nesting the generator follows
const MAX_GEN_DEPTH: usize = 500;

/// Compile one block of `script` into bytecode
pub(crate) fn generate_block(
    ctx: &mut Context,
    script: &Script<'_>,
    id: BlockId,
) -> CompileResult<()> {
    let source = script
        .sources
        .get(&id)
        .ok_or_else(|| CompileError::internal("code block does not belong to this script"))?;

    let mut generator = ByteCodeGenerator {
        ctx: &mut *ctx,
        script,
        block_id: id,
        e: ByteCodeEmitter::new(),
        dynamic_names: Vec::new(),
        with_depth: 0,
        loops: Vec::new(),
        depth: 0,
    };

    match source {
        BlockSource::Program(program) => {
            generator.gen_prologue()?;
            generator.gen_statements(&program.body)?;
            let result = generator.e.registers.alloc()?;
            generator.e.load_literal(result, Literal::Undefined);
            generator.e.writer.begin(Opcode::End);
            generator.e.writer.register(result);
        }
        BlockSource::Function(func) => {
            let body = func
                .body
                .as_ref()
                .ok_or_else(|| CompileError::unsupported("function without a body"))?;
            generator.gen_prologue()?;
            generator.gen_statements(&body.statements)?;
            generator.e.simple(Opcode::ReturnFunction);
        }
        BlockSource::Arrow(arrow) => {
            generator.gen_prologue()?;
            if arrow.expression {
                let Some(Statement::ExpressionStatement(stmt)) = arrow.body.statements.first()
                else {
                    return Err(CompileError::internal("malformed arrow expression body"));
                };
                let result = generator.gen_expression(&stmt.expression)?;
                generator.e.writer.begin(Opcode::ReturnFunctionWithValue);
                generator.e.writer.register(result);
            } else {
                generator.gen_statements(&arrow.body.statements)?;
                generator.e.simple(Opcode::ReturnFunction);
            }
        }
        BlockSource::DefaultConstructor => {
            generator.e.simple(Opcode::ReturnFunction);
        }
    }

    let bytecode = generator.e.finish();
    ctx.block_mut(id).bytecode = Some(std::rc::Rc::new(bytecode));
    Ok(())
}

struct LoopScope {
    break_sites: Vec<JumpSite>,
    continue_sites: Vec<JumpSite>,
}

enum Resolution {
    Stack(u16),
    Heap(u16, u16),
    Global,
}

struct ByteCodeGenerator<'a, 'c> {
    ctx: &'c mut Context,
    script: &'c Script<'a>,
    block_id: BlockId,
    e: ByteCodeEmitter,
    /// Names bound by enclosing catch clauses; accesses go through the
    /// dynamic environment chain
    dynamic_names: Vec<Atom>,
    with_depth: u32,
    loops: Vec<LoopScope>,
    depth: usize,
}

impl<'a> ByteCodeGenerator<'a, '_> {
    fn enter(&mut self) -> CompileResult<()> {
        self.depth += 1;
        if self.depth > MAX_GEN_DEPTH {
            return Err(CompileError::NestingTooDeep);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Hoisted function declarations are installed before any other code of
    /// the block runs
    fn gen_prologue(&mut self) -> CompileResult<()> {
        let has_declarations = self
            .ctx
            .block(self.block_id)
            .children
            .iter()
            .any(|child| self.ctx.block(*child).flags.is_function_declaration);
        if has_declarations {
            self.e.writer.begin(Opcode::DeclareFunctionDeclarations);
            self.e.writer.block(self.block_id);
        }
        Ok(())
    }

    fn gen_statements(&mut self, statements: &[Statement<'a>]) -> CompileResult<()> {
        for statement in statements {
            self.gen_statement(statement)?;
        }
        Ok(())
    }

    fn gen_statement(&mut self, statement: &Statement<'a>) -> CompileResult<()> {
        self.enter()?;
        let result = self.gen_statement_inner(statement);
        self.leave();
        result
    }

    fn gen_statement_inner(&mut self, statement: &Statement<'a>) -> CompileResult<()> {
        match statement {
            Statement::ExpressionStatement(stmt) => {
                let reg = self.gen_expression(&stmt.expression)?;
                self.e.registers.free(reg);
                Ok(())
            }
            Statement::VariableDeclaration(decl) => self.gen_variable_declaration(decl),
            Statement::FunctionDeclaration(_) => Ok(()), // hoisted by the prologue
            Statement::ClassDeclaration(class) => {
                let value = self.gen_class(class)?;
                if let Some(id) = &class.id {
                    let name = self.ctx.intern(id.name.as_str());
                    self.store_binding(name, value)?;
                }
                self.e.registers.free(value);
                Ok(())
            }
            Statement::ReturnStatement(stmt) => {
                if let Some(argument) = &stmt.argument {
                    let reg = self.gen_expression(argument)?;
                    self.e.writer.begin(Opcode::ReturnFunctionWithValue);
                    self.e.writer.register(reg);
                    self.e.registers.free(reg);
                } else {
                    self.e.simple(Opcode::ReturnFunction);
                }
                Ok(())
            }
            Statement::BlockStatement(block) => self.gen_statements(&block.body),
            Statement::IfStatement(stmt) => self.gen_if(stmt),
            Statement::WhileStatement(stmt) => self.gen_while(stmt),
            Statement::ForStatement(stmt) => self.gen_for(stmt),
            Statement::TryStatement(stmt) => self.gen_try(stmt),
            Statement::ThrowStatement(stmt) => {
                let reg = self.gen_expression(&stmt.argument)?;
                self.e.writer.begin(Opcode::ThrowOperation);
                self.e.writer.register(reg);
                self.e.registers.free(reg);
                Ok(())
            }
            Statement::WithStatement(stmt) => self.gen_with(stmt),
            Statement::BreakStatement(stmt) => {
                if stmt.label.is_some() {
                    return Err(CompileError::unsupported("labeled break"));
                }
                let site = self.e.jump();
                match self.loops.last_mut() {
                    Some(scope) => scope.break_sites.push(site),
                    None => return Err(CompileError::unsupported("break outside of a loop")),
                }
                Ok(())
            }
            Statement::ContinueStatement(stmt) => {
                if stmt.label.is_some() {
                    return Err(CompileError::unsupported("labeled continue"));
                }
                let site = self.e.jump();
                match self.loops.last_mut() {
                    Some(scope) => scope.continue_sites.push(site),
                    None => return Err(CompileError::unsupported("continue outside of a loop")),
                }
                Ok(())
            }
            Statement::EmptyStatement(_) | Statement::DebuggerStatement(_) => Ok(()),
            _ => Err(CompileError::unsupported("this statement form")),
        }
    }

    fn gen_variable_declaration(&mut self, decl: &VariableDeclaration<'a>) -> CompileResult<()> {
        for declarator in &decl.declarations {
            let BindingPatternKind::BindingIdentifier(ident) = &declarator.id.kind else {
                return Err(CompileError::unsupported("destructuring patterns"));
            };
            let name = self.ctx.intern(ident.name.as_str());
            if let Some(init) = &declarator.init {
                let value = self.gen_expression(init)?;
                self.store_binding(name, value)?;
                self.e.registers.free(value);
            }
        }
        Ok(())
    }

    fn gen_if(&mut self, stmt: &IfStatement<'a>) -> CompileResult<()> {
        let cond = self.gen_expression(&stmt.test)?;
        let to_else = self.e.jump_if_false(cond);
        self.e.registers.free(cond);
        self.gen_statement(&stmt.consequent)?;
        if let Some(alternate) = &stmt.alternate {
            let to_end = self.e.jump();
            let here = self.e.here();
            self.e.patch(to_else, here);
            self.gen_statement(alternate)?;
            let here = self.e.here();
            self.e.patch(to_end, here);
        } else {
            let here = self.e.here();
            self.e.patch(to_else, here);
        }
        Ok(())
    }

    fn gen_while(&mut self, stmt: &WhileStatement<'a>) -> CompileResult<()> {
        let head = self.e.here();
        let cond = self.gen_expression(&stmt.test)?;
        let to_end = self.e.jump_if_false(cond);
        self.e.registers.free(cond);

        self.loops.push(LoopScope {
            break_sites: Vec::new(),
            continue_sites: Vec::new(),
        });
        self.gen_statement(&stmt.body)?;
        let back = self.e.jump();
        self.e.patch(back, head);

        let end = self.e.here();
        self.e.patch(to_end, end);
        let scope = self.loops.pop().expect("loop scope pushed above");
        for site in scope.break_sites {
            self.e.patch(site, end);
        }
        for site in scope.continue_sites {
            self.e.patch(site, head);
        }
        Ok(())
    }

    fn gen_for(&mut self, stmt: &ForStatement<'a>) -> CompileResult<()> {
        match &stmt.init {
            Some(ForStatementInit::VariableDeclaration(decl)) => {
                self.gen_variable_declaration(decl)?;
            }
            Some(init) => {
                if let Some(expr) = init.as_expression() {
                    let reg = self.gen_expression(expr)?;
                    self.e.registers.free(reg);
                }
            }
            None => {}
        }

        let head = self.e.here();
        let to_end = match &stmt.test {
            Some(test) => {
                let cond = self.gen_expression(test)?;
                let site = self.e.jump_if_false(cond);
                self.e.registers.free(cond);
                Some(site)
            }
            None => None,
        };

        self.loops.push(LoopScope {
            break_sites: Vec::new(),
            continue_sites: Vec::new(),
        });
        self.gen_statement(&stmt.body)?;

        let update_pos = self.e.here();
        if let Some(update) = &stmt.update {
            let reg = self.gen_expression(update)?;
            self.e.registers.free(reg);
        }
        let back = self.e.jump();
        self.e.patch(back, head);

        let end = self.e.here();
        if let Some(site) = to_end {
            self.e.patch(site, end);
        }
        let scope = self.loops.pop().expect("loop scope pushed above");
        for site in scope.break_sites {
            self.e.patch(site, end);
        }
        for site in scope.continue_sites {
            self.e.patch(site, update_pos);
        }
        Ok(())
    }

    fn gen_try(&mut self, stmt: &TryStatement<'a>) -> CompileResult<()> {
        if stmt.finalizer.is_some() {
            return Err(CompileError::unsupported("finally clauses"));
        }
        let handler = stmt
            .handler
            .as_ref()
            .ok_or_else(|| CompileError::unsupported("try without catch"))?;
        let catch_name = match &handler.param {
            Some(param) => match &param.pattern.kind {
                BindingPatternKind::BindingIdentifier(ident) => {
                    self.ctx.intern(ident.name.as_str())
                }
                _ => return Err(CompileError::unsupported("destructuring catch bindings")),
            },
            None => Atom::EMPTY,
        };

        let (catch_site, end_site) = self.e.try_operation(catch_name);
        self.gen_statements(&stmt.block.body)?;
        self.e.simple(Opcode::EndTryOperation);
        let after_try = self.e.jump();

        let catch_pos = self.e.here();
        self.e.patch(catch_site, catch_pos);
        self.dynamic_names.push(catch_name);
        let result = self.gen_statements(&handler.body.body);
        self.dynamic_names.pop();
        result?;
        self.e.simple(Opcode::CloseEnvironment);

        let end = self.e.here();
        self.e.patch(end_site, end);
        self.e.patch(after_try, end);
        Ok(())
    }

    fn gen_with(&mut self, stmt: &WithStatement<'a>) -> CompileResult<()> {
        let object = self.gen_expression(&stmt.object)?;
        self.e.writer.begin(Opcode::OpenWithEnvironment);
        self.e.writer.register(object);
        self.e.registers.free(object);
        self.with_depth += 1;
        let result = self.gen_statement(&stmt.body);
        self.with_depth -= 1;
        result?;
        self.e.simple(Opcode::CloseEnvironment);
        Ok(())
    }

    fn gen_expression(&mut self, expression: &Expression<'a>) -> CompileResult<Register> {
        self.enter()?;
        let result = self.gen_expression_inner(expression);
        self.leave();
        result
    }

    fn gen_expression_inner(&mut self, expression: &Expression<'a>) -> CompileResult<Register> {
        match expression {
            Expression::NumericLiteral(lit) => {
                let dst = self.e.registers.alloc()?;
                self.e.load_literal(dst, Literal::number(lit.value));
                Ok(dst)
            }
            Expression::StringLiteral(lit) => {
                let atom = self.ctx.intern(lit.value.as_str());
                let dst = self.e.registers.alloc()?;
                self.e.load_literal(dst, Literal::String(atom));
                Ok(dst)
            }
            Expression::BooleanLiteral(lit) => {
                let dst = self.e.registers.alloc()?;
                self.e.load_literal(dst, Literal::Bool(lit.value));
                Ok(dst)
            }
            Expression::NullLiteral(_) => {
                let dst = self.e.registers.alloc()?;
                self.e.load_literal(dst, Literal::Null);
                Ok(dst)
            }
            Expression::RegExpLiteral(lit) => self.gen_regexp(lit.span),
            Expression::Identifier(ident) => {
                if ident.name.as_str() == "undefined" {
                    let dst = self.e.registers.alloc()?;
                    self.e.load_literal(dst, Literal::Undefined);
                    return Ok(dst);
                }
                let name = self.ctx.intern(ident.name.as_str());
                self.load_binding(name)
            }
            Expression::ThisExpression(_) => {
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::LoadThis);
                self.e.writer.register(dst);
                Ok(dst)
            }
            Expression::ObjectExpression(expr) => self.gen_object_literal(expr),
            Expression::BinaryExpression(expr) => self.gen_binary(expr),
            Expression::LogicalExpression(expr) => self.gen_logical(expr),
            Expression::UnaryExpression(expr) => self.gen_unary(expr),
            Expression::UpdateExpression(expr) => self.gen_update(expr),
            Expression::AssignmentExpression(expr) => self.gen_assignment(expr),
            Expression::ConditionalExpression(expr) => self.gen_conditional(expr),
            Expression::CallExpression(call) => self.gen_call(call),
            Expression::NewExpression(new_expr) => self.gen_new(new_expr),
            Expression::StaticMemberExpression(member) => {
                let object = self.gen_expression(&member.object)?;
                let name = self.ctx.intern(member.property.name.as_str());
                let dst = self.e.registers.alloc()?;
                self.e.get_object_precomputed(object, dst, name);
                self.e.registers.free(object);
                Ok(dst)
            }
            Expression::ComputedMemberExpression(member) => {
                let object = self.gen_expression(&member.object)?;
                let property = self.gen_expression(&member.expression)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::GetObject);
                self.e.writer.register(object);
                self.e.writer.register(property);
                self.e.writer.register(dst);
                self.e.registers.free(property);
                self.e.registers.free(object);
                Ok(dst)
            }
            Expression::FunctionExpression(func) => {
                let block = self.script.block_for_span(func.span.start)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::CreateFunction);
                self.e.writer.register(dst);
                self.e.writer.block(block);
                Ok(dst)
            }
            Expression::ArrowFunctionExpression(arrow) => {
                let block = self.script.block_for_span(arrow.span.start)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::CreateFunction);
                self.e.writer.register(dst);
                self.e.writer.block(block);
                Ok(dst)
            }
            Expression::ClassExpression(class) => self.gen_class(class),
            Expression::ParenthesizedExpression(expr) => self.gen_expression(&expr.expression),
            Expression::SequenceExpression(seq) => {
                let mut last = None;
                for expr in &seq.expressions {
                    if let Some(reg) = last.take() {
                        self.e.registers.free(reg);
                    }
                    last = Some(self.gen_expression(expr)?);
                }
                last.ok_or_else(|| CompileError::internal("empty sequence expression"))
            }
            _ => Err(CompileError::unsupported("this expression form")),
        }
    }

    fn gen_object_literal(&mut self, expr: &ObjectExpression<'a>) -> CompileResult<Register> {
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(Opcode::CreateObject);
        self.e.writer.register(dst);
        for property in &expr.properties {
            let ObjectPropertyKind::ObjectProperty(property) = property else {
                return Err(CompileError::unsupported("spread properties"));
            };
            let name = match &property.key {
                PropertyKey::StaticIdentifier(ident) => self.ctx.intern(ident.name.as_str()),
                PropertyKey::StringLiteral(lit) => self.ctx.intern(lit.value.as_str()),
                _ => return Err(CompileError::unsupported("computed property names")),
            };
            let value = self.gen_expression(&property.value)?;
            self.e.writer.begin(Opcode::ObjectDefineOwnPropertyWithNameOperation);
            self.e.writer.register(dst);
            self.e.writer.register(value);
            self.e.atom_operand(name);
            self.e.registers.free(value);
        }
        Ok(dst)
    }

    fn gen_binary(&mut self, expr: &BinaryExpression<'a>) -> CompileResult<Register> {
        let op = match expr.operator {
            BinaryOperator::Addition => Opcode::BinaryPlus,
            BinaryOperator::Subtraction => Opcode::BinaryMinus,
            BinaryOperator::Multiplication => Opcode::BinaryMultiply,
            BinaryOperator::Division => Opcode::BinaryDivision,
            BinaryOperator::Remainder => Opcode::BinaryMod,
            BinaryOperator::Equality => Opcode::BinaryEqual,
            BinaryOperator::Inequality => Opcode::BinaryNotEqual,
            BinaryOperator::StrictEquality => Opcode::BinaryStrictEqual,
            BinaryOperator::StrictInequality => Opcode::BinaryStrictNotEqual,
            BinaryOperator::LessThan => Opcode::BinaryLessThan,
            BinaryOperator::LessEqualThan => Opcode::BinaryLessThanOrEqual,
            BinaryOperator::GreaterThan => Opcode::BinaryGreaterThan,
            BinaryOperator::GreaterEqualThan => Opcode::BinaryGreaterThanOrEqual,
            _ => return Err(CompileError::unsupported("this binary operator")),
        };
        let lhs = self.gen_expression(&expr.left)?;
        let rhs = self.gen_expression(&expr.right)?;
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(op);
        self.e.writer.register(lhs);
        self.e.writer.register(rhs);
        self.e.writer.register(dst);
        self.e.registers.free(rhs);
        self.e.registers.free(lhs);
        Ok(dst)
    }

    fn gen_logical(&mut self, expr: &LogicalExpression<'a>) -> CompileResult<Register> {
        let dst = self.e.registers.alloc()?;
        let lhs = self.gen_expression(&expr.left)?;
        self.emit_move(lhs, dst);
        self.e.registers.free(lhs);
        let skip = match expr.operator {
            LogicalOperator::And => self.e.jump_if_false(dst),
            LogicalOperator::Or => self.e.jump_if_true(dst),
            LogicalOperator::Coalesce => {
                return Err(CompileError::unsupported("nullish coalescing"))
            }
        };
        let rhs = self.gen_expression(&expr.right)?;
        self.emit_move(rhs, dst);
        self.e.registers.free(rhs);
        let here = self.e.here();
        self.e.patch(skip, here);
        Ok(dst)
    }

    fn gen_unary(&mut self, expr: &UnaryExpression<'a>) -> CompileResult<Register> {
        match expr.operator {
            UnaryOperator::UnaryNegation => {
                let src = self.gen_expression(&expr.argument)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::UnaryMinus);
                self.e.writer.register(src);
                self.e.writer.register(dst);
                self.e.registers.free(src);
                Ok(dst)
            }
            UnaryOperator::LogicalNot => {
                let src = self.gen_expression(&expr.argument)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::UnaryNot);
                self.e.writer.register(src);
                self.e.writer.register(dst);
                self.e.registers.free(src);
                Ok(dst)
            }
            UnaryOperator::Typeof => {
                let dst = self.e.registers.alloc()?;
                if let Expression::Identifier(ident) = &expr.argument {
                    let name = self.ctx.intern(ident.name.as_str());
                    self.e.writer.begin(Opcode::UnaryTypeof);
                    self.e.writer.register(Register::NONE);
                    self.e.writer.register(dst);
                    self.e.name_operand(name);
                } else {
                    let src = self.gen_expression(&expr.argument)?;
                    self.e.writer.begin(Opcode::UnaryTypeof);
                    self.e.writer.register(src);
                    self.e.writer.register(dst);
                    self.e.name_operand(Atom::EMPTY);
                    self.e.registers.free(src);
                }
                Ok(dst)
            }
            UnaryOperator::Delete => {
                let dst = self.e.registers.alloc()?;
                match &expr.argument {
                    Expression::StaticMemberExpression(member) => {
                        let object = self.gen_expression(&member.object)?;
                        let name = self.ctx.intern(member.property.name.as_str());
                        self.e.writer.begin(Opcode::UnaryDelete);
                        self.e.writer.register(object);
                        self.e.writer.register(dst);
                        self.e.name_operand(name);
                        self.e.registers.free(object);
                    }
                    Expression::Identifier(ident) => {
                        let name = self.ctx.intern(ident.name.as_str());
                        self.e.writer.begin(Opcode::UnaryDelete);
                        self.e.writer.register(Register::NONE);
                        self.e.writer.register(dst);
                        self.e.name_operand(name);
                    }
                    other => {
                        // `delete` of a non-reference evaluates the operand
                        // and yields true.
                        let reg = self.gen_expression(other)?;
                        self.e.registers.free(reg);
                        self.e.load_literal(dst, Literal::Bool(true));
                    }
                }
                Ok(dst)
            }
            UnaryOperator::Void => {
                let reg = self.gen_expression(&expr.argument)?;
                self.e.registers.free(reg);
                let dst = self.e.registers.alloc()?;
                self.e.load_literal(dst, Literal::Undefined);
                Ok(dst)
            }
            _ => Err(CompileError::unsupported("this unary operator")),
        }
    }

    fn gen_update(&mut self, expr: &UpdateExpression<'a>) -> CompileResult<Register> {
        let SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) = &expr.argument else {
            return Err(CompileError::unsupported("update of a member expression"));
        };
        let name = self.ctx.intern(ident.name.as_str());
        let current = self.load_binding(name)?;
        let updated = self.e.registers.alloc()?;
        let op = match expr.operator {
            UpdateOperator::Increment => Opcode::Increment,
            UpdateOperator::Decrement => Opcode::Decrement,
        };
        self.e.writer.begin(op);
        self.e.writer.register(current);
        self.e.writer.register(updated);
        self.store_binding(name, updated)?;
        if expr.prefix {
            self.e.registers.free(current);
            Ok(updated)
        } else {
            self.e.registers.free(updated);
            Ok(current)
        }
    }

    fn gen_assignment(&mut self, expr: &AssignmentExpression<'a>) -> CompileResult<Register> {
        match expr.operator {
            AssignmentOperator::Assign => {
                let value = self.gen_expression(&expr.right)?;
                self.store_target(&expr.left, value)?;
                Ok(value)
            }
            AssignmentOperator::Addition
            | AssignmentOperator::Subtraction
            | AssignmentOperator::Multiplication
            | AssignmentOperator::Division => {
                let op = match expr.operator {
                    AssignmentOperator::Addition => Opcode::BinaryPlus,
                    AssignmentOperator::Subtraction => Opcode::BinaryMinus,
                    AssignmentOperator::Multiplication => Opcode::BinaryMultiply,
                    _ => Opcode::BinaryDivision,
                };
                let current = self.load_target(&expr.left)?;
                let rhs = self.gen_expression(&expr.right)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(op);
                self.e.writer.register(current);
                self.e.writer.register(rhs);
                self.e.writer.register(dst);
                self.e.registers.free(rhs);
                self.e.registers.free(current);
                self.store_target(&expr.left, dst)?;
                Ok(dst)
            }
            _ => Err(CompileError::unsupported("this assignment operator")),
        }
    }

    fn load_target(&mut self, target: &AssignmentTarget<'a>) -> CompileResult<Register> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.ctx.intern(ident.name.as_str());
                self.load_binding(name)
            }
            _ => Err(CompileError::unsupported("compound member assignment")),
        }
    }

    fn store_target(
        &mut self,
        target: &AssignmentTarget<'a>,
        value: Register,
    ) -> CompileResult<()> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.ctx.intern(ident.name.as_str());
                self.store_binding(name, value)
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                let object = self.gen_expression(&member.object)?;
                let name = self.ctx.intern(member.property.name.as_str());
                self.e.set_object_precomputed(object, value, name);
                self.e.registers.free(object);
                Ok(())
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.gen_expression(&member.object)?;
                let property = self.gen_expression(&member.expression)?;
                self.e.writer.begin(Opcode::SetObject);
                self.e.writer.register(object);
                self.e.writer.register(property);
                self.e.writer.register(value);
                self.e.registers.free(property);
                self.e.registers.free(object);
                Ok(())
            }
            _ => Err(CompileError::unsupported("destructuring assignment")),
        }
    }

    fn gen_conditional(&mut self, expr: &ConditionalExpression<'a>) -> CompileResult<Register> {
        let cond = self.gen_expression(&expr.test)?;
        let to_else = self.e.jump_if_false(cond);
        self.e.registers.free(cond);
        let dst = self.e.registers.alloc()?;
        let consequent = self.gen_expression(&expr.consequent)?;
        self.emit_move(consequent, dst);
        self.e.registers.free(consequent);
        let to_end = self.e.jump();
        let here = self.e.here();
        self.e.patch(to_else, here);
        let alternate = self.gen_expression(&expr.alternate)?;
        self.emit_move(alternate, dst);
        self.e.registers.free(alternate);
        let here = self.e.here();
        self.e.patch(to_end, here);
        Ok(dst)
    }

    fn gen_call(&mut self, call: &CallExpression<'a>) -> CompileResult<Register> {
        if call.optional {
            return Err(CompileError::unsupported("optional calls"));
        }
        // Inside `with`, a bare-name call resolves its callee (and receiver)
        // through the dynamic environment chain at run time.
        if self.with_depth > 0 {
            if let Expression::Identifier(ident) = &call.callee {
                let name = self.ctx.intern(ident.name.as_str());
                let (argv, argc) = self.gen_arguments(&call.arguments)?;
                let dst = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::CallFunctionInWithScope);
                self.e.atom_operand(name);
                self.e.writer.register(argv);
                self.e.writer.index(argc);
                self.e.writer.register(dst);
                self.free_arguments(argv, argc);
                return Ok(dst);
            }
        }

        let (receiver, callee) = match &call.callee {
            Expression::StaticMemberExpression(member) => {
                let receiver = self.gen_expression(&member.object)?;
                let name = self.ctx.intern(member.property.name.as_str());
                let callee = self.e.registers.alloc()?;
                self.e.get_object_precomputed(receiver, callee, name);
                (receiver, callee)
            }
            Expression::ComputedMemberExpression(member) => {
                let receiver = self.gen_expression(&member.object)?;
                let property = self.gen_expression(&member.expression)?;
                let callee = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::GetObject);
                self.e.writer.register(receiver);
                self.e.writer.register(property);
                self.e.writer.register(callee);
                self.e.registers.free(property);
                (receiver, callee)
            }
            other => (Register::NONE, self.gen_expression(other)?),
        };

        let (argv, argc) = self.gen_arguments(&call.arguments)?;
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(Opcode::CallFunction);
        self.e.writer.register(receiver);
        self.e.writer.register(callee);
        self.e.writer.register(argv);
        self.e.writer.index(argc);
        self.e.writer.register(dst);
        self.free_arguments(argv, argc);
        self.e.registers.free(callee);
        if !receiver.is_none() {
            self.e.registers.free(receiver);
        }
        Ok(dst)
    }

    fn gen_new(&mut self, new_expr: &NewExpression<'a>) -> CompileResult<Register> {
        let callee = self.gen_expression(&new_expr.callee)?;
        let (argv, argc) = self.gen_arguments(&new_expr.arguments)?;
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(Opcode::NewOperation);
        self.e.writer.register(callee);
        self.e.writer.register(argv);
        self.e.writer.index(argc);
        self.e.writer.register(dst);
        self.free_arguments(argv, argc);
        self.e.registers.free(callee);
        Ok(dst)
    }

    /// Evaluate arguments into a fresh contiguous register range
    fn gen_arguments(&mut self, arguments: &[Argument<'a>]) -> CompileResult<(Register, u16)> {
        let argc = u16::try_from(arguments.len())
            .map_err(|_| CompileError::unsupported("more than 65534 arguments"))?;
        let argv = self.e.registers.alloc_range(argc)?;
        for (position, argument) in arguments.iter().enumerate() {
            let expr = argument
                .as_expression()
                .ok_or_else(|| CompileError::unsupported("spread arguments"))?;
            let value = self.gen_expression(expr)?;
            self.emit_move(value, Register(argv.0 + position as u16));
            self.e.registers.free(value);
        }
        Ok((argv, argc))
    }

    fn free_arguments(&mut self, argv: Register, argc: u16) {
        for position in 0..argc {
            self.e.registers.free(Register(argv.0 + position));
        }
    }

    fn gen_class(&mut self, class: &Class<'a>) -> CompileResult<Register> {
        let constructor_block = self.script.block_for_span(class.span.start)?;
        let name = match &class.id {
            Some(id) => self.ctx.intern(id.name.as_str()),
            None => Atom::EMPTY,
        };
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(Opcode::CreateClass);
        self.e.writer.register(dst);
        self.e.name_operand(name);
        self.e.writer.block(constructor_block);

        let mut methods = Vec::new();
        for element in &class.body.body {
            let ClassElement::MethodDefinition(method) = element else {
                return Err(CompileError::unsupported("non-method class members"));
            };
            if matches!(method.kind, MethodDefinitionKind::Constructor) {
                continue;
            }
            let method_name = match &method.key {
                PropertyKey::StaticIdentifier(ident) => self.ctx.intern(ident.name.as_str()),
                PropertyKey::StringLiteral(lit) => self.ctx.intern(lit.value.as_str()),
                _ => return Err(CompileError::unsupported("computed method names")),
            };
            let block = self.script.block_for_span(method.value.span.start)?;
            methods.push((method_name, block, method.r#static));
        }

        if !methods.is_empty() {
            let prototype_name = self.ctx.intern("prototype");
            let prototype = self.e.registers.alloc()?;
            self.e.get_object_precomputed(dst, prototype, prototype_name);
            for (method_name, block, is_static) in methods {
                let method_reg = self.e.registers.alloc()?;
                self.e.writer.begin(Opcode::CreateFunction);
                self.e.writer.register(method_reg);
                self.e.writer.block(block);
                let target = if is_static { dst } else { prototype };
                self.e.writer.begin(Opcode::ObjectDefineOwnPropertyWithNameOperation);
                self.e.writer.register(target);
                self.e.writer.register(method_reg);
                self.e.atom_operand(method_name);
                self.e.registers.free(method_reg);
            }
            self.e.registers.free(prototype);
        }
        Ok(dst)
    }

    fn gen_regexp(&mut self, span: oxc_span::Span) -> CompileResult<Register> {
        let text = &self.script.source_text[span.start as usize..span.end as usize];
        let closing = text
            .rfind('/')
            .ok_or_else(|| CompileError::internal("malformed regex literal"))?;
        let body = self.ctx.intern(&text[1..closing]);
        let option = self.ctx.intern(&text[closing + 1..]);
        let dst = self.e.registers.alloc()?;
        self.e.writer.begin(Opcode::LoadRegexp);
        self.e.writer.register(dst);
        self.e.atom_operand(body);
        self.e.name_operand(option);
        Ok(dst)
    }

    fn emit_move(&mut self, src: Register, dst: Register) {
        self.e.writer.begin(Opcode::Move);
        self.e.writer.register(src);
        self.e.writer.register(dst);
    }

    // ---- identifier access -------------------------------------------------

    fn is_dynamic(&self, name: Atom) -> bool {
        self.with_depth > 0 || self.dynamic_names.contains(&name)
    }

    fn resolve(&self, name: Atom) -> CompileResult<Resolution> {
        let mut current = self.block_id;
        let mut hops: u16 = 0;
        loop {
            let block = self.ctx.block(current);
            if block.is_global() {
                return Ok(Resolution::Global);
            }
            if let Some(ident) = block.find_identifier(name) {
                return if ident.needs_stack_slot {
                    if hops == 0 {
                        Ok(Resolution::Stack(ident.stored_index))
                    } else {
                        Err(CompileError::internal(
                            "captured identifier was not promoted to the heap",
                        ))
                    }
                } else {
                    Ok(Resolution::Heap(hops, ident.stored_index))
                };
            }
            current = block
                .parent
                .ok_or_else(|| CompileError::internal("non-global block without a parent"))?;
            hops += 1;
        }
    }

    fn load_binding(&mut self, name: Atom) -> CompileResult<Register> {
        let dst = self.e.registers.alloc()?;
        if self.is_dynamic(name) {
            self.e.writer.begin(Opcode::LoadByName);
            self.e.writer.register(dst);
            self.e.atom_operand(name);
            return Ok(dst);
        }
        match self.resolve(name)? {
            Resolution::Stack(slot) => {
                self.e.writer.begin(Opcode::LoadByStackIndex);
                self.e.writer.register(dst);
                self.e.writer.index(slot);
            }
            Resolution::Heap(upper, slot) => {
                self.e.writer.begin(Opcode::LoadByHeapIndex);
                self.e.writer.register(dst);
                self.e.writer.index(upper);
                self.e.writer.index(slot);
            }
            Resolution::Global => {
                self.e.writer.begin(Opcode::GetGlobalVariable);
                self.e.writer.register(dst);
                self.e.atom_operand(name);
            }
        }
        Ok(dst)
    }

    fn store_binding(&mut self, name: Atom, src: Register) -> CompileResult<()> {
        if self.is_dynamic(name) {
            self.e.writer.begin(Opcode::StoreByName);
            self.e.writer.register(src);
            self.e.atom_operand(name);
            return Ok(());
        }
        match self.resolve(name)? {
            Resolution::Stack(slot) => {
                self.e.writer.begin(Opcode::StoreByStackIndex);
                self.e.writer.register(src);
                self.e.writer.index(slot);
            }
            Resolution::Heap(upper, slot) => {
                self.e.writer.begin(Opcode::StoreByHeapIndex);
                self.e.writer.register(src);
                self.e.writer.index(upper);
                self.e.writer.index(slot);
            }
            Resolution::Global => {
                self.e.writer.begin(Opcode::SetGlobalVariable);
                self.e.writer.register(src);
                self.e.atom_operand(name);
            }
        }
        Ok(())
    }
}
