//! Script parsing and scope analysis
//!
//! Parses with oxc and builds the code-block tree: one block per function
//! body (and per class constructor, synthesized when absent), parents
//! created before children. Scope analysis classifies every declared
//! identifier as stack- or heap-resident — an identifier referenced by any
//! nested function is promoted to the heap environment — and computes the
//! block's scope flags.

use ferret_vm_bytecode::Atom;
use ferret_vm_core::{
    CodeBlock, Context, IdentifierDeclaration, ParameterDeclaration,
};
use ferret_vm_bytecode::BlockId;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{SourceType, Span};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{CompileError, CompileResult};
use crate::script::{BlockSource, Script};

/// Maximum AST nesting depth the analyzer follows
const MAX_NESTING_DEPTH: usize = 500;

/// Parser entry points
pub struct ScriptParser;

impl ScriptParser {
    /// Parse `source_text` and build the script's code-block tree
    ///
    /// The top-level block is compiled eagerly; function bodies stay
    /// deferred until [`Script::ensure_bytecode`] asks for them.
    pub fn initialize_script<'a>(
        ctx: &mut Context,
        allocator: &'a Allocator,
        source_text: &'a str,
        _filename: &str,
    ) -> CompileResult<Script<'a>> {
        let parsed = Parser::new(allocator, source_text, SourceType::cjs()).parse();
        if let Some(error) = parsed.errors.first() {
            return Err(CompileError::Parse(error.to_string()));
        }
        let program: &'a Program<'a> = allocator.alloc(parsed.program);

        let mut builder = ScopeBuilder {
            ctx: &mut *ctx,
            source_text,
            sources: FxHashMap::default(),
            span_to_block: FxHashMap::default(),
            order: Vec::new(),
            depth: 0,
        };
        let root = builder.build_program(program)?;

        let script = Script {
            root,
            source_text,
            sources: builder.sources,
            span_to_block: builder.span_to_block,
            order: builder.order,
        };
        script.ensure_bytecode(ctx, root)?;
        Ok(script)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Param,
    Var,
    Function,
    Let,
    Const,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Declaration,
    Expression,
    Arrow,
    Method,
    ClassConstructor,
}

enum FnSource<'a> {
    Function(&'a Function<'a>),
    Arrow(&'a ArrowFunctionExpression<'a>),
    DefaultConstructor,
}

/// Accumulated facts about one function scope while its body is scanned
#[derive(Default)]
struct FunctionScope {
    declared: Vec<(Atom, DeclKind)>,
    referenced: FxHashSet<Atom>,
    captured: FxHashSet<Atom>,
    references_this: bool,
    has_eval: bool,
    has_with: bool,
    has_catch: bool,
    uses_arguments: bool,
    block_depth: u32,
}

impl FunctionScope {
    fn declare(&mut self, name: Atom, kind: DeclKind) {
        if !self.declared.iter().any(|(existing, _)| *existing == name) {
            self.declared.push((name, kind));
        }
    }

    /// Names this function needs from enclosing scopes
    fn free_names(&self) -> FxHashSet<Atom> {
        let mut free: FxHashSet<Atom> =
            self.referenced.union(&self.captured).copied().collect();
        for (name, _) in &self.declared {
            free.remove(name);
        }
        free
    }
}

struct ScopeBuilder<'a, 'c> {
    ctx: &'c mut Context,
    source_text: &'a str,
    sources: FxHashMap<BlockId, BlockSource<'a>>,
    span_to_block: FxHashMap<u32, BlockId>,
    order: Vec<BlockId>,
    depth: usize,
}

impl<'a> ScopeBuilder<'a, '_> {
    fn build_program(&mut self, program: &'a Program<'a>) -> CompileResult<BlockId> {
        let root = self.ctx.add_block(CodeBlock::new(None, Atom::EMPTY));
        self.order.push(root);
        self.sources.insert(root, BlockSource::Program(program));

        let is_strict = program
            .directives
            .iter()
            .any(|d| d.directive.as_str() == "use strict");

        let mut scope = FunctionScope::default();
        self.scan_statements(&mut scope, root, &program.body)?;

        let block = self.ctx.block_mut(root);
        block.source = self.source_text.to_string();
        block.flags.is_strict = is_strict;
        // Top-level bindings live on the global object, not in frame slots.
        block.flags.can_use_indexed_variable_storage = false;
        block.flags.can_allocate_environment_on_stack = true;
        block.flags.has_eval = scope.has_eval;
        block.flags.has_with = scope.has_with;
        block.flags.has_catch = scope.has_catch;
        block.flags.uses_arguments_object = scope.uses_arguments;
        block.flags.need_to_load_this_value = scope.references_this;
        block.identifiers = scope
            .declared
            .iter()
            .map(|(name, kind)| IdentifierDeclaration {
                name: *name,
                needs_stack_slot: false,
                is_mutable: *kind != DeclKind::Const,
                is_explicitly_declared_or_parameter: true,
                stored_index: 0,
            })
            .collect();
        Ok(root)
    }

    /// Build the block for one function-like construct and scan its body.
    ///
    /// `span_key` is the span offset code generation will look the block up
    /// by: the function's own span, or the whole class's span for a
    /// constructor. Returns the block and its free names.
    #[allow(clippy::too_many_arguments)]
    fn build_function(
        &mut self,
        parent: BlockId,
        name: Atom,
        kind: FnKind,
        source: FnSource<'a>,
        span: Span,
        span_key: u32,
        lexical_depth: u32,
    ) -> CompileResult<(BlockId, FxHashSet<Atom>)> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CompileError::NestingTooDeep);
        }
        let result = self.build_function_inner(parent, name, kind, source, span, span_key, lexical_depth);
        self.depth -= 1;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn build_function_inner(
        &mut self,
        parent: BlockId,
        name: Atom,
        kind: FnKind,
        source: FnSource<'a>,
        span: Span,
        span_key: u32,
        lexical_depth: u32,
    ) -> CompileResult<(BlockId, FxHashSet<Atom>)> {
        let parent_strict = self.ctx.block(parent).flags.is_strict;
        let id = self.ctx.add_block(CodeBlock::new(Some(parent), name));
        self.ctx.block_mut(parent).children.push(id);
        self.order.push(id);
        self.span_to_block.insert(span_key, id);

        let mut scope = FunctionScope::default();
        let mut param_names: Vec<Atom> = Vec::new();
        let mut body_strict = false;

        match &source {
            FnSource::Function(func) => {
                if func.generator || func.r#async {
                    return Err(CompileError::unsupported(
                        "generator and async functions",
                    ));
                }
                if func.params.rest.is_some() {
                    return Err(CompileError::unsupported("rest parameters"));
                }
                for param in &func.params.items {
                    param_names.push(self.binding_name(&param.pattern)?);
                }
                let body = func
                    .body
                    .as_ref()
                    .ok_or_else(|| CompileError::unsupported("function without a body"))?;
                body_strict = body
                    .directives
                    .iter()
                    .any(|d| d.directive.as_str() == "use strict");
                for name in &param_names {
                    scope.declare(*name, DeclKind::Param);
                }
                self.scan_statements(&mut scope, id, &body.statements)?;
            }
            FnSource::Arrow(arrow) => {
                if arrow.r#async {
                    return Err(CompileError::unsupported("async arrow functions"));
                }
                if arrow.params.rest.is_some() {
                    return Err(CompileError::unsupported("rest parameters"));
                }
                for param in &arrow.params.items {
                    param_names.push(self.binding_name(&param.pattern)?);
                }
                for name in &param_names {
                    scope.declare(*name, DeclKind::Param);
                }
                self.scan_statements(&mut scope, id, &arrow.body.statements)?;
            }
            FnSource::DefaultConstructor => {}
        }

        self.sources.insert(
            id,
            match source {
                FnSource::Function(func) => BlockSource::Function(func),
                FnSource::Arrow(arrow) => BlockSource::Arrow(arrow),
                FnSource::DefaultConstructor => BlockSource::DefaultConstructor,
            },
        );

        let free = scope.free_names();
        self.finalize_function(
            id,
            kind,
            &scope,
            &param_names,
            parent_strict || body_strict,
            span,
            lexical_depth,
        );
        Ok((id, free))
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize_function(
        &mut self,
        id: BlockId,
        kind: FnKind,
        scope: &FunctionScope,
        param_names: &[Atom],
        is_strict: bool,
        span: Span,
        lexical_depth: u32,
    ) {
        let mut identifiers = Vec::with_capacity(scope.declared.len());
        let mut stack_count: u16 = 0;
        let mut heap_count: u16 = 0;
        for (name, decl_kind) in &scope.declared {
            let on_heap = scope.captured.contains(name);
            let stored_index = if on_heap {
                let index = heap_count;
                heap_count += 1;
                index
            } else {
                // Stack slot 0 is `this`; identifiers start at 1.
                stack_count += 1;
                stack_count
            };
            identifiers.push(IdentifierDeclaration {
                name: *name,
                needs_stack_slot: !on_heap,
                is_mutable: *decl_kind != DeclKind::Const,
                is_explicitly_declared_or_parameter: true,
                stored_index,
            });
        }

        let mut parameters = Vec::with_capacity(param_names.len());
        let mut complex_copy = false;
        for (position, name) in param_names.iter().enumerate() {
            let ident = identifiers
                .iter()
                .find(|ident| ident.name == *name)
                .expect("parameter was declared above");
            let is_duplicated = param_names[position + 1..].contains(name);
            complex_copy |= is_duplicated || !ident.needs_stack_slot;
            parameters.push(ParameterDeclaration {
                name: *name,
                is_heap_allocated: !ident.needs_stack_slot,
                is_duplicated,
                index: ident.stored_index,
            });
        }

        let source = self.slice_span(span);
        let block = self.ctx.block_mut(id);
        block.identifiers = identifiers;
        block.parameters = parameters;
        block.identifier_on_stack_count = stack_count;
        block.identifier_on_heap_count = heap_count;
        block.lexical_block_index = lexical_depth;
        block.source = source;

        let flags = &mut block.flags;
        flags.is_strict = is_strict || kind == FnKind::Method || kind == FnKind::ClassConstructor;
        flags.is_function_declaration = kind == FnKind::Declaration;
        flags.is_function_expression = kind == FnKind::Expression;
        flags.is_arrow_function_expression = kind == FnKind::Arrow;
        flags.is_class_constructor = kind == FnKind::ClassConstructor;
        flags.is_constructor = matches!(
            kind,
            FnKind::Declaration | FnKind::Expression | FnKind::ClassConstructor
        );
        flags.can_use_indexed_variable_storage = true;
        flags.can_allocate_environment_on_stack = heap_count == 0;
        flags.needs_complex_parameter_copy = complex_copy;
        flags.has_eval = scope.has_eval;
        flags.has_with = scope.has_with;
        flags.has_catch = scope.has_catch;
        flags.uses_arguments_object = scope.uses_arguments;
        flags.need_to_load_this_value = scope.references_this
            || matches!(kind, FnKind::Method | FnKind::ClassConstructor);
    }

    fn build_class(
        &mut self,
        scope: &mut FunctionScope,
        owner: BlockId,
        class: &'a Class<'a>,
    ) -> CompileResult<()> {
        if class.super_class.is_some() {
            return Err(CompileError::unsupported("class inheritance"));
        }
        let name = match &class.id {
            Some(id) => self.ctx.intern(id.name.as_str()),
            None => Atom::EMPTY,
        };

        let mut constructor: Option<&'a Function<'a>> = None;
        for element in &class.body.body {
            if let ClassElement::MethodDefinition(method) = element {
                if matches!(method.kind, MethodDefinitionKind::Constructor) {
                    constructor = Some(&method.value);
                }
            }
        }

        // The constructor block is the class-body block: code generation
        // looks it up by the class's own span.
        let (_, free) = self.build_function(
            owner,
            name,
            FnKind::ClassConstructor,
            match constructor {
                Some(func) => FnSource::Function(func),
                None => FnSource::DefaultConstructor,
            },
            class.span,
            class.span.start,
            scope.block_depth,
        )?;
        scope.captured.extend(free);

        for element in &class.body.body {
            let ClassElement::MethodDefinition(method) = element else {
                return Err(CompileError::unsupported("non-method class members"));
            };
            if matches!(method.kind, MethodDefinitionKind::Constructor) {
                continue;
            }
            let method_name = self.property_key_name(&method.key)?;
            let (_, free) = self.build_function(
                owner,
                method_name,
                FnKind::Method,
                FnSource::Function(&method.value),
                method.value.span,
                method.value.span.start,
                scope.block_depth,
            )?;
            scope.captured.extend(free);
        }
        Ok(())
    }

    fn scan_statements(
        &mut self,
        scope: &mut FunctionScope,
        owner: BlockId,
        statements: &'a [Statement<'a>],
    ) -> CompileResult<()> {
        for statement in statements {
            self.scan_statement(scope, owner, statement)?;
        }
        Ok(())
    }

    fn scan_statement(
        &mut self,
        scope: &mut FunctionScope,
        owner: BlockId,
        statement: &'a Statement<'a>,
    ) -> CompileResult<()> {
        match statement {
            Statement::VariableDeclaration(decl) => {
                let kind = match decl.kind {
                    VariableDeclarationKind::Var => DeclKind::Var,
                    VariableDeclarationKind::Let => DeclKind::Let,
                    VariableDeclarationKind::Const => DeclKind::Const,
                    _ => return Err(CompileError::unsupported("using declarations")),
                };
                for declarator in &decl.declarations {
                    let name = self.binding_name(&declarator.id)?;
                    scope.declare(name, kind);
                    if let Some(init) = &declarator.init {
                        self.scan_expression(scope, owner, init)?;
                    }
                }
                Ok(())
            }
            Statement::FunctionDeclaration(func) => {
                let id = func
                    .id
                    .as_ref()
                    .ok_or_else(|| CompileError::unsupported("unnamed function declaration"))?;
                let name = self.ctx.intern(id.name.as_str());
                scope.declare(name, DeclKind::Function);
                let (_, free) = self.build_function(
                    owner,
                    name,
                    FnKind::Declaration,
                    FnSource::Function(func),
                    func.span,
                    func.span.start,
                    scope.block_depth,
                )?;
                scope.captured.extend(free);
                Ok(())
            }
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    let name = self.ctx.intern(id.name.as_str());
                    scope.declare(name, DeclKind::Class);
                }
                self.build_class(scope, owner, class)
            }
            Statement::ExpressionStatement(stmt) => {
                self.scan_expression(scope, owner, &stmt.expression)
            }
            Statement::IfStatement(stmt) => {
                self.scan_expression(scope, owner, &stmt.test)?;
                self.scan_statement(scope, owner, &stmt.consequent)?;
                if let Some(alternate) = &stmt.alternate {
                    self.scan_statement(scope, owner, alternate)?;
                }
                Ok(())
            }
            Statement::WhileStatement(stmt) => {
                self.scan_expression(scope, owner, &stmt.test)?;
                self.scan_statement(scope, owner, &stmt.body)
            }
            Statement::ForStatement(stmt) => {
                match &stmt.init {
                    Some(ForStatementInit::VariableDeclaration(decl)) => {
                        for declarator in &decl.declarations {
                            let name = self.binding_name(&declarator.id)?;
                            scope.declare(name, DeclKind::Var);
                            if let Some(init) = &declarator.init {
                                self.scan_expression(scope, owner, init)?;
                            }
                        }
                    }
                    Some(init) => {
                        if let Some(expr) = init.as_expression() {
                            self.scan_expression(scope, owner, expr)?;
                        }
                    }
                    None => {}
                }
                if let Some(test) = &stmt.test {
                    self.scan_expression(scope, owner, test)?;
                }
                if let Some(update) = &stmt.update {
                    self.scan_expression(scope, owner, update)?;
                }
                self.scan_statement(scope, owner, &stmt.body)
            }
            Statement::ReturnStatement(stmt) => {
                if let Some(argument) = &stmt.argument {
                    self.scan_expression(scope, owner, argument)?;
                }
                Ok(())
            }
            Statement::BlockStatement(block) => {
                scope.block_depth += 1;
                let result = self.scan_statements(scope, owner, &block.body);
                scope.block_depth -= 1;
                result
            }
            Statement::TryStatement(stmt) => {
                scope.has_catch |= stmt.handler.is_some();
                scope.block_depth += 1;
                self.scan_statements(scope, owner, &stmt.block.body)?;
                if let Some(handler) = &stmt.handler {
                    // The catch binding is dynamic; it is not one of the
                    // function's declared identifiers.
                    self.scan_statements(scope, owner, &handler.body.body)?;
                }
                if let Some(finalizer) = &stmt.finalizer {
                    self.scan_statements(scope, owner, &finalizer.body)?;
                }
                scope.block_depth -= 1;
                Ok(())
            }
            Statement::ThrowStatement(stmt) => self.scan_expression(scope, owner, &stmt.argument),
            Statement::WithStatement(stmt) => {
                scope.has_with = true;
                self.scan_expression(scope, owner, &stmt.object)?;
                self.scan_statement(scope, owner, &stmt.body)
            }
            Statement::BreakStatement(_)
            | Statement::ContinueStatement(_)
            | Statement::EmptyStatement(_)
            | Statement::DebuggerStatement(_) => Ok(()),
            // Anything else is caught by code generation.
            _ => Ok(()),
        }
    }

    fn scan_expression(
        &mut self,
        scope: &mut FunctionScope,
        owner: BlockId,
        expression: &'a Expression<'a>,
    ) -> CompileResult<()> {
        match expression {
            Expression::Identifier(ident) => {
                let name = self.ctx.intern(ident.name.as_str());
                if ident.name.as_str() == "arguments" {
                    scope.uses_arguments = true;
                }
                scope.referenced.insert(name);
                Ok(())
            }
            Expression::ThisExpression(_) => {
                scope.references_this = true;
                Ok(())
            }
            Expression::BinaryExpression(expr) => {
                self.scan_expression(scope, owner, &expr.left)?;
                self.scan_expression(scope, owner, &expr.right)
            }
            Expression::LogicalExpression(expr) => {
                self.scan_expression(scope, owner, &expr.left)?;
                self.scan_expression(scope, owner, &expr.right)
            }
            Expression::UnaryExpression(expr) => {
                self.scan_expression(scope, owner, &expr.argument)
            }
            Expression::UpdateExpression(expr) => {
                self.scan_assignment_target_simple(scope, owner, &expr.argument)
            }
            Expression::AssignmentExpression(expr) => {
                match &expr.left {
                    AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                        let name = self.ctx.intern(ident.name.as_str());
                        scope.referenced.insert(name);
                    }
                    AssignmentTarget::StaticMemberExpression(member) => {
                        self.scan_expression(scope, owner, &member.object)?;
                    }
                    AssignmentTarget::ComputedMemberExpression(member) => {
                        self.scan_expression(scope, owner, &member.object)?;
                        self.scan_expression(scope, owner, &member.expression)?;
                    }
                    _ => return Err(CompileError::unsupported("destructuring assignment")),
                }
                self.scan_expression(scope, owner, &expr.right)
            }
            Expression::CallExpression(call) => {
                if let Expression::Identifier(ident) = &call.callee {
                    if ident.name.as_str() == "eval" {
                        scope.has_eval = true;
                    }
                }
                self.scan_expression(scope, owner, &call.callee)?;
                for argument in &call.arguments {
                    if let Some(expr) = argument.as_expression() {
                        self.scan_expression(scope, owner, expr)?;
                    }
                }
                Ok(())
            }
            Expression::NewExpression(new_expr) => {
                self.scan_expression(scope, owner, &new_expr.callee)?;
                for argument in &new_expr.arguments {
                    if let Some(expr) = argument.as_expression() {
                        self.scan_expression(scope, owner, expr)?;
                    }
                }
                Ok(())
            }
            Expression::StaticMemberExpression(member) => {
                self.scan_expression(scope, owner, &member.object)
            }
            Expression::ComputedMemberExpression(member) => {
                self.scan_expression(scope, owner, &member.object)?;
                self.scan_expression(scope, owner, &member.expression)
            }
            Expression::ConditionalExpression(expr) => {
                self.scan_expression(scope, owner, &expr.test)?;
                self.scan_expression(scope, owner, &expr.consequent)?;
                self.scan_expression(scope, owner, &expr.alternate)
            }
            Expression::ParenthesizedExpression(expr) => {
                self.scan_expression(scope, owner, &expr.expression)
            }
            Expression::SequenceExpression(seq) => {
                for expr in &seq.expressions {
                    self.scan_expression(scope, owner, expr)?;
                }
                Ok(())
            }
            Expression::FunctionExpression(func) => {
                let name = match &func.id {
                    Some(id) => self.ctx.intern(id.name.as_str()),
                    None => Atom::EMPTY,
                };
                let (_, free) = self.build_function(
                    owner,
                    name,
                    FnKind::Expression,
                    FnSource::Function(func),
                    func.span,
                    func.span.start,
                    scope.block_depth,
                )?;
                scope.captured.extend(free);
                Ok(())
            }
            Expression::ArrowFunctionExpression(arrow) => {
                let (_, free) = self.build_function(
                    owner,
                    Atom::EMPTY,
                    FnKind::Arrow,
                    FnSource::Arrow(arrow),
                    arrow.span,
                    arrow.span.start,
                    scope.block_depth,
                )?;
                scope.captured.extend(free);
                Ok(())
            }
            Expression::ClassExpression(class) => self.build_class(scope, owner, class),
            Expression::ObjectExpression(object) => {
                for property in &object.properties {
                    if let ObjectPropertyKind::ObjectProperty(property) = property {
                        self.scan_expression(scope, owner, &property.value)?;
                    }
                }
                Ok(())
            }
            // Literals reference nothing; unknown constructs are rejected
            // by code generation.
            _ => Ok(()),
        }
    }

    fn scan_assignment_target_simple(
        &mut self,
        scope: &mut FunctionScope,
        owner: BlockId,
        target: &'a SimpleAssignmentTarget<'a>,
    ) -> CompileResult<()> {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.ctx.intern(ident.name.as_str());
                scope.referenced.insert(name);
                Ok(())
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => {
                self.scan_expression(scope, owner, &member.object)
            }
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                self.scan_expression(scope, owner, &member.object)?;
                self.scan_expression(scope, owner, &member.expression)
            }
            _ => Err(CompileError::unsupported("update of this target")),
        }
    }

    fn binding_name(&mut self, pattern: &BindingPattern<'a>) -> CompileResult<Atom> {
        match &pattern.kind {
            BindingPatternKind::BindingIdentifier(ident) => {
                Ok(self.ctx.intern(ident.name.as_str()))
            }
            _ => Err(CompileError::unsupported("destructuring patterns")),
        }
    }

    fn property_key_name(&mut self, key: &PropertyKey<'a>) -> CompileResult<Atom> {
        match key {
            PropertyKey::StaticIdentifier(ident) => Ok(self.ctx.intern(ident.name.as_str())),
            PropertyKey::StringLiteral(literal) => {
                Ok(self.ctx.intern(literal.value.as_str()))
            }
            _ => Err(CompileError::unsupported("computed property names")),
        }
    }

    fn slice_span(&self, span: Span) -> String {
        self.source_text[span.start as usize..span.end as usize].to_string()
    }
}
