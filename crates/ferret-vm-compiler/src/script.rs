//! Parsed scripts and lazy per-block compilation

use ferret_vm_bytecode::BlockId;
use ferret_vm_core::Context;
use oxc_ast::ast::{ArrowFunctionExpression, Function, Program};
use rustc_hash::FxHashMap;

use crate::codegen;
use crate::error::{CompileError, CompileResult};

/// What a code block compiles from
#[derive(Debug)]
pub enum BlockSource<'a> {
    /// The program top level
    Program(&'a Program<'a>),
    /// A function body (declaration, expression, method or explicit class
    /// constructor)
    Function(&'a Function<'a>),
    /// An arrow function body
    Arrow(&'a ArrowFunctionExpression<'a>),
    /// The synthesized constructor of a class without one
    DefaultConstructor,
}

/// A parsed script: the code-block tree plus everything needed to compile
/// any block of it on demand
///
/// Borrows the oxc AST, so it lives at most as long as the allocator the
/// caller parsed into. Function bodies compile lazily: the interpreter and
/// the snapshot saver both call [`Script::ensure_bytecode`] right before
/// they need a block's code.
#[derive(Debug)]
pub struct Script<'a> {
    pub(crate) root: BlockId,
    pub(crate) source_text: &'a str,
    pub(crate) sources: FxHashMap<BlockId, BlockSource<'a>>,
    pub(crate) span_to_block: FxHashMap<u32, BlockId>,
    pub(crate) order: Vec<BlockId>,
}

impl<'a> Script<'a> {
    /// The program's top-level block
    #[inline]
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Every block of the script, parents before children
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order.iter().copied()
    }

    /// Block created for the function or class whose span starts at `start`
    pub(crate) fn block_for_span(&self, start: u32) -> CompileResult<BlockId> {
        self.span_to_block.get(&start).copied().ok_or_else(|| {
            CompileError::internal(format!("no code block for span offset {start}"))
        })
    }

    /// Compile `block` if it has no bytecode yet
    ///
    /// This is the engine-compilation callback the snapshot saver's walk
    /// consumes; deferred function bodies are compiled the first time the
    /// walk visits them.
    pub fn ensure_bytecode(&self, ctx: &mut Context, block: BlockId) -> CompileResult<()> {
        if ctx.block(block).bytecode().is_some() {
            return Ok(());
        }
        codegen::generate_block(ctx, self, block)
    }

    /// Compile every block of the script
    ///
    /// Direct execution uses this; once a script leaves the parse scope its
    /// AST is gone, so everything a call might reach must be compiled first.
    pub fn compile_all(&self, ctx: &mut Context) -> CompileResult<()> {
        for block in self.block_ids() {
            self.ensure_bytecode(ctx, block)?;
        }
        Ok(())
    }
}
