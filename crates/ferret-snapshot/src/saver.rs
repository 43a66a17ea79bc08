//! The snapshot saver
//!
//! `generate` parses and compiles through the engine, walks the code-block
//! tree (pre-order index assignment, lazy compilation of deferred bodies),
//! rewrites a private copy of each block's bytecode into index form, and
//! emits the wire image. The live context's bytecode buffers are never
//! touched: a saved program keeps running in the same process.
//!
//! All saver state — literal interner, block index, rewritten streams — is
//! owned by one `SnapshotSaver` value and dropped when the save returns.

use std::path::Path;

use ferret_vm_bytecode::{
    stream, Atom, BlockId, InstructionWalker, Literal, OperandKind,
};
use ferret_vm_compiler::{CompileResult, Script, ScriptParser};
use ferret_vm_core::Context;
use oxc_allocator::Allocator;
use rustc_hash::FxHashMap;

use crate::block_index::BlockIndex;
use crate::error::SnapshotError;
use crate::interner::LiteralInterner;
use crate::wire::{
    CodeBlockInfo, GlobalInfo, IdentifierInfo, ParameterInfo, SnapshotInfo, SnapshotWriter,
    EMPTY_NAME_SENTINEL, NO_PARENT, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};

/// Parse, compile and snapshot `source` end to end
///
/// The context is left fully usable: the compiled program stays in the
/// block arena with its live bytecode intact and can still be executed.
pub fn generate(
    ctx: &mut Context,
    filename: &str,
    source: &str,
) -> Result<Vec<u8>, SnapshotError> {
    let allocator = Allocator::default();
    let script = ScriptParser::initialize_script(ctx, &allocator, source, filename)?;
    generate_from_script(ctx, &script, filename, source)
}

/// Snapshot an already-parsed script
pub fn generate_from_script(
    ctx: &mut Context,
    script: &Script<'_>,
    filename: &str,
    source: &str,
) -> Result<Vec<u8>, SnapshotError> {
    let mut saver = SnapshotSaver::new();
    let mut compile = |ctx: &mut Context, block: BlockId| script.ensure_bytecode(ctx, block);
    saver.walk(ctx, &mut compile, script.root())?;
    saver.create_snapshot(ctx, filename, source)
}

/// Snapshot an already-compiled block tree
///
/// This is how a loaded snapshot is saved again: every block reachable from
/// `root` must carry bytecode, since no compiler is available here.
pub fn generate_from_root(
    ctx: &mut Context,
    root: BlockId,
    filename: &str,
    source: &str,
) -> Result<Vec<u8>, SnapshotError> {
    let mut saver = SnapshotSaver::new();
    let mut compile = |ctx: &mut Context, block: BlockId| -> CompileResult<()> {
        if ctx.block(block).bytecode().is_none() {
            return Err(ferret_vm_compiler::CompileError::internal(
                "block tree contains a block without bytecode",
            ));
        }
        Ok(())
    };
    saver.walk(ctx, &mut compile, root)?;
    saver.create_snapshot(ctx, filename, source)
}

/// `generate`, then write the artifact to `path`
///
/// No partial snapshot survives a failure: the image is assembled in memory
/// and written in one step, and a failed write unlinks the file.
pub fn generate_to_file(
    ctx: &mut Context,
    filename: &str,
    source: &str,
    path: &Path,
) -> Result<(), SnapshotError> {
    let bytes = generate(ctx, filename, source)?;
    if let Err(error) = std::fs::write(path, &bytes) {
        let _ = std::fs::remove_file(path);
        return Err(error.into());
    }
    tracing::info!(
        target: "ferret::snapshot",
        "snapshot written to {} ({} bytes)",
        path.display(),
        bytes.len()
    );
    Ok(())
}

struct RewrittenBlock {
    code: Vec<u8>,
    literal_count: u32,
}

struct SnapshotSaver {
    literals: LiteralInterner,
    blocks: BlockIndex,
    rewritten: FxHashMap<u32, RewrittenBlock>,
}

impl SnapshotSaver {
    fn new() -> Self {
        Self {
            literals: LiteralInterner::new(),
            blocks: BlockIndex::new(),
            rewritten: FxHashMap::default(),
        }
    }

    /// Pre-order walk: index the block, make sure it is compiled, recurse
    /// into the children, then post-process this block's stream
    fn walk(
        &mut self,
        ctx: &mut Context,
        compile: &mut dyn FnMut(&mut Context, BlockId) -> CompileResult<()>,
        block_id: BlockId,
    ) -> Result<(), SnapshotError> {
        self.blocks.insert(block_id);
        compile(ctx, block_id)?;
        let children = ctx.block(block_id).children.clone();
        for child in children {
            self.walk(ctx, compile, child)?;
        }
        self.post_process(ctx, block_id)
    }

    /// Intern every string the block references and rewrite a private copy
    /// of its bytecode stream into index form
    fn post_process(&mut self, ctx: &Context, block_id: BlockId) -> Result<(), SnapshotError> {
        let index = self
            .blocks
            .lookup(block_id)
            .ok_or_else(|| SnapshotError::integrity("post-processing an unvisited block"))?;
        let block = ctx.block(block_id);

        for identifier in &block.identifiers {
            self.literals.intern(identifier.name);
        }
        for parameter in &block.parameters {
            self.literals.intern(parameter.name);
        }
        if !block.is_global() && !block.function_name.is_empty() {
            self.literals.intern(block.function_name);
        }

        let bytecode = block
            .bytecode()
            .ok_or_else(|| SnapshotError::integrity("walked block has no bytecode"))?;
        let mut code = bytecode.code.to_vec();
        let base = bytecode.base();
        let literal_count = self.rewrite_stream(&mut code, base)?;
        tracing::debug!(
            target: "ferret::snapshot",
            "code block {index} post-processed ({} bytes, {literal_count} retained refs)",
            code.len()
        );

        self.rewritten.insert(
            index,
            RewrittenBlock {
                code,
                literal_count,
            },
        );
        Ok(())
    }

    /// Rewrite every reference-carrying operand slot of `code` in place,
    /// returning the number of retention entries a loader will recreate
    fn rewrite_stream(&mut self, code: &mut [u8], base: usize) -> Result<u32, SnapshotError> {
        let records: Vec<(usize, ferret_vm_bytecode::Opcode)> = InstructionWalker::new(code)
            .collect::<Result<_, _>>()
            .map_err(|error| SnapshotError::integrity(error.to_string()))?;

        let mut retained: u32 = 0;
        for (start, op) in records {
            for (kind, offset) in op.operand_layout() {
                let at = start + offset;
                match kind {
                    OperandKind::Register | OperandKind::Index => {}
                    OperandKind::Atom => {
                        let atom = Atom(stream::read_u32(code, at));
                        if atom.is_empty() {
                            return Err(SnapshotError::integrity(
                                "empty string in a string-reference operand",
                            ));
                        }
                        stream::write_u32(code, at, self.literals.intern(atom));
                        retained += 1;
                    }
                    OperandKind::NameOrEmpty => {
                        let atom = Atom(stream::read_u32(code, at));
                        if atom.is_empty() {
                            stream::write_u32(code, at, EMPTY_NAME_SENTINEL);
                        } else {
                            stream::write_u32(code, at, self.literals.intern(atom));
                            retained += 1;
                        }
                    }
                    OperandKind::Block => {
                        let block = BlockId(stream::read_u32(code, at));
                        let index = self.blocks.lookup(block).ok_or_else(|| {
                            SnapshotError::integrity(
                                "bytecode references a code block outside the walked tree",
                            )
                        })?;
                        stream::write_u32(code, at, index);
                    }
                    OperandKind::CacheSlot => {
                        // Cache indices are block-local and dense; the slot
                        // value survives as-is and the loader allocates the
                        // cache it names.
                        retained += 1;
                    }
                    OperandKind::Offset => {
                        let absolute = stream::read_u64(code, at) as usize;
                        let relative = absolute
                            .checked_sub(base)
                            .filter(|relative| *relative <= code.len())
                            .ok_or_else(|| {
                                SnapshotError::integrity(
                                    "jump target outside the block's bytecode stream",
                                )
                            })?;
                        stream::write_u64(code, at, relative as u64);
                    }
                    OperandKind::Value => {
                        let literal = stream::read_literal(code, at)
                            .map_err(|error| SnapshotError::integrity(error.to_string()))?;
                        match literal {
                            Literal::String(atom) => {
                                let index = self.literals.intern(atom);
                                stream::write_literal(code, at, Literal::SnapshotIndex(index));
                                retained += 1;
                            }
                            Literal::SnapshotIndex(_) => {
                                return Err(SnapshotError::integrity(
                                    "snapshot index in live bytecode",
                                ));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(retained)
    }

    /// Emit the full wire image. All interning is already final; a string
    /// missing from the table here is a saver bug.
    fn create_snapshot(
        &self,
        ctx: &Context,
        filename: &str,
        source: &str,
    ) -> Result<Vec<u8>, SnapshotError> {
        if self.literals.len() >= EMPTY_NAME_SENTINEL as usize {
            return Err(SnapshotError::integrity(
                "literal table collides with the empty-name sentinel",
            ));
        }

        let mut w = SnapshotWriter::new();
        SnapshotInfo {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
        }
        .write_to(&mut w);
        GlobalInfo {
            filename_size: filename.len() as u32,
            source_code_size: source.len() as u32,
            code_block_count: self.blocks.len() as u32,
            user_literal_count: self.literals.len() as u32,
        }
        .write_to(&mut w);
        w.write_bytes(filename.as_bytes());
        w.write_bytes(source.as_bytes());
        tracing::debug!(
            target: "ferret::snapshot",
            "headers dumped ({} bytes)", w.len()
        );

        for atom in self.literals.iter() {
            let text = ctx.atoms.resolve(atom);
            w.write_usize(text.len());
            w.write_bytes(text.as_bytes());
        }
        tracing::debug!(
            target: "ferret::snapshot",
            "literal table dumped ({} entries)", self.literals.len()
        );

        for (index, block_id) in self.blocks.iter().enumerate() {
            self.write_block_record(ctx, &mut w, index as u32, block_id)?;
        }
        Ok(w.into_bytes())
    }

    fn write_block_record(
        &self,
        ctx: &Context,
        w: &mut SnapshotWriter,
        index: u32,
        block_id: BlockId,
    ) -> Result<(), SnapshotError> {
        let block = ctx.block(block_id);
        let bytecode = block
            .bytecode()
            .ok_or_else(|| SnapshotError::integrity("emitting a block without bytecode"))?;
        let rewritten = self
            .rewritten
            .get(&index)
            .ok_or_else(|| SnapshotError::integrity("emitting a block that was not rewritten"))?;

        let lookup = |atom: Atom| -> Result<u32, SnapshotError> {
            self.literals.lookup(atom).ok_or_else(|| {
                SnapshotError::integrity(format!(
                    "literal '{}' missing from the table",
                    ctx.atoms.resolve(atom)
                ))
            })
        };

        let (function_name_idx, parent_block) = if block.is_global() {
            (NO_PARENT, NO_PARENT)
        } else {
            let name = if block.function_name.is_empty() {
                EMPTY_NAME_SENTINEL
            } else {
                lookup(block.function_name)?
            };
            let parent = block
                .parent
                .and_then(|parent| self.blocks.lookup(parent))
                .ok_or_else(|| {
                    SnapshotError::integrity("block parent missing from the index")
                })?;
            (name, parent)
        };

        CodeBlockInfo {
            function_name_idx,
            parameter_count: block.parameters.len() as u32,
            numeral_value_count: bytecode.numeral_literals.len() as u32,
            literal_count: rewritten.literal_count,
            identifier_count: block.identifiers.len() as u32,
            parent_block,
            child_block_count: block.children.len() as u32,
            byte_code_size: rewritten.code.len() as u32,
            source_code_size: block.source.len() as u32,
            object_code_positions_size: bytecode.object_code_positions.len() as u32,
            lexical_block_index: block.lexical_block_index,
            required_register_count: bytecode.required_register_count,
            identifier_on_stack_count: block.identifier_on_stack_count,
            identifier_on_heap_count: block.identifier_on_heap_count,
            flags: block.flags,
        }
        .write_to(w);

        for child in &block.children {
            let child_index = self.blocks.lookup(*child).ok_or_else(|| {
                SnapshotError::integrity("child block missing from the index")
            })?;
            w.write_usize(child_index as usize);
        }

        for parameter in &block.parameters {
            ParameterInfo {
                parameter_name_idx: lookup(parameter.name)?,
                is_heap_allocated: parameter.is_heap_allocated,
                is_duplicated: parameter.is_duplicated,
                index: parameter.index,
            }
            .write_to(w);
        }

        for identifier in &block.identifiers {
            IdentifierInfo {
                identifier_name_idx: lookup(identifier.name)?,
                need_to_allocate_on_stack: identifier.needs_stack_slot,
                is_mutable: identifier.is_mutable,
                is_explicitly_declared_or_parameter_name: identifier
                    .is_explicitly_declared_or_parameter,
                index_for_indexed_storage: identifier.stored_index,
            }
            .write_to(w);
        }

        for literal in &bytecode.numeral_literals {
            if literal.is_heap_ref() {
                return Err(SnapshotError::integrity(
                    "string value in the numeral-literal table",
                ));
            }
            w.write_bytes(&literal.encode());
        }

        for position in &bytecode.object_code_positions {
            w.write_usize(*position);
        }

        w.write_bytes(block.source.as_bytes());
        w.write_bytes(&rewritten.code);
        tracing::debug!(
            target: "ferret::snapshot",
            "code block {index} dumped ({} bytecode bytes)",
            rewritten.code.len()
        );
        Ok(())
    }
}
