//! The snapshot loader
//!
//! Loading is two-phase: one shell per code-block record is allocated
//! before any record is consumed, so every cross-block reference has a
//! target; records are then filled in ascending index order. Per block, the
//! loader restores scope metadata, rewrites the bytecode operands from
//! index form back to live handles — retaining every restored string in the
//! block's literal-data array and allocating a fresh inline cache per
//! property-store site — and relocates jump targets to the reconstructed
//! buffer's own base address.
//!
//! Loading is transactional on the context: shells are assembled off to the
//! side and committed to the block arena only after the whole artifact has
//! parsed. A failed load leaves no block reachable.

use std::rc::Rc;

use ferret_vm_bytecode::{
    stream, Atom, BlockId, ByteCodeBlock, InlineCache, InstructionWalker, Literal, Opcode,
    OperandKind,
};
use ferret_vm_core::{
    CodeBlock, Context, IdentifierDeclaration, ParameterDeclaration, Value,
};
use ferret_vm_exec::execute_program;
use rustc_hash::FxHashSet;

use crate::error::SnapshotError;
use crate::wire::{
    CodeBlockInfo, GlobalInfo, IdentifierInfo, ParameterInfo, SnapshotInfo, SnapshotReader,
    EMPTY_NAME_SENTINEL, NO_PARENT, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};

/// A reconstituted program
pub struct LoadedScript {
    /// The program's top-level block
    pub root: BlockId,
    /// Filename recorded by the saver
    pub filename: String,
    /// Source text recorded by the saver
    pub source: String,
}

/// Load a snapshot and run its root block to completion
pub fn execute(ctx: &mut Context, bytes: &[u8]) -> Result<Value, SnapshotError> {
    let script = load(ctx, bytes)?;
    Ok(execute_program(ctx, script.root)?)
}

/// Load a snapshot into the context
pub fn load(ctx: &mut Context, bytes: &[u8]) -> Result<LoadedScript, SnapshotError> {
    let mut r = SnapshotReader::new(bytes);

    let info = SnapshotInfo::read_from(&mut r)?;
    if info.magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic(info.magic));
    }
    if info.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::BadVersion(info.version));
    }

    let global = GlobalInfo::read_from(&mut r)?;
    if global.user_literal_count >= EMPTY_NAME_SENTINEL {
        return Err(SnapshotError::format(
            "literal table collides with the empty-name sentinel",
        ));
    }

    let filename = read_str(&mut r, global.filename_size as usize, "filename")?.to_string();
    tracing::debug!(target: "ferret::snapshot", "loading snapshot of {filename}");
    let source = read_str(&mut r, global.source_code_size as usize, "source code")?.to_string();

    // Literal strings become engine atoms up front; blocks refer to them by
    // table index only.
    let mut literals: Vec<Atom> = Vec::with_capacity(global.user_literal_count as usize);
    for _ in 0..global.user_literal_count {
        let length = r.read_usize("literal size")?;
        let text = read_str(&mut r, length, "literal data")?;
        literals.push(ctx.intern(text));
    }

    let block_count = global.code_block_count as usize;
    let base_index = ctx.block_count() as u32;

    // Phase one: every block exists as a shell before any record is read,
    // so forward references resolve to a definite target.
    let mut shells: Vec<CodeBlock> = (0..block_count).map(|_| CodeBlock::shell()).collect();

    // Phase two: fill the shells in ascending index order.
    for index in 0..block_count {
        let block = load_block(&mut r, &literals, base_index, block_count)?;
        shells[index] = block;
        tracing::debug!(target: "ferret::snapshot", "code block {index} restored");
    }
    if !r.is_at_end() {
        return Err(SnapshotError::format("trailing bytes after the last block"));
    }

    Ok(LoadedScript {
        root: ctx.adopt_blocks(shells),
        filename,
        source,
    })
}

fn read_str<'a>(
    r: &mut SnapshotReader<'a>,
    length: usize,
    region: &'static str,
) -> Result<&'a str, SnapshotError> {
    let bytes = r.read_bytes(length, region)?;
    std::str::from_utf8(bytes)
        .map_err(|_| SnapshotError::format(format!("{region} is not valid UTF-8")))
}

fn literal_atom(literals: &[Atom], index: u32) -> Result<Atom, SnapshotError> {
    literals
        .get(index as usize)
        .copied()
        .ok_or_else(|| SnapshotError::format(format!("literal index {index} out of range")))
}

fn block_ref(
    base_index: u32,
    block_count: usize,
    index: u32,
) -> Result<BlockId, SnapshotError> {
    if (index as usize) < block_count {
        Ok(BlockId(base_index + index))
    } else {
        Err(SnapshotError::format(format!(
            "code block index {index} out of range"
        )))
    }
}

fn load_block(
    r: &mut SnapshotReader<'_>,
    literals: &[Atom],
    base_index: u32,
    block_count: usize,
) -> Result<CodeBlock, SnapshotError> {
    let info = CodeBlockInfo::read_from(r)?;

    let mut block = CodeBlock::shell();
    if info.parent_block == NO_PARENT {
        block.parent = None;
        block.function_name = Atom::EMPTY;
    } else {
        block.parent = Some(block_ref(base_index, block_count, info.parent_block)?);
        block.function_name = if info.function_name_idx == EMPTY_NAME_SENTINEL {
            Atom::EMPTY
        } else {
            literal_atom(literals, info.function_name_idx)?
        };
    }
    block.identifier_on_stack_count = info.identifier_on_stack_count;
    block.identifier_on_heap_count = info.identifier_on_heap_count;
    block.lexical_block_index = info.lexical_block_index;
    block.flags = info.flags;

    for _ in 0..info.child_block_count {
        let child = r.read_usize("child block info")?;
        let child = u32::try_from(child)
            .map_err(|_| SnapshotError::format("child block index out of range"))?;
        block.children.push(block_ref(base_index, block_count, child)?);
    }

    for _ in 0..info.parameter_count {
        let parameter = ParameterInfo::read_from(r)?;
        block.parameters.push(ParameterDeclaration {
            name: literal_atom(literals, parameter.parameter_name_idx)?,
            is_heap_allocated: parameter.is_heap_allocated,
            is_duplicated: parameter.is_duplicated,
            index: parameter.index,
        });
    }

    for _ in 0..info.identifier_count {
        let identifier = IdentifierInfo::read_from(r)?;
        block.identifiers.push(IdentifierDeclaration {
            name: literal_atom(literals, identifier.identifier_name_idx)?,
            needs_stack_slot: identifier.need_to_allocate_on_stack,
            is_mutable: identifier.is_mutable,
            is_explicitly_declared_or_parameter: identifier
                .is_explicitly_declared_or_parameter_name,
            stored_index: identifier.index_for_indexed_storage,
        });
    }

    let mut numeral_literals = Vec::with_capacity(info.numeral_value_count as usize);
    for _ in 0..info.numeral_value_count {
        let raw = r.read_bytes(ferret_vm_bytecode::literal::RAW_SIZE, "numeral value info")?;
        let mut fixed = [0u8; ferret_vm_bytecode::literal::RAW_SIZE];
        fixed.copy_from_slice(raw);
        let literal = Literal::decode(&fixed)
            .map_err(|error| SnapshotError::format(error.to_string()))?;
        if matches!(literal, Literal::String(_) | Literal::SnapshotIndex(_)) {
            return Err(SnapshotError::format(
                "reference value in the numeral-literal table",
            ));
        }
        numeral_literals.push(literal);
    }

    let mut object_code_positions = Vec::with_capacity(info.object_code_positions_size as usize);
    for _ in 0..info.object_code_positions_size {
        object_code_positions.push(r.read_usize("object code position info")?);
    }

    block.source = read_str(r, info.source_code_size as usize, "block source code")?.to_string();

    // The transient artifact bytes are copied into the block's own buffer;
    // operands are restored and jumps relocated against that buffer's base.
    let mut code: Box<[u8]> =
        r.read_bytes(info.byte_code_size as usize, "bytecode")?.into();
    let (literal_data, cache_count) =
        restore_stream(&mut code, literals, base_index, block_count)?;

    let retention = literal_data.len() + cache_count as usize;
    if retention != info.literal_count as usize {
        return Err(SnapshotError::format(format!(
            "block retention count mismatch: record says {}, stream restores {}",
            info.literal_count, retention
        )));
    }

    block.bytecode = Some(Rc::new(ByteCodeBlock {
        code,
        required_register_count: info.required_register_count,
        numeral_literals,
        literal_data,
        inline_caches: (0..cache_count).map(|_| InlineCache::new()).collect(),
        object_code_positions,
    }));
    Ok(block)
}

/// Rewrite every reference-carrying operand of `code` from index form back
/// to live handles, returning the retained atoms and the number of freshly
/// allocated inline caches
fn restore_stream(
    code: &mut [u8],
    literals: &[Atom],
    base_index: u32,
    block_count: usize,
) -> Result<(Vec<Atom>, u32), SnapshotError> {
    let records: Vec<(usize, Opcode)> = InstructionWalker::new(code)
        .collect::<Result<_, _>>()
        .map_err(|error| SnapshotError::format(error.to_string()))?;
    let record_starts: FxHashSet<usize> = records.iter().map(|(start, _)| *start).collect();
    let base = code.as_ptr() as usize;

    let mut literal_data: Vec<Atom> = Vec::new();
    let mut cache_count: u32 = 0;

    for (start, op) in records {
        for (kind, offset) in op.operand_layout() {
            let at = start + offset;
            match kind {
                OperandKind::Register | OperandKind::Index => {}
                OperandKind::Atom => {
                    let atom = literal_atom(literals, stream::read_u32(code, at))?;
                    stream::write_u32(code, at, atom.0);
                    literal_data.push(atom);
                }
                OperandKind::NameOrEmpty => {
                    let index = stream::read_u32(code, at);
                    if index == EMPTY_NAME_SENTINEL {
                        stream::write_u32(code, at, Atom::EMPTY.0);
                    } else {
                        let atom = literal_atom(literals, index)?;
                        stream::write_u32(code, at, atom.0);
                        literal_data.push(atom);
                    }
                }
                OperandKind::Block => {
                    let block =
                        block_ref(base_index, block_count, stream::read_u32(code, at))?;
                    stream::write_u32(code, at, block.0);
                }
                OperandKind::CacheSlot => {
                    // Inline caches are never serialized; every store site
                    // gets a fresh one.
                    stream::write_u32(code, at, cache_count);
                    cache_count += 1;
                }
                OperandKind::Offset => {
                    let relative = stream::read_u64(code, at) as usize;
                    if !record_starts.contains(&relative) {
                        return Err(SnapshotError::format(format!(
                            "jump target {relative} is not an opcode start"
                        )));
                    }
                    stream::write_u64(code, at, (base + relative) as u64);
                }
                OperandKind::Value => {
                    let literal = stream::read_literal(code, at)
                        .map_err(|error| SnapshotError::format(error.to_string()))?;
                    match literal {
                        Literal::SnapshotIndex(index) => {
                            let atom = literal_atom(literals, index)?;
                            stream::write_literal(code, at, Literal::String(atom));
                            literal_data.push(atom);
                        }
                        Literal::String(_) => {
                            return Err(SnapshotError::format(
                                "live string handle in a snapshot stream",
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    Ok((literal_data, cache_count))
}
