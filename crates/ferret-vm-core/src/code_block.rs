//! Code blocks
//!
//! A code block is one compilation unit: the program top level or a single
//! function body. Blocks form a tree (parent before children in the arena)
//! and carry the static scope metadata the interpreter and the snapshot
//! codec both consume.

use std::rc::Rc;

use ferret_vm_bytecode::{Atom, BlockId, ByteCodeBlock};

/// Scope flags of a code block
///
/// One boolean per attribute. Field order is part of the snapshot wire
/// format: the saver writes these flags in declaration order, one byte each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CodeBlockFlags {
    pub is_constructor: bool,
    pub is_strict: bool,
    pub has_call_native_function_code: bool,
    pub is_function_name_save_on_heap: bool,
    pub is_function_name_explicitly_declared: bool,
    pub can_use_indexed_variable_storage: bool,
    pub can_allocate_environment_on_stack: bool,
    pub needs_complex_parameter_copy: bool,
    pub has_eval: bool,
    pub has_with: bool,
    pub has_super: bool,
    pub has_catch: bool,
    pub has_yield: bool,
    pub in_catch: bool,
    pub in_with: bool,
    pub uses_arguments_object: bool,
    pub is_function_expression: bool,
    pub is_function_declaration: bool,
    pub is_function_declaration_with_special_binding: bool,
    pub is_arrow_function_expression: bool,
    pub is_class_constructor: bool,
    pub is_in_with_scope: bool,
    pub is_eval_code_in_function: bool,
    pub needs_virtual_id_operation: bool,
    pub need_to_load_this_value: bool,
    pub has_rest_element: bool,
}

/// A declared parameter
#[derive(Debug, Clone, Copy)]
pub struct ParameterDeclaration {
    /// Parameter name
    pub name: Atom,
    /// Stored in the heap environment instead of a stack slot
    pub is_heap_allocated: bool,
    /// Shadowed by a later parameter of the same name
    pub is_duplicated: bool,
    /// Slot index in the storage the `is_heap_allocated` flag selects
    pub index: u16,
}

/// A declared identifier (parameters included)
#[derive(Debug, Clone, Copy)]
pub struct IdentifierDeclaration {
    /// Identifier name
    pub name: Atom,
    /// Lives in a stack slot of the frame (false: heap environment)
    pub needs_stack_slot: bool,
    /// May be reassigned
    pub is_mutable: bool,
    /// Introduced by an explicit declaration or a parameter (false: implicit,
    /// e.g. the function's own name binding)
    pub is_explicitly_declared_or_parameter: bool,
    /// Slot index in the storage the `needs_stack_slot` flag selects
    pub stored_index: u16,
}

/// A single compilation unit
pub struct CodeBlock {
    /// Parent block; `None` for the program top level
    pub parent: Option<BlockId>,
    /// Function name; `Atom::EMPTY` for the top level and anonymous functions
    pub function_name: Atom,
    /// Child blocks, in declaration order
    pub children: Vec<BlockId>,
    /// Parameters, in declaration order
    pub parameters: Vec<ParameterDeclaration>,
    /// Identifiers declared in this block's scope
    pub identifiers: Vec<IdentifierDeclaration>,
    /// Number of identifiers with stack slots
    pub identifier_on_stack_count: u16,
    /// Number of identifiers in the heap environment
    pub identifier_on_heap_count: u16,
    /// Syntactic block-nesting depth at the declaration site
    pub lexical_block_index: u32,
    /// Source text of this block
    pub source: String,
    /// Scope flags
    pub flags: CodeBlockFlags,
    /// Compiled bytecode; `None` until (lazily) generated
    pub bytecode: Option<Rc<ByteCodeBlock>>,
}

impl CodeBlock {
    /// Create an empty block, the form the compiler's scope pass fills in
    pub fn new(parent: Option<BlockId>, function_name: Atom) -> Self {
        Self {
            parent,
            function_name,
            children: Vec::new(),
            parameters: Vec::new(),
            identifiers: Vec::new(),
            identifier_on_stack_count: 0,
            identifier_on_heap_count: 0,
            lexical_block_index: 0,
            source: String::new(),
            flags: CodeBlockFlags::default(),
            bytecode: None,
        }
    }

    /// Create an uninitialized shell
    ///
    /// The snapshot loader allocates one shell per block record before any
    /// cross-block reference is resolved, so forward references always have
    /// a target.
    pub fn shell() -> Self {
        Self::new(None, Atom::EMPTY)
    }

    /// Is this the program's top-level block?
    #[inline]
    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    /// Compiled bytecode, when present
    #[inline]
    pub fn bytecode(&self) -> Option<&Rc<ByteCodeBlock>> {
        self.bytecode.as_ref()
    }

    /// Look up a declared identifier by name
    pub fn find_identifier(&self, name: Atom) -> Option<&IdentifierDeclaration> {
        self.identifiers.iter().find(|ident| ident.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_is_global_until_adopted() {
        let shell = CodeBlock::shell();
        assert!(shell.is_global());
        assert!(shell.bytecode().is_none());
    }

    #[test]
    fn test_find_identifier() {
        let mut block = CodeBlock::new(None, Atom::EMPTY);
        block.identifiers.push(IdentifierDeclaration {
            name: Atom(5),
            needs_stack_slot: true,
            is_mutable: true,
            is_explicitly_declared_or_parameter: true,
            stored_index: 1,
        });
        assert!(block.find_identifier(Atom(5)).is_some());
        assert!(block.find_identifier(Atom(6)).is_none());
    }
}
