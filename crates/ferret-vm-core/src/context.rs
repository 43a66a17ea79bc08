//! Engine context

use ferret_vm_bytecode::{Atom, BlockId};

use crate::atom::AtomTable;
use crate::code_block::CodeBlock;
use crate::error::RuntimeError;
use crate::object::{JsObject, ObjectRef};
use crate::value::Value;

/// Sink for the host `print` primitive
///
/// The default writes to stdout; tests install a collector.
pub type PrintHandler = Box<dyn FnMut(&str)>;

/// The engine context: interned strings, the code-block arena, the global
/// object and host hooks. All engine state a script can observe hangs off
/// one context, and every context is independent.
pub struct Context {
    /// Interned-string table
    pub atoms: AtomTable,
    blocks: Vec<CodeBlock>,
    global: ObjectRef,
    print: PrintHandler,
}

impl Context {
    /// Create a context with the standard host globals installed
    pub fn new() -> Self {
        let mut ctx = Self {
            atoms: AtomTable::new(),
            blocks: Vec::new(),
            global: JsObject::ordinary(None),
            print: Box::new(|line| println!("{line}")),
        };
        ctx.install_globals();
        ctx
    }

    fn install_globals(&mut self) {
        let print_name = self.atoms.intern("print");
        let print_fn = JsObject::native(print_name, native_print);
        self.global.borrow_mut().set(print_name, Value::Object(print_fn));

        let global_this = self.atoms.intern("globalThis");
        self.global
            .borrow_mut()
            .set(global_this, Value::Object(self.global.clone()));
    }

    /// The global object
    #[inline]
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    /// Replace the `print` sink; used by tests to capture output
    pub fn set_print_handler(&mut self, handler: PrintHandler) {
        self.print = handler;
    }

    /// Write one line through the `print` sink
    pub fn write_print(&mut self, line: &str) {
        (self.print)(line);
    }

    /// Add a block to the arena
    pub fn add_block(&mut self, block: CodeBlock) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// Bulk-append blocks, returning the id of the first one
    ///
    /// The snapshot loader assembles all shells off to the side and commits
    /// them in one step, so a failed load never leaves partial state here.
    pub fn adopt_blocks(&mut self, blocks: Vec<CodeBlock>) -> BlockId {
        let first = BlockId(self.blocks.len() as u32);
        self.blocks.extend(blocks);
        first
    }

    /// Number of blocks in the arena
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Borrow a block
    #[inline]
    pub fn block(&self, id: BlockId) -> &CodeBlock {
        &self.blocks[id.0 as usize]
    }

    /// Mutably borrow a block
    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut CodeBlock {
        &mut self.blocks[id.0 as usize]
    }

    /// Intern a string, convenience passthrough
    #[inline]
    pub fn intern(&mut self, text: &str) -> Atom {
        self.atoms.intern(text)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn native_print(
    ctx: &mut Context,
    _this: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(|arg| arg.to_display(&ctx.atoms))
        .collect::<Vec<_>>()
        .join(" ");
    ctx.write_print(&line);
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::get_property;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_print_is_installed() {
        let mut ctx = Context::new();
        let print = ctx.atoms.intern("print");
        let value = get_property(ctx.global(), print).unwrap();
        match value {
            Value::Object(obj) => assert!(obj.borrow().is_callable()),
            other => panic!("print is {other:?}"),
        }
    }

    #[test]
    fn test_print_handler_capture() {
        let mut ctx = Context::new();
        let lines: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = lines.clone();
        ctx.set_print_handler(Box::new(move |line| sink.borrow_mut().push(line.into())));
        let three = Value::Int32(3);
        native_print(&mut ctx, &Value::Undefined, &[three]).unwrap();
        assert_eq!(lines.borrow().as_slice(), ["3"]);
    }
}
