//! A small, inspectable C compiler: token sequence in, x86-64 assembly
//! plus a relocation table out.
//!
//! The pipeline is deliberately short: a single-pass recursive-descent
//! parser builds a fully-typed AST (resolving scopes, inferring types,
//! and laying out aggregates as it goes), and the code generator walks
//! the finished object table directly. There is no separate semantic
//! pass and no intermediate representation. The first error aborts the
//! compilation.

pub mod backend;
pub mod common;
pub mod driver;
pub mod frontend;

use backend::codegen::CodegenOutput;
use backend::object::ObjectTable;
use common::error::Result;
use frontend::ast::LabelId;
use frontend::types::TypeArena;

/// All compilation-wide state, threaded explicitly through the parser
/// and the code generator. Nothing in the compiler is global, so two
/// compilations never interfere and each is independently testable.
pub struct Context {
    pub types: TypeArena,
    pub objects: ObjectTable,
    /// Monotonically increasing label counter shared by the parser
    /// (loop/switch/goto labels) and the code generator (branch labels);
    /// a single counter guarantees no collisions across functions.
    pub(crate) label_counter: u32,
}

impl Context {
    pub fn new() -> Self {
        Self {
            types: TypeArena::new(),
            objects: ObjectTable::new(),
            label_counter: 0,
        }
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.label_counter);
        self.label_counter += 1;
        id
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile one source text to assembly and a relocation table.
pub fn compile(source: &str) -> Result<CodegenOutput> {
    let tokens = frontend::lexer::lex(source)?;
    let mut ctx = Context::new();
    frontend::parser::parse(&tokens, &mut ctx)?;
    Ok(backend::codegen::generate(&mut ctx))
}

/// Entry point shared by the binary. Spawns the real work on a thread
/// with a large stack: the parser and emitter recurse per nesting level,
/// and deeply nested source would overflow the default stack.
pub fn compiler_main() {
    const STACK_SIZE: usize = 64 * 1024 * 1024; // 64 MB
    let handler = std::thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(driver::run)
        .expect("failed to spawn main thread");

    match handler.join() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(s) = e.downcast_ref::<&str>() {
                eprintln!("mcc: internal error: {}", s);
            } else if let Some(s) = e.downcast_ref::<String>() {
                eprintln!("mcc: internal error: {}", s);
            } else {
                eprintln!("mcc: internal error (thread panicked)");
            }
            std::process::exit(1);
        }
    }
}
