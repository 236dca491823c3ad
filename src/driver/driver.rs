//! The compilation driver: file in, assembly out.
//!
//! Everything here is a thin wrapper around the library pipeline. The
//! one responsibility of note is diagnostic rendering: the core surfaces
//! `(span, message)` and the driver turns that into a GCC-style
//! `file:line:col: error: message` line with a source snippet and caret.

use clap::Parser as ClapParser;
use log::debug;
use std::fs;
use std::io::Write;

use crate::backend::codegen::{self, CodegenOutput};
use crate::common::error::CompileError;
use crate::common::source::SourceMap;
use crate::driver::cli::Cli;
use crate::frontend::{lexer, parser};
use crate::Context;

/// Run one compilation per the command line. Returns the process exit
/// code: any compile error is fatal and produces no output.
pub fn run() -> i32 {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mcc: error: cannot read '{}': {}", cli.input.display(), e);
            return 1;
        }
    };
    let source_map = SourceMap::new(cli.input.display().to_string(), source);

    match compile(&source_map, &cli) {
        Ok(Some(output)) => {
            if let Err(e) = write_output(&cli, &output) {
                eprintln!("mcc: error: {}", e);
                return 1;
            }
            0
        }
        Ok(None) => 0, // --dump-ast
        Err(e) => {
            render_error(&source_map, &e);
            1
        }
    }
}

fn compile(source_map: &SourceMap, cli: &Cli) -> Result<Option<CodegenOutput>, CompileError> {
    let tokens = lexer::lex(source_map.content())?;
    debug!("lexed {} tokens", tokens.len());

    let mut ctx = Context::new();
    parser::parse(&tokens, &mut ctx)?;

    if cli.dump_ast {
        for (_, obj) in ctx.objects.iter() {
            println!("{:#?}", obj);
        }
        return Ok(None);
    }

    let output = codegen::generate(&mut ctx);
    debug!(
        "generated {} bytes of assembly, {} relocations",
        output.asm.len(),
        output.relocations.len()
    );
    Ok(Some(output))
}

fn write_output(cli: &Cli, output: &CodegenOutput) -> std::io::Result<()> {
    match &cli.output {
        Some(path) => fs::write(path, &output.asm)?,
        None => {
            let stdout = std::io::stdout();
            stdout.lock().write_all(output.asm.as_bytes())?;
        }
    }
    if cli.relocs {
        for r in &output.relocations {
            eprintln!("{} {} {} {:+}", r.symbol, r.offset, r.target, r.addend);
        }
    }
    Ok(())
}

/// GCC-style rendering: location prefix, message, snippet, caret.
fn render_error(source_map: &SourceMap, err: &CompileError) {
    let loc = source_map.resolve(err.span);
    eprintln!("{}: error: {}", loc, err);
    if let Some(line) = source_map.line_text(err.span) {
        if !line.trim().is_empty() {
            eprintln!(" {}", line);
            let width = (err.span.end.saturating_sub(err.span.start)).max(1) as usize;
            let caret = format!("^{}", "~".repeat(width.saturating_sub(1)));
            eprintln!(" {}{}", " ".repeat(loc.column as usize - 1), caret);
        }
    }
}
