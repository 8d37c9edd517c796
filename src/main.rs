mod bytecode;
mod driver;
mod frontend;
mod ir;
mod lang;
mod runtime;
mod semantics;
mod stdlib;

use std::{env, fs, path::Path, process};

use crate::bytecode::disasm::print_program;
use crate::driver::Driver;
use crate::frontend::parser::tokenize;
use crate::frontend::token::TokenKind;
use crate::runtime::status::ExecStatus;

fn main() {
    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let dump_ir = args.contains(&"--ir".to_string());
    let dump_bc = args.contains(&"--bc".to_string());
    let dump_bc_json = args.contains(&"--bc-json".to_string());

    // First non-flag argument is the filename; everything after it goes
    // to the interpreted program.
    let filename_pos = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|p| p + 1);

    let Some(filename_pos) = filename_pos else {
        print_usage();
        process::exit(if args.len() > 1 { 1 } else { 0 });
    };

    let filename = &args[filename_pos];
    let program_args: Vec<String> = args[filename_pos + 1..].to_vec();

    ensure_extension(filename);

    if tokens_only {
        dump_tokens(filename);
        return;
    }

    let driver = Driver::with_default_natives();

    if dump_ir {
        match driver.lower_file(Path::new(filename)) {
            Ok(ir) => println!("{:#?}", ir),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }

    let program = match driver.compile_file(Path::new(filename)) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if dump_bc {
        print_program(&program);
    }

    if dump_bc_json {
        match serde_json::to_string_pretty(&program) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("cannot serialize program: {}", e);
                process::exit(1);
            }
        }
    }

    // Dump-only modes stop before execution.
    if dump_ir || dump_bc || dump_bc_json {
        return;
    }

    let status = driver.run_program(program, program_args);

    match status {
        ExecStatus::Ok => {}
        other => {
            eprintln!("runtime error: exited with status '{}'", other);
            process::exit(1);
        }
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if ext != "wsp" {
            eprintln!("error: expected a .wsp file, got {}", filename);
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("WISP - a small scripting language on a register bytecode VM");
    println!();
    println!("Usage:");
    println!("  wisp <file.wsp> [args...]   Compile and run a program");
    println!("  wisp --tokens <file>        Show tokens only");
    println!("  wisp --ir <file>            Dump lowered IR and stop");
    println!("  wisp --bc <file>            Dump bytecode disassembly and stop");
    println!("  wisp --bc-json <file>       Dump the compiled program as JSON");
}

fn dump_tokens(filename: &str) {
    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };

    match tokenize(&source) {
        Ok(tokens) => {
            for token in tokens {
                if token.kind == TokenKind::Eof {
                    break;
                }

                println!(
                    "{:>4}:{:<3} {:?} '{}'",
                    token.line,
                    token.col,
                    token.kind,
                    token.lexeme(&source)
                );
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
