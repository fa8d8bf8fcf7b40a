// CLI entry point for the Lua++ interpreter.
//
// Usage:
//   luapp                    - start a REPL
//   luapp <file>             - run a .luapp file
//   luapp --verbose <file>   - run with bytecode dump + trace + gc log

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use luapp::{InterpretResult, LUAPP_VERSION, LuaVM, VmOptions};

const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

fn show_help() {
    println!("Lua++ {LUAPP_VERSION}");
    println!("Usage: luapp [options] [script]");
    println!();
    println!("Options:");
    println!("  -h, --help       Show this help message");
    println!("  -V, --version    Show version");
    println!("  -v, --verbose    Enable debug output (bytecode dump + execution trace)");
    println!("  --dump-bytecode  Only dump bytecode, don't trace execution");
    println!("  --trace          Only trace execution, don't dump bytecode");
    println!("  --log-gc         Log garbage collection events");
    println!("  --stress-gc      Collect on every allocation (testing)");
    println!();
    println!("If no script is provided, starts interactive REPL.");
}

fn repl(vm: &mut LuaVM) {
    println!("Lua++ {LUAPP_VERSION} - Type 'exit' to quit");
    if vm.options.debug.print_code {
        println!("[verbose mode: bytecode + execution trace enabled]");
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                break;
            }
            Ok(_) => {}
        }

        if line.trim_start().starts_with("exit") {
            break;
        }

        vm.interpret(&line);
    }
}

fn run_file(vm: &mut LuaVM, path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file \"{path}\": {err}");
            return ExitCode::from(EX_IOERR);
        }
    };

    match vm.interpret_with_filename(&source, Some(path)) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(EX_DATAERR),
        InterpretResult::RuntimeError => ExitCode::from(EX_SOFTWARE),
    }
}

fn main() -> ExitCode {
    let mut options = VmOptions::default();
    let mut script_path: Option<String> = None;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-V" | "--version" => {
                println!("Lua++ {LUAPP_VERSION}");
                return ExitCode::SUCCESS;
            }
            "-h" | "--help" => {
                show_help();
                return ExitCode::SUCCESS;
            }
            "-v" | "--verbose" => {
                options.debug.print_code = true;
                options.debug.trace_execution = true;
                options.debug.log_gc = true;
            }
            "--dump-bytecode" => options.debug.print_code = true,
            "--trace" => options.debug.trace_execution = true,
            "--log-gc" => options.debug.log_gc = true,
            "--stress-gc" => options.stress_gc = true,
            other if other.starts_with('-') => {
                eprintln!("Unknown option: {other}");
                eprintln!("Try 'luapp --help' for usage.");
                return ExitCode::from(EX_USAGE);
            }
            path => script_path = Some(path.to_string()),
        }
    }

    let mut vm = LuaVM::new(options);
    vm.open_libs();

    match script_path {
        None => {
            repl(&mut vm);
            ExitCode::SUCCESS
        }
        Some(path) => run_file(&mut vm, &path),
    }
}
