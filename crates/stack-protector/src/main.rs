// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Stack protection CLI tool
//!
//! Reads textual IR from a file or stdin, inserts stack canaries into every
//! function with `!protect` buffers, and writes the result to stdout.
//!
//! Usage:
//!     stack-protector input.ir > protected.ir
//!     cat input.ir | stack-protector --guard-check __security_check_cookie

use std::{
    fs,
    io::{self, Read},
    process,
};

use ir::parse_module;
use stack_protector::{protect_module, Target, TargetInfo, Verifier};
use tracing_subscriber::EnvFilter;

struct Options {
    pointer_width: u32,
    guard_check: Option<String>,
    verify: bool,
    input: Option<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut options = Options {
            pointer_width: 8,
            guard_check: None,
            verify: false,
            input: None,
        };

        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--pointer-width" => {
                    let value = args.next().ok_or("--pointer-width needs a value")?;
                    options.pointer_width = value
                        .parse()
                        .map_err(|_| format!("invalid pointer width '{value}'"))?;
                }
                "--guard-check" => {
                    let symbol = args.next().ok_or("--guard-check needs a symbol")?;
                    options.guard_check = Some(symbol.clone());
                }
                "--verify" => options.verify = true,
                flag if flag.starts_with('-') => return Err(format!("unknown option '{flag}'")),
                path => {
                    if options.input.replace(path.to_string()).is_some() {
                        return Err("only one input file is accepted".to_string());
                    }
                }
            }
        }
        Ok(options)
    }

    fn target(&self) -> Target {
        let target = Target::new(self.pointer_width);
        match &self.guard_check {
            Some(symbol) => target.with_guard_check(symbol.clone()),
            None => target,
        }
    }
}

fn print_usage() {
    eprintln!("stack-protector - multi-word stack canary instrumentation");
    eprintln!();
    eprintln!("Usage: stack-protector [options] [input.ir] > output.ir");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --pointer-width <4|8>     Target pointer width in bytes (default 8)");
    eprintln!("  --guard-check <symbol>    Use a guard check primitive instead of compare chains");
    eprintln!("  --verify                  Verify the instrumented output");
    eprintln!("  --help, -h                Show this help message");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: warn).");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Check for --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        process::exit(0);
    }

    let options = match Options::parse(&args[1..]) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            print_usage();
            process::exit(2);
        }
    };

    // Read input from the given file or stdin
    let input = match &options.input {
        Some(path) => fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("Failed to read {path}: {e}");
            process::exit(1);
        }),
        None => {
            let mut input = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut input) {
                eprintln!("Error reading stdin: {e}");
                process::exit(1);
            }
            input
        }
    };

    let mut module = match parse_module(&input) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("Parse error: {e}");
            process::exit(1);
        }
    };

    let target = options.target();
    if let Err(e) = protect_module(&mut module, &target) {
        eprintln!("Error instrumenting: {e}");
        process::exit(1);
    }

    if options.verify {
        let mut failed = false;
        for func in module.functions() {
            let result = Verifier::new(func)
                .with_guard_check(target.guard_check())
                .verify();
            for error in result.errors() {
                eprintln!("@{}: {error}", func.name());
                failed = true;
            }
        }
        if failed {
            process::exit(1);
        }
    }

    print!("{module}");
}
