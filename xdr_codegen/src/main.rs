// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use serialib_codegen::Compiler;

#[derive(Parser)]
#[command(name = "serialib-compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a schema into its native (C) and/or dynamic (Python) sources.
    Generate {
        schema_path: PathBuf,

        #[arg(long)]
        native_header: Option<PathBuf>,

        #[arg(long)]
        native_source: Option<PathBuf>,

        #[arg(long)]
        dynamic: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> serialib_codegen::Result<()> {
    let Command::Generate {
        schema_path,
        native_header,
        native_source,
        dynamic,
    } = command;

    let stem = schema_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("schema")
        .to_string();
    let dir = schema_path.parent().map(|p| p.to_path_buf()).unwrap_or_default();

    let mut compiler = Compiler::new();
    compiler.file(&schema_path);
    compiler.native_header(native_header.unwrap_or_else(|| dir.join(format!("{stem}.h"))));
    compiler.native_source(native_source.unwrap_or_else(|| dir.join(format!("{stem}.c"))));
    compiler.dynamic(dynamic.unwrap_or_else(|| dir.join(format!("{stem}.py"))));
    compiler.run()
}
