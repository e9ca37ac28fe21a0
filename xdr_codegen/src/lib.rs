// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod ast;
mod codegen;
mod parser;
mod resolver;
mod scanner;
pub mod validate;
mod wire;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use ast::Schema;
use parser::Parser;
use scanner::Scanner;
use validate::ValidatedSchema;

pub type Result<T> = std::result::Result<T, SeriaError>;

/// Every way the pipeline can fail, from the first character read to the last
/// default-value check. Variants carry enough context to report a useful
/// diagnostic without a separate span-tracking layer.
#[derive(Debug)]
pub enum SeriaError {
    Lex { msg: String, line: usize },
    Parse { msg: String, line: usize },
    Resolve { member: String, msg: String },
    Validate { member: String, msg: String },
    Cycle(Vec<String>),
    Io(std::io::Error),
}

impl std::error::Error for SeriaError {}

impl fmt::Display for SeriaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SeriaError::Lex { msg, line } => write!(f, "line {line}: {msg}"),
            SeriaError::Parse { msg, line } => write!(f, "line {line}: {msg}"),
            SeriaError::Resolve { member, msg } => write!(f, "{member}: {msg}"),
            SeriaError::Validate { member, msg } => write!(f, "{member}: {msg}"),
            SeriaError::Cycle(names) => write!(f, "dependency cycle: {}", names.join(" -> ")),
            SeriaError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for SeriaError {
    fn from(e: std::io::Error) -> Self {
        SeriaError::Io(e)
    }
}

enum InputSource {
    StdIo,
    File(PathBuf),
}

/// Output targets a single `run()` call may populate. Any subset may be
/// requested; the schema is only parsed, resolved and validated once no
/// matter how many outputs are asked for.
#[derive(Default)]
pub struct Outputs {
    pub native_header: Option<PathBuf>,
    pub native_source: Option<PathBuf>,
    pub dynamic: Option<PathBuf>,
}

pub struct Compiler {
    source: InputSource,
    outputs: Outputs,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            source: InputSource::StdIo,
            outputs: Outputs::default(),
        }
    }

    pub fn file<P>(&mut self, path: P) -> &mut Self
    where
        P: AsRef<Path>,
    {
        self.source = InputSource::File(path.as_ref().to_path_buf());
        self
    }

    pub fn native_header<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.outputs.native_header = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn native_source<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.outputs.native_source = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn dynamic<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.outputs.dynamic = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn run(&mut self) -> Result<()> {
        let (source, schema_name) = match &self.source {
            InputSource::StdIo => {
                use std::io::Read;
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                (buf, "schema".to_string())
            }
            InputSource::File(path) => {
                debug!("reading schema from {}", path.display());
                let source = fs::read_to_string(path)?;
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("schema")
                    .to_string();
                (source, stem)
            }
        };

        let validated = Compiler::compile(&source)?;

        if let Some(path) = &self.outputs.native_header {
            fs::write(path, codegen::native::header(&validated, &schema_name))?;
        }
        if let Some(path) = &self.outputs.native_source {
            fs::write(path, codegen::native::source(&validated, &schema_name))?;
        }
        if let Some(path) = &self.outputs.dynamic {
            fs::write(path, codegen::dynamic::module(&validated, &schema_name))?;
        }

        info!("generated sources for schema {schema_name:?}");
        Ok(())
    }

    /// Run the lex/parse/resolve/validate pipeline, stopping short of
    /// emitting any output. Exposed so tests and tooling can inspect a
    /// [`ValidatedSchema`] directly.
    pub fn compile(source: &str) -> Result<ValidatedSchema> {
        let schema: Schema = Parser::new(Scanner::new(source))?.parse()?;
        let resolved = resolver::resolve(schema)?;
        validate::ValidatedSchema::validate(resolved)
    }
}

/// Thin, test-only re-export of the emitter entry points. `Compiler::run`
/// drives these for real CLI invocations; integration tests call them
/// directly so they can assert on the generated text without writing files.
pub mod testing {
    use super::ValidatedSchema;

    pub fn native_header(schema: &ValidatedSchema, schema_name: &str) -> String {
        crate::codegen::native::header(schema, schema_name)
    }

    pub fn native_source(schema: &ValidatedSchema, schema_name: &str) -> String {
        crate::codegen::native::source(schema, schema_name)
    }

    pub fn dynamic_module(schema: &ValidatedSchema, schema_name: &str) -> String {
        crate::codegen::dynamic::module(schema, schema_name)
    }
}
