//! Front end for devicetree source: preprocessing, parsing, overlay composition, binding
//! resolution and linting.
//!
//! ```no_run
//! use dts_analyzer::{lint, resolve_types, Config, Context, TypeLoader};
//!
//! let mut ctx = Context::new(Config::default());
//! ctx.set_board("board.dts");
//! let mut diagnostics = ctx.parse();
//!
//! let mut loader = TypeLoader::new();
//! loader.add_binding_directory("dts/bindings")?;
//! resolve_types(&mut ctx, &mut loader);
//! diagnostics.extend(lint(&mut ctx));
//! # Ok::<(), dts_analyzer::Error>(())
//! ```

use std::{io, path::Path};

use thiserror::Error;

pub mod ast;
pub mod config;
pub mod context;
pub mod diagnostic;
pub mod expr;
pub mod lint;
mod parser;
pub mod preprocessor;
pub mod source;
pub mod types;

pub use crate::{
    ast::{FileId, NodeId, PHandle, Property, PropertyValue, Value, ValueType},
    config::Config,
    context::{Context, NodeRef},
    diagnostic::{Diagnostic, Severity},
    lint::lint,
    source::{FsProvider, Location, MemoryProvider, Position, SourceProvider},
    types::{resolve_types, BindingError, NodeType, TypeLoader},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Set the text of `path` and reparse. Returns the file and its own diagnostics.
pub fn parse(text: &str, path: impl AsRef<Path>, ctx: &mut Context) -> (FileId, Vec<Diagnostic>) {
    let id = ctx.set_text(path, text);
    ctx.parse();

    let diagnostics = ctx
        .file(id)
        .map(|f| f.diagnostics.clone())
        .unwrap_or_default();
    (id, diagnostics)
}

/// Rerun the whole pipeline after the text of `path` changed.
pub fn apply_edit(
    ctx: &mut Context,
    loader: &mut TypeLoader,
    path: impl AsRef<Path>,
    text: &str,
) -> Vec<Diagnostic> {
    ctx.set_text(path, text);

    let mut diagnostics = ctx.parse();
    resolve_types(ctx, loader);
    diagnostics.extend(lint(ctx));
    diagnostics
}
