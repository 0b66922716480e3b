//! Parser and semantic analyzer for Go `text/template` / `html/template`
//! files.
//!
//! The crate exposes a deliberately small surface to the language server:
//!
//! - [`parse_single_file`] — lex and structurally parse one template source.
//! - [`full_workspace_analysis`] / [`batch_change_analysis`] — resolve
//!   template names across a set of parsed files.
//! - [`hover`], [`go_to_definition`], [`folding_range`] — editor features
//!   computed from parse and analysis results.
//!
//! Positions are zero-based; columns count UTF-16 code units, matching the
//! editor protocol the server speaks.

mod check;
mod features;
mod syntax;

pub use check::{
    AnalyzeError, AnalyzedTemplate, ResolvedRef, batch_change_analysis, full_workspace_analysis,
};
pub use features::{DefinitionError, DefinitionSite, folding_range, go_to_definition, hover};
pub use syntax::{
    CommentBlock, FoldGroup, ParseError, ParsedTemplate, Position, Span, TemplateDef, TemplateRef,
    parse_single_file,
};
