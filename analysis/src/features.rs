//! Editor features computed from parse and analysis results.

use crate::check::AnalyzedTemplate;
use crate::syntax::{CommentBlock, FoldGroup, ParsedTemplate, Position, Span};

/// A resolved definition site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSite {
    pub uri: String,
    pub span: Span,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("position {line}:{character} is not inside a template reference")]
    NotAReference { line: u32, character: u32 },
}

/// Hover text for the symbol under `position`, as markdown, with the span it
/// covers. An empty string means there is nothing to show.
pub fn hover(file: &AnalyzedTemplate, position: Position) -> (String, Span) {
    for def in &file.defines {
        if def.name_span.contains(position) {
            let text = format!(
                "```gotemplate\n{{{{define {:?}}}}}\n```\n\nTemplate defined in this file.",
                def.name
            );
            return (text, def.name_span);
        }
    }

    for reference in &file.refs {
        if reference.name_span.contains(position) {
            let text = match &reference.target {
                Some((uri, _)) => format!(
                    "```gotemplate\n{{{{template {:?}}}}}\n```\n\nDefined in `{uri}`.",
                    reference.name
                ),
                None => format!(
                    "```gotemplate\n{{{{template {:?}}}}}\n```\n\nNot defined in the workspace.",
                    reference.name
                ),
            };
            return (text, reference.name_span);
        }
    }

    (String::new(), Span::default())
}

/// Definition sites for the template reference under `position`. An
/// unresolved reference yields an empty list; a position outside any
/// reference is an error.
pub fn go_to_definition(
    file: &AnalyzedTemplate,
    position: Position,
) -> Result<Vec<DefinitionSite>, DefinitionError> {
    for reference in &file.refs {
        if reference.name_span.contains(position) {
            return Ok(reference
                .target
                .iter()
                .map(|(uri, span)| DefinitionSite {
                    uri: uri.clone(),
                    span: *span,
                })
                .collect());
        }
    }

    Err(DefinitionError::NotAReference {
        line: position.line,
        character: position.character,
    })
}

/// Fold groups and comment blocks for a parse tree. Tolerates `None` so the
/// server can answer folding requests before the first analysis pass.
pub fn folding_range(parsed: Option<&ParsedTemplate>) -> (Vec<FoldGroup>, Vec<CommentBlock>) {
    match parsed {
        Some(tree) => (tree.groups.clone(), tree.comments.clone()),
        None => (Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::full_workspace_analysis;
    use crate::syntax::parse_single_file;
    use std::collections::HashMap;

    fn analyzed(files: &[(&str, &str)]) -> HashMap<String, AnalyzedTemplate> {
        let parsed = files
            .iter()
            .map(|(uri, src)| (uri.to_string(), parse_single_file(src.as_bytes()).0))
            .collect();
        full_workspace_analysis(&parsed).0
    }

    #[test]
    fn hover_on_reference_names_the_defining_file() {
        let files = analyzed(&[
            ("file:///r/a.tmpl", "{{define \"header\"}}h{{end}}"),
            ("file:///r/b.tmpl", "{{template \"header\"}}"),
        ]);
        // Inside the quoted name of the reference.
        let (text, span) = hover(&files["file:///r/b.tmpl"], Position::new(0, 12));
        assert!(text.contains("{{template \"header\"}}"));
        assert!(text.contains("file:///r/a.tmpl"));
        assert_eq!(span.start, Position::new(0, 11));
    }

    #[test]
    fn hover_on_definition_shows_the_signature() {
        let files = analyzed(&[("file:///r/a.tmpl", "{{define \"header\"}}h{{end}}")]);
        let (text, _) = hover(&files["file:///r/a.tmpl"], Position::new(0, 10));
        assert!(text.contains("{{define \"header\"}}"));
    }

    #[test]
    fn hover_elsewhere_is_empty() {
        let files = analyzed(&[("file:///r/a.tmpl", "plain {{.Field}} text")]);
        let (text, _) = hover(&files["file:///r/a.tmpl"], Position::new(0, 2));
        assert!(text.is_empty());
    }

    #[test]
    fn definition_resolves_across_files() {
        let files = analyzed(&[
            ("file:///r/a.tmpl", "{{define \"header\"}}h{{end}}"),
            ("file:///r/b.tmpl", "{{template \"header\"}}"),
        ]);
        let sites = go_to_definition(&files["file:///r/b.tmpl"], Position::new(0, 5)).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].uri, "file:///r/a.tmpl");
        assert_eq!(sites[0].span.start, Position::new(0, 9));
    }

    #[test]
    fn definition_of_unresolved_reference_is_empty() {
        let files = analyzed(&[("file:///r/b.tmpl", "{{template \"ghost\"}}")]);
        let sites = go_to_definition(&files["file:///r/b.tmpl"], Position::new(0, 5)).unwrap();
        assert!(sites.is_empty());
    }

    #[test]
    fn definition_outside_any_reference_errors() {
        let files = analyzed(&[("file:///r/b.tmpl", "text {{template \"t\"}}")]);
        let err = go_to_definition(&files["file:///r/b.tmpl"], Position::new(0, 1)).unwrap_err();
        assert!(matches!(err, DefinitionError::NotAReference { .. }));
    }

    #[test]
    fn folding_tolerates_missing_tree() {
        let (groups, comments) = folding_range(None);
        assert!(groups.is_empty());
        assert!(comments.is_empty());
    }

    #[test]
    fn folding_returns_groups_and_comments() {
        let (tree, _) =
            parse_single_file(b"{{if .A}}\nx\n{{end}}\n{{/* import \"fmt\" */}}\n");
        let (groups, comments) = folding_range(Some(&tree));
        assert_eq!(groups.len(), 1);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].import_block);
    }
}
