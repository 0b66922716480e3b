//! Cross-file template-name resolution.
//!
//! Template names live in one flat namespace per workspace: `{{define}}` and
//! `{{block}}` introduce them, `{{template}}` consumes them. Analysis builds
//! the workspace-wide name table and resolves every reference against it.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::syntax::{ParsedTemplate, Span, TemplateDef};

/// A semantic error found during workspace analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeError {
    pub message: String,
    pub span: Span,
}

/// A reference resolved against the workspace name table. `target` is the
/// defining file's URI and the span of the quoted name there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub name: String,
    pub name_span: Span,
    pub target: Option<(String, Span)>,
}

/// Per-file semantic analysis result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedTemplate {
    pub uri: String,
    pub defines: Vec<TemplateDef>,
    pub refs: Vec<ResolvedRef>,
}

/// Workspace-wide name table: template name to (defining URI, name span).
/// When the same name is defined twice the lexically first file wins and the
/// later definition is reported.
fn name_table(
    parsed: &HashMap<String, ParsedTemplate>,
) -> (
    BTreeMap<String, (String, Span)>,
    HashMap<String, Vec<AnalyzeError>>,
) {
    let mut table: BTreeMap<String, (String, Span)> = BTreeMap::new();
    let mut errors: HashMap<String, Vec<AnalyzeError>> = HashMap::new();

    let mut uris: Vec<&String> = parsed.keys().collect();
    uris.sort();

    for uri in uris {
        for def in &parsed[uri].defines {
            match table.get(&def.name) {
                None => {
                    table.insert(def.name.clone(), (uri.clone(), def.name_span));
                }
                Some((first_uri, _)) => {
                    errors.entry(uri.clone()).or_default().push(AnalyzeError {
                        message: format!(
                            "template {:?} redefined; first defined in {}",
                            def.name, first_uri
                        ),
                        span: def.name_span,
                    });
                }
            }
        }
    }

    (table, errors)
}

fn analyze_file(
    uri: &str,
    parsed: &ParsedTemplate,
    table: &BTreeMap<String, (String, Span)>,
    errors: &mut Vec<AnalyzeError>,
) -> AnalyzedTemplate {
    let mut refs = Vec::with_capacity(parsed.refs.len());
    for reference in &parsed.refs {
        let target = table.get(&reference.name).cloned();
        if target.is_none() {
            errors.push(AnalyzeError {
                message: format!(
                    "template {:?} is not defined in the workspace",
                    reference.name
                ),
                span: reference.name_span,
            });
        }
        refs.push(ResolvedRef {
            name: reference.name.clone(),
            name_span: reference.name_span,
            target,
        });
    }

    AnalyzedTemplate {
        uri: uri.to_string(),
        defines: parsed.defines.clone(),
        refs,
    }
}

/// Analyze every parsed file. Each input URI gets an entry in both output
/// maps, even when its error list is empty.
pub fn full_workspace_analysis(
    parsed: &HashMap<String, ParsedTemplate>,
) -> (
    HashMap<String, AnalyzedTemplate>,
    HashMap<String, Vec<AnalyzeError>>,
) {
    let (table, mut errors_by_uri) = name_table(parsed);

    let mut analyzed = HashMap::with_capacity(parsed.len());
    for (uri, tree) in parsed {
        let mut errors = errors_by_uri.remove(uri).unwrap_or_default();
        analyzed.insert(uri.clone(), analyze_file(uri, tree, &table, &mut errors));
        errors_by_uri.insert(uri.clone(), errors);
    }

    (analyzed, errors_by_uri)
}

/// Re-analyze the changed files plus every file they affect: a file is
/// affected when it references a name defined in a changed file, or when it
/// holds a reference that does not resolve (a changed file may have just
/// introduced or removed that definition).
pub fn batch_change_analysis(
    parsed: &HashMap<String, ParsedTemplate>,
    changed: &[String],
) -> (
    HashMap<String, AnalyzedTemplate>,
    HashMap<String, Vec<AnalyzeError>>,
) {
    let (table, mut errors_by_uri) = name_table(parsed);

    let changed_set: HashSet<&str> = changed.iter().map(String::as_str).collect();
    let names_in_changed: HashSet<&str> = parsed
        .iter()
        .filter(|(uri, _)| changed_set.contains(uri.as_str()))
        .flat_map(|(_, tree)| tree.defines.iter().map(|d| d.name.as_str()))
        .collect();

    let affected = parsed.iter().filter(|(uri, tree)| {
        changed_set.contains(uri.as_str())
            || tree.refs.iter().any(|r| {
                names_in_changed.contains(r.name.as_str()) || !table.contains_key(&r.name)
            })
    });

    let mut analyzed = HashMap::new();
    let mut errors_out = HashMap::new();
    for (uri, tree) in affected {
        let mut errors = errors_by_uri.remove(uri).unwrap_or_default();
        analyzed.insert(uri.clone(), analyze_file(uri, tree, &table, &mut errors));
        errors_out.insert(uri.clone(), errors);
    }

    (analyzed, errors_out)
}
