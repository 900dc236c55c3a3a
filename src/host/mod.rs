//! Host-code bridge: renders a generated unit, analyzes the result and keeps
//! the semantic workspace in step with it.

mod render;
mod syntax;
mod workspace;

use std::ops::Range;

pub use render::{render, RenderedCode};
pub use syntax::{
    HostMember, HostSyntaxError, HostSyntaxUnit, HostToken, HostType, LineDirective, MemberKind,
    Termination,
};
pub use workspace::{InMemoryWorkspace, Workspace, WorkspaceEntry};

use crate::document::SourceMap;
use crate::grammar::GeneratedUnit;
use crate::settings::{GrammarProfile, Project};

/// Suffix of generated document identifiers.
pub const GENERATED_SUFFIX: &str = ".g.cs";

/// Workspace identifier of the code generated for `source_path`.
pub fn generated_name(source_path: &str) -> String {
    format!("{source_path}{GENERATED_SUFFIX}")
}

/// Rendered host code with its syntax unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCode {
    pub name: String,
    pub text: String,
    pub mappings: SourceMap,
    pub syntax: HostSyntaxUnit,
}

impl HostCode {
    /// Host code with no mapping back to a template.
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            name: name.into(),
            syntax: HostSyntaxUnit::parse(&text),
            text,
            mappings: SourceMap::default(),
        }
    }

    /// Syntax errors in template coordinates.
    ///
    /// Errors in scaffolding the template does not own are dropped; an error
    /// whose span leaves its chunk is reduced to its start.
    pub fn source_errors(&self) -> Vec<HostSyntaxError> {
        self.syntax
            .errors
            .iter()
            .filter_map(|error| {
                let span = self.map_span(&error.span)?;
                Some(HostSyntaxError {
                    message: error.message.clone(),
                    span,
                })
            })
            .collect()
    }

    fn map_span(&self, span: &Range<usize>) -> Option<Range<usize>> {
        self.mappings.span_to_source(span).or_else(|| {
            let start = self.mappings.to_source(span.start)?;
            Some(start..start)
        })
    }
}

/// Render `unit` and analyze the result.
pub fn bridge(unit: &GeneratedUnit, profile: &GrammarProfile) -> HostCode {
    let RenderedCode { text, mappings } = render(unit, profile);
    let syntax = HostSyntaxUnit::parse(&text);
    tracing::debug!(
        name = %unit.source_path,
        len = text.len(),
        errors = syntax.errors.len(),
        "bridged host code"
    );
    HostCode {
        name: generated_name(&unit.source_path),
        text,
        mappings,
        syntax,
    }
}

/// Register `code` for `project`; skipped when the document has no project.
pub fn register(
    workspace: &dyn Workspace,
    project: Option<&Project>,
    code: std::sync::Arc<HostCode>,
) -> Option<u64> {
    let Some(project) = project else {
        tracing::debug!(name = %code.name, "no owning project, skipping registration");
        return None;
    };
    Some(workspace.register(project, code))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::document::LineIndex;
    use crate::grammar::TemplateGrammar;

    fn bridge_source(source: &str) -> HostCode {
        let grammar = TemplateGrammar::new(GrammarProfile::default());
        let tree = grammar.parse(source).root;
        let path = Path::new("/site/Index.cshtml");
        let unit = grammar.generate(&tree, &LineIndex::new(source), path);
        bridge(&unit, grammar.profile())
    }

    #[test]
    fn name_carries_the_suffix() {
        assert_eq!(generated_name("/site/Index.cshtml"), "/site/Index.cshtml.g.cs");
        assert_eq!(bridge_source("<p></p>").name, "/site/Index.cshtml.g.cs");
    }

    #[test]
    fn clean_template_has_clean_host_code() {
        let code = bridge_source("@{ var x = 1; }<p>@x</p>");
        assert!(code.syntax.errors.is_empty(), "{:?}", code.syntax.errors);
        assert!(code.syntax.member("Execute").is_some());
        assert_eq!(code.syntax.namespace.as_deref(), Some("ASP"));
    }

    #[test]
    fn errors_map_back_to_the_template() {
        let source = "<p>\n@{ Show(1; }\n</p>";
        let code = bridge_source(source);
        let errors = code.source_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "missing closing ')'");
        let paren = source.find('(').unwrap();
        assert_eq!(errors[0].span, paren..paren + 1);
    }

    #[test]
    fn registration_needs_a_project() {
        let workspace = InMemoryWorkspace::new();
        let code = Arc::new(HostCode::from_text("a.g.cs", ""));
        assert_eq!(register(&workspace, None, Arc::clone(&code)), None);
        assert!(workspace.is_empty());

        let project = Project::new("shop", "/site");
        assert_eq!(register(&workspace, Some(&project), code), Some(1));
        assert_eq!(workspace.len(), 1);
    }
}
