//! Host-language compilation unit generated from a template tree.
//!
//! The unit is a small, language-neutral description of a class: imports,
//! base type and members whose bodies are statements. Every fragment of user
//! code remembers where it came from so the renderer can emit line pragmas
//! and build a source map.

use std::path::Path;

use crate::document::LineIndex;
use crate::settings::{GrammarKind, GrammarProfile};

use super::tree::{Block, BlockKind, Node, SpanKind};

pub(crate) const GENERATED_NAMESPACE: &str = "ASP";
const HELPER_WRITER: &str = "__razor_helper_writer";

/// Where a fragment of user code starts in the template buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub offset: usize,
    /// Zero-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
}

/// User code copied verbatim into the generated unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment {
    pub text: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedStatement {
    Code(CodeFragment),
    Write {
        expr: CodeFragment,
        writer: Option<&'static str>,
    },
    WriteLiteral {
        text: String,
        writer: Option<&'static str>,
    },
    DefineSection {
        name: String,
        body: Vec<GeneratedStatement>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMethod {
    pub signature: String,
    pub prologue: Option<String>,
    pub body: Vec<GeneratedStatement>,
    pub epilogue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedMember {
    Method(GeneratedMethod),
    /// A class member written by the user in `@functions`.
    Fragment(CodeFragment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUnit {
    pub source_path: String,
    pub namespace: String,
    pub imports: Vec<String>,
    pub class_name: String,
    pub base_type: Option<String>,
    pub members: Vec<GeneratedMember>,
}

impl GeneratedUnit {
    /// Body of the page's `Execute` method.
    pub fn execute(&self) -> Option<&GeneratedMethod> {
        self.members.iter().find_map(|member| match member {
            GeneratedMember::Method(method) if method.signature.ends_with("Execute()") => {
                Some(method)
            }
            _ => None,
        })
    }
}

pub(crate) fn generate(
    tree: &Block,
    profile: &GrammarProfile,
    line_index: &LineIndex,
    source_path: &Path,
) -> GeneratedUnit {
    let mut generator = Generator {
        line_index,
        imports: profile.namespace_imports().to_vec(),
        model: None,
        inherits: None,
        helpers: Vec::new(),
        functions: Vec::new(),
    };
    let body = generator.statements(&tree.children, None);

    let kind = profile.kind();
    let execute = GeneratedMethod {
        signature: match kind {
            GrammarKind::Template => "public void Execute()".to_string(),
            GrammarKind::WebPage | GrammarKind::WebCode => {
                "public override void Execute()".to_string()
            }
        },
        prologue: None,
        body,
        epilogue: None,
    };

    let base_type = match kind {
        GrammarKind::WebPage => Some(generator.inherits.clone().unwrap_or_else(|| {
            format!(
                "System.Web.Mvc.WebViewPage<{}>",
                generator.model.as_deref().unwrap_or("dynamic")
            )
        })),
        GrammarKind::WebCode => Some(
            generator
                .inherits
                .clone()
                .unwrap_or_else(|| "System.Web.WebPages.HelperPage".to_string()),
        ),
        GrammarKind::Template => generator.inherits.clone(),
    };

    let mut members: Vec<GeneratedMember> = generator
        .functions
        .into_iter()
        .map(GeneratedMember::Fragment)
        .collect();
    members.extend(generator.helpers.into_iter().map(GeneratedMember::Method));
    members.push(GeneratedMember::Method(execute));

    GeneratedUnit {
        source_path: source_path.display().to_string(),
        namespace: GENERATED_NAMESPACE.to_string(),
        imports: generator.imports,
        class_name: class_name(profile, source_path),
        base_type,
        members,
    }
}

/// Class name: `_Page_` plus the virtual path for pages, the file stem otherwise.
fn class_name(profile: &GrammarProfile, source_path: &Path) -> String {
    match profile {
        GrammarProfile::WebPage { virtual_path, .. } => {
            let relative = virtual_path.trim_start_matches("~/");
            format!("_Page_{}", sanitize(relative))
        }
        GrammarProfile::WebCode { .. } | GrammarProfile::Template { .. } => {
            let stem = source_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Template".to_string());
            sanitize(&stem)
        }
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

struct Generator<'a> {
    line_index: &'a LineIndex,
    imports: Vec<String>,
    model: Option<String>,
    inherits: Option<String>,
    helpers: Vec<GeneratedMethod>,
    functions: Vec<CodeFragment>,
}

impl Generator<'_> {
    fn fragment(&self, start: usize, text: &str) -> CodeFragment {
        let position = self.line_index.offset_to_position(start);
        CodeFragment {
            text: text.to_string(),
            location: Some(SourceLocation {
                offset: start,
                line: position.line,
                column: position.character,
            }),
        }
    }

    fn statements(
        &mut self,
        children: &[Node],
        writer: Option<&'static str>,
    ) -> Vec<GeneratedStatement> {
        let mut out = Vec::new();
        for child in children {
            match child {
                Node::Span(span) => match span.kind {
                    SpanKind::Markup => out.push(GeneratedStatement::WriteLiteral {
                        text: span.content.replace("@@", "@"),
                        writer,
                    }),
                    SpanKind::Code => {
                        out.push(GeneratedStatement::Code(
                            self.fragment(span.start, &span.content),
                        ));
                    }
                    SpanKind::Comment | SpanKind::Transition => {}
                },
                Node::Block(block) => match block.kind {
                    BlockKind::Markup | BlockKind::Statement => {
                        out.extend(self.statements(&block.children, writer));
                    }
                    BlockKind::Expression => {
                        let code = block
                            .children
                            .iter()
                            .filter_map(Node::as_span)
                            .find(|span| span.kind == SpanKind::Code);
                        if let Some(code) = code {
                            out.push(GeneratedStatement::Write {
                                expr: self.fragment(code.start, &code.content),
                                writer,
                            });
                        }
                    }
                    BlockKind::Directive => self.directive(block),
                    BlockKind::Helper => self.helper(block),
                    BlockKind::Functions => self.functions(block),
                    BlockKind::Section => {
                        let body = block
                            .child_blocks()
                            .filter(|inner| inner.kind == BlockKind::Markup)
                            .flat_map(|inner| self.statements(&inner.children, writer))
                            .collect();
                        out.push(GeneratedStatement::DefineSection {
                            name: block.name.clone().unwrap_or_default(),
                            body,
                        });
                    }
                    BlockKind::Comment => {}
                },
            }
        }
        out
    }

    fn directive(&mut self, block: &Block) {
        let Some(code) = first_code(block) else {
            return;
        };
        let keyword = block.name.as_deref().unwrap_or_default();
        let value = code
            .trim()
            .strip_prefix(keyword)
            .unwrap_or_default()
            .trim()
            .trim_end_matches(';')
            .trim();
        if value.is_empty() {
            return;
        }
        match keyword {
            "using" => {
                if !self.imports.iter().any(|import| import == value) {
                    self.imports.push(value.to_string());
                }
            }
            "model" => self.model = Some(value.to_string()),
            "inherits" => self.inherits = Some(value.to_string()),
            _ => {}
        }
    }

    fn helper(&mut self, block: &Block) {
        let (Some(name), Some(header)) = (block.name.as_deref(), first_code(block)) else {
            return;
        };
        let params = header
            .find('(')
            .zip(header.rfind(')'))
            .filter(|(open, close)| open < close)
            .map(|(open, close)| header[open + 1..close].trim())
            .unwrap_or_default();
        let body = self.statements(body_of(block), Some(HELPER_WRITER));
        self.helpers.push(GeneratedMethod {
            signature: format!(
                "public static System.Web.WebPages.HelperResult {name}({params})"
            ),
            prologue: Some(format!(
                "return new System.Web.WebPages.HelperResult({HELPER_WRITER} => {{"
            )),
            body,
            epilogue: Some("});".to_string()),
        });
    }

    fn functions(&mut self, block: &Block) {
        for node in body_of(block) {
            if let Node::Span(span) = node {
                if span.kind == SpanKind::Code {
                    let fragment = self.fragment(span.start, &span.content);
                    self.functions.push(fragment);
                }
            }
        }
    }
}

fn first_code(block: &Block) -> Option<&str> {
    block
        .children
        .iter()
        .filter_map(Node::as_span)
        .find(|span| span.kind == SpanKind::Code)
        .map(|span| span.content.as_str())
}

/// Children between the header span and the closing `}` span.
fn body_of(block: &Block) -> &[Node] {
    let children = block.children.as_slice();
    let end = match children.last() {
        Some(Node::Span(span)) if children.len() > 2 && span.content == "}" => {
            children.len() - 1
        }
        _ => children.len(),
    };
    children.get(2..end).unwrap_or_default()
}
