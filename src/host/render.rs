//! Text rendering of a generated unit.
//!
//! Formatting is fixed: no indentation and one blank line between members.
//! With line pragmas on, every user fragment is wrapped in `#line` directives
//! and padded so it starts at its template column.

use crate::document::{OffsetMapper, SourceMap};
use crate::grammar::{
    CodeFragment, GeneratedMember, GeneratedMethod, GeneratedStatement, GeneratedUnit,
};
use crate::settings::GrammarProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCode {
    pub text: String,
    /// Where each user fragment landed in `text`.
    pub mappings: SourceMap,
}

pub fn render(unit: &GeneratedUnit, profile: &GrammarProfile) -> RenderedCode {
    let mut writer = Writer {
        out: String::new(),
        mappings: SourceMap::default(),
        line_pragmas: profile.line_pragmas(),
        source_path: &unit.source_path,
    };
    writer.unit(unit);
    RenderedCode {
        text: writer.out,
        mappings: writer.mappings,
    }
}

struct Writer<'a> {
    out: String,
    mappings: SourceMap,
    line_pragmas: bool,
    source_path: &'a str,
}

impl Writer<'_> {
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn unit(&mut self, unit: &GeneratedUnit) {
        self.line(&format!("namespace {}", unit.namespace));
        self.line("{");
        for import in &unit.imports {
            self.line(&format!("using {import};"));
        }
        self.line("");
        match &unit.base_type {
            Some(base) => self.line(&format!("public class {} : {}", unit.class_name, base)),
            None => self.line(&format!("public class {}", unit.class_name)),
        }
        self.line("{");
        for member in &unit.members {
            self.line("");
            match member {
                GeneratedMember::Method(method) => self.method(method),
                GeneratedMember::Fragment(fragment) => self.mapped("", fragment, ""),
            }
        }
        self.line("}");
        self.line("}");
    }

    fn method(&mut self, method: &GeneratedMethod) {
        self.line(&method.signature);
        self.line("{");
        if let Some(prologue) = &method.prologue {
            self.line(prologue);
        }
        self.statements(&method.body);
        if let Some(epilogue) = &method.epilogue {
            self.line(epilogue);
        }
        self.line("}");
    }

    fn statements(&mut self, statements: &[GeneratedStatement]) {
        for statement in statements {
            match statement {
                GeneratedStatement::Code(fragment) => self.mapped("", fragment, ""),
                GeneratedStatement::Write { expr, writer } => {
                    let prefix = match writer {
                        Some(writer) => format!("WriteTo({writer}, "),
                        None => "Write(".to_string(),
                    };
                    self.mapped(&prefix, expr, ");");
                }
                GeneratedStatement::WriteLiteral { text, writer } => {
                    let literal = escape(text);
                    match writer {
                        Some(writer) => {
                            self.line(&format!("WriteLiteralTo({writer}, \"{literal}\");"))
                        }
                        None => self.line(&format!("WriteLiteral(\"{literal}\");")),
                    }
                }
                GeneratedStatement::DefineSection { name, body } => {
                    self.line(&format!("DefineSection(\"{}\", () => {{", escape(name)));
                    self.statements(body);
                    self.line("});");
                }
            }
        }
    }

    /// User code, optionally wrapped in line pragmas.
    fn mapped(&mut self, prefix: &str, fragment: &CodeFragment, suffix: &str) {
        let pragma = fragment.location.filter(|_| self.line_pragmas);
        if let Some(location) = pragma {
            self.line(&format!("#line {} \"{}\"", location.line + 1, self.source_path));
        }
        self.out.push_str(prefix);
        if let Some(location) = pragma {
            let padding = (location.column as usize).saturating_sub(prefix.len());
            self.out.extend(std::iter::repeat(' ').take(padding));
        }
        if let Some(location) = fragment.location {
            self.mappings.push(OffsetMapper::new(
                location.offset,
                self.out.len(),
                fragment.text.len(),
            ));
        }
        self.out.push_str(&fragment.text);
        self.line(suffix);
        if pragma.is_some() {
            self.line("#line default");
            self.line("#line hidden");
        }
    }
}

/// Escape `text` for a regular string literal.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use expect_test::expect;

    use super::*;
    use crate::document::LineIndex;
    use crate::grammar::TemplateGrammar;

    fn render_source(source: &str, profile: GrammarProfile) -> RenderedCode {
        let grammar = TemplateGrammar::new(profile);
        let tree = grammar.parse(source).root;
        let path = Path::new("/site/Index.cshtml");
        let unit = grammar.generate(&tree, &LineIndex::new(source), path);
        render(&unit, grammar.profile())
    }

    fn page(line_pragmas: bool) -> GrammarProfile {
        GrammarProfile::WebPage {
            virtual_path: "~/Index.cshtml".to_string(),
            namespace_imports: vec!["System.Web.Mvc".to_string()],
            line_pragmas,
        }
    }

    #[test]
    fn renders_without_pragmas() {
        let rendered = render_source("@{var x = 1;}<p>@x</p>", page(false));
        expect![[r#"
            namespace ASP
            {
            using System.Web.Mvc;

            public class _Page_Index_cshtml : System.Web.Mvc.WebViewPage<dynamic>
            {

            public override void Execute()
            {
            var x = 1;
            WriteLiteral("<p>");
            Write(x);
            WriteLiteral("</p>");
            }
            }
            }
        "#]]
        .assert_eq(&rendered.text);
    }

    #[test]
    fn pragmas_pad_to_the_source_column() {
        let rendered = render_source("<p>\n  @name</p>", page(true));
        expect![[r#"
            namespace ASP
            {
            using System.Web.Mvc;

            public class _Page_Index_cshtml : System.Web.Mvc.WebViewPage<dynamic>
            {

            public override void Execute()
            {
            WriteLiteral("<p>\n  ");
            #line 2 "/site/Index.cshtml"
            Write(name);
            #line default
            #line hidden
            WriteLiteral("</p>");
            }
            }
            }
        "#]]
        .assert_eq(&rendered.text);
    }

    #[test]
    fn mappings_point_back_at_the_template() {
        let source = "<p>\n    @{title();}</p>";
        let rendered = render_source(source, page(true));
        let at = rendered.text.find("title();").unwrap();
        assert_eq!(rendered.mappings.to_source(at), source.find("title"));
        let line = rendered.text[..at].rsplit('\n').next().unwrap();
        assert_eq!(line, " ".repeat(6));
    }

    #[test]
    fn helpers_write_through_the_helper_writer() {
        let rendered = render_source("@helper Bold(string s) {\n<b>@s</b>\n}", page(false));
        assert!(rendered
            .text
            .contains("public static System.Web.WebPages.HelperResult Bold(string s)"));
        assert!(rendered.text.contains("WriteTo(__razor_helper_writer, s);"));
        assert!(rendered
            .text
            .contains("WriteLiteralTo(__razor_helper_writer, \"<b>\");"));
    }

    #[test]
    fn members_are_separated_by_blank_lines() {
        let rendered = render_source("@functions { int n; }\n<p></p>", page(false));
        assert!(rendered.text.contains("{\n\n int n; \n\npublic override void Execute()"));
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(escape("a \"b\"\\\n"), "a \\\"b\\\"\\\\\\n");
    }
}
