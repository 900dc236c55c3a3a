//! Structural syntax analysis of rendered host code.
//!
//! This is not a full host-language parser. It tokenizes with logos and
//! tracks delimiters to recover the outline the editor needs (usings,
//! namespace, types, members, `#line` directives) plus the syntax errors a
//! template author can cause: unbalanced delimiters and unterminated
//! literals or comments.

use std::ops::Range;

use logos::{Lexer, Logos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Closed,
    Unterminated,
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum HostToken {
    #[regex(r"//[^\n]*")]
    LineComment,
    #[token("/*", block_comment)]
    BlockComment(Termination),
    #[regex(r"#[^\n]*")]
    Directive,
    #[token("\"", |lex| quoted(lex, '"'))]
    Str(Termination),
    #[token("@\"", verbatim)]
    VerbatimStr(Termination),
    #[token("'", |lex| quoted(lex, '\''))]
    Char(Termination),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"[0-9][0-9A-Za-z_.]*")]
    Number,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("=>")]
    Arrow,
    #[token("@")]
    At,
    #[regex(r"[+\-*/%=<>!&|^~?:]")]
    Operator,
}

fn quoted(lex: &mut Lexer<HostToken>, quote: char) -> Termination {
    let rest = lex.remainder();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' => {
                lex.bump(i);
                return Termination::Unterminated;
            }
            c if c == quote => {
                lex.bump(i + 1);
                return Termination::Closed;
            }
            _ => {}
        }
    }
    lex.bump(rest.len());
    Termination::Unterminated
}

fn verbatim(lex: &mut Lexer<HostToken>) -> Termination {
    let rest = lex.remainder();
    let mut from = 0;
    while let Some(rel) = rest[from..].find('"') {
        let at = from + rel;
        if rest[at + 1..].starts_with('"') {
            from = at + 2;
            continue;
        }
        lex.bump(at + 1);
        return Termination::Closed;
    }
    lex.bump(rest.len());
    Termination::Unterminated
}

fn block_comment(lex: &mut Lexer<HostToken>) -> Termination {
    let rest = lex.remainder();
    match rest.find("*/") {
        Some(at) => {
            lex.bump(at + 2);
            Termination::Closed
        }
        None => {
            lex.bump(rest.len());
            Termination::Unterminated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSyntaxError {
    pub message: String,
    pub span: Range<usize>,
}

impl HostSyntaxError {
    fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostType {
    /// `class`, `struct`, `interface`, `enum` or `record`.
    pub keyword: String,
    pub name: String,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Property,
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMember {
    pub kind: MemberKind,
    pub name: String,
    /// Index into `HostSyntaxUnit::types` of the declaring type.
    pub owner: usize,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDirective {
    /// `#line N "file"`; `line` is one-based as written.
    Line { line: u32, file: Option<String> },
    Default,
    Hidden,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSyntaxUnit {
    pub usings: Vec<String>,
    pub namespace: Option<String>,
    pub types: Vec<HostType>,
    pub members: Vec<HostMember>,
    /// Directives with the offset they appear at.
    pub line_directives: Vec<(usize, LineDirective)>,
    pub errors: Vec<HostSyntaxError>,
}

impl HostSyntaxUnit {
    pub fn parse(text: &str) -> Self {
        let mut analyzer = Analyzer {
            text,
            unit: HostSyntaxUnit::default(),
            open: Vec::new(),
            header: Vec::new(),
        };
        let mut lexer = HostToken::lexer(text);
        while let Some(result) = lexer.next() {
            let span = lexer.span();
            match result {
                Ok(token) => analyzer.token(token, span),
                Err(()) => analyzer.unit.errors.push(HostSyntaxError::new(
                    format!("unexpected character {:?}", &text[span.clone()]),
                    span,
                )),
            }
        }
        analyzer.finish()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn member(&self, name: &str) -> Option<&HostMember> {
        self.members.iter().find(|member| member.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    Namespace,
    Type(usize),
    Member(usize),
    Block,
}

#[derive(Debug)]
struct Open {
    delimiter: u8,
    span: Range<usize>,
    scope: Scope,
}

const TYPE_KEYWORDS: &[&str] = &["class", "struct", "interface", "enum", "record"];

struct Analyzer<'a> {
    text: &'a str,
    unit: HostSyntaxUnit,
    open: Vec<Open>,
    /// Tokens since the last `;`, `{` or `}`.
    header: Vec<(HostToken, Range<usize>)>,
}

impl Analyzer<'_> {
    fn scope(&self) -> Scope {
        self.open
            .iter()
            .rev()
            .find(|open| open.delimiter == b'{')
            .map_or(Scope::Top, |open| open.scope)
    }

    fn text_of(&self, span: &Range<usize>) -> &str {
        &self.text[span.clone()]
    }

    fn ident_after(&self, keyword: &str) -> Option<String> {
        let at = self
            .header
            .iter()
            .position(|(token, span)| *token == HostToken::Ident && self.text_of(span) == keyword)?;
        self.header[at + 1..]
            .iter()
            .find(|(token, _)| *token == HostToken::Ident)
            .map(|(_, span)| self.text_of(span).to_string())
    }

    /// Dotted name following `keyword`, e.g. a namespace or using target.
    fn dotted_after(&self, keyword: &str) -> Option<String> {
        let at = self
            .header
            .iter()
            .position(|(token, span)| *token == HostToken::Ident && self.text_of(span) == keyword)?;
        let name: String = self.header[at + 1..]
            .iter()
            .map(|(_, span)| self.text_of(span))
            .collect();
        (!name.is_empty()).then_some(name)
    }

    fn type_keyword(&self) -> Option<&str> {
        self.header.iter().find_map(|(token, span)| {
            let text = self.text_of(span);
            (*token == HostToken::Ident && TYPE_KEYWORDS.contains(&text)).then_some(text)
        })
    }

    /// Name and kind of the member declared by the current header.
    fn member_header(&self, terminator: HostToken) -> Option<(String, MemberKind)> {
        let cut = self
            .header
            .iter()
            .position(|(token, span)| {
                matches!(token, HostToken::LParen | HostToken::Arrow)
                    || (*token == HostToken::Operator && self.text_of(span) == "=")
            })
            .unwrap_or(self.header.len());
        let name = self.header[..cut]
            .iter()
            .rev()
            .find(|(token, _)| *token == HostToken::Ident)
            .map(|(_, span)| self.text_of(span).to_string())?;
        let kind = match self.header.get(cut).map(|(token, _)| *token) {
            Some(HostToken::LParen) => MemberKind::Method,
            Some(HostToken::Arrow) => MemberKind::Property,
            _ if terminator == HostToken::LBrace => MemberKind::Property,
            _ => MemberKind::Field,
        };
        Some((name, kind))
    }

    fn header_start(&self, fallback: usize) -> usize {
        self.header.first().map_or(fallback, |(_, span)| span.start)
    }

    fn token(&mut self, token: HostToken, span: Range<usize>) {
        match token {
            HostToken::LineComment => {}
            HostToken::BlockComment(Termination::Unterminated) => {
                self.error("unterminated comment", span.start..span.start + 2);
            }
            HostToken::BlockComment(Termination::Closed) => {}
            HostToken::Directive => self.directive(span),
            HostToken::Str(Termination::Unterminated)
            | HostToken::VerbatimStr(Termination::Unterminated) => {
                self.error("unterminated string literal", span.clone());
                self.header.push((token, span));
            }
            HostToken::Char(Termination::Unterminated) => {
                self.error("unterminated character literal", span.clone());
                self.header.push((token, span));
            }
            HostToken::LBrace => self.open_brace(span),
            HostToken::RBrace => {
                self.close(b'{', span);
                self.header.clear();
            }
            HostToken::LParen | HostToken::LBracket => {
                let delimiter = if token == HostToken::LParen { b'(' } else { b'[' };
                self.open.push(Open {
                    delimiter,
                    span: span.clone(),
                    scope: Scope::Block,
                });
                self.header.push((token, span));
            }
            HostToken::RParen | HostToken::RBracket => {
                let delimiter = if token == HostToken::RParen { b'(' } else { b'[' };
                self.close(delimiter, span.clone());
                self.header.push((token, span));
            }
            HostToken::Semi => self.semicolon(span),
            _ => self.header.push((token, span)),
        }
    }

    fn directive(&mut self, span: Range<usize>) {
        let text = self.text_of(&span).trim_end();
        let Some(rest) = text.strip_prefix("#line") else {
            return;
        };
        let rest = rest.trim();
        let directive = match rest {
            "default" => LineDirective::Default,
            "hidden" => LineDirective::Hidden,
            _ => {
                let (number, file) = match rest.split_once(char::is_whitespace) {
                    Some((number, file)) => {
                        (number, Some(file.trim().trim_matches('"').to_string()))
                    }
                    None => (rest, None),
                };
                match number.parse() {
                    Ok(line) => LineDirective::Line { line, file },
                    Err(_) => {
                        self.error("malformed #line directive", span);
                        return;
                    }
                }
            }
        };
        self.unit.line_directives.push((span.start, directive));
    }

    fn open_brace(&mut self, span: Range<usize>) {
        let start = self.header_start(span.start);
        let scope = match self.scope() {
            Scope::Top | Scope::Namespace if self.type_keyword().is_none() => {
                match self.dotted_after("namespace") {
                    Some(name) => {
                        self.unit.namespace = Some(name);
                        Scope::Namespace
                    }
                    None => Scope::Block,
                }
            }
            Scope::Top | Scope::Namespace | Scope::Type(_) if self.type_keyword().is_some() => {
                self.push_type(start)
            }
            Scope::Type(owner) => match self.member_header(HostToken::LBrace) {
                Some((name, kind)) => {
                    self.unit.members.push(HostMember {
                        kind,
                        name,
                        owner,
                        span: start..span.end,
                    });
                    Scope::Member(self.unit.members.len() - 1)
                }
                None => Scope::Block,
            },
            _ => Scope::Block,
        };
        self.open.push(Open {
            delimiter: b'{',
            span,
            scope,
        });
        self.header.clear();
    }

    fn push_type(&mut self, start: usize) -> Scope {
        let keyword = self.type_keyword().unwrap_or_default().to_string();
        let name = self.ident_after(&keyword).unwrap_or_default();
        self.unit.types.push(HostType {
            keyword,
            name,
            span: start..start,
        });
        Scope::Type(self.unit.types.len() - 1)
    }

    fn semicolon(&mut self, span: Range<usize>) {
        let inside_parens = self.open.last().is_some_and(|open| open.delimiter != b'{');
        if !inside_parens {
            match self.scope() {
                Scope::Top | Scope::Namespace => {
                    if let Some(target) = self.dotted_after("using") {
                        self.unit.usings.push(target);
                    }
                }
                Scope::Type(owner) => {
                    if let Some((name, kind)) = self.member_header(HostToken::Semi) {
                        let start = self.header_start(span.start);
                        self.unit.members.push(HostMember {
                            kind,
                            name,
                            owner,
                            span: start..span.end,
                        });
                    }
                }
                _ => {}
            }
            self.header.clear();
        }
    }

    fn close(&mut self, delimiter: u8, span: Range<usize>) {
        let Some(index) = self.open.iter().rposition(|open| open.delimiter == delimiter) else {
            let closer = closer_of(delimiter);
            self.error(format!("unexpected '{closer}'"), span);
            return;
        };
        while self.open.len() > index + 1 {
            if let Some(unclosed) = self.open.pop() {
                self.unclosed(&unclosed);
                self.finish_scope(unclosed.scope, span.start);
            }
        }
        if let Some(open) = self.open.pop() {
            self.finish_scope(open.scope, span.end);
        }
    }

    fn finish_scope(&mut self, scope: Scope, end: usize) {
        match scope {
            Scope::Type(index) => {
                if let Some(ty) = self.unit.types.get_mut(index) {
                    ty.span.end = end;
                }
            }
            Scope::Member(index) => {
                if let Some(member) = self.unit.members.get_mut(index) {
                    member.span.end = end;
                }
            }
            Scope::Top | Scope::Namespace | Scope::Block => {}
        }
    }

    fn unclosed(&mut self, open: &Open) {
        let closer = closer_of(open.delimiter);
        self.error(format!("missing closing '{closer}'"), open.span.clone());
    }

    fn error(&mut self, message: impl Into<String>, span: Range<usize>) {
        self.unit.errors.push(HostSyntaxError::new(message, span));
    }

    fn finish(mut self) -> HostSyntaxUnit {
        let end = self.text.len();
        while let Some(open) = self.open.pop() {
            self.unclosed(&open);
            self.finish_scope(open.scope, end);
        }
        self.unit.errors.sort_by_key(|error| error.span.start);
        self.unit
    }
}

fn closer_of(delimiter: u8) -> char {
    match delimiter {
        b'{' => '}',
        b'(' => ')',
        _ => ']',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"namespace ASP
{
using System.Web.Mvc;
using Shop.Models;

public class _Page_Index : System.Web.Mvc.WebViewPage<dynamic>
{

int count = 0;

public static System.Web.WebPages.HelperResult Bold(string s)
{
return new System.Web.WebPages.HelperResult(__razor_helper_writer => {
WriteLiteralTo(__razor_helper_writer, "<b>");
});
}

public override void Execute()
{
#line 3 "/site/Index.cshtml"
if (count > 0) { Write(count); }
#line default
#line hidden
}
}
}
"#;

    fn tokens(text: &str) -> Vec<HostToken> {
        HostToken::lexer(text).filter_map(Result::ok).collect()
    }

    #[test]
    fn lexes_literals_and_comments() {
        assert_eq!(
            tokens(r#"a = "x\"y" + @"q""r" + 'c'; // done"#),
            vec![
                HostToken::Ident,
                HostToken::Operator,
                HostToken::Str(Termination::Closed),
                HostToken::Operator,
                HostToken::VerbatimStr(Termination::Closed),
                HostToken::Operator,
                HostToken::Char(Termination::Closed),
                HostToken::Semi,
                HostToken::LineComment,
            ]
        );
        assert_eq!(
            tokens("/* open"),
            vec![HostToken::BlockComment(Termination::Unterminated)]
        );
    }

    #[test]
    fn outline_of_a_page() {
        let unit = HostSyntaxUnit::parse(PAGE);
        assert!(unit.errors.is_empty(), "{:?}", unit.errors);
        assert_eq!(unit.namespace.as_deref(), Some("ASP"));
        assert_eq!(unit.usings, vec!["System.Web.Mvc", "Shop.Models"]);
        assert_eq!(unit.types.len(), 1);
        assert_eq!(unit.types[0].name, "_Page_Index");
        assert_eq!(unit.types[0].keyword, "class");

        let members: Vec<_> = unit
            .members
            .iter()
            .map(|m| (m.name.as_str(), m.kind))
            .collect();
        assert_eq!(
            members,
            vec![
                ("count", MemberKind::Field),
                ("Bold", MemberKind::Method),
                ("Execute", MemberKind::Method),
            ]
        );
        let execute = unit.member("Execute").unwrap();
        assert!(PAGE[execute.span.clone()].starts_with("public override void Execute()"));
        assert!(PAGE[execute.span.clone()].ends_with('}'));
    }

    #[test]
    fn line_directives() {
        let unit = HostSyntaxUnit::parse(PAGE);
        let directives: Vec<_> = unit.line_directives.iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(
            directives,
            vec![
                LineDirective::Line {
                    line: 3,
                    file: Some("/site/Index.cshtml".to_string())
                },
                LineDirective::Default,
                LineDirective::Hidden,
            ]
        );
    }

    #[test]
    fn unbalanced_braces() {
        let unit = HostSyntaxUnit::parse("class A { void F() { if (x) { } }");
        assert_eq!(unit.errors.len(), 1);
        assert_eq!(unit.errors[0].message, "missing closing '}'");
        assert_eq!(unit.errors[0].span, 8..9);

        let unit = HostSyntaxUnit::parse("class A { } }");
        assert_eq!(unit.errors[0].message, "unexpected '}'");
        assert_eq!(unit.errors[0].span, 12..13);
    }

    #[test]
    fn mismatched_parens() {
        let unit = HostSyntaxUnit::parse("class A { void F() { G(1; } }");
        assert_eq!(unit.errors.len(), 1);
        assert_eq!(unit.errors[0].message, "missing closing ')'");
        assert_eq!(unit.errors[0].span, 22..23);
    }

    #[test]
    fn unterminated_literals() {
        let unit = HostSyntaxUnit::parse("class A { string s = \"abc;\n char c = 'x;\n }");
        let messages: Vec<_> = unit.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["unterminated string literal", "unterminated character literal"]
        );
    }
}
