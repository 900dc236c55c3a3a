use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use expect_test::expect;
use razorsp::{
    resolve_profile, to_diagnostics, BlockKind, ChangeCoalescer, GrammarKind, GrammarProfile,
    InMemoryWorkspace, LineIndex, ParseOutcome, ProfileResolver, ProjectedResult, Project,
    SessionManager, SessionState, SettingsError, SettingsProfileResolver, Span, TemplateGrammar,
    Workspace,
};
use tower_lsp::lsp_types::Diagnostic;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Always the default profile.
struct DefaultProfile;

impl ProfileResolver for DefaultProfile {
    fn resolve(
        &self,
        _path: &Path,
        _project: Option<&Project>,
    ) -> Result<GrammarProfile, SettingsError> {
        Ok(GrammarProfile::default())
    }
}

/// Switches between a page and a preprocessed template on demand.
#[derive(Default)]
struct SwitchableProfile {
    template: AtomicBool,
}

impl ProfileResolver for SwitchableProfile {
    fn resolve(
        &self,
        _path: &Path,
        _project: Option<&Project>,
    ) -> Result<GrammarProfile, SettingsError> {
        if self.template.load(Ordering::SeqCst) {
            Ok(GrammarProfile::Template {
                namespace_imports: vec!["System".to_string()],
            })
        } else {
            Ok(GrammarProfile::default())
        }
    }
}

fn manager() -> (SessionManager, Arc<InMemoryWorkspace>) {
    let workspace = Arc::new(InMemoryWorkspace::new());
    let manager = SessionManager::new(Arc::new(DefaultProfile), workspace.clone());
    (manager, workspace)
}

fn site() -> Project {
    Project::new("site", "/site")
}

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(path)
}

/// One line per span: `<kind> <start>..<end> <content>`.
fn format_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| format!("{:?} {}..{} {:?}", span.kind, span.start, span.end(), span.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format diagnostics into a deterministic, human-readable string.
///
/// Each diagnostic becomes one line:
///   <start_line>:<start_col>-<end_line>:<end_col> <severity> [<source>]: <message>
fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return "OK (no diagnostics)".to_string();
    }

    let mut lines: Vec<String> = diagnostics
        .iter()
        .map(|d| {
            let range = &d.range;
            let severity = match d.severity {
                Some(tower_lsp::lsp_types::DiagnosticSeverity::ERROR) => "error",
                Some(tower_lsp::lsp_types::DiagnosticSeverity::WARNING) => "warning",
                _ => "unknown",
            };
            format!(
                "{}:{}-{}:{} {} [{}]: {}",
                range.start.line,
                range.start.character,
                range.end.line,
                range.end.character,
                severity,
                d.source.as_deref().unwrap_or("-"),
                d.message,
            )
        })
        .collect();

    lines.sort();
    lines.join("\n")
}

fn diagnostics_of(result: &ProjectedResult, source: &str) -> String {
    format_diagnostics(&to_diagnostics(result, &LineIndex::new(source)))
}

// ---------------------------------------------------------------------------
// Tests: first parse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn statement_block_and_expression() {
    let source = "@{ var x = 1; }<p>@x</p>";
    let (manager, _) = manager();
    let path = Path::new("/site/Index.cshtml");
    manager.open_document(path, source, None);

    let result = manager.request_parse(path, source).await;
    assert_eq!(result.outcome, Some(ParseOutcome::Rejected));

    let expected = expect![[r#"
        Transition 0..2 "@{"
        Code 2..14 " var x = 1; "
        Transition 14..15 "}"
        Markup 15..18 "<p>"
        Transition 18..19 "@"
        Code 19..20 "x"
        Markup 20..24 "</p>""#]];
    expected.assert_eq(&format_spans(&result.spans));

    let tree = TemplateGrammar::new(GrammarProfile::default()).parse(source).root;
    let kinds: Vec<_> = tree.child_blocks().map(|b| b.kind).collect();
    assert_eq!(kinds, vec![BlockKind::Statement, BlockKind::Expression]);

    assert!(result.comments.is_empty());
    assert_eq!(result.markup.root.children.len(), 1);
    assert_eq!(result.markup.root.children[0].element_name(), Some("p"));

    let host = result.host_code().unwrap();
    assert!(host.contains(" var x = 1; "));
    let write = host.lines().find(|line| line.starts_with("Write(")).unwrap();
    assert_eq!(write.replace(' ', ""), "Write(x);");
    assert_eq!(diagnostics_of(&result, source), "OK (no diagnostics)");
}

#[tokio::test]
async fn unopened_document_yields_placeholder() {
    let (manager, _) = manager();
    let result = manager
        .request_parse(Path::new("/site/Missing.cshtml"), "<p></p>")
        .await;
    assert!(result.is_placeholder());
    assert!(result.host.is_none());
    assert!(result.diagnostics.is_empty());
}

// ---------------------------------------------------------------------------
// Tests: incremental edits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn markup_typing_is_accepted_and_block_opener_is_rejected() {
    let (manager, _) = manager();
    let path = Path::new("/site/Index.cshtml");
    manager.open_document(path, "<p>hello</p>", None);
    manager.request_parse(path, "<p>hello</p>").await;

    manager.edit_notification(path, 8, 1, 0);
    let result = manager.request_parse(path, "<p>hello!</p>").await;
    assert_eq!(result.outcome, Some(ParseOutcome::Accepted));
    assert_eq!(diagnostics_of(&result, "<p>hello!</p>"), "OK (no diagnostics)");

    let source = "<p>@{hello!</p>";
    manager.edit_notification(path, 3, 2, 0);
    let result = manager.request_parse(path, source).await;
    assert_eq!(result.outcome, Some(ParseOutcome::Rejected));

    let expected = expect![[r#"
        0:0-0:2 warning [razor-html]: element <p> is not closed
        0:3-0:5 error [razor]: unterminated block: the code block is missing a closing "}" character"#]];
    expected.assert_eq(&diagnostics_of(&result, source));
}

#[tokio::test]
async fn inserted_comment_is_recorded_with_delimiters() {
    let (manager, _) = manager();
    let path = Path::new("/site/Index.cshtml");
    manager.open_document(path, "<p>a</p>", None);
    manager.request_parse(path, "<p>a</p>").await;

    let source = "<p>a</p>@* note *@";
    manager.edit_notification(path, 8, 10, 0);
    let result = manager.request_parse(path, source).await;

    assert_eq!(result.comments.len(), 1);
    let comment = &result.comments[0];
    assert_eq!(comment.content, " note ");
    assert_eq!(comment.span, 8..18);
    assert_eq!(&source[comment.span.clone()], "@* note *@");
    assert_eq!((comment.open_tag, comment.close_tag), ("@*", "*@"));
    assert_eq!(result.markup.root.children.len(), 1);
}

#[test]
fn coalesced_burst_spans_first_snapshot_to_last_buffer() {
    let mut coalescer = ChangeCoalescer::new(Arc::from("hello"));
    coalescer.on_edit(5, 3, 0);
    coalescer.on_edit(7, 0, 1);
    coalescer.on_edit(6, 1, 0);

    let edit = coalescer.consume(Arc::from("hello!!!"));
    assert_eq!(&*edit.old_buffer, "hello");
    assert_eq!(&*edit.new_buffer, "hello!!!");
    assert_eq!(edit.net_delta(), 3);
    assert_eq!(edit.new_range(), 5..8);

    let again = coalescer.consume(Arc::from("hello!!!"));
    assert!(again.is_full());
}

#[tokio::test]
async fn edits_during_a_parse_are_kept_for_the_next_pass() {
    let workspace = Arc::new(InMemoryWorkspace::new());
    let manager = Arc::new(SessionManager::new(Arc::new(DefaultProfile), workspace));
    let path = PathBuf::from("/site/Big.cshtml");
    manager.open_document(path.clone(), "", None);

    let first = "<li>@item</li>\n".repeat(2000);
    let second = format!("{first}!");
    let parse = {
        let manager = Arc::clone(&manager);
        let path = path.clone();
        let first = first.clone();
        tokio::spawn(async move { manager.request_parse(&path, first).await })
    };
    assert!(manager.edit_notification(&path, first.len(), 1, 0));
    parse.await.unwrap();

    let result = manager.request_parse(&path, second.as_str()).await;
    assert_eq!(result.generation, 2);
    let text: String = result.spans.iter().map(|s| s.content.as_str()).collect();
    assert_eq!(text, second);
    assert_eq!(manager.state(&path), Some(SessionState::Initialized));
}

// ---------------------------------------------------------------------------
// Tests: host code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn host_errors_map_back_through_line_pragmas() {
    let source = "<ul>\n  @{ Show(1; }\n</ul>";
    let (manager, _) = manager();
    let path = Path::new("/site/List.cshtml");
    manager.open_document(path, source, None);
    let result = manager.request_parse(path, source).await;

    assert!(result.host_code().unwrap().contains("#line 2 \"/site/List.cshtml\""));
    let expected = expect![[r#"1:9-1:10 error [razor-csharp]: missing closing ')'"#]];
    expected.assert_eq(&diagnostics_of(&result, source));
}

#[tokio::test]
async fn registering_twice_keeps_one_workspace_entry() {
    let (manager, workspace) = manager();
    let path = Path::new("/site/Index.cshtml");
    manager.open_document(path, "<p></p>", Some(site()));

    manager.request_parse(path, "<p></p>").await;
    manager.edit_notification(path, 3, 1, 0);
    manager.request_parse(path, "<p>a</p>").await;

    assert_eq!(workspace.names(), vec!["/site/Index.cshtml.g.cs"]);
    let entry = workspace.entry("/site/Index.cshtml.g.cs").unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.project, site());
    assert!(entry.code.text.contains("WriteLiteral(\"<p>a</p>\");"));
}

#[tokio::test]
async fn documents_without_a_project_are_not_registered() {
    let (manager, workspace) = manager();
    let path = Path::new("/elsewhere/Index.cshtml");
    manager.open_document(path, "<p></p>", None);
    let result = manager.request_parse(path, "<p></p>").await;
    assert!(result.host.is_some());
    assert!(workspace.is_empty());
}

// ---------------------------------------------------------------------------
// Tests: session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn profile_change_tears_the_session_down() {
    let resolver = Arc::new(SwitchableProfile::default());
    let workspace = Arc::new(InMemoryWorkspace::new());
    let manager = SessionManager::new(resolver.clone(), workspace.clone());
    let path = Path::new("/site/Mail.cshtml");
    manager.open_document(path, "<p>hi</p>", Some(site()));

    let result = manager.request_parse(path, "<p>hi</p>").await;
    assert_eq!(result.host_kind, GrammarKind::WebPage);

    resolver.template.store(true, Ordering::SeqCst);
    manager.edit_notification(path, 5, 1, 0);
    let result = manager.request_parse(path, "<p>hi!</p>").await;

    // Markup typing would otherwise be accepted.
    assert_eq!(result.outcome, Some(ParseOutcome::Rejected));
    assert_eq!(result.host_kind, GrammarKind::Template);
    assert!(result.host_code().unwrap().contains("public class Mail\n"));
    assert_eq!(workspace.len(), 1);
    assert_eq!(workspace.entry("/site/Mail.cshtml.g.cs").unwrap().version, 1);
    assert_eq!(manager.state(path), Some(SessionState::Initialized));
}

#[tokio::test]
async fn close_unregisters_and_forgets() {
    let (manager, workspace) = manager();
    let path = Path::new("/site/Index.cshtml");
    manager.open_document(path, "<p></p>", Some(site()));
    manager.request_parse(path, "<p></p>").await;
    assert_eq!(workspace.len(), 1);

    assert!(manager.close_document(path).await);
    assert!(workspace.is_empty());
    assert_eq!(manager.state(path), None);
    assert!(manager.latest(path).is_none());
    assert!(manager.request_parse(path, "<p></p>").await.is_placeholder());
    assert!(!manager.close_document(path).await);
}

#[tokio::test]
async fn rename_rekeys_the_session() {
    let (manager, workspace) = manager();
    let old = Path::new("/site/Old.cshtml");
    let new = Path::new("/site/New.cshtml");
    manager.open_document(old, "<p></p>", Some(site()));
    manager.request_parse(old, "<p></p>").await;

    assert!(manager.rename_document(old, new).await);
    assert!(!manager.is_open(old));
    assert!(manager.is_open(new));
    assert!(workspace.is_empty());
    assert_eq!(manager.state(new), Some(SessionState::Uninitialized));

    // A markup edit the old tree could have absorbed still parses in full.
    manager.edit_notification(new, 3, 1, 0);
    let result = manager.request_parse(new, "<p>x</p>").await;
    assert_eq!(result.path, new);
    assert_eq!(result.outcome, Some(ParseOutcome::Rejected));
    assert_eq!(result.generation, 2);
    assert_eq!(workspace.names(), vec!["/site/New.cshtml.g.cs"]);
}

// ---------------------------------------------------------------------------
// Tests: profile selection from razor.toml
// ---------------------------------------------------------------------------

#[test]
fn settings_select_the_profile() {
    let resolver = SettingsProfileResolver::new();
    let page = resolve_profile(&resolver, &fixture("site/Views/Home/Index.cshtml"), None);
    assert_eq!(
        page,
        GrammarProfile::WebPage {
            virtual_path: "~/Views/Home/Index.cshtml".to_string(),
            namespace_imports: vec!["System.Web.Mvc".to_string(), "Shop.Helpers".to_string()],
            line_pragmas: false,
        }
    );

    let helpers = resolve_profile(&resolver, &fixture("site/App_Code/Helpers.cshtml"), None);
    assert_eq!(helpers.kind(), GrammarKind::WebCode);
    assert_eq!(helpers.virtual_path(), Some("~/App_Code/Helpers.cshtml"));

    let mail = resolve_profile(&resolver, &fixture("site/Templates/Mail.cshtml"), None);
    assert_eq!(mail.kind(), GrammarKind::Template);
    assert!(!mail.line_pragmas());
}

#[tokio::test]
async fn settings_drive_generated_code() {
    let workspace = Arc::new(InMemoryWorkspace::new());
    let manager = SessionManager::new(Arc::new(SettingsProfileResolver::new()), workspace);
    let path = fixture("site/Views/Home/Index.cshtml");
    let source = "<p>@name</p>";
    manager.open_document(path.clone(), source, None);

    let result = manager.request_parse(&path, source).await;
    let host = result.host_code().unwrap();
    assert!(host.contains("using Shop.Helpers;"));
    assert!(!host.contains("#line"));
    assert_eq!(result.host_kind, GrammarKind::WebPage);
}
