//! Razor template Language Server implementation.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService};

mod document;
mod engine;
mod grammar;
mod host;
mod lsp;
mod markup;
pub(crate) mod settings;

pub use document::{
    ChangeCoalescer, DifferentialEdit, DocumentSession, LineIndex, OffsetMapper, PendingEdit,
    SessionManager, SessionState, SourceMap,
};
pub use engine::{
    assemble, extract_folds, project, CommentRecord, Diagnostic, DiagnosticSource, FoldRegion,
    PassInput, ProjectedResult, Projection, Reconciler, Severity, COMMENT_CLOSE, COMMENT_OPEN,
};
pub use grammar::{
    Block, BlockKind, GeneratedUnit, GrammarError, Node, ParseOutcome, ParseResults, ProfileCache,
    SourceLocation, Span, SpanKind, TemplateGrammar, Visitor,
};
pub use host::{
    bridge, generated_name, render, HostCode, HostMember, HostSyntaxError, HostSyntaxUnit,
    HostToken, HostType, InMemoryWorkspace, LineDirective, MemberKind, Termination, Workspace,
    WorkspaceEntry,
};
pub use lsp::{folding_ranges, to_diagnostics};
pub use markup::{MarkupDocument, MarkupError, MarkupNode, MarkupNodeKind, MAX_DEPTH};
pub use settings::{
    discover_settings, load_settings, resolve_profile, GrammarKind, GrammarProfile,
    ProfileResolver, Project, Settings, SettingsError, SettingsProfileResolver,
};

pub struct Backend {
    client: Client,
    sessions: SessionManager,
    settings: Arc<SettingsProfileResolver>,
    /// Current text of each open document, kept in step with incremental
    /// changes.
    texts: DashMap<Url, String>,
    workspace_root: OnceLock<PathBuf>,
}

impl Backend {
    pub(crate) fn new(client: Client) -> Self {
        let settings = Arc::new(SettingsProfileResolver::new());
        Self {
            client,
            sessions: SessionManager::new(
                Arc::clone(&settings) as Arc<dyn ProfileResolver>,
                Arc::new(InMemoryWorkspace::new()),
            ),
            settings,
            texts: DashMap::new(),
            workspace_root: OnceLock::new(),
        }
    }

    /// Project owning `path`: the workspace root, when `path` lies inside it.
    fn project_for(&self, path: &std::path::Path) -> Option<Project> {
        let root = self.workspace_root.get()?;
        if !path.starts_with(root) {
            return None;
        }
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Some(Project::new(name, root.clone()))
    }

    /// Parse the current text of `uri` and publish diagnostics.
    async fn parse_and_publish(&self, uri: Url, version: Option<i32>) {
        let Some(text) = self.texts.get(&uri).map(|text| text.clone()) else {
            return;
        };
        let path = document_path(&uri);
        let result = self.sessions.request_parse(&path, text.as_str()).await;
        let diagnostics = lsp::to_diagnostics(&result, &LineIndex::new(text));
        self.client.publish_diagnostics(uri, diagnostics, version).await;
    }
}

/// Filesystem path of `uri`, or its path component for non-file URIs.
fn document_path(uri: &Url) -> PathBuf {
    uri.to_file_path().unwrap_or_else(|()| PathBuf::from(uri.path()))
}

fn is_settings_file(path: &std::path::Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == settings::SETTINGS_FILE)
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let workspace_root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .and_then(|f| f.uri.to_file_path().ok())
            .or_else(|| {
                #[allow(deprecated)]
                params.root_uri.as_ref()?.to_file_path().ok()
            });

        if let Some(root) = workspace_root {
            tracing::info!(root = %root.display(), "workspace root");
            let _ = self.workspace_root.set(root);
        }

        let templates = FileOperationRegistrationOptions {
            filters: vec![FileOperationFilter {
                scheme: Some("file".to_string()),
                pattern: FileOperationPattern {
                    glob: "**/*.cshtml".to_string(),
                    matches: Some(FileOperationPatternKind::File),
                    options: None,
                },
            }],
        };

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: None,
                    file_operations: Some(WorkspaceFileOperationsServerCapabilities {
                        did_rename: Some(templates),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Razor language server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let path = document_path(&uri);
        let text = params.text_document.text;
        let project = self.project_for(&path);

        self.sessions.open_document(path, text.as_str(), project);
        self.texts.insert(uri.clone(), text);
        self.parse_and_publish(uri, Some(params.text_document.version)).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let path = document_path(&uri);
        {
            let Some(mut text) = self.texts.get_mut(&uri) else {
                tracing::warn!(%uri, "change for a document that is not open");
                return;
            };
            for change in params.content_changes {
                let Some(range) = change.range else {
                    // Whole-document replacement: start over from the new text.
                    let project = self.project_for(&path);
                    self.sessions
                        .open_document(path.clone(), change.text.as_str(), project);
                    *text = change.text;
                    continue;
                };
                let Some(span) = LineIndex::new(text.as_str()).range_to_span(range) else {
                    tracing::warn!(%uri, ?range, "change range outside the document");
                    continue;
                };
                self.sessions
                    .edit_notification(&path, span.start, change.text.len(), span.len());
                text.replace_range(span, &change.text);
            }
        }
        self.parse_and_publish(uri, Some(params.text_document.version)).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.sessions.close_document(&document_path(&uri)).await;
        self.texts.remove(&uri);
        // Clear diagnostics
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn did_rename_files(&self, params: RenameFilesParams) {
        for file in params.files {
            let (Ok(old), Ok(new)) = (Url::parse(&file.old_uri), Url::parse(&file.new_uri)) else {
                continue;
            };
            let renamed = self
                .sessions
                .rename_document(&document_path(&old), document_path(&new))
                .await;
            if !renamed {
                continue;
            }
            if let Some((_, text)) = self.texts.remove(&old) {
                self.texts.insert(new.clone(), text);
            }
            self.client.publish_diagnostics(old, vec![], None).await;
            self.parse_and_publish(new, None).await;
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for change in params.changes {
            let path = document_path(&change.uri);
            if is_settings_file(&path) {
                self.settings.invalidate(&path);
            }
        }
    }

    async fn folding_range(
        &self,
        params: FoldingRangeParams,
    ) -> Result<Option<Vec<FoldingRange>>> {
        let path = document_path(&params.text_document.uri);
        Ok(self
            .sessions
            .latest(&path)
            .map(|result| lsp::folding_ranges(&result)))
    }
}

pub fn create_service() -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::new(Backend::new)
}
