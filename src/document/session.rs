//! Per-document sessions and the manager that owns them.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{ChangeCoalescer, LineIndex};
use crate::engine::{self, PassInput, ProjectedResult, Reconciler};
use crate::grammar::{Block, BlockKind, ProfileCache};
use crate::host::{self, Workspace};
use crate::settings::{resolve_profile, GrammarProfile, ProfileResolver, Project};

/// Lifecycle of one open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No grammar state; the next parse is a full parse.
    Uninitialized,
    Initialized,
    Parsing,
}

/// State only the active parse cycle touches.
#[derive(Debug)]
struct Pipeline {
    path: PathBuf,
    profile: Option<GrammarProfile>,
    reconciler: Option<Reconciler>,
    /// Workspace identifier of the last registration.
    registered: Option<String>,
    generation: u64,
}

/// One open document.
#[derive(Debug)]
pub struct DocumentSession {
    project: Mutex<Option<Project>>,
    coalescer: Mutex<ChangeCoalescer>,
    pipeline: tokio::sync::Mutex<Pipeline>,
    state: Mutex<SessionState>,
    in_flight: Arc<AtomicBool>,
    latest: Mutex<Option<Arc<ProjectedResult>>>,
}

impl DocumentSession {
    fn new(path: PathBuf, content: Arc<str>, project: Option<Project>) -> Self {
        Self {
            project: Mutex::new(project),
            coalescer: Mutex::new(ChangeCoalescer::new(content)),
            pipeline: tokio::sync::Mutex::new(Pipeline {
                path,
                profile: None,
                reconciler: None,
                registered: None,
                generation: 0,
            }),
            state: Mutex::new(SessionState::Uninitialized),
            in_flight: Arc::new(AtomicBool::new(false)),
            latest: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether a full parse is running for this document.
    pub fn is_parsing(&self) -> bool {
        self.in_flight.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn project(&self) -> Option<Project> {
        self.project.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<ProjectedResult>> {
        self.latest.lock().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }
}

/// Thread-safe registry of open documents.
pub struct SessionManager {
    sessions: DashMap<PathBuf, Arc<DocumentSession>>,
    resolver: Arc<dyn ProfileResolver>,
    workspace: Arc<dyn Workspace>,
    grammars: ProfileCache,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("grammars", &self.grammars.len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(resolver: Arc<dyn ProfileResolver>, workspace: Arc<dyn Workspace>) -> Self {
        Self {
            sessions: DashMap::new(),
            resolver,
            workspace,
            grammars: ProfileCache::new(),
        }
    }

    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    fn session(&self, path: &Path) -> Option<Arc<DocumentSession>> {
        self.sessions.get(path).map(|s| Arc::clone(&s))
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.sessions.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open `path` with `content`. Reopening keeps the session but drops any
    /// pending edit, so the next parse starts from `content`.
    pub fn open_document(
        &self,
        path: impl Into<PathBuf>,
        content: impl Into<Arc<str>>,
        project: Option<Project>,
    ) {
        let path = path.into();
        let content = content.into();
        if let Some(session) = self.session(&path) {
            tracing::debug!(path = %path.display(), "reopening document");
            *session.project.lock() = project;
            session.coalescer.lock().reset(content);
            return;
        }
        tracing::debug!(path = %path.display(), "opening document");
        let session = DocumentSession::new(path.clone(), content, project);
        self.sessions.insert(path, Arc::new(session));
    }

    /// Record a raw edit. Never waits on a running parse.
    ///
    /// Returns false when the document is not open.
    pub fn edit_notification(
        &self,
        path: &Path,
        offset: usize,
        inserted: usize,
        removed: usize,
    ) -> bool {
        let Some(session) = self.session(path) else {
            tracing::debug!(path = %path.display(), "edit for a document that is not open");
            return false;
        };
        session.coalescer.lock().on_edit(offset, inserted, removed);
        let mut state = session.state.lock();
        if *state == SessionState::Uninitialized {
            *state = SessionState::Initialized;
        }
        true
    }

    /// Change the owning project of an open document.
    pub fn set_project(&self, path: &Path, project: Option<Project>) -> bool {
        match self.session(path) {
            Some(session) => {
                *session.project.lock() = project;
                true
            }
            None => false,
        }
    }

    /// Bring `path` up to date with `content` and project every view.
    ///
    /// A document that is not open yields a placeholder result.
    pub async fn request_parse(
        &self,
        path: &Path,
        content: impl Into<Arc<str>>,
    ) -> Arc<ProjectedResult> {
        let Some(session) = self.session(path) else {
            tracing::debug!(
                path = %path.display(),
                "parse requested for a document that is not open"
            );
            return Arc::new(ProjectedResult::placeholder(path));
        };
        let content = content.into();

        let mut guard = session.pipeline.lock().await;
        let pipeline = &mut *guard;
        let project = session.project();
        let profile = resolve_profile(self.resolver.as_ref(), &pipeline.path, project.as_ref());

        if pipeline.profile.as_ref() != Some(&profile) {
            if pipeline.profile.is_some() {
                tracing::info!(
                    path = %pipeline.path.display(),
                    "grammar profile changed, resetting document"
                );
                self.teardown(&session, pipeline);
            }
            pipeline.profile = Some(profile.clone());
        }

        session.set_state(SessionState::Parsing);
        let edit = session.coalescer.lock().consume(Arc::clone(&content));
        let grammar = self.grammars.get(&profile);
        let reconciler = pipeline
            .reconciler
            .get_or_insert_with(|| Reconciler::new(grammar, Arc::clone(&session.in_flight)));
        let outcome = reconciler.reconcile(&edit).await;

        pipeline.generation += 1;
        let empty = Block::new(BlockKind::Markup, 0);
        let line_index = LineIndex::new(Arc::clone(&content));
        let result = engine::assemble(PassInput {
            path: &pipeline.path,
            tree: reconciler.tree().unwrap_or(&empty),
            errors: reconciler.errors(),
            grammar: reconciler.grammar(),
            line_index: &line_index,
            outcome,
            generation: pipeline.generation,
        });

        if let Some(code) = &result.host {
            if let Some(previous) = pipeline.registered.take().filter(|name| *name != code.name) {
                self.workspace.unregister(&previous);
            }
            let registered =
                host::register(self.workspace.as_ref(), project.as_ref(), Arc::clone(code));
            if registered.is_some() {
                pipeline.registered = Some(code.name.clone());
            }
        }

        let result = Arc::new(result);
        *session.latest.lock() = Some(Arc::clone(&result));
        session.set_state(SessionState::Initialized);
        result
    }

    /// Re-key a session. Its grammar state is dropped, so the next parse is
    /// a full parse under the profile of the new path.
    pub async fn rename_document(&self, old: &Path, new: impl Into<PathBuf>) -> bool {
        let new = new.into();
        let Some((_, session)) = self.sessions.remove(old) else {
            return false;
        };
        if self.is_open(&new) {
            self.close_document(&new).await;
        }
        {
            let mut pipeline = session.pipeline.lock().await;
            tracing::debug!(
                from = %pipeline.path.display(),
                to = %new.display(),
                "renaming document"
            );
            pipeline.path = new.clone();
            self.teardown(&session, &mut pipeline);
        }
        self.sessions.insert(new, session);
        true
    }

    /// Close `path`, dropping its grammar state and workspace entry.
    pub async fn close_document(&self, path: &Path) -> bool {
        let Some((_, session)) = self.sessions.remove(path) else {
            return false;
        };
        let mut pipeline = session.pipeline.lock().await;
        self.teardown(&session, &mut pipeline);
        *session.latest.lock() = None;
        tracing::debug!(path = %path.display(), "closed document");
        true
    }

    pub fn state(&self, path: &Path) -> Option<SessionState> {
        self.session(path).map(|session| session.state())
    }

    /// Result of the last completed parse of `path`.
    pub fn latest(&self, path: &Path) -> Option<Arc<ProjectedResult>> {
        self.session(path).and_then(|session| session.latest())
    }

    fn teardown(&self, session: &DocumentSession, pipeline: &mut Pipeline) {
        pipeline.reconciler = None;
        if let Some(profile) = pipeline.profile.take() {
            self.grammars.release(&profile);
        }
        session.coalescer.lock().clear();
        if let Some(name) = pipeline.registered.take() {
            self.workspace.unregister(&name);
        }
        session.set_state(SessionState::Uninitialized);
    }
}
