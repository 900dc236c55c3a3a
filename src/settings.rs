//! Grammar profile selection.
//!
//! A profile is picked per document from a `razor.toml` found by walking up
//! from the document's directory:
//!
//! ```toml
//! [profile]
//! namespaces = ["System.Web.Mvc", "MyApp.Helpers"]
//! line_pragmas = true
//! app_root = "."
//! preprocessed = ["Templates/.*\\.cshtml$"]
//! ```
//!
//! Any failure falls back to [`GrammarProfile::default`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use regex::Regex;
use serde::Deserialize;

/// Name of the settings file looked up next to (or above) documents.
pub const SETTINGS_FILE: &str = "razor.toml";

/// Virtual path used when no configuration applies.
pub const DEFAULT_VIRTUAL_PATH: &str = "~/Views/Default.cshtml";

pub const DEFAULT_NAMESPACES: &[&str] = &[
    "System.Web.Mvc",
    "System.Web.Mvc.Ajax",
    "System.Web.Mvc.Html",
    "System.Web.Routing",
];

/// Directory whose contents compile as shared helper code.
const APP_CODE_DIR: &str = "App_Code";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no razor.toml found above {}", start.display())]
    NotFound { start: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid preprocessed pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Root of `razor.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub profile: Option<ProfileSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileSettings {
    /// Namespace imports every generated unit starts with.
    pub namespaces: Option<Vec<String>>,
    pub line_pragmas: Option<bool>,
    /// Directory, relative to the settings file, that virtual paths are
    /// computed against.
    pub app_root: Option<PathBuf>,
    /// Regexes on the `/`-separated path relative to `app_root`; a match
    /// selects the preprocessed template profile.
    pub preprocessed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarKind {
    WebPage,
    WebCode,
    Template,
}

/// Everything that shapes how a document is parsed and generated.
///
/// Two documents with equal profiles share one grammar instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrammarProfile {
    WebPage {
        virtual_path: String,
        namespace_imports: Vec<String>,
        line_pragmas: bool,
    },
    WebCode {
        virtual_path: String,
        namespace_imports: Vec<String>,
        line_pragmas: bool,
    },
    /// Preprocessed template; always design-time, never emits pragmas.
    Template { namespace_imports: Vec<String> },
}

impl Default for GrammarProfile {
    fn default() -> Self {
        GrammarProfile::WebPage {
            virtual_path: DEFAULT_VIRTUAL_PATH.to_string(),
            namespace_imports: default_namespaces(),
            line_pragmas: true,
        }
    }
}

impl GrammarProfile {
    pub fn kind(&self) -> GrammarKind {
        match self {
            GrammarProfile::WebPage { .. } => GrammarKind::WebPage,
            GrammarProfile::WebCode { .. } => GrammarKind::WebCode,
            GrammarProfile::Template { .. } => GrammarKind::Template,
        }
    }

    pub fn namespace_imports(&self) -> &[String] {
        match self {
            GrammarProfile::WebPage {
                namespace_imports, ..
            }
            | GrammarProfile::WebCode {
                namespace_imports, ..
            }
            | GrammarProfile::Template { namespace_imports } => namespace_imports,
        }
    }

    pub fn line_pragmas(&self) -> bool {
        match self {
            GrammarProfile::WebPage { line_pragmas, .. }
            | GrammarProfile::WebCode { line_pragmas, .. } => *line_pragmas,
            GrammarProfile::Template { .. } => false,
        }
    }

    /// Editor-facing parses always run in design-time mode.
    pub fn design_time(&self) -> bool {
        true
    }

    pub fn virtual_path(&self) -> Option<&str> {
        match self {
            GrammarProfile::WebPage { virtual_path, .. }
            | GrammarProfile::WebCode { virtual_path, .. } => Some(virtual_path),
            GrammarProfile::Template { .. } => None,
        }
    }
}

fn default_namespaces() -> Vec<String> {
    DEFAULT_NAMESPACES.iter().map(|ns| ns.to_string()).collect()
}

/// The project a document belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}

/// Picks the grammar profile for a document.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, path: &Path, project: Option<&Project>)
        -> Result<GrammarProfile, SettingsError>;
}

/// Resolve a profile, falling back to the default on any failure.
pub fn resolve_profile(
    resolver: &dyn ProfileResolver,
    path: &Path,
    project: Option<&Project>,
) -> GrammarProfile {
    match resolver.resolve(path, project) {
        Ok(profile) => profile,
        Err(SettingsError::NotFound { .. }) => {
            tracing::debug!(path = %path.display(), "no settings file, using default profile");
            GrammarProfile::default()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "falling back to default profile");
            GrammarProfile::default()
        }
    }
}

/// Load settings from a file.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| SettingsError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Walk up from `start_dir` to the first directory holding a settings file.
///
/// Returns the settings and the directory they were found in.
pub fn discover_settings(start_dir: &Path) -> Result<(Settings, PathBuf), SettingsError> {
    let file = find_settings_file(start_dir)?;
    let settings = load_settings(&file)?;
    Ok((settings, settings_dir_of(&file)))
}

fn find_settings_file(start_dir: &Path) -> Result<PathBuf, SettingsError> {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        current = dir.parent();
    }
    Err(SettingsError::NotFound {
        start: start_dir.to_path_buf(),
    })
}

fn settings_dir_of(file: &Path) -> PathBuf {
    file.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// A settings file with its `preprocessed` patterns compiled.
#[derive(Debug)]
struct LoadedSettings {
    settings: Settings,
    dir: PathBuf,
    preprocessed: Vec<Regex>,
}

#[derive(Debug)]
struct CachedSettings {
    modified: Option<SystemTime>,
    loaded: Arc<LoadedSettings>,
}

/// Resolver backed by `razor.toml` files on disk.
///
/// Each settings file is read and compiled once, then reused until its
/// modification time changes or [`invalidate`](Self::invalidate) drops it.
#[derive(Debug, Default)]
pub struct SettingsProfileResolver {
    cache: DashMap<PathBuf, CachedSettings>,
}

impl SettingsProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached contents of a settings file.
    pub fn invalidate(&self, file: &Path) {
        if self.cache.remove(file).is_some() {
            tracing::debug!(file = %file.display(), "settings cache invalidated");
        }
    }

    fn load(&self, file: &Path) -> Result<Arc<LoadedSettings>, SettingsError> {
        let modified = std::fs::metadata(file).and_then(|m| m.modified()).ok();
        let cached = self
            .cache
            .get(file)
            .filter(|entry| modified.is_some() && entry.modified == modified)
            .map(|entry| Arc::clone(&entry.loaded));
        if let Some(loaded) = cached {
            return Ok(loaded);
        }

        let settings = load_settings(file)?;
        let preprocessed = compile_patterns(&settings)?;
        let loaded = Arc::new(LoadedSettings {
            settings,
            dir: settings_dir_of(file),
            preprocessed,
        });
        tracing::debug!(file = %file.display(), "settings loaded");
        self.cache.insert(
            file.to_path_buf(),
            CachedSettings {
                modified,
                loaded: Arc::clone(&loaded),
            },
        );
        Ok(loaded)
    }
}

impl ProfileResolver for SettingsProfileResolver {
    fn resolve(
        &self,
        path: &Path,
        _project: Option<&Project>,
    ) -> Result<GrammarProfile, SettingsError> {
        let start = path.parent().unwrap_or(path);
        let loaded = self.load(&find_settings_file(start)?)?;
        Ok(select_profile(
            path,
            &loaded.settings,
            &loaded.dir,
            &loaded.preprocessed,
        ))
    }
}

/// Profile for `path` given settings found in `settings_dir`.
pub fn profile_for(
    path: &Path,
    settings: &Settings,
    settings_dir: &Path,
) -> Result<GrammarProfile, SettingsError> {
    let preprocessed = compile_patterns(settings)?;
    Ok(select_profile(path, settings, settings_dir, &preprocessed))
}

fn compile_patterns(settings: &Settings) -> Result<Vec<Regex>, SettingsError> {
    let patterns = settings
        .profile
        .as_ref()
        .and_then(|p| p.preprocessed.as_deref())
        .unwrap_or_default();
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| SettingsError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn select_profile(
    path: &Path,
    settings: &Settings,
    settings_dir: &Path,
    preprocessed: &[Regex],
) -> GrammarProfile {
    let profile = settings.profile.as_ref();
    let namespace_imports = profile
        .and_then(|p| p.namespaces.clone())
        .unwrap_or_else(default_namespaces);
    let line_pragmas = profile.and_then(|p| p.line_pragmas).unwrap_or(true);
    let app_root = match profile.and_then(|p| p.app_root.as_deref()) {
        Some(root) => settings_dir.join(root),
        None => settings_dir.to_path_buf(),
    };

    let Some(relative) = relative_path(path, &app_root) else {
        return GrammarProfile::WebPage {
            virtual_path: DEFAULT_VIRTUAL_PATH.to_string(),
            namespace_imports,
            line_pragmas,
        };
    };

    if preprocessed.iter().any(|regex| regex.is_match(&relative)) {
        return GrammarProfile::Template { namespace_imports };
    }

    let virtual_path = format!("~/{relative}");
    if relative.split('/').any(|part| part == APP_CODE_DIR) {
        GrammarProfile::WebCode {
            virtual_path,
            namespace_imports,
            line_pragmas,
        }
    } else {
        GrammarProfile::WebPage {
            virtual_path,
            namespace_imports,
            line_pragmas,
        }
    }
}

/// `path` relative to `root`, `/`-separated; `None` outside `root`.
fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let root = normalize(root);
    let relative = normalize(path).strip_prefix(&root).ok()?.to_path_buf();
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Lexically resolve `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a unique temp directory for test isolation.
    fn make_test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("razorsp-test")
            .join(name)
            .join(format!("{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup_test_dir(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn settings(toml_text: &str) -> Settings {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn default_profile() {
        let profile = GrammarProfile::default();
        assert_eq!(profile.kind(), GrammarKind::WebPage);
        assert_eq!(profile.virtual_path(), Some(DEFAULT_VIRTUAL_PATH));
        assert_eq!(profile.namespace_imports().len(), 4);
        assert!(profile.line_pragmas());
        assert!(profile.design_time());
    }

    #[test]
    fn page_profile_from_settings() {
        let s = settings("[profile]\nnamespaces = [\"Shop\"]\nline_pragmas = false\n");
        let profile = profile_for(
            Path::new("/site/Views/Home/Index.cshtml"),
            &s,
            Path::new("/site"),
        )
        .unwrap();
        assert_eq!(
            profile,
            GrammarProfile::WebPage {
                virtual_path: "~/Views/Home/Index.cshtml".to_string(),
                namespace_imports: vec!["Shop".to_string()],
                line_pragmas: false,
            }
        );
    }

    #[test]
    fn app_code_selects_web_code() {
        let profile = profile_for(
            Path::new("/site/App_Code/Helpers.cshtml"),
            &Settings::default(),
            Path::new("/site"),
        )
        .unwrap();
        assert_eq!(profile.kind(), GrammarKind::WebCode);
        assert_eq!(profile.virtual_path(), Some("~/App_Code/Helpers.cshtml"));
    }

    #[test]
    fn preprocessed_pattern_selects_template() {
        let s = settings("[profile]\npreprocessed = [\"^Templates/.*\\\\.cshtml$\"]\n");
        let profile = profile_for(
            Path::new("/repo/Templates/Mail.cshtml"),
            &s,
            Path::new("/repo"),
        )
        .unwrap();
        assert_eq!(profile.kind(), GrammarKind::Template);
        assert!(!profile.line_pragmas());
    }

    #[test]
    fn app_root_is_relative_to_settings() {
        let s = settings("[profile]\napp_root = \"src/Web\"\n");
        let profile = profile_for(
            Path::new("/repo/src/Web/Views/Index.cshtml"),
            &s,
            Path::new("/repo"),
        )
        .unwrap();
        assert_eq!(profile.virtual_path(), Some("~/Views/Index.cshtml"));
    }

    #[test]
    fn outside_app_root_uses_default_virtual_path() {
        let profile = profile_for(
            Path::new("/elsewhere/Index.cshtml"),
            &Settings::default(),
            Path::new("/repo"),
        )
        .unwrap();
        assert_eq!(profile.virtual_path(), Some(DEFAULT_VIRTUAL_PATH));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        let s = settings("[profile]\npreprocessed = [\"(\"]\n");
        let err = profile_for(Path::new("/r/a.cshtml"), &s, Path::new("/r")).unwrap_err();
        assert!(matches!(err, SettingsError::Pattern { .. }));
    }

    #[test]
    fn discover_settings_in_parent_dir() {
        let parent = make_test_dir("discover-parent");
        let child = parent.join("Views");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(parent.join(SETTINGS_FILE), "[profile]\nline_pragmas = false\n").unwrap();

        let (settings, settings_dir) = discover_settings(&child).unwrap();
        assert_eq!(settings_dir, parent);
        assert_eq!(settings.profile.unwrap().line_pragmas, Some(false));

        cleanup_test_dir(&parent);
    }

    #[test]
    fn malformed_settings_fall_back() {
        let dir = make_test_dir("malformed");
        std::fs::write(dir.join(SETTINGS_FILE), "[profile\n").unwrap();

        let err = discover_settings(&dir).unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));

        let profile = resolve_profile(&SettingsProfileResolver::new(), &dir.join("Index.cshtml"), None);
        assert_eq!(profile, GrammarProfile::default());

        cleanup_test_dir(&dir);
    }

    #[test]
    fn resolver_uses_document_directory() {
        let root = make_test_dir("resolver");
        let views = root.join("App_Code");
        std::fs::create_dir_all(&views).unwrap();
        std::fs::write(root.join(SETTINGS_FILE), "[profile]\n").unwrap();

        let profile = SettingsProfileResolver::new()
            .resolve(&views.join("Util.cshtml"), None)
            .unwrap();
        assert_eq!(profile.kind(), GrammarKind::WebCode);

        cleanup_test_dir(&root);
    }

    fn set_modified(file: &Path, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs);
        std::fs::File::options()
            .write(true)
            .open(file)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn unchanged_settings_are_reused() {
        let root = make_test_dir("cache-reuse");
        let file = root.join(SETTINGS_FILE);
        std::fs::write(&file, "[profile]\nline_pragmas = false\n").unwrap();
        set_modified(&file, 1_000_000);

        let resolver = SettingsProfileResolver::new();
        let page = root.join("Index.cshtml");
        assert!(!resolver.resolve(&page, None).unwrap().line_pragmas());

        // Same timestamp: the cached copy wins over the new contents.
        std::fs::write(&file, "[profile]\nline_pragmas = true\n").unwrap();
        set_modified(&file, 1_000_000);
        assert!(!resolver.resolve(&page, None).unwrap().line_pragmas());

        resolver.invalidate(&file);
        assert!(resolver.resolve(&page, None).unwrap().line_pragmas());

        cleanup_test_dir(&root);
    }

    #[test]
    fn modified_settings_are_reloaded() {
        let root = make_test_dir("cache-reload");
        let file = root.join(SETTINGS_FILE);
        std::fs::write(&file, "[profile]\n").unwrap();
        set_modified(&file, 1_000_000);

        let resolver = SettingsProfileResolver::new();
        let page = root.join("Templates").join("Mail.cshtml");
        assert_eq!(
            resolver.resolve(&page, None).unwrap().kind(),
            GrammarKind::WebPage
        );

        std::fs::write(&file, "[profile]\npreprocessed = [\"^Templates/\"]\n").unwrap();
        set_modified(&file, 2_000_000);
        assert_eq!(
            resolver.resolve(&page, None).unwrap().kind(),
            GrammarKind::Template
        );

        cleanup_test_dir(&root);
    }
}
