//! Path and command validation for caller-controlled strings
//!
//! Every file the engine creates lives under one managed root, in a fixed
//! category directory, with a final component the caller cannot choose.
use crate::config::types::{EngineError, Result};
use crate::observability::audit::{events, log_security_event, SecurityEvent};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Longest identifier `sanitize_filename` produces
pub const MAX_NAME_LEN: usize = 64;

/// Characters with meaning to a POSIX shell
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '(', ')', '{', '}', '[', ']', '*', '?', '!', '~', '\\',
    '\'', '"', '#', '\n', '\r', '\0',
];

/// Debugger commands that reach a shell, an interpreter or the host
/// filesystem, or that expand to other commands.
const DEBUGGER_ESCAPES: &[&str] = &[
    "shell",
    "pipe",
    "python",
    "python-interactive",
    "guile",
    "guile-repl",
    "eval",
    "alias",
    "make",
    "edit",
    "source",
    "compile",
    "dump",
    "append",
    "restore",
];

/// Short aliases of [`DEBUGGER_ESCAPES`] and settings that touch host state
const DEBUGGER_ESCAPE_WORDS: &[&str] = &["py", "pi", "gu", "gr", "logging", "startup-with-shell"];

/// Source-like suffixes dropped before sanitizing a logical name
const KNOWN_EXTENSIONS: &[&str] = &[".cpp", ".cc", ".cxx", ".c++", ".hpp", ".h", ".out", ".exe"];

/// Security error types for validation failures
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("shell metacharacter in {0:?}")]
    ShellMetacharacter(String),

    #[error("whitespace in artifact path {0:?}")]
    UnexpectedWhitespace(String),

    #[error("path traversal component in {0:?}")]
    PathTraversal(String),

    #[error("path escapes managed root: {0}")]
    OutsideRoot(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("cannot resolve {0}")]
    Unresolvable(String),

    #[error("debugger script line {line}: {command:?} is not allowed")]
    DebuggerEscape { line: usize, command: String },
}

impl From<SecurityError> for EngineError {
    fn from(err: SecurityError) -> Self {
        EngineError::SecurityViolation(err.to_string())
    }
}

/// Fixed subdirectories of the managed root
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TempCategory {
    Sources,
    Execute,
    Inputs,
    Outputs,
    Tests,
    Debug,
}

impl TempCategory {
    pub const ALL: [TempCategory; 6] = [
        TempCategory::Sources,
        TempCategory::Execute,
        TempCategory::Inputs,
        TempCategory::Outputs,
        TempCategory::Tests,
        TempCategory::Debug,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            TempCategory::Sources => "sources",
            TempCategory::Execute => "execute",
            TempCategory::Inputs => "inputs",
            TempCategory::Outputs => "outputs",
            TempCategory::Tests => "tests",
            TempCategory::Debug => "debug",
        }
    }
}

/// How a command-like string is going to be used
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// A path to a binary the engine generated; must resolve under the root
    Artifact,
    /// A single program with fixed arguments; no shell syntax allowed
    SingleBinary,
}

/// Identifier-safe name: `[A-Za-z0-9_-]`, non-empty, at most
/// [`MAX_NAME_LEN`] characters, never starting with `-`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn contains_shell_metacharacters(s: &str) -> bool {
    s.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

/// Reduce an untrusted name to a [`SafeName`].
///
/// Separators, dots and every other non-identifier character become `_`,
/// control characters are dropped, runs of `_` collapse, and leading or
/// trailing `_`/`-` are trimmed. Fails when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Result<SafeName> {
    let lower = name.to_ascii_lowercase();
    let stem = KNOWN_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map(|ext| &name[..name.len() - ext.len()])
        .unwrap_or(name);

    let mut out = String::with_capacity(stem.len().min(MAX_NAME_LEN * 2));
    for c in stem.chars() {
        if c.is_control() {
            continue;
        }
        let mapped = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-');
    let bounded: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    let bounded = bounded.trim_end_matches(|c| c == '_' || c == '-');

    if bounded.is_empty() {
        return Err(EngineError::InvalidName(format!(
            "{:?} contains no usable characters",
            name
        )));
    }

    Ok(SafeName(bounded.to_string()))
}

/// Short random token appended to caller-derived names
pub fn session_token() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Guard over the managed temp root
#[derive(Clone, Debug)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create (if needed) and canonicalize the managed root
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create managed root {}: {}", root.display(), e),
            ))
        })?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: TempCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    fn ensure_category(&self, category: TempCategory) -> Result<PathBuf> {
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create {}: {}", dir.display(), e),
            ))
        })?;
        Ok(dir)
    }

    /// Fresh path `<root>/<category>/<random id>` that does not exist at
    /// return time. Parent directories are created.
    pub fn secure_temp_path(&self, category: TempCategory) -> Result<PathBuf> {
        let dir = self.ensure_category(category)?;
        loop {
            let candidate = dir.join(Uuid::new_v4().simple().to_string());
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    /// Fresh path `<root>/<category>/<name>-<token>[.ext]`
    pub fn secure_named_path(
        &self,
        category: TempCategory,
        name: &SafeName,
        extension: Option<&str>,
    ) -> Result<PathBuf> {
        let dir = self.ensure_category(category)?;
        loop {
            let mut file_name = format!("{}-{}", name, session_token());
            if let Some(ext) = extension {
                file_name.push('.');
                file_name.push_str(ext);
            }
            let candidate = dir.join(file_name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    /// Create `path` exclusively and write `content` to it. Fails if the
    /// file already exists, so two writers can never share a path.
    pub fn write_new(&self, path: &Path, content: &[u8]) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(SecurityError::OutsideRoot(path.display().to_string()).into());
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                EngineError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {}: {}", path.display(), e),
                ))
            })?;
        file.write_all(content)?;
        Ok(())
    }

    /// Check a command or path string before it reaches a process spawn.
    /// Rejections are recorded in the audit trail.
    pub fn validate_command(
        &self,
        subject: &str,
        kind: CommandKind,
        session: Option<&str>,
    ) -> bool {
        match self.check_command(subject, kind) {
            Ok(()) => true,
            Err(err) => {
                log_security_event(rejection_event(subject, &err, session));
                false
            }
        }
    }

    /// Reject debugger scripts that could run commands outside the
    /// inferior. Every line is checked, including `define` and `commands`
    /// bodies.
    pub fn validate_debug_script(&self, script: &str, session: Option<&str>) -> Result<()> {
        match check_debug_script(script) {
            Ok(()) => Ok(()),
            Err(err) => {
                log_security_event(rejection_event(script, &err, session));
                Err(err.into())
            }
        }
    }

    fn check_command(&self, subject: &str, kind: CommandKind) -> std::result::Result<(), SecurityError> {
        if subject.trim().is_empty() {
            return Err(SecurityError::Unresolvable("empty command".to_string()));
        }
        if contains_shell_metacharacters(subject) {
            return Err(SecurityError::ShellMetacharacter(subject.to_string()));
        }

        match kind {
            CommandKind::SingleBinary => Ok(()),
            CommandKind::Artifact => {
                if subject.chars().any(char::is_whitespace) {
                    return Err(SecurityError::UnexpectedWhitespace(subject.to_string()));
                }
                let path = Path::new(subject);
                if path
                    .components()
                    .any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(SecurityError::PathTraversal(subject.to_string()));
                }
                let absolute = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.root.join(path)
                };
                // Symlinks are resolved when the artifact exists.
                let resolved = absolute.canonicalize().unwrap_or(absolute);
                if !resolved.starts_with(&self.root) {
                    return Err(SecurityError::OutsideRoot(resolved.display().to_string()));
                }
                Ok(())
            }
        }
    }

    /// Resolve a caller-supplied artifact path to a regular file under the
    /// managed root, or reject it as a security violation.
    pub fn validate_artifact(&self, path: &Path, session: Option<&str>) -> Result<PathBuf> {
        let subject = path
            .to_str()
            .ok_or_else(|| SecurityError::Unresolvable(path.display().to_string()))?;

        if let Err(err) = self.check_command(subject, CommandKind::Artifact) {
            log_security_event(rejection_event(subject, &err, session));
            return Err(err.into());
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let canonical = absolute
            .canonicalize()
            .map_err(|_| SecurityError::Unresolvable(subject.to_string()))?;

        if !canonical.starts_with(&self.root) {
            events::path_traversal_attempt(subject, session);
            return Err(SecurityError::OutsideRoot(canonical.display().to_string()).into());
        }
        if !canonical.is_file() {
            return Err(SecurityError::NotAFile(canonical.display().to_string()).into());
        }

        Ok(canonical)
    }
}

/// Audit record for a rejected subject, tagged with the request's session
fn rejection_event(subject: &str, err: &SecurityError, session: Option<&str>) -> SecurityEvent {
    match err {
        SecurityError::OutsideRoot(_) | SecurityError::PathTraversal(_) => {
            events::path_traversal_event(subject, session)
        }
        _ => events::command_injection_event(subject, &err.to_string(), session),
    }
}

fn check_debug_script(script: &str) -> std::result::Result<(), SecurityError> {
    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let escape = |command: &str| SecurityError::DebuggerEscape {
            line: index + 1,
            command: command.to_string(),
        };

        if line.starts_with('!') || line.starts_with('|') {
            return Err(escape(line));
        }

        let mut words = line.split_whitespace();
        let first = words.next().unwrap_or_default().to_ascii_lowercase();
        // gdb accepts any unambiguous prefix of a command name
        if first.len() >= 2 && DEBUGGER_ESCAPES.iter().any(|c| c.starts_with(first.as_str())) {
            return Err(escape(&first));
        }

        // Prefix commands like `thread apply all` take a command as argument
        for word in std::iter::once(first.as_str()).chain(words) {
            let word = word.to_ascii_lowercase();
            if word.starts_with('!')
                || word.starts_with('|')
                || DEBUGGER_ESCAPES.contains(&word.as_str())
                || DEBUGGER_ESCAPE_WORDS.contains(&word.as_str())
            {
                return Err(escape(&word));
            }
        }
    }
    Ok(())
}
