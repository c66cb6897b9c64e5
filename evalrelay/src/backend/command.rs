//! Shell command abstraction for testability.
//!
//! Backends talk to the outside world by running configured shell commands
//! and reading their stdout. [`CommandRunner`] allows tests to replace the
//! real shell with canned responses.

use regex::{Captures, Regex};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use tracing::{debug, trace};

use super::BackendError;

/// Trait for running a shell command and capturing its output.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` through `sh -c`, optionally inside `cwd`.
    ///
    /// # Returns
    ///
    /// The captured stdout, or an error if the command could not be started
    /// or exited with a non-zero status.
    fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}

/// Real runner using `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, cwd: Option<&Path>) -> Result<String, BackendError> {
        debug!(command, cwd = ?cwd, "Running command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| BackendError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(command, bytes = stdout.len(), "Command finished");
        Ok(stdout)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // (\$)        - escaped dollar
        // ([A-Za-z_]…) - bare $NAME
        // \{(…)\}     - braced ${NAME}
        Regex::new(r"\$(?:(\$)|([A-Za-z_][A-Za-z0-9_]*)|\{([A-Za-z_][A-Za-z0-9_]*)\})").unwrap()
    })
}

/// A command line with `$NAME` / `${NAME}` placeholders.
///
/// Substitution is lenient: names without a value are left as written, and
/// `$$` stands for a literal `$`. Templates can be filled in stages with
/// [`bind`](Self::bind); the final [`render`](Self::render) resolves `$$`.
///
/// # Example
///
/// ```
/// use evalrelay::backend::CommandTemplate;
///
/// let send = CommandTemplate::new("opt submit --match ${ID} --solution '$SOLUTION' $$HOME")
///     .bind(&[("ID", "7")]);
/// assert_eq!(
///     send.render(&[("SOLUTION", "[1,2]")]),
///     "opt submit --match 7 --solution '[1,2]' $HOME"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    text: String,
}

impl CommandTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The template text with any bound values applied.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitutes the given names and keeps the result a template.
    ///
    /// Bound values are escaped so that a `$` inside a value stays literal.
    pub fn bind(&self, vars: &[(&str, &str)]) -> Self {
        let text = placeholder_regex().replace_all(&self.text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$$".to_string();
            }
            match lookup(caps, vars) {
                Some(value) => value.replace('$', "$$"),
                None => caps[0].to_string(),
            }
        });
        Self {
            text: text.into_owned(),
        }
    }

    /// Substitutes the given names and resolves `$$`.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        placeholder_regex()
            .replace_all(&self.text, |caps: &Captures| {
                if caps.get(1).is_some() {
                    return "$".to_string();
                }
                match lookup(caps, vars) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn lookup<'a>(caps: &Captures, vars: &[(&str, &'a str)]) -> Option<&'a str> {
    let name = caps.get(2).or_else(|| caps.get(3))?.as_str();
    vars.iter().find(|(key, _)| *key == name).map(|(_, value)| *value)
}
