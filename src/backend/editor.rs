//! External "override" editor: the user edits the raw XML of a device or the
//! whole domain in their own editor, and the result is re-imported.

use crate::backend::devices::DomainDocument;
use crate::config::Settings;
use crate::error::AppError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Exporting,
    AwaitingEditor,
    Reimporting,
    Applied,
    Conflict,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    Device(usize),
    Domain,
}

impl fmt::Display for EditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditTarget::Device(index) => write!(f, "device #{index}"),
            EditTarget::Domain => f.write_str("domain"),
        }
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Temporary file holding exported XML plus what is needed to re-import it.
/// Dropping the buffer deletes the file.
#[derive(Debug)]
pub struct EditBuffer {
    file: NamedTempFile,
    digest: [u8; 32],
    baseline: Box<DomainDocument>,
    target: EditTarget,
    state: EditState,
}

impl EditBuffer {
    pub(crate) fn create(
        text: &str,
        target: EditTarget,
        baseline: DomainDocument,
        temp_dir: Option<&Path>,
    ) -> Result<Self, AppError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("grustyvman-").suffix(".xml");
        let mut file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(text.as_bytes())?;
        file.flush()?;
        log::debug!("Exported {target} to {}", file.path().display());

        Ok(Self {
            file,
            digest: digest(text.as_bytes()),
            baseline: Box::new(baseline),
            target,
            state: EditState::Exporting,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Current file contents. Editors often replace the file rather than
    /// write into it, so this always reads by path.
    pub fn read_text(&self) -> Result<String, AppError> {
        Ok(std::fs::read_to_string(self.path())?)
    }

    pub fn target(&self) -> EditTarget {
        self.target
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: EditState) {
        self.state = state;
    }

    pub(crate) fn baseline(&self) -> &DomainDocument {
        &self.baseline
    }

    pub(crate) fn is_unchanged(&self, text: &str) -> bool {
        digest(text.as_bytes()) == self.digest
    }
}

/// An error that leaves the buffer (and the user's text) alive for another try.
#[derive(Debug)]
pub struct EditFailure {
    pub error: AppError,
    pub buffer: EditBuffer,
}

impl fmt::Display for EditFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for EditFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// --- Editor Command ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EditorCommand {
    /// Split a command string on whitespace. `None` for a blank string.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Configured editor, then `$VISUAL`, then `$EDITOR`, then the platform default.
    pub fn resolve(configured: Option<&str>) -> Self {
        let visual = std::env::var("VISUAL").ok();
        let editor = std::env::var("EDITOR").ok();
        Self::resolve_from(configured, visual.as_deref(), editor.as_deref())
    }

    pub fn resolve_from(configured: Option<&str>, visual: Option<&str>, editor: Option<&str>) -> Self {
        [configured, visual, editor]
            .into_iter()
            .flatten()
            .find_map(Self::parse)
            .unwrap_or_else(Self::platform_default)
    }

    fn platform_default() -> Self {
        let program = if cfg!(windows) { "notepad" } else { "vi" };
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for EditorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// --- Editor Process ---

#[derive(Debug)]
pub enum EditorExit {
    /// The editor exited (whatever its status); the buffer is ready to re-import.
    Exited(EditBuffer),
    /// The wait was cancelled; the editor was killed and the buffer removed.
    Cancelled,
    LaunchFailed(EditFailure),
}

pub struct EditorTask {
    handle: JoinHandle<EditorExit>,
    cancel: CancellationToken,
}

impl EditorTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this task when triggered from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(mut self) -> EditorExit {
        match (&mut self.handle).await {
            Ok(exit) => exit,
            Err(e) => {
                log::error!("Editor task failed: {e}");
                EditorExit::Cancelled
            }
        }
    }
}

impl Drop for EditorTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct OverrideEditor {
    command: EditorCommand,
}

impl OverrideEditor {
    pub fn new(command: EditorCommand) -> Self {
        Self { command }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(EditorCommand::resolve(settings.editor.as_deref()))
    }

    pub fn command(&self) -> &EditorCommand {
        &self.command
    }

    /// Run the editor on the buffer in a background task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(&self, mut buffer: EditBuffer) -> EditorTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let command = self.command.clone();
        buffer.set_state(EditState::AwaitingEditor);
        let handle = tokio::spawn(run_editor(command, buffer, token));
        EditorTask { handle, cancel }
    }
}

async fn run_editor(command: EditorCommand, mut buffer: EditBuffer, cancel: CancellationToken) -> EditorExit {
    let spawned = Command::new(&command.program)
        .args(&command.args)
        .arg(buffer.path())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            log::error!("Failed to launch editor `{command}`: {e}");
            buffer.set_state(EditState::Idle);
            return EditorExit::LaunchFailed(EditFailure {
                error: AppError::EditorLaunchFailed {
                    command: command.to_string(),
                    reason: e.to_string(),
                },
                buffer,
            });
        }
    };

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => log::info!("Editor `{command}` exited with {status}"),
                Err(e) => log::warn!("Failed to wait for editor `{command}`: {e}"),
            }
            buffer.set_state(EditState::Reimporting);
            EditorExit::Exited(buffer)
        }
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill editor `{command}`: {e}");
            }
            log::info!("Edit of {} cancelled", buffer.target());
            EditorExit::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_order() {
        let pick = |c, v, e| EditorCommand::resolve_from(c, v, e).program;
        assert_eq!(pick(Some("nano"), Some("code"), Some("vim")), "nano");
        assert_eq!(pick(None, Some("code --wait"), Some("vim")), "code");
        assert_eq!(pick(Some("   "), None, Some("vim")), "vim");
        let fallback = if cfg!(windows) { "notepad" } else { "vi" };
        assert_eq!(pick(None, None, None), fallback);
    }

    #[test]
    fn command_strings_split_on_whitespace() {
        let cmd = EditorCommand::parse("code  --wait --new-window").unwrap();
        assert_eq!(cmd.program, "code");
        assert_eq!(cmd.args, vec!["--wait", "--new-window"]);
        assert_eq!(cmd.to_string(), "code --wait --new-window");
    }

    #[test]
    fn buffer_file_is_removed_on_drop() {
        let buffer = EditBuffer::create("<disk/>\n", EditTarget::Device(0), DomainDocument::default(), None).unwrap();
        let path = buffer.path().to_path_buf();
        assert_eq!(buffer.read_text().unwrap(), "<disk/>\n");
        assert!(buffer.is_unchanged("<disk/>\n"));
        assert_eq!(buffer.state(), EditState::Exporting);
        drop(buffer);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_editor_hands_the_buffer_back() {
        let buffer = EditBuffer::create("<disk/>\n", EditTarget::Domain, DomainDocument::default(), None).unwrap();
        let editor = OverrideEditor::new(EditorCommand::parse("/nonexistent/editor-binary").unwrap());
        match editor.spawn(buffer).wait().await {
            EditorExit::LaunchFailed(failure) => {
                assert!(matches!(failure.error, AppError::EditorLaunchFailed { .. }));
                assert!(failure.buffer.path().exists());
                assert_eq!(failure.buffer.state(), EditState::Idle);
            }
            other => panic!("expected launch failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_editor_and_removes_buffer() {
        let buffer = EditBuffer::create("<disk/>\n", EditTarget::Domain, DomainDocument::default(), None).unwrap();
        let path = buffer.path().to_path_buf();
        let editor = OverrideEditor::new(EditorCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
        });
        let task = editor.spawn(buffer);
        task.cancel();
        assert!(matches!(task.wait().await, EditorExit::Cancelled));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_the_task_stops_the_editor() {
        let buffer = EditBuffer::create("<disk/>\n", EditTarget::Domain, DomainDocument::default(), None).unwrap();
        let path = buffer.path().to_path_buf();
        let editor = OverrideEditor::new(EditorCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
        });
        drop(editor.spawn(buffer));
        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(!path.exists());
    }
}
