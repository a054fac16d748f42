use std::io::ErrorKind;
use std::io::IsTerminal;
use std::io::Write;
use std::process::Command;
use std::process::Stdio;

use tracing::debug;

use crate::Error;
use crate::Result;
use crate::SystemError;

/// True when stdout is a terminal that understands escapes.
pub fn is_smart_terminal() -> bool {
    let dumb = std::env::var("TERM").map(|t| t == "dumb").unwrap_or(false);
    !dumb && std::io::stdout().is_terminal()
}

/// Presents a stream of text to the user.
pub trait Pager {
    /// Hands `body` a writer feeding the pager and waits for the pager to
    /// exit.
    fn page(
        &self,
        body: &mut dyn FnMut(&mut dyn Write) -> Result<()>,
    ) -> Result<()>;

    /// Whether the output may carry ANSI colours.
    fn supports_color(&self) -> bool;
}

/// Pipes output through `less -F -r`.
#[derive(Debug, Clone)]
pub struct LessPager {
    program: String,
    args: Vec<String>,
}

impl Default for LessPager {
    fn default() -> Self {
        Self {
            program: "less".to_string(),
            args: vec!["-F".to_string(), "-r".to_string()],
        }
    }
}

impl LessPager {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// The user quitting the pager early closes the pipe; that is not an error.
fn is_broken_pipe(e: &Error) -> bool {
    matches!(
        e,
        Error::System(SystemError::Storage(crate::StorageError::IoError(io)))
            if io.kind() == ErrorKind::BrokenPipe
    )
}

impl Pager for LessPager {
    fn page(
        &self,
        body: &mut dyn FnMut(&mut dyn Write) -> Result<()>,
    ) -> Result<()> {
        let unavailable = |source| SystemError::ExternalToolUnavailable {
            program: self.program.clone(),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(unavailable)?;
        debug!("started pager {}", self.program);

        let result = match child.stdin.take() {
            Some(mut stdin) => {
                let written = body(&mut stdin).and_then(|_| Ok(stdin.flush()?));
                drop(stdin);
                written
            }
            None => Ok(()),
        };
        let status = child.wait().map_err(unavailable)?;

        match result {
            Err(e) if !is_broken_pipe(&e) => return Err(e),
            _ => {}
        }
        if !status.success() {
            return Err(SystemError::ExternalTool {
                program: self.program.clone(),
                status,
            }
            .into());
        }
        Ok(())
    }

    fn supports_color(&self) -> bool {
        true
    }
}

/// Writes straight to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutPager;

impl Pager for StdoutPager {
    fn page(
        &self,
        body: &mut dyn FnMut(&mut dyn Write) -> Result<()>,
    ) -> Result<()> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        match body(&mut lock).and_then(|_| Ok(lock.flush()?)) {
            Err(e) if !is_broken_pipe(&e) => Err(e),
            _ => Ok(()),
        }
    }

    fn supports_color(&self) -> bool {
        false
    }
}
