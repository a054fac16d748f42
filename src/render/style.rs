use std::io::Write;

use crate::Result;

/// Role of a piece of output text. Writers map roles to colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Revision,
    Timestamp,
}

impl Style {
    /// SGR colour code, `None` for uncoloured text
    pub fn ansi_code(self) -> Option<&'static str> {
        match self {
            Style::Plain => None,
            Style::Revision => Some("33"),
            Style::Timestamp => Some("34"),
        }
    }
}

pub trait StyledWriter {
    fn emit(
        &mut self,
        style: Style,
        text: &str,
    ) -> Result<()>;
}

/// Writes text without any styling.
pub struct PlainWriter<W> {
    inner: W,
}

impl<W: Write> PlainWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> StyledWriter for PlainWriter<W> {
    fn emit(
        &mut self,
        _style: Style,
        text: &str,
    ) -> Result<()> {
        self.inner.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// Wraps styled text in ANSI colour escapes.
pub struct AnsiWriter<W> {
    inner: W,
}

impl<W: Write> AnsiWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> StyledWriter for AnsiWriter<W> {
    fn emit(
        &mut self,
        style: Style,
        text: &str,
    ) -> Result<()> {
        match style.ansi_code() {
            Some(code) => write!(self.inner, "\x1b[{code}m{text}\x1b[0m")?,
            None => self.inner.write_all(text.as_bytes())?,
        }
        Ok(())
    }
}
