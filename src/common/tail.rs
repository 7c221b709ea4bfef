//! Bounded reads from the end of append-only files.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Text read from the end of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailWindow {
    pub text: String,
    /// The window starts after byte 0, so its first line may be partial
    pub truncated: bool,
}

impl TailWindow {
    /// Lines that are safe to parse: drops the leading fragment of a
    /// truncated window.
    pub fn complete_lines(&self) -> impl Iterator<Item = &str> {
        let body = if self.truncated {
            self.text.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
        } else {
            self.text.as_str()
        };
        body.lines()
    }
}

fn try_tail_bytes(path: &Path, budget: u64) -> io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let read_len = len.min(budget);
    if read_len == 0 {
        return Ok((Vec::new(), len));
    }

    file.seek(SeekFrom::Start(len - read_len))?;
    let mut buf = Vec::with_capacity(read_len as usize);
    file.take(read_len).read_to_end(&mut buf)?;
    Ok((buf, len))
}

fn tail_or_empty(path: &Path, budget: u64) -> (Vec<u8>, u64) {
    match try_tail_bytes(path, budget) {
        Ok(read) => read,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "tail read failed");
            }
            (Vec::new(), 0)
        }
    }
}

/// Last `min(size, budget)` bytes of a file as text, and whether the window
/// was cut. A code point cut by the window start decodes lossily.
///
/// Missing, empty and unreadable files all yield an empty window.
pub fn read_tail_window(path: &Path, budget: u64) -> TailWindow {
    let (buf, len) = tail_or_empty(path, budget);
    TailWindow {
        truncated: (buf.len() as u64) < len,
        text: String::from_utf8_lossy(&buf).into_owned(),
    }
}
