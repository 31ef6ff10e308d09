//! Best-effort clipboard copy for room ids
//!
//! Tries arboard first, then the command line tools found on Wayland and
//! X11 desktops. Headless sessions simply get `None`.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// Which mechanism accepted the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardBackend {
    Arboard,
    WlCopy,
    XClip,
}

impl std::fmt::Display for ClipboardBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipboardBackend::Arboard => write!(f, "system clipboard"),
            ClipboardBackend::WlCopy => write!(f, "wl-copy"),
            ClipboardBackend::XClip => write!(f, "xclip"),
        }
    }
}

const FALLBACK_TOOLS: &[(&str, &[&str], ClipboardBackend)] = &[
    ("wl-copy", &[], ClipboardBackend::WlCopy),
    ("xclip", &["-selection", "clipboard"], ClipboardBackend::XClip),
];

/// Copy text to the clipboard
pub fn copy_text(text: &str) -> Option<ClipboardBackend> {
    if let Ok(mut clipboard) = arboard::Clipboard::new() {
        if clipboard.set_text(text).is_ok() {
            debug!("Copied via arboard");
            return Some(ClipboardBackend::Arboard);
        }
    }

    for (program, args, backend) in FALLBACK_TOOLS {
        if pipe_to(program, args, text) {
            debug!(tool = *program, "Copied via command line tool");
            return Some(*backend);
        }
    }

    warn!("No clipboard available");
    None
}

/// Feed `text` to a program's stdin; true if it exited cleanly
fn pipe_to(program: &str, args: &[&str], text: &str) -> bool {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(_) => return false,
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(text.as_bytes()).is_err() {
            return false;
        }
    }

    matches!(child.wait(), Ok(status) if status.success())
}
