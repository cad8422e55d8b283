//! Operator-facing result line

use std::io::Write;
use std::sync::Mutex;

/// Where the latest scan result is shown; each call replaces the previous text
pub trait ResultDisplay: Send + Sync {
    fn show(&self, text: &str);
}

/// Rewrites a single status line on stdout
#[derive(Debug, Default)]
pub struct TerminalDisplay {
    // Serializes writes so concurrent scans don't interleave
    lock: Mutex<()>,
}

impl TerminalDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultDisplay for TerminalDisplay {
    fn show(&self, text: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();
        // Clear the line, then write the new result in place
        let written = write!(out, "\r\x1b[2K{}", text).and_then(|_| out.flush());
        if let Err(e) = written {
            log::warn!("Failed to write result line: {}", e);
        }
    }
}

/// Keeps the latest text in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    current: Mutex<Option<String>>,
}

#[cfg(test)]
impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
impl ResultDisplay for MemoryDisplay {
    fn show(&self, text: &str) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_display_replaces_text() {
        let display = MemoryDisplay::new();
        assert_eq!(display.current(), None);
        display.show("first");
        display.show("second");
        assert_eq!(display.current().as_deref(), Some("second"));
    }
}
