//! Server-sent event framing shared by the streaming adapters.
//!
//! Bytes arrive in arbitrary splits; complete lines are turned into
//! [`SseLine`]s and the remainder is kept for the next push.

/// One meaningful SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseLine {
    /// `event: <name>`
    Event(String),
    /// `data: <payload>`
    Data(String),
}

#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and drain every complete line.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(line_end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            // Blank separators and comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    lines.push(SseLine::Data(data.to_string()));
                }
            }
        }
        lines
    }
}
