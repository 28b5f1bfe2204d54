//! Incremental Server-Sent-Events framing over a raw byte stream.
//!
//! Bytes arrive in arbitrary slices. [`SseDecoder::feed`] decodes them as
//! UTF-8, carrying an incomplete trailing sequence over to the next call,
//! normalizes line endings to `\n` and returns every frame completed by a
//! blank line. Whatever is left when the body ends is handed back by
//! [`SseDecoder::finish`].

/// One blank-line-delimited unit of an event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parses the lines of a single frame. Frames without a `data:` line
    /// carry nothing and yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut event = None;
        let mut data: Option<String> = None;

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                let name = rest.trim();
                if !name.is_empty() {
                    event = Some(name.to_string());
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.trim();
                match data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(rest);
                    }
                    None => data = Some(rest.to_string()),
                }
            }
            // `:` comments, `id:` and `retry:` carry nothing we use.
        }

        data.filter(|d| !d.is_empty()).map(|data| SseFrame { event, data })
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
    last_was_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);
        let decoded = self.decode_pending();
        self.push_normalized(&decoded);
        self.drain_frames()
    }

    /// Flushes the decoder at end of body and parses any residual text as a
    /// final frame.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.push_normalized(&rest);
        }
        self.last_was_cr = false;

        let residual = std::mem::take(&mut self.buffer);
        if residual.trim().is_empty() {
            return None;
        }
        SseFrame::parse(&residual)
    }

    fn decode_pending(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        // Incomplete sequence at the end, wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn push_normalized(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => {
                    self.buffer.push('\n');
                    self.last_was_cr = true;
                }
                '\n' if self.last_was_cr => {
                    self.last_was_cr = false;
                }
                other => {
                    self.buffer.push(other);
                    self.last_was_cr = false;
                }
            }
        }
    }

    fn drain_frames(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let unit: String = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = SseFrame::parse(&unit) {
                frames.push(frame);
            }
        }
        frames
    }
}
