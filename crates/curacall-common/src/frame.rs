//! Incremental decoding of the two streaming wire formats this project
//! speaks: newline-delimited JSON (the local provider) and `event:`/`data:`
//! SSE blocks (the cloud provider and our own gateway). Both the provider
//! adapters and the client consumer feed raw TCP chunks into one
//! [`FrameBuffer`] so there is exactly one parser to get right.

/// One decoded SSE block. `event` is absent when the block carried only a
/// `data:` line; consumers default that to `token`/`message` as their
/// protocol dictates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Reassembles complete lines or `\n\n`-delimited blocks from arbitrarily
/// chunked bytes. Chunk boundaries may fall anywhere, including inside a
/// UTF-8 sequence; decoding is lossy only for genuinely invalid bytes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line (without its terminator), for NDJSON streams.
    /// Returns `None` until a full line is buffered. Blank lines are
    /// skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos])
                .trim_end_matches('\r')
                .trim()
                .to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Next complete SSE block. Comment lines (leading `:`) are dropped;
    /// blocks reduced to nothing by that are skipped entirely, so keep-alive
    /// pings never surface to callers.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let (pos, delim_len) = self.find_block_end()?;
            let block_bytes: Vec<u8> = self.buf.drain(..pos).collect();
            self.buf.drain(..delim_len);
            let block = String::from_utf8_lossy(&block_bytes).into_owned();
            if let Some(frame) = parse_block(&block) {
                return Some(frame);
            }
        }
    }

    /// Whatever is left after the upstream closed, as one final line.
    /// NDJSON producers sometimes omit the trailing newline on their last
    /// object.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if rest.is_empty() { None } else { Some(rest) }
    }

    fn find_block_end(&self) -> Option<(usize, usize)> {
        let lf = self.buf.windows(2).position(|w| w == b"\n\n");
        let crlf = self.buf.windows(4).position(|w| w == b"\r\n\r\n");
        match (lf, crlf) {
            (Some(a), Some(b)) if b < a => Some((b, 4)),
            (Some(a), _) => Some((a, 2)),
            (None, Some(b)) => Some((b, 4)),
            (None, None) => None,
        }
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim());
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}
