//! Assembles complete IMAP commands from socket reads.
//!
//! A line ending in `{N}` announces an N-byte literal. The framer asks for a
//! continuation, then consumes exactly N bytes (across as many reads as it
//! takes) before resuming line scanning. Literal bytes are spliced back into
//! the command as a quoted string so the command parser only ever sees one
//! line.
//!
//! Commands are bounded: a line longer than [`MAX_LINE_LENGTH`] or a command
//! whose literals would take it past [`MAX_COMMAND_SIZE`] is dropped and
//! reported as [`Frame::TooLong`].

/// Longest line buffered while waiting for its newline
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Largest assembled command, literals included
pub const MAX_COMMAND_SIZE: usize = 1024 * 1024;

/// Bytes of a rejected command kept so its tag can be answered
const REJECTED_HEAD: usize = 128;

/// Splits buffered socket input into commands
#[derive(Debug, Default)]
pub struct CommandFramer {
    buffer: Vec<u8>,
    pending_literal: Option<usize>,
    fragments: Vec<u8>,
    /// Dropping input up to the next newline after an oversized line
    discarding: bool,
}

/// Output of the framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete command, without its trailing CRLF
    Command(Vec<u8>),
    /// A literal was announced; the client waits for `+` before sending it
    Continuation,
    /// A command over the size limits, reduced to its leading bytes
    TooLong(Vec<u8>),
}

impl CommandFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Whether a literal is announced but not fully received
    pub fn awaiting_literal(&self) -> bool {
        self.pending_literal.is_some()
    }

    /// Next frame available from buffered input, if any
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(size) = self.pending_literal {
                if self.buffer.len() < size {
                    return None;
                }
                let literal: Vec<u8> = self.buffer.drain(..size).collect();
                append_quoted(&mut self.fragments, &literal);
                self.pending_literal = None;
                continue;
            }

            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    self.buffer.clear();
                } else if self.buffer.len() > MAX_LINE_LENGTH {
                    self.discarding = true;
                    let line = std::mem::take(&mut self.buffer);
                    return Some(self.reject(&line));
                }
                return None;
            };

            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.len() > MAX_LINE_LENGTH || self.fragments.len() + line.len() > MAX_COMMAND_SIZE {
                return Some(self.reject(&line));
            }

            if let Some((prefix, size)) = literal_announcement(&line) {
                if self.fragments.len() + prefix.len() + size > MAX_COMMAND_SIZE {
                    return Some(self.reject(prefix));
                }
                self.fragments.extend_from_slice(prefix);
                self.pending_literal = Some(size);
                return Some(Frame::Continuation);
            }

            self.fragments.extend_from_slice(&line);
            return Some(Frame::Command(std::mem::take(&mut self.fragments)));
        }
    }

    /// Drop the command assembled so far plus `tail`, keeping its head
    fn reject(&mut self, tail: &[u8]) -> Frame {
        let mut head = std::mem::take(&mut self.fragments);
        head.extend_from_slice(tail);
        head.truncate(REJECTED_HEAD);
        Frame::TooLong(head)
    }
}

/// Split `... {N}` into the text before the literal marker and N
fn literal_announcement(line: &[u8]) -> Option<(&[u8], usize)> {
    let body = line.strip_suffix(b"}")?;
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let size = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some((&line[..open], size))
}

fn append_quoted(out: &mut Vec<u8>, literal: &[u8]) {
    out.push(b'"');
    for &b in literal {
        if b == b'"' || b == b'\\' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'"');
}
