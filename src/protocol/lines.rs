//! Newline framing of the HAT byte stream

/// Accumulates raw bytes and yields `\n`-terminated lines with the CR
/// stripped. Empty lines are dropped. The bootloader prompt never gets a
/// newline, so [`LineBuffer::take_marker`] scans the unframed bytes too.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete, non-empty line.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        None
    }

    /// If `marker` occurs anywhere in the buffered bytes, consume through its
    /// end and return true. Bytes before the marker are discarded.
    pub fn take_marker(&mut self, marker: &[u8]) -> bool {
        if marker.is_empty() || self.buf.len() < marker.len() {
            return false;
        }
        let end = self.buf.len() - marker.len();
        for start in 0..=end {
            if &self.buf[start..start + marker.len()] == marker {
                self.buf.drain(..start + marker.len());
                return true;
            }
        }
        false
    }
}
