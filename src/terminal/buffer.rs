//! Terminal output buffer with front truncation.
//!
//! Bytes arrive from stdout and stderr in pipe-sized chunks that can split a
//! multi-byte character. The buffer carries incomplete sequences over to the
//! next chunk, replaces invalid ones with U+FFFD, and, when a byte limit is
//! set, drops the oldest text so the newest output always fits.

/// Accumulated terminal output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    text: String,
    limit: Option<usize>,
    truncated: bool,
    carry: Vec<u8>,
}

impl OutputBuffer {
    /// Empty buffer retaining at most `limit` bytes (unbounded when `None`).
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Append raw pipe bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.text
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        self.enforce_limit();
    }

    /// Append already-decoded text.
    pub fn push_str(&mut self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    /// Flush a dangling partial character once the pipes are closed.
    pub fn finish(&mut self) {
        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            self.text.push_str(&String::from_utf8_lossy(&carry));
            self.enforce_limit();
        }
    }

    /// Current contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether output has been dropped to honor the limit.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Retained size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Configured limit.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.limit else { return };
        if self.text.len() <= limit {
            return;
        }
        // Cut on a char boundary; the result may be slightly under the limit.
        let mut cut = self.text.len() - limit;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
        self.truncated = true;
    }
}
