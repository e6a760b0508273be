use memchr::memchr;

/// Assembles complete lines out of arbitrarily-split input chunks.
/// A line is only surfaced once its LF has arrived; a trailing partial
/// line (including a CR whose LF may be in the next chunk) stays
/// buffered until more input or end of input.
#[derive(Default)]
pub struct LineScanner {
    buf: Vec<u8>,
    pos: usize,
}

impl LineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// The next complete line, including its terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let idx = memchr(b'\n', &self.buf[self.pos..])?;
        let end = self.pos + idx + 1;
        let line = self.buf[self.pos..end].to_vec();
        self.pos = end;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        Some(line)
    }

    /// At end of input: whatever is buffered without a terminator.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.pos < self.buf.len() {
            let rest = self.buf[self.pos..].to_vec();
            self.buf.clear();
            self.pos = 0;
            Some(rest)
        } else {
            None
        }
    }
}

/// Split a line into its content and its line ending.
pub fn split_line_ending(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") || line.ends_with(b"\r") {
        line.split_at(line.len() - 1)
    } else {
        (line, &[])
    }
}

pub fn is_blank_line(line: &[u8]) -> bool {
    split_line_ending(line).0.is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryClass {
    /// `--boundary`: opens the next sibling part
    Delimiter,
    /// `--boundary--`: no further parts in this multipart
    Terminator,
}

/// Classify a line (without its ending) against a boundary string.
/// Trailing whitespace after the boundary token is tolerated per
/// RFC 2046; any other trailing content means this is ordinary data
/// that merely happens to share a prefix with the boundary.
pub fn classify_boundary(content: &[u8], boundary: &str) -> Option<BoundaryClass> {
    let rest = content.strip_prefix(b"--")?;
    let rest = rest.strip_prefix(boundary.as_bytes())?;
    let (rest, class) = match rest.strip_prefix(b"--") {
        Some(rest) => (rest, BoundaryClass::Terminator),
        None => (rest, BoundaryClass::Delimiter),
    };
    if rest.iter().all(|&b| b == b' ' || b == b'\t') {
        Some(class)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lines_across_chunk_splits() {
        let input = b"first\r\nsecond\nthird";
        for split in 0..=input.len() {
            let mut scanner = LineScanner::new();
            scanner.push(&input[..split]);
            let mut lines: Vec<Vec<u8>> = vec![];
            while let Some(line) = scanner.next_line() {
                lines.push(line);
            }
            scanner.push(&input[split..]);
            while let Some(line) = scanner.next_line() {
                lines.push(line);
            }
            if let Some(rest) = scanner.take_remainder() {
                lines.push(rest);
            }
            assert_eq!(
                lines,
                vec![
                    b"first\r\n".to_vec(),
                    b"second\n".to_vec(),
                    b"third".to_vec()
                ],
                "split at {split}"
            );
        }
    }

    #[test]
    fn remainder_only_when_unterminated() {
        let mut scanner = LineScanner::new();
        scanner.push(b"complete\n");
        assert_eq!(scanner.next_line().unwrap(), b"complete\n");
        assert_eq!(scanner.take_remainder(), None);
    }

    #[test]
    fn line_ending_split() {
        assert_eq!(split_line_ending(b"x\r\n"), (&b"x"[..], &b"\r\n"[..]));
        assert_eq!(split_line_ending(b"x\n"), (&b"x"[..], &b"\n"[..]));
        assert_eq!(split_line_ending(b"x"), (&b"x"[..], &b""[..]));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"\n"));
        assert!(!is_blank_line(b" \n"));
    }

    #[test]
    fn boundary_classification() {
        assert_eq!(
            classify_boundary(b"--abc", "abc"),
            Some(BoundaryClass::Delimiter)
        );
        assert_eq!(
            classify_boundary(b"--abc--", "abc"),
            Some(BoundaryClass::Terminator)
        );
        assert_eq!(
            classify_boundary(b"--abc--  \t", "abc"),
            Some(BoundaryClass::Terminator)
        );
        // prefix collision is not a boundary
        assert_eq!(classify_boundary(b"--abcdef", "abc"), None);
        assert_eq!(classify_boundary(b"--abc def", "abc"), None);
        assert_eq!(classify_boundary(b"-abc", "abc"), None);
        assert_eq!(classify_boundary(b"plain text", "abc"), None);
    }
}
