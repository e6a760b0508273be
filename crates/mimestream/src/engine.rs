//! The streaming engine: drives the line scanner over arbitrarily-split
//! input chunks, maintains the stack of open parts, applies transfer and
//! charset decoding, and delivers events to the caller's [`Emitter`].

use crate::decoder::{CharsetStream, DecoderRegistry, TransferDecoder};
use crate::header::{Header, HeaderParseResult};
use crate::headermap::HeaderMap;
use crate::scanner::{
    classify_boundary, is_blank_line, split_line_ending, BoundaryClass, LineScanner,
};
use crate::{MimeError, Result};
use serde::{Deserialize, Serialize};

/// Parts nested more deeply than this are treated as opaque content.
pub const MAX_PART_DEPTH: usize = 20;
/// Parts beyond this count are treated as opaque content.
pub const MAX_PARTS: usize = 1000;

/// Identifies a part within the message tree as a dotted path.
/// The root part is the empty string; its children are `"1"`, `"2"` and
/// so on, in document order, and their children extend the path, so the
/// second child of the first part is `"1.2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(String);

impl PartId {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        for segment in s.split('.') {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MimeError::InvalidPartId(s.to_string()));
            }
        }
        Ok(Self(s.to_string()))
    }

    pub fn child(&self, n: usize) -> Self {
        if self.0.is_empty() {
            Self(n.to_string())
        } else {
            Self(format!("{}.{n}", self.0))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `other` lies within the subtree rooted at `self`
    /// (inclusive). Comparison is per path segment, so `"2"` does not
    /// contain `"21"`.
    pub fn contains(&self, other: &PartId) -> bool {
        if self.0.is_empty() {
            return true;
        }
        other.0.starts_with(&self.0)
            && matches!(other.0.as_bytes().get(self.0.len()), None | Some(b'.'))
    }
}

impl std::fmt::Display for PartId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl std::str::FromStr for PartId {
    type Err = MimeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// What to do with part body content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Structure only; no data events
    None,
    /// Deliver body bytes exactly as they appear on the wire
    #[default]
    Raw,
    /// Apply content-transfer-encoding and charset decoding
    Decode,
}

/// Receives the event stream for one parse session.
/// `start_part`/`part_data`/`end_part` nest according to the part tree,
/// in document order; `end_all_parts` arrives exactly once at the end.
/// The engine owns the emitter for the duration of the session and hands
/// it back from [`MimeParser::finish`].
pub trait Emitter {
    /// The session is about to begin delivering events.
    fn start_request(&mut self) {}

    /// The session is over; no further events will arrive.
    fn stop_request(&mut self) {}

    /// Fired exactly once per part, as soon as its header block has been
    /// terminated by a blank line (or the input ended first).
    fn start_part(&mut self, id: &PartId, headers: &HeaderMap);

    /// Zero or more data events per part, in order. Only leaf parts
    /// produce data; multipart preambles and epilogues do not.
    fn part_data(&mut self, id: &PartId, data: &[u8]);

    fn end_part(&mut self, id: &PartId);

    fn end_all_parts(&mut self);
}

pub type ErrorCallback = Box<dyn FnMut(&MimeError) + Send>;

/// Per-session parser configuration.
#[derive(Default)]
pub struct ParserOptions {
    /// Restrict data delivery and descent to the subtree rooted at this
    /// part. Structure events are still emitted for parts outside it.
    pub prune_at: Option<PartId>,
    pub body_format: BodyFormat,
    /// Observation channel for recoverable anomalies. The parse always
    /// continues; when unset, anomalies are silently absorbed.
    pub on_error: Option<ErrorCallback>,
    /// Content-transfer-encoding strategies for this session.
    pub decoders: DecoderRegistry,
}

impl std::fmt::Debug for ParserOptions {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("ParserOptions")
            .field("prune_at", &self.prune_at)
            .field("body_format", &self.body_format)
            .field("on_error", &self.on_error.as_ref().map(|_| "..."))
            .field("decoders", &self.decoders)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Headers,
    Body,
}

struct PartFrame {
    id: PartId,
    phase: Phase,
    header_block: Vec<u8>,
    /// Set when this part is a multipart container being descended into
    boundary: Option<String>,
    /// Saw the terminating boundary; anything further is epilogue
    multipart_closed: bool,
    /// Containers (multipart or message wrappers) never deliver data
    is_container: bool,
    /// 1-based index for the next child part
    next_child: usize,
    decoder: Option<Box<dyn TransferDecoder>>,
    charset: Option<CharsetStream>,
    /// The line ending of the previous content line. It belongs to the
    /// boundary when one follows, so delivery is deferred by one line.
    pending_eol: Vec<u8>,
    deliver: bool,
}

impl PartFrame {
    fn new(id: PartId) -> Self {
        Self {
            id,
            phase: Phase::Headers,
            header_block: vec![],
            boundary: None,
            multipart_closed: false,
            is_container: false,
            next_child: 1,
            decoder: None,
            charset: None,
            pending_eol: vec![],
            deliver: false,
        }
    }
}

fn report(on_error: &mut Option<ErrorCallback>, err: MimeError) {
    tracing::trace!(error = %err, "recoverable parse anomaly");
    if let Some(cb) = on_error.as_mut() {
        cb(&err);
    }
}

/// An incremental MIME parse session.
///
/// Feed input with [`push`](Self::push) in chunks of any size; event
/// delivery is invariant under how the input is split. Call
/// [`finish`](Self::finish) at end of input to close out any open parts
/// and recover the emitter.
pub struct MimeParser<E: Emitter> {
    emitter: E,
    prune_at: PartId,
    body_format: BodyFormat,
    on_error: Option<ErrorCallback>,
    decoders: DecoderRegistry,
    scanner: LineScanner,
    stack: Vec<PartFrame>,
    total_parts: usize,
    announced: bool,
}

impl<E: Emitter> MimeParser<E> {
    pub fn new(emitter: E, options: ParserOptions) -> Self {
        Self {
            emitter,
            prune_at: options.prune_at.unwrap_or_else(PartId::root),
            body_format: options.body_format,
            on_error: options.on_error,
            decoders: options.decoders,
            scanner: LineScanner::new(),
            stack: vec![PartFrame::new(PartId::root())],
            total_parts: 0,
            announced: false,
        }
    }

    /// Feed the next chunk of input. Chunks may be split anywhere,
    /// including inside a line ending, a boundary line or an encoded
    /// quartet.
    pub fn push(&mut self, chunk: &[u8]) {
        if !self.announced {
            self.announced = true;
            self.emitter.start_request();
        }
        self.scanner.push(chunk);
        while let Some(line) = self.scanner.next_line() {
            self.process_line(&line);
        }
    }

    /// Signal end of input: processes any unterminated final line,
    /// closes all open parts innermost-first, emits `end_all_parts`,
    /// and hands the emitter back.
    pub fn finish(mut self) -> E {
        if !self.announced {
            self.emitter.start_request();
        }
        if let Some(rest) = self.scanner.take_remainder() {
            self.process_line(&rest);
        }
        while !self.stack.is_empty() {
            self.pop_one(false);
        }
        self.emitter.end_all_parts();
        self.emitter.stop_request();
        self.emitter
    }

    fn process_line(&mut self, line: &[u8]) {
        let (content, _eol) = split_line_ending(line);

        // Boundary lines are recognized at any nesting level and in any
        // phase; the innermost open multipart wins when nested
        // boundaries share a prefix.
        if content.starts_with(b"--") {
            let mut matched = None;
            for (idx, frame) in self.stack.iter().enumerate().rev() {
                if frame.multipart_closed {
                    continue;
                }
                if let Some(boundary) = &frame.boundary {
                    if let Some(class) = classify_boundary(content, boundary) {
                        matched = Some((idx, class));
                        break;
                    }
                }
            }
            if let Some((owner_idx, class)) = matched {
                self.handle_boundary(owner_idx, class);
                return;
            }
        }

        match self.stack.last().map(|frame| frame.phase) {
            Some(Phase::Headers) => self.header_line(line),
            Some(Phase::Body) => self.body_line(line),
            None => {}
        }
    }

    fn header_line(&mut self, line: &[u8]) {
        if is_blank_line(line) {
            self.finalize_headers();
            return;
        }
        if let Some(frame) = self.stack.last_mut() {
            frame.header_block.extend_from_slice(line);
        }
    }

    /// The blank line arrived (or the header block was cut short):
    /// parse the accumulated block, emit `start_part`, and set up the
    /// body handling state for this part.
    fn finalize_headers(&mut self) {
        let body_format = self.body_format;
        let depth = self.stack.len();
        let Some(frame) = self.stack.last_mut() else {
            return;
        };
        frame.phase = Phase::Body;

        let block = String::from_utf8_lossy(&std::mem::take(&mut frame.header_block)).into_owned();
        let HeaderParseResult {
            headers,
            body_offset: _,
            anomalies,
        } = Header::parse_headers(block);
        for err in anomalies {
            report(&mut self.on_error, err);
        }

        let content_type = match headers.content_type() {
            Ok(ct) => ct,
            Err(err) => {
                report(&mut self.on_error, err);
                None
            }
        };

        let mut boundary = None;
        let mut is_message = false;
        let mut is_text = false;
        let mut charset_label = None;
        if let Some(ct) = &content_type {
            if ct.is_multipart() {
                match ct.get("boundary") {
                    Some(b) if !b.is_empty() => boundary = Some(b),
                    _ => report(
                        &mut self.on_error,
                        MimeError::Structure(format!(
                            "{} part without a usable boundary parameter, treating as opaque",
                            ct.value
                        )),
                    ),
                }
            }
            is_message = ct.is_message();
            is_text = ct.is_text();
            charset_label = ct.get("charset");
        }

        let in_scope = self.prune_at.contains(&frame.id);
        let on_scope_path = frame.id.contains(&self.prune_at);
        if !(in_scope || on_scope_path) {
            // Outside the pruned subtree: structure events only, and no
            // descent into whatever this part may contain
            boundary = None;
            is_message = false;
        }

        let descend_message = is_message
            && depth < MAX_PART_DEPTH
            && self.total_parts < MAX_PARTS;
        if is_message && !descend_message {
            report(
                &mut self.on_error,
                MimeError::Structure(format!(
                    "embedded message at {} exceeds nesting or part limits, treating as opaque",
                    frame.id
                )),
            );
        }

        frame.is_container = boundary.is_some() || descend_message;
        frame.boundary = boundary;
        frame.deliver =
            in_scope && !frame.is_container && !matches!(body_format, BodyFormat::None);

        if frame.deliver && matches!(body_format, BodyFormat::Decode) {
            let encoding = match headers.content_transfer_encoding() {
                Ok(Some(params)) => params.value,
                Ok(None) => "7bit".to_string(),
                Err(err) => {
                    report(&mut self.on_error, err);
                    "7bit".to_string()
                }
            };
            frame.decoder = self.decoders.make(&encoding);
            if frame.decoder.is_none() {
                report(
                    &mut self.on_error,
                    MimeError::UnknownTransferEncoding(encoding),
                );
            }
            if is_text {
                let label = charset_label.unwrap_or_else(|| "us-ascii".to_string());
                frame.charset = CharsetStream::for_label(&label);
                if frame.charset.is_none() {
                    report(&mut self.on_error, MimeError::UnsupportedCharset(label));
                }
            }
        }

        tracing::trace!(part = %frame.id, "start_part");
        self.emitter.start_part(&frame.id, &headers);

        if descend_message {
            frame.next_child = 2;
            let child_id = frame.id.child(1);
            self.total_parts += 1;
            self.stack.push(PartFrame::new(child_id));
        }
    }

    fn body_line(&mut self, line: &[u8]) {
        let body_format = self.body_format;
        let Some(frame) = self.stack.last_mut() else {
            return;
        };
        if frame.is_container {
            // Preamble or epilogue of a multipart; not part content
            return;
        }
        let (content, eol) = split_line_ending(line);
        if !frame.pending_eol.is_empty() {
            let pending = std::mem::take(&mut frame.pending_eol);
            Self::emit_data(&mut self.emitter, body_format, frame, &pending);
        }
        if !content.is_empty() {
            Self::emit_data(&mut self.emitter, body_format, frame, content);
        }
        frame.pending_eol = eol.to_vec();
    }

    fn emit_data(emitter: &mut E, body_format: BodyFormat, frame: &mut PartFrame, bytes: &[u8]) {
        if !frame.deliver {
            return;
        }
        match body_format {
            BodyFormat::None => {}
            BodyFormat::Raw => emitter.part_data(&frame.id, bytes),
            BodyFormat::Decode => {
                let mut buf = vec![];
                match frame.decoder.as_mut() {
                    Some(decoder) => decoder.decode(bytes, &mut buf),
                    None => buf.extend_from_slice(bytes),
                }
                match frame.charset.as_mut() {
                    Some(charset) => {
                        let text = charset.decode(&buf, false);
                        if !text.is_empty() {
                            emitter.part_data(&frame.id, text.as_bytes());
                        }
                    }
                    None => {
                        if !buf.is_empty() {
                            emitter.part_data(&frame.id, &buf);
                        }
                    }
                }
            }
        }
    }

    fn handle_boundary(&mut self, owner_idx: usize, class: BoundaryClass) {
        // Anything open inside the owning multipart ends here
        while self.stack.len() > owner_idx + 1 {
            self.pop_one(true);
        }
        match class {
            BoundaryClass::Delimiter => self.open_child(owner_idx),
            BoundaryClass::Terminator => {
                if let Some(owner) = self.stack.get_mut(owner_idx) {
                    tracing::trace!(part = %owner.id, "multipart terminated");
                    owner.multipart_closed = true;
                }
            }
        }
    }

    fn open_child(&mut self, owner_idx: usize) {
        let child_id = {
            let Some(owner) = self.stack.get_mut(owner_idx) else {
                return;
            };
            let id = owner.id.child(owner.next_child);
            owner.next_child += 1;
            id
        };
        if self.stack.len() >= MAX_PART_DEPTH {
            report(
                &mut self.on_error,
                MimeError::Structure(format!(
                    "part {child_id} is nested too deeply, skipping its content"
                )),
            );
            return;
        }
        if self.total_parts >= MAX_PARTS {
            report(
                &mut self.on_error,
                MimeError::Structure(format!(
                    "part {child_id} exceeds the part count limit, skipping its content"
                )),
            );
            return;
        }
        self.total_parts += 1;
        self.stack.push(PartFrame::new(child_id));
    }

    /// Close the top frame. When closing because a boundary line
    /// arrived, the pending line ending belonged to the boundary and is
    /// dropped; at end of input it is genuine trailing content.
    fn pop_one(&mut self, due_to_boundary: bool) {
        match self.stack.last().map(|frame| frame.phase) {
            Some(Phase::Headers) => {
                report(
                    &mut self.on_error,
                    MimeError::Structure(
                        "header block not terminated by a blank line".to_string(),
                    ),
                );
                // May push an embedded message child; the caller's loop
                // will close that first
                self.finalize_headers();
                return;
            }
            Some(Phase::Body) => {}
            None => return,
        }
        let body_format = self.body_format;
        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        if !due_to_boundary && !frame.pending_eol.is_empty() {
            let pending = std::mem::take(&mut frame.pending_eol);
            Self::emit_data(&mut self.emitter, body_format, &mut frame, &pending);
        }
        if frame.deliver && matches!(body_format, BodyFormat::Decode) {
            let mut buf = vec![];
            if let Some(decoder) = frame.decoder.as_mut() {
                decoder.finish(&mut buf);
            }
            match frame.charset.as_mut() {
                Some(charset) => {
                    let text = charset.decode(&buf, true);
                    if !text.is_empty() {
                        self.emitter.part_data(&frame.id, text.as_bytes());
                    }
                }
                None => {
                    if !buf.is_empty() {
                        self.emitter.part_data(&frame.id, &buf);
                    }
                }
            }
        }
        if frame.boundary.is_some() && !frame.multipart_closed {
            report(
                &mut self.on_error,
                MimeError::Structure(format!(
                    "multipart {} closed without its terminating boundary",
                    frame.id
                )),
            );
        }
        tracing::trace!(part = %frame.id, "end_part");
        self.emitter.end_part(&frame.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(String),
        Data(String, Vec<u8>),
        End(String),
        EndAll,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        headers: Vec<(String, Vec<(String, String)>)>,
        requests: usize,
        stops: usize,
    }

    impl Recorder {
        fn header_value(&self, part: &str, name: &str) -> Option<String> {
            let (_, headers) = self.headers.iter().find(|(id, _)| id == part)?;
            headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }
    }

    impl Emitter for Recorder {
        fn start_request(&mut self) {
            self.requests += 1;
        }

        fn stop_request(&mut self) {
            self.stops += 1;
        }

        fn start_part(&mut self, id: &PartId, headers: &HeaderMap) {
            self.headers.push((
                id.to_string(),
                headers
                    .iter()
                    .map(|h| (h.get_name().to_string(), h.get_raw_value().to_string()))
                    .collect(),
            ));
            self.events.push(Event::Start(id.to_string()));
        }

        fn part_data(&mut self, id: &PartId, data: &[u8]) {
            // Coalesce adjacent data for the same part, so assertions are
            // insensitive to how delivery happened to be batched
            if let Some(Event::Data(last_id, buf)) = self.events.last_mut() {
                if last_id == id.as_str() {
                    buf.extend_from_slice(data);
                    return;
                }
            }
            self.events.push(Event::Data(id.to_string(), data.to_vec()));
        }

        fn end_part(&mut self, id: &PartId) {
            self.events.push(Event::End(id.to_string()));
        }

        fn end_all_parts(&mut self) {
            self.events.push(Event::EndAll);
        }
    }

    fn run(input: &[u8], options: ParserOptions) -> Recorder {
        let mut parser = MimeParser::new(Recorder::default(), options);
        parser.push(input);
        parser.finish()
    }

    fn start(id: &str) -> Event {
        Event::Start(id.to_string())
    }
    fn data(id: &str, bytes: &[u8]) -> Event {
        Event::Data(id.to_string(), bytes.to_vec())
    }
    fn end(id: &str) -> Event {
        Event::End(id.to_string())
    }

    #[test]
    fn part_id_paths() {
        let root = PartId::root();
        assert!(root.is_root());
        let two = root.child(2);
        assert_eq!(two.as_str(), "2");
        assert_eq!(two.child(1).as_str(), "2.1");

        assert!(root.contains(&two));
        assert!(two.contains(&two));
        assert!(two.contains(&PartId::parse("2.1.3").unwrap()));
        assert!(!two.contains(&PartId::parse("21").unwrap()));
        assert!(!two.contains(&root));

        assert!(PartId::parse("1.2.3").is_ok());
        assert!(PartId::parse("1..2").is_err());
        assert!(PartId::parse("1.x").is_err());
    }

    #[test]
    fn simple_multipart() {
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "preamble to be ignored\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello\r\n",
            "--X--\r\n",
            "epilogue to be ignored\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                data("1", b"hello"),
                end("1"),
                end(""),
                Event::EndAll,
            ]
        );
        assert_eq!(recorder.requests, 1);
        assert_eq!(recorder.stops, 1);
        assert_eq!(
            recorder.header_value("1", "Content-Type").as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn non_multipart_body_keeps_interior_newlines() {
        let message = concat!(
            "Subject: simple\r\n",
            "\r\n",
            "line one\r\n",
            "\r\n",
            "line two\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                data("", b"line one\r\n\r\nline two\r\n"),
                end(""),
                Event::EndAll,
            ]
        );
    }

    fn nested_message() -> &'static str {
        concat!(
            "From: sender@example.com\r\n",
            "Content-Type: multipart/mixed; boundary=outer\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: text/plain; charset=ISO-8859-1\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "caf=E9 one\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative;\r\n",
            "\tboundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "aGVsbG8gbmVz\r\n",
            "dGVkIHdvcmxk\r\n",
            "--inner--\r\n",
            "--outer--\r\n"
        )
    }

    #[test]
    fn nested_multipart_decoded() {
        let recorder = run(
            nested_message().as_bytes(),
            ParserOptions {
                body_format: BodyFormat::Decode,
                ..Default::default()
            },
        );
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                data("1", "café one".as_bytes()),
                end("1"),
                start("2"),
                start("2.1"),
                data("2.1", b"hello nested world"),
                end("2.1"),
                end("2"),
                end(""),
                Event::EndAll,
            ]
        );
    }

    #[test]
    fn chunk_boundary_invariance() {
        let message = nested_message().as_bytes();
        let reference = run(
            message,
            ParserOptions {
                body_format: BodyFormat::Decode,
                ..Default::default()
            },
        );
        for split in 0..=message.len() {
            let mut parser = MimeParser::new(
                Recorder::default(),
                ParserOptions {
                    body_format: BodyFormat::Decode,
                    ..Default::default()
                },
            );
            parser.push(&message[..split]);
            parser.push(&message[split..]);
            let recorder = parser.finish();
            assert_eq!(recorder.events, reference.events, "split at {split}");
            assert_eq!(recorder.headers, reference.headers, "split at {split}");
        }
    }

    #[test]
    fn balanced_events_from_any_split() {
        // one-byte-at-a-time delivery must also behave
        let message = nested_message().as_bytes();
        let mut parser = MimeParser::new(Recorder::default(), ParserOptions::default());
        for byte in message {
            parser.push(std::slice::from_ref(byte));
        }
        let recorder = parser.finish();

        let mut open: Vec<String> = vec![];
        let mut ended_all = 0;
        for event in &recorder.events {
            match event {
                Event::Start(id) => open.push(id.clone()),
                Event::Data(id, _) => {
                    assert_eq!(open.last(), Some(id), "data outside its part")
                }
                Event::End(id) => {
                    assert_eq!(open.pop().as_ref(), Some(id), "unbalanced end")
                }
                Event::EndAll => ended_all += 1,
            }
        }
        assert!(open.is_empty());
        assert_eq!(ended_all, 1);
        assert_eq!(recorder.events.last(), Some(&Event::EndAll));
    }

    #[test]
    fn pruned_subtree() {
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=out\r\n",
            "\r\n",
            "--out\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first part\r\n",
            "--out\r\n",
            "Content-Type: multipart/mixed; boundary=in\r\n",
            "\r\n",
            "--in\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "nested content\r\n",
            "--in--\r\n",
            "--out--\r\n"
        );
        let recorder = run(
            message.as_bytes(),
            ParserOptions {
                prune_at: Some(PartId::parse("2").unwrap()),
                ..Default::default()
            },
        );
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                end("1"),
                start("2"),
                start("2.1"),
                data("2.1", b"nested content"),
                end("2.1"),
                end("2"),
                end(""),
                Event::EndAll,
            ]
        );
    }

    #[test]
    fn message_rfc822_descends() {
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: message/rfc822\r\n",
            "\r\n",
            "Subject: inner\r\n",
            "\r\n",
            "inner body\r\n",
            "--X--\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                start("1.1"),
                data("1.1", b"inner body"),
                end("1.1"),
                end("1"),
                end(""),
                Event::EndAll,
            ]
        );
        assert_eq!(
            recorder.header_value("1.1", "Subject").as_deref(),
            Some("inner")
        );
    }

    #[test]
    fn eof_closes_open_parts() {
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "dangling"
        );
        let anomalies = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&anomalies);
        let recorder = run(
            message.as_bytes(),
            ParserOptions {
                on_error: Some(Box::new(move |err| {
                    sink.lock().unwrap().push(err.to_string());
                })),
                ..Default::default()
            },
        );
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                data("1", b"dangling"),
                end("1"),
                end(""),
                Event::EndAll,
            ]
        );
        let anomalies = anomalies.lock().unwrap();
        assert!(
            anomalies.iter().any(|a| a.contains("terminating boundary")),
            "expected unterminated multipart anomaly, got {anomalies:?}"
        );
    }

    #[test]
    fn multipart_without_boundary_is_opaque() {
        let message = concat!(
            "Content-Type: multipart/mixed\r\n",
            "\r\n",
            "--something\r\n",
            "not a part\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                data("", b"--something\r\nnot a part\r\n"),
                end(""),
                Event::EndAll,
            ]
        );
    }

    #[test]
    fn body_format_none_suppresses_data() {
        let recorder = run(
            nested_message().as_bytes(),
            ParserOptions {
                body_format: BodyFormat::None,
                ..Default::default()
            },
        );
        assert!(recorder
            .events
            .iter()
            .all(|e| !matches!(e, Event::Data(_, _))));
        assert_eq!(recorder.events.first(), Some(&start("")));
        assert_eq!(recorder.events.last(), Some(&Event::EndAll));
    }

    #[test]
    fn part_count_limit() {
        let mut message = String::from("Content-Type: multipart/mixed; boundary=X\r\n\r\n");
        for n in 0..MAX_PARTS + 5 {
            message.push_str("--X\r\n\r\n");
            message.push_str(&format!("part {n}\r\n"));
        }
        message.push_str("--X--\r\n");

        let anomalies = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&anomalies);
        let recorder = run(
            message.as_bytes(),
            ParserOptions {
                on_error: Some(Box::new(move |err| {
                    sink.lock().unwrap().push(err.to_string());
                })),
                ..Default::default()
            },
        );
        let starts = recorder
            .events
            .iter()
            .filter(|e| matches!(e, Event::Start(_)))
            .count();
        assert_eq!(starts, MAX_PARTS + 1); // the root plus the cap
        assert!(anomalies
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.contains("part count limit")));
    }

    #[test]
    fn nested_boundary_prefix_tie_break() {
        // The inner boundary extends the outer one; a boundary line
        // belongs to the innermost open multipart that it exactly names
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=abc\r\n",
            "\r\n",
            "--abc\r\n",
            "Content-Type: multipart/mixed; boundary=abcdef\r\n",
            "\r\n",
            "--abcdef\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "inner first\r\n",
            "--abcdef\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "inner second\r\n",
            "--abcdef--\r\n",
            "--abc\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "outer sibling\r\n",
            "--abc--\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                start("1.1"),
                data("1.1", b"inner first"),
                end("1.1"),
                start("1.2"),
                data("1.2", b"inner second"),
                end("1.2"),
                end("1"),
                start("2"),
                data("2", b"outer sibling"),
                end("2"),
                end(""),
                Event::EndAll,
            ]
        );
    }

    #[test]
    fn unknown_transfer_encoding_passes_through_raw() {
        let message = concat!(
            "Content-Transfer-Encoding: x-uuencode\r\n",
            "\r\n",
            "payload\r\n"
        );
        let anomalies = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&anomalies);
        let recorder = run(
            message.as_bytes(),
            ParserOptions {
                body_format: BodyFormat::Decode,
                on_error: Some(Box::new(move |err| {
                    sink.lock().unwrap().push(err.to_string());
                })),
                ..Default::default()
            },
        );
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                data("", b"payload\r\n"),
                end(""),
                Event::EndAll,
            ]
        );
        let anomalies = anomalies.lock().unwrap();
        assert!(
            anomalies.iter().any(|a| a.contains("x-uuencode")),
            "expected unknown transfer encoding anomaly, got {anomalies:?}"
        );
    }

    #[test]
    fn unsupported_charset_delivers_transfer_decoded_bytes() {
        let message = concat!(
            "Content-Type: text/plain; charset=klingon\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "Y2Fm6Q==\r\n"
        );
        let anomalies = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&anomalies);
        let recorder = run(
            message.as_bytes(),
            ParserOptions {
                body_format: BodyFormat::Decode,
                on_error: Some(Box::new(move |err| {
                    sink.lock().unwrap().push(err.to_string());
                })),
                ..Default::default()
            },
        );
        // base64 is still undone; the undecodable charset is left as-is
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                data("", b"caf\xe9"),
                end(""),
                Event::EndAll,
            ]
        );
        let anomalies = anomalies.lock().unwrap();
        assert!(
            anomalies.iter().any(|a| a.contains("klingon")),
            "expected unsupported charset anomaly, got {anomalies:?}"
        );
    }

    #[test]
    fn boundary_splits_header_block() {
        // A part whose header block is cut short by the next boundary
        // still yields a balanced start/end pair
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second\r\n",
            "--X--\r\n"
        );
        let recorder = run(message.as_bytes(), ParserOptions::default());
        assert_eq!(
            recorder.events,
            vec![
                start(""),
                start("1"),
                end("1"),
                start("2"),
                data("2", b"second"),
                end("2"),
                end(""),
                Event::EndAll,
            ]
        );
    }
}
