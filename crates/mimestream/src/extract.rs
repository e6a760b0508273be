//! Convenience entry points over [`MimeParser`]: one-shot parsing of an
//! in-memory buffer, pumping from any `BufRead`, and a couple of
//! ready-made emitters for the common "just give me the headers" and
//! "just give me the text" cases.

use crate::engine::{BodyFormat, Emitter, MimeParser, ParserOptions, PartId};
use crate::headermap::HeaderMap;
use crate::{MimeError, Result};
use std::io::BufRead;

/// Parse a complete in-memory message and return the emitter.
pub fn parse_sync<E: Emitter>(input: &[u8], emitter: E, options: ParserOptions) -> E {
    let mut parser = MimeParser::new(emitter, options);
    parser.push(input);
    parser.finish()
}

/// Pump a reader through a parse session. Reads are fed to the parser
/// as they arrive, so memory use is bounded by the reader's buffer plus
/// one line of lookahead. On a read error the session is still closed
/// out (every open part gets its `end_part`, and `end_all_parts` fires)
/// before the error is returned.
pub fn parse_reader<R: BufRead, E: Emitter>(
    mut reader: R,
    emitter: E,
    options: ParserOptions,
) -> Result<E> {
    let mut parser = MimeParser::new(emitter, options);
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                parser.finish();
                return Err(MimeError::Read(err.to_string()));
            }
        };
        if buf.is_empty() {
            return Ok(parser.finish());
        }
        let n = buf.len();
        parser.push(buf);
        reader.consume(n);
    }
}

/// Captures the root part's headers and ignores everything else.
/// Pair with [`BodyFormat::None`] to scan headers without paying for
/// body delivery.
#[derive(Debug, Default)]
pub struct HeaderCollector {
    headers: Option<HeaderMap<'static>>,
}

impl HeaderCollector {
    pub fn into_headers(self) -> HeaderMap<'static> {
        self.headers.unwrap_or_else(|| HeaderMap::new(vec![]))
    }
}

impl Emitter for HeaderCollector {
    fn start_part(&mut self, id: &PartId, headers: &HeaderMap) {
        if id.is_root() {
            self.headers = Some(headers.to_static());
        }
    }

    fn part_data(&mut self, _id: &PartId, _data: &[u8]) {}
    fn end_part(&mut self, _id: &PartId) {}
    fn end_all_parts(&mut self) {}
}

/// Captures the root part's headers plus the concatenation of every
/// delivered data event, in document order.
#[derive(Default)]
pub struct FlattenedBody {
    headers: Option<HeaderMap<'static>>,
    body: Vec<u8>,
}

impl FlattenedBody {
    pub fn headers(&self) -> Option<&HeaderMap<'static>> {
        self.headers.as_ref()
    }

    pub fn into_inner(self) -> (HeaderMap<'static>, Vec<u8>) {
        (
            self.headers.unwrap_or_else(|| HeaderMap::new(vec![])),
            self.body,
        )
    }
}

impl Emitter for FlattenedBody {
    fn start_part(&mut self, id: &PartId, headers: &HeaderMap) {
        if id.is_root() {
            self.headers = Some(headers.to_static());
        }
    }

    fn part_data(&mut self, _id: &PartId, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn end_part(&mut self, _id: &PartId) {}
    fn end_all_parts(&mut self) {}
}

/// Parse just the headers of a message.
pub fn extract_headers(input: &[u8]) -> HeaderMap<'static> {
    parse_sync(
        input,
        HeaderCollector::default(),
        ParserOptions {
            body_format: BodyFormat::None,
            ..Default::default()
        },
    )
    .into_headers()
}

/// Parse a message and return its headers along with all of its leaf
/// content, transfer- and charset-decoded and concatenated.
pub fn extract_flattened(input: &[u8]) -> (HeaderMap<'static>, Vec<u8>) {
    parse_sync(
        input,
        FlattenedBody::default(),
        ParserOptions {
            body_format: BodyFormat::Decode,
            ..Default::default()
        },
    )
    .into_inner()
}

#[cfg(test)]
mod test {
    use super::*;

    const MESSAGE: &str = concat!(
        "Subject: =?UTF-8?Q?caf=C3=A9?=\r\n",
        "Content-Type: multipart/alternative; boundary=split\r\n",
        "\r\n",
        "--split\r\n",
        "Content-Type: text/plain; charset=ISO-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "the caf=E9 is open\r\n",
        "--split\r\n",
        "Content-Type: text/html\r\n",
        "\r\n",
        "<p>the cafe is open</p>\r\n",
        "--split--\r\n"
    );

    #[test]
    fn header_extraction() {
        let headers = extract_headers(MESSAGE.as_bytes());
        k9::assert_equal!(headers.subject().unwrap().unwrap(), "café");
        let ct = headers.content_type().unwrap().unwrap();
        k9::assert_equal!(ct.value.as_str(), "multipart/alternative");
        k9::assert_equal!(ct.get("boundary").unwrap(), "split");
    }

    #[test]
    fn header_extraction_of_empty_input() {
        let headers = extract_headers(b"");
        assert!(headers.is_empty());
    }

    #[test]
    fn flattened_body() {
        let (headers, body) = extract_flattened(MESSAGE.as_bytes());
        k9::assert_equal!(headers.subject().unwrap().unwrap(), "café");
        k9::assert_equal!(
            String::from_utf8(body).unwrap(),
            "the café is open<p>the cafe is open</p>"
        );
    }

    #[test]
    fn reader_pump() {
        // A reader with a tiny buffer exercises the chunked push path
        let reader = std::io::BufReader::with_capacity(7, MESSAGE.as_bytes());
        let collected = parse_reader(
            reader,
            FlattenedBody::default(),
            ParserOptions {
                body_format: BodyFormat::Decode,
                ..Default::default()
            },
        )
        .unwrap();
        let (_, body) = collected.into_inner();
        k9::assert_equal!(
            String::from_utf8(body).unwrap(),
            "the café is open<p>the cafe is open</p>"
        );
    }

    #[test]
    fn reader_error_surfaces() {
        struct FailingReader {
            fed: bool,
        }
        impl std::io::Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("link dropped"))
            }
        }
        impl BufRead for FailingReader {
            fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
                if self.fed {
                    Err(std::io::Error::other("link dropped"))
                } else {
                    self.fed = true;
                    Ok(b"Subject: partial\r\n")
                }
            }
            fn consume(&mut self, _amt: usize) {}
        }

        let err = parse_reader(
            FailingReader { fed: false },
            HeaderCollector::default(),
            ParserOptions::default(),
        )
        .unwrap_err();
        k9::assert_equal!(
            err,
            MimeError::Read("link dropped".to_string())
        );
    }
}
