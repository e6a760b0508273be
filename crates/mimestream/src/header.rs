use crate::headermap::HeaderMap;
use crate::rfc5322::{
    parse_address_list, parse_content_type, parse_mailbox, parse_mailbox_list,
    parse_parameterized, parse_unstructured, parse_unstructured_raw,
};
use crate::{AddressList, Mailbox, MailboxList, MimeError, MimeParameters, Result, SharedString};
use chrono::{DateTime, FixedOffset};
use std::str::FromStr;

bitflags::bitflags! {
    /// Controls how a raw header value is interpreted by
    /// [`Header::parse_value`]. Exactly one of the base kinds
    /// (`UNSTRUCTURED`, `PARAMETER`, `ADDRESS`) must be set; the
    /// remaining bits are modifiers.
    ///
    /// `DECODE_2047` applies to `UNSTRUCTURED` values only: encoded
    /// words in `ADDRESS` display names are part of the address grammar
    /// itself and are always decoded.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const UNSTRUCTURED = 0b0000_0001;
        const PARAMETER = 0b0000_0010;
        const ADDRESS = 0b0000_0100;
        const DECODE_2047 = 0b0000_1000;
        const DECODE_2231 = 0b0001_0000;
        const CHARSET_FALLBACK = 0b0010_0000;
    }
}

impl HeaderFlags {
    const BASE: Self = Self::UNSTRUCTURED.union(Self::PARAMETER).union(Self::ADDRESS);

    pub fn validate(self) -> Result<()> {
        let base = self.intersection(Self::BASE);
        if base.bits().count_ones() != 1 {
            return Err(MimeError::InvalidHeaderFlags(format!(
                "exactly one of UNSTRUCTURED, PARAMETER or ADDRESS must be set, got {self:?}"
            )));
        }
        if self.contains(Self::DECODE_2231) && !self.contains(Self::PARAMETER) {
            return Err(MimeError::InvalidHeaderFlags(
                "DECODE_2231 is only meaningful with PARAMETER".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for HeaderFlags {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut result = Self::default();
        for ele in s.split('|') {
            if ele.is_empty() {
                continue;
            }
            match Self::from_name(ele) {
                Some(v) => {
                    result = result.union(v);
                }
                None => {
                    let mut possible: Vec<String> = Self::all()
                        .iter_names()
                        .map(|(name, _)| format!("'{name}'"))
                        .collect();
                    possible.sort();
                    let possible = possible.join(", ");
                    return Err(format!(
                        "invalid HeaderFlags flag '{ele}', possible values are {possible}"
                    ));
                }
            }
        }
        Ok(result)
    }
}

impl std::fmt::Display for HeaderFlags {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        names.sort();
        fmt.write_str(&names.join("|"))
    }
}

/// A structured header value, produced according to a set of
/// [`HeaderFlags`].
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Unstructured(String),
    Parameters(MimeParameters),
    Addresses(AddressList),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Header<'a> {
    /// The name portion of the header
    name: SharedString<'a>,
    /// The value portion of the header, raw: folding whitespace is kept
    /// as it appeared and collapsed by the grammar layer on interpretation
    value: SharedString<'a>,
}

/// Holds the result of parsing a block of headers.
/// Malformed constructs never abort the parse; they are recorded in
/// `anomalies` and the parser recovers as best it can.
pub struct HeaderParseResult<'a> {
    pub headers: HeaderMap<'a>,
    pub body_offset: usize,
    pub anomalies: Vec<MimeError>,
}

impl<'a> Header<'a> {
    pub fn with_name_value<N: Into<SharedString<'a>>, V: Into<SharedString<'a>>>(
        name: N,
        value: V,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn to_static(&self) -> Header<'static> {
        Header {
            name: self.name.to_static(),
            value: self.value.to_static(),
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_raw_value(&self) -> &str {
        &self.value
    }

    /// Interpret the raw value according to `flags`.
    /// An invalid flag combination is a contract error and is returned
    /// as `Err` immediately; a value that fails to parse under a valid
    /// combination is also an `Err`, which callers typically route to
    /// their anomaly channel rather than propagating.
    pub fn parse_value(&self, flags: HeaderFlags) -> Result<HeaderValue> {
        flags.validate()?;
        if flags.contains(HeaderFlags::UNSTRUCTURED) {
            let text = if flags.contains(HeaderFlags::DECODE_2047) {
                parse_unstructured(self.get_raw_value())?
            } else {
                parse_unstructured_raw(self.get_raw_value())?
            };
            return Ok(HeaderValue::Unstructured(text));
        }
        if flags.contains(HeaderFlags::PARAMETER) {
            let mut params = match parse_content_type(self.get_raw_value()) {
                Ok(params) => params,
                Err(_) => parse_parameterized(self.get_raw_value())?,
            };
            params.set_decode_mode(
                flags.contains(HeaderFlags::DECODE_2231),
                flags.contains(HeaderFlags::CHARSET_FALLBACK),
            );
            return Ok(HeaderValue::Parameters(params));
        }
        Ok(HeaderValue::Addresses(parse_address_list(
            self.get_raw_value(),
        )?))
    }

    pub fn as_content_type(&self) -> Result<MimeParameters> {
        parse_content_type(self.get_raw_value())
    }

    pub fn as_content_transfer_encoding(&self) -> Result<MimeParameters> {
        parse_parameterized(self.get_raw_value())
    }

    pub fn as_content_disposition(&self) -> Result<MimeParameters> {
        parse_parameterized(self.get_raw_value())
    }

    /// Parse the header into a mailbox-list (as defined in
    /// RFC 5322), which is how the `From` header is defined.
    pub fn as_mailbox_list(&self) -> Result<MailboxList> {
        parse_mailbox_list(self.get_raw_value())
    }

    /// Parse the header into a single mailbox, which is how the
    /// `Sender` header is defined.
    pub fn as_mailbox(&self) -> Result<Mailbox> {
        parse_mailbox(self.get_raw_value())
    }

    pub fn as_address_list(&self) -> Result<AddressList> {
        parse_address_list(self.get_raw_value())
    }

    pub fn as_unstructured(&self) -> Result<String> {
        parse_unstructured(self.get_raw_value())
    }

    pub fn as_date(&self) -> Result<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc2822(self.get_raw_value().trim())
            .map_err(|err| MimeError::HeaderParse(format!("invalid date: {err:#}")))
    }

    /// Parse a complete header block, up to and including the blank line
    /// that separates it from the body. Never fails: anything that cannot
    /// be understood is recorded as an anomaly and skipped or repaired.
    pub fn parse_headers<S>(header_block: S) -> HeaderParseResult<'a>
    where
        S: Into<SharedString<'a>>,
    {
        let header_block = header_block.into();
        let mut headers: Vec<Header> = vec![];
        let mut anomalies: Vec<MimeError> = vec![];
        let mut idx = 0;

        while idx < header_block.len() {
            let b = header_block[idx];
            if b == b'\n' {
                // End of header block
                idx += 1;
                break;
            }
            if b == b'\r' {
                if idx + 1 < header_block.len() && header_block[idx + 1] == b'\n' {
                    idx += 2;
                    break;
                }
                anomalies.push(MimeError::HeaderParse("lone CR in header block".to_string()));
                idx += 1;
                continue;
            }
            if headers.is_empty() && (b == b' ' || b == b'\t') {
                // A continuation line with nothing to continue
                anomalies.push(MimeError::HeaderParse(
                    "header block begins with a continuation line".to_string(),
                ));
                idx += skip_line(&header_block, idx);
                continue;
            }

            match Self::parse_one(header_block.slice(idx..header_block.len())) {
                Ok((header, next, missing_colon)) => {
                    if missing_colon {
                        anomalies.push(MimeError::HeaderParse(format!(
                            "header line with no colon: {:?}",
                            header.get_name()
                        )));
                        match headers.last_mut() {
                            Some(prev) => {
                                // Absorb as a continuation of the previous value
                                let merged =
                                    format!("{} {}", prev.get_raw_value(), header.get_name());
                                prev.value = merged.into();
                            }
                            None => {
                                headers.push(header);
                            }
                        }
                    } else {
                        headers.push(header);
                    }
                    if next == 0 {
                        // Ensure forward progress on any degenerate input
                        idx += 1;
                    } else {
                        idx += next;
                    }
                }
                Err(err) => {
                    anomalies.push(err);
                    idx += skip_line(&header_block, idx);
                }
            }
        }
        HeaderParseResult {
            headers: HeaderMap::new(headers),
            body_offset: idx,
            anomalies,
        }
    }

    pub fn parse<S: Into<SharedString<'a>>>(header_block: S) -> Result<(Self, usize)> {
        let (header, next, _missing_colon) = Self::parse_one(header_block.into())?;
        Ok((header, next))
    }

    fn parse_one(header_block: SharedString<'a>) -> Result<(Self, usize, bool)> {
        enum State {
            Initial,
            Name,
            Separator,
            Value,
            NewLine,
        }

        let mut state = State::Initial;

        let mut iter = header_block.as_str().as_bytes().iter();
        let mut c = *iter
            .next()
            .ok_or_else(|| MimeError::HeaderParse("empty header string".to_string()))?;

        let mut name_end = None;
        let mut value_start = 0;
        let mut value_end = 0;
        let mut missing_colon = false;

        let mut idx = 0usize;

        loop {
            match state {
                State::Initial => {
                    if c == b' ' || c == b'\t' {
                        return Err(MimeError::HeaderParse(
                            "header cannot start with space".to_string(),
                        ));
                    }
                    state = State::Name;
                    continue;
                }
                State::Name => {
                    if c == b':' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                        state = State::Separator;
                    } else if c == b' ' || c == b'\t' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                    } else if c == b'\n' {
                        // Newline before any colon was seen
                        missing_colon = true;
                        name_end.replace(idx);
                        value_start = idx;
                        value_end = idx;
                        idx += 1;
                        break;
                    } else if c != b'\r' && !(33..=126).contains(&c) {
                        return Err(MimeError::HeaderParse(format!(
                            "header name must be comprised of printable US-ASCII characters, found {c:?}"
                        )));
                    }
                }
                State::Separator => {
                    if c != b' ' {
                        value_start = idx;
                        value_end = idx;
                        state = State::Value;
                        continue;
                    }
                }
                State::Value => {
                    if c == b'\n' {
                        state = State::NewLine;
                    } else if c != b'\r' {
                        value_end = idx + 1;
                    }
                }
                State::NewLine => {
                    if c == b' ' || c == b'\t' {
                        state = State::Value;
                        continue;
                    }
                    break;
                }
            }
            idx += 1;
            c = match iter.next() {
                None => break,
                Some(v) => *v,
            };
        }

        let name_end = name_end.unwrap_or_else(|| {
            missing_colon = true;
            idx
        });

        let name = header_block.slice(0..name_end);
        let value = header_block.slice(value_start..value_end.max(value_start));

        Ok((Self { name, value }, idx, missing_colon))
    }
}

/// Byte count up to and including the next LF, or to end of block.
fn skip_line(block: &SharedString, idx: usize) -> usize {
    match memchr::memchr(b'\n', &block.as_str().as_bytes()[idx..]) {
        Some(n) => n + 1,
        None => block.len() - idx,
    }
}
