use std::collections::HashMap;
use std::sync::Arc;

/// Define our own because data_encoding::BASE64_MIME, despite its name,
/// is not RFC2045 compliant, and will not ignore spaces
const BASE64_RFC2045: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    padding: '=',
    ignore: " \r\n\t",
    wrap_width: 76,
    wrap_separator: "\r\n",
};

/// Incremental content-transfer-encoding decoder.
/// `decode` may be called with arbitrarily-split input; whatever state
/// is needed to resume at a quartet or escape boundary is carried
/// internally. `finish` flushes anything still pending at end of input.
pub trait TransferDecoder: Send {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>);
    fn finish(&mut self, out: &mut Vec<u8>);
}

/// 7bit/8bit/binary: no transformation.
#[derive(Default)]
pub struct IdentityDecoder {}

impl TransferDecoder for IdentityDecoder {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }

    fn finish(&mut self, _out: &mut Vec<u8>) {}
}

/// Streaming base64. Non-alphabet bytes are dropped, and decoding
/// happens a whole quartet at a time so that chunk splits inside a
/// quartet are invisible.
#[derive(Default)]
pub struct Base64Decoder {
    pending: Vec<u8>,
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

impl Base64Decoder {
    fn drain_quartets(&mut self, out: &mut Vec<u8>) {
        let usable = self.pending.len() / 4 * 4;
        if usable == 0 {
            return;
        }
        match BASE64_RFC2045.decode(&self.pending[..usable]) {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(_) => {
                // Padding in an unexpected position; salvage quartet by
                // quartet and drop the ones that will not decode
                for quartet in self.pending[..usable].chunks_exact(4) {
                    if let Ok(bytes) = BASE64_RFC2045.decode(quartet) {
                        out.extend_from_slice(&bytes);
                    }
                }
            }
        }
        self.pending.drain(..usable);
    }
}

impl TransferDecoder for Base64Decoder {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending
            .extend(input.iter().copied().filter(|&b| is_base64_byte(b)));
        self.drain_quartets(out);
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        if self.pending.is_empty() {
            return;
        }
        // A truncated final quartet; pad it out and see whether anything
        // can be recovered
        while self.pending.len() % 4 != 0 {
            self.pending.push(b'=');
        }
        let pending = std::mem::take(&mut self.pending);
        if let Ok(bytes) = BASE64_RFC2045.decode(&pending) {
            out.extend_from_slice(&bytes);
        }
    }
}

/// Streaming quoted-printable. An `=`, `=X` or `=<CR>` at the end of a
/// chunk could be a split escape or soft line break, so it is held back
/// until the following chunk (or end of input) resolves it.
#[derive(Default)]
pub struct QuotedPrintableDecoder {
    pending: Vec<u8>,
}

fn qp_dangling_len(data: &[u8]) -> usize {
    let n = data.len();
    if n >= 1 && data[n - 1] == b'=' {
        return 1;
    }
    if n >= 2 && data[n - 2] == b'=' {
        return 2;
    }
    0
}

fn qp_decode_into(data: &[u8], out: &mut Vec<u8>) {
    match quoted_printable::decode(data, quoted_printable::ParseMode::Robust) {
        Ok(bytes) => out.extend_from_slice(&bytes),
        // Robust mode is expected to always succeed; pass the data
        // through untouched if it somehow does not
        Err(_) => out.extend_from_slice(data),
    }
}

impl TransferDecoder for QuotedPrintableDecoder {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let keep = qp_dangling_len(&self.pending);
        let ready = self.pending.len() - keep;
        if ready > 0 {
            qp_decode_into(&self.pending[..ready], out);
            self.pending.drain(..ready);
        }
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            qp_decode_into(&pending, out);
        }
    }
}

pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn TransferDecoder> + Send + Sync>;

/// Maps content-transfer-encoding names to decoder constructors.
/// Each parser session takes its own copy, so registering a custom
/// decoder affects only the sessions built from this registry.
#[derive(Clone)]
pub struct DecoderRegistry {
    factories: HashMap<String, DecoderFactory>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("7bit", || Box::<IdentityDecoder>::default());
        registry.register("8bit", || Box::<IdentityDecoder>::default());
        registry.register("binary", || Box::<IdentityDecoder>::default());
        registry.register("base64", || Box::<Base64Decoder>::default());
        registry.register("quoted-printable", || {
            Box::<QuotedPrintableDecoder>::default()
        });
        registry
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort();
        fmt.debug_struct("DecoderRegistry")
            .field("encodings", &names)
            .finish()
    }
}

impl DecoderRegistry {
    pub fn register<F>(&mut self, encoding: &str, factory: F)
    where
        F: Fn() -> Box<dyn TransferDecoder> + Send + Sync + 'static,
    {
        self.factories
            .insert(encoding.trim().to_ascii_lowercase(), Arc::new(factory));
    }

    /// Construct a decoder for the named encoding, if one is registered.
    pub fn make(&self, encoding: &str) -> Option<Box<dyn TransferDecoder>> {
        let factory = self.factories.get(&encoding.trim().to_ascii_lowercase())?;
        Some(factory())
    }
}

/// Incremental charset-to-UTF-8 conversion, applied to text parts after
/// transfer decoding. Wraps the streaming decoder from encoding_rs so
/// that multi-byte sequences split across chunks convert correctly.
pub struct CharsetStream {
    decoder: encoding_rs::Decoder,
}

impl CharsetStream {
    pub fn for_label(label: &str) -> Option<Self> {
        let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())?;
        Some(Self {
            decoder: encoding.new_decoder(),
        })
    }

    pub fn decode(&mut self, input: &[u8], last: bool) -> String {
        let mut out = String::new();
        let mut read_total = 0;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len() - read_total)
                .unwrap_or(8192);
            out.reserve(needed);
            let (result, read, _replaced) =
                self.decoder
                    .decode_to_string(&input[read_total..], &mut out, last);
            read_total += read;
            match result {
                encoding_rs::CoderResult::InputEmpty => return out,
                encoding_rs::CoderResult::OutputFull => continue,
            }
        }
    }
}
