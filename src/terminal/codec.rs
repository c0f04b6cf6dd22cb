//! Byte <-> text conversion under the configured terminal encoding.
//!
//! Encoding never fails: characters the target encoding cannot represent become
//! [`PLACEHOLDER`]. Decoding is incremental because callers receive one byte at a
//! time from a terminal; a multi-byte character only resolves once all of its bytes
//! have arrived. Malformed input resolves to U+FFFD as soon as it is detectably
//! invalid, and at most [`MAX_PENDING`] bytes are ever held back.

use std::collections::VecDeque;

use encoding_rs::{CoderResult, EncoderResult};

/// Substituted for characters the target encoding cannot represent.
pub const PLACEHOLDER: u8 = b'?';

/// Longest byte run held while waiting for a character to complete.
pub const MAX_PENDING: usize = 4;

/// The small set of encodings a deployment can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// Korean EUC-KR (decoded as its CP949 superset).
    EucKr,
    /// Western single-byte (windows-1252).
    Latin1,
}

impl Encoding {
    /// Parse a configuration label. Case-insensitive; `None` when unknown.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "euc-kr" | "euckr" | "cp949" => Some(Encoding::EucKr),
            "latin1" | "iso-8859-1" | "windows-1252" | "cp1252" => Some(Encoding::Latin1),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::EucKr => "euc-kr",
            Encoding::Latin1 => "latin1",
        }
    }

    fn codec(self) -> &'static encoding_rs::Encoding {
        match self {
            Encoding::Utf8 => encoding_rs::UTF_8,
            Encoding::EucKr => encoding_rs::EUC_KR,
            Encoding::Latin1 => encoding_rs::WINDOWS_1252,
        }
    }
}

/// Process-scoped, immutable encoding selection.
///
/// Built once at startup from configuration and copied into whatever needs it; there
/// is no way to change the encoding of a live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodingContext {
    encoding: Encoding,
}

impl EncodingContext {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode text for the wire. Unencodable characters become [`PLACEHOLDER`].
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut encoder = self.encoding.codec().new_encoder();
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        loop {
            if let Some(needed) = encoder.max_buffer_length_from_utf8_without_replacement(rest.len())
            {
                out.reserve(needed);
            }
            let (result, read) =
                encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, true);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(_) => out.push(PLACEHOLDER),
            }
        }
        out
    }

    /// Decode a complete buffer with replacement; used for logging and browser output.
    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        let (text, _) = self.encoding.codec().decode_without_bom_handling(bytes);
        text.into_owned()
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(self.encoding)
    }
}

/// Streaming decoder fed one byte at a time.
pub struct Decoder {
    encoding: Encoding,
    inner: encoding_rs::Decoder,
    ready: VecDeque<char>,
    pending: usize,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            inner: encoding.codec().new_decoder_without_bom_handling(),
            ready: VecDeque::new(),
            pending: 0,
        }
    }

    /// Feed one byte. Returns true when at least one character became available.
    pub fn push(&mut self, byte: u8) -> bool {
        let produced = self.feed(&[byte], false);
        if produced == 0 {
            self.pending += 1;
            if self.pending >= MAX_PENDING {
                self.flush();
            }
        } else {
            self.pending = 0;
        }
        !self.ready.is_empty()
    }

    /// Resolve any held-back bytes (end of input). Incomplete sequences become U+FFFD.
    pub fn flush(&mut self) {
        self.feed(&[], true);
        self.inner = self.encoding.codec().new_decoder_without_bom_handling();
        self.pending = 0;
    }

    /// Decode a chunk of a longer stream. Characters split across chunks are completed
    /// by the next call.
    pub fn decode_chunk(&mut self, bytes: &[u8]) -> String {
        for &b in bytes {
            self.push(b);
        }
        self.ready.drain(..).collect()
    }

    /// End of stream: resolve held-back bytes and return everything not yet taken.
    pub fn finish(&mut self) -> String {
        self.flush();
        self.ready.drain(..).collect()
    }

    /// Next decoded character, if any.
    pub fn next_char(&mut self) -> Option<char> {
        self.ready.pop_front()
    }

    /// Bytes currently held waiting for a character to complete.
    pub fn pending(&self) -> usize {
        self.pending
    }

    fn feed(&mut self, src: &[u8], last: bool) -> usize {
        let mut text = String::with_capacity(
            self.inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(16)
                .max(8),
        );
        let (result, _, _) = self.inner.decode_to_string(src, &mut text, last);
        debug_assert!(matches!(result, CoderResult::InputEmpty));
        let before = self.ready.len();
        self.ready.extend(text.chars());
        self.ready.len() - before
    }
}
