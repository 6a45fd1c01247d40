//! Incremental decoder for the primary TTS provider's streamed JSON body
//! `{..., "data": "<base64 mp3>"}` (or `{..., "data": null}`).
//!
//! Bytes are fed in as they arrive over the wire; decoded audio bytes are
//! produced as soon as a full base64 quantum (4 characters) is available,
//! so playback can start before the upstream response finishes.

use crate::error::CoreError;

/// Upper bound on how many prefix bytes are buffered while searching for
/// the `"data"` key before giving up with [`CoreError::ParseError`].
const MAX_PREFIX_SEARCH: usize = 64 * 1024;

#[derive(Debug)]
enum DecoderState {
    /// Buffering the response prefix, looking for the `"data"` key.
    SearchingKey { buf: Vec<u8> },

    /// Inside the base64-encoded string value; `pending` holds 0..=3
    /// bytes left over from the last decoded quantum.
    InBase64 { pending: Vec<u8> },

    /// The closing quote of the `data` value has been seen.
    Done,
}

/// Streaming decoder turning a primary-provider JSON body into raw MP3
/// bytes.
#[derive(Debug)]
pub struct JsonAudioDecoder {
    state: DecoderState,
}

impl Default for JsonAudioDecoder {
    fn default() -> Self {
        Self {
            state: DecoderState::SearchingKey { buf: Vec::new() },
        }
    }
}

impl JsonAudioDecoder {
    /// Creates a new decoder in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the closing quote of the `data` value has been
    /// observed and no further bytes will be produced.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, DecoderState::Done)
    }

    /// Feeds the next chunk of upstream bytes, returning any audio bytes
    /// that could be decoded from it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ParseError`] if the `"data"` key is not found
    /// within [`MAX_PREFIX_SEARCH`] bytes, [`CoreError::NullAudio`] if the
    /// value is JSON `null`, and [`CoreError::DecodeError`] on malformed
    /// base64.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CoreError> {
        match &mut self.state {
            DecoderState::Done => Ok(Vec::new()),
            DecoderState::SearchingKey { buf } => {
                buf.extend_from_slice(chunk);
                match find_value_start(buf) {
                    Some(ValueStart::Str(start)) => {
                        let rest = buf[start..].to_vec();
                        self.state = DecoderState::InBase64 {
                            pending: Vec::new(),
                        };
                        self.feed(&rest)
                    }
                    Some(ValueStart::Null) => Err(CoreError::NullAudio),
                    None => {
                        if buf.len() > MAX_PREFIX_SEARCH {
                            Err(CoreError::ParseError)
                        } else {
                            Ok(Vec::new())
                        }
                    }
                }
            }
            DecoderState::InBase64 { pending } => {
                if let Some(quote_at) = find_unescaped_quote(chunk) {
                    pending.extend_from_slice(&chunk[..quote_at]);
                    let decoded = flush_base64(pending)?;
                    self.state = DecoderState::Done;
                    Ok(decoded)
                } else {
                    pending.extend_from_slice(chunk);
                    let usable = (pending.len() / 4) * 4;
                    if usable == 0 {
                        return Ok(Vec::new());
                    }
                    let quantum: Vec<u8> = pending.drain(..usable).collect();
                    base64::decode(&quantum).map_err(|_| CoreError::DecodeError)
                }
            }
        }
    }
}

/// Decodes whatever whole-quantum base64 bytes remain in `pending`,
/// draining it. A non-empty, non-multiple-of-4 remainder is malformed.
fn flush_base64(pending: &mut Vec<u8>) -> Result<Vec<u8>, CoreError> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    if pending.len() % 4 != 0 {
        return Err(CoreError::DecodeError);
    }
    let bytes = std::mem::take(pending);
    base64::decode(&bytes).map_err(|_| CoreError::DecodeError)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ValueStart {
    /// Index into the buffer right after the opening quote of the string.
    Str(usize),
    Null,
}

/// Looks for `"data"` followed by `:` and a value in `buf`, returning
/// where the string value's content begins or that the value is `null`.
fn find_value_start(buf: &[u8]) -> Option<ValueStart> {
    const KEY: &[u8] = b"\"data\"";
    let key_at = find_subslice(buf, KEY)?;
    let mut idx = key_at + KEY.len();
    while buf.get(idx).copied().map_or(false, is_json_ws) {
        idx += 1;
    }
    if buf.get(idx) != Some(&b':') {
        return None;
    }
    idx += 1;
    while buf.get(idx).copied().map_or(false, is_json_ws) {
        idx += 1;
    }
    match buf.get(idx) {
        Some(b'"') => Some(ValueStart::Str(idx + 1)),
        Some(b'n') if buf[idx..].starts_with(b"null") => Some(ValueStart::Null),
        _ => None,
    }
}

fn is_json_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Finds the index of the first `"` in `buf` not preceded by a `\`.
fn find_unescaped_quote(buf: &[u8]) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in buf.iter().enumerate() {
        if b == b'"' && !escaped {
            return Some(i);
        }
        escaped = b == b'\\' && !escaped;
    }
    None
}

#[cfg(test)]
mod spec {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Result<Vec<u8>, CoreError> {
        let mut decoder = JsonAudioDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.feed(chunk)?);
        }
        assert!(decoder.is_done(), "decoder should have reached Done");
        Ok(out)
    }

    #[test]
    fn decodes_a_whole_body_in_one_chunk() {
        let body = br#"{"data":"SGVsbG8="}"#;
        let out = decode_all(&[body]).unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn decodes_across_arbitrary_chunk_boundaries() {
        let chunks: &[&[u8]] =
            &[br#"{"error"#, br#":null,"data"#, br#":"SGVsb"#, br#"G8="}"#];
        let out = decode_all(chunks).unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn decodes_one_byte_at_a_time() {
        let body = br#"{"data":"SGVsbG8gV29ybGQ="}"#;
        let mut decoder = JsonAudioDecoder::new();
        let mut out = Vec::new();
        for b in body {
            out.extend(decoder.feed(&[*b]).unwrap());
        }
        assert_eq!(out, b"Hello World");
    }

    #[test]
    fn null_payload_is_reported() {
        let body = br#"{"status":"ok","data":null}"#;
        let err = decode_all(&[body]).unwrap_err();
        assert!(matches!(err, CoreError::NullAudio));
    }

    #[test]
    fn missing_key_within_window_is_a_parse_error() {
        let mut decoder = JsonAudioDecoder::new();
        let padding = vec![b' '; MAX_PREFIX_SEARCH + 1];
        let err = decoder.feed(&padding).unwrap_err();
        assert!(matches!(err, CoreError::ParseError));
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let body = br#"{"data":"not valid!!"}"#;
        let err = decode_all(&[body]).unwrap_err();
        assert!(matches!(err, CoreError::DecodeError));
    }
}
