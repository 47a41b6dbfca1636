//! Base64 codec for image payloads.
//!
//! Encoding is plain standard base64. Decoding is lenient about the things
//! clients get wrong in practice (whitespace, URL-safe symbols, missing
//! padding) and strict about everything else.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::{DecodeError, Engine as _};
use thiserror::Error;

const PAD: u8 = b'=';

const UNPADDED_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("base64 length {length} cannot be padded to a multiple of 4")]
    InvalidLength { length: usize },

    #[error("invalid base64 character {character:?} at offset {offset}")]
    InvalidCharacter { offset: usize, character: char },
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    let normalized = normalize_symbols(text);
    let raw = normalized.as_bytes();

    for (offset, ch) in normalized.char_indices() {
        if !(is_alphabet_symbol(ch) || ch == '=') {
            return Err(CodecError::InvalidCharacter {
                offset,
                character: ch,
            });
        }
    }

    let data_len = raw.iter().position(|byte| *byte == PAD).unwrap_or(raw.len());
    if raw[data_len..].iter().any(|byte| *byte != PAD) {
        // `=` followed by more data: padding in the middle of the payload.
        return Err(CodecError::InvalidCharacter {
            offset: data_len,
            character: '=',
        });
    }
    let pad_len = raw.len() - data_len;

    if data_len % 4 == 1 {
        return Err(CodecError::InvalidLength {
            length: data_len + pad_len,
        });
    }
    let required_pad = (4 - data_len % 4) % 4;
    if data_len == 0 && pad_len > 0 {
        return Err(CodecError::InvalidCharacter {
            offset: 0,
            character: '=',
        });
    }
    if pad_len > required_pad {
        return Err(CodecError::InvalidCharacter {
            offset: data_len + required_pad,
            character: '=',
        });
    }

    UNPADDED_DECODER
        .decode(&raw[..data_len])
        .map_err(|err| classify_decode_error(err, &raw[..data_len]))
}

fn normalize_symbols(text: &str) -> String {
    text.chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .map(|ch| match ch {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

fn is_alphabet_symbol(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '+' || ch == '/'
}

fn classify_decode_error(err: DecodeError, data: &[u8]) -> CodecError {
    match err {
        DecodeError::InvalidByte(offset, byte) | DecodeError::InvalidLastSymbol(offset, byte) => {
            CodecError::InvalidCharacter {
                offset,
                character: byte as char,
            }
        }
        DecodeError::InvalidLength(_) => CodecError::InvalidLength { length: data.len() },
        DecodeError::InvalidPadding => CodecError::InvalidCharacter {
            offset: data.len(),
            character: '=',
        },
    }
}
