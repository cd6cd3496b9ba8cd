// MIT License - Copyright (c) 2026 Peter Wright
// Text decoding for ASCII blocks and contact names

use serde::Serialize;

/// Byte-to-text decodings, in the order they are tried.
///
/// Windows-1252 is tried before ISO-8859-1 so that typographic characters
/// in the 0x80-0x9F range are kept; ISO-8859-1 never fails and catches
/// the five bytes Windows-1252 leaves undefined.
pub const ENCODING_ORDER: [TextEncoding; 4] = [
    TextEncoding::Ascii,
    TextEncoding::Windows1252,
    TextEncoding::Iso8859_1,
    TextEncoding::Utf8,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextEncoding {
    #[serde(rename = "ascii")]
    Ascii,
    #[serde(rename = "windows-1252")]
    Windows1252,
    #[serde(rename = "iso-8859-1")]
    Iso8859_1,
    #[serde(rename = "utf-8")]
    Utf8,
    /// No decoding produced usable text; the content is its hex string.
    #[serde(rename = "hex")]
    Hex,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Windows1252 => "windows-1252",
            Self::Iso8859_1 => "iso-8859-1",
            Self::Utf8 => "utf-8",
            Self::Hex => "hex",
        }
    }

    /// Decode `bytes` strictly; `None` if any byte is invalid for this encoding.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| b as char).collect()),
            Self::Windows1252 => bytes.iter().map(|&b| windows_1252_char(b)).collect(),
            Self::Iso8859_1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Self::Hex => Some(hex::encode(bytes)),
        }
    }
}

/// Text recovered from the wire together with the decoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

fn is_padding(c: char) -> bool {
    c == '\0' || c == ' '
}

/// Decode the content of an ASCII text block.
///
/// Trailing NUL and space padding is removed. Falls back to the lowercase
/// hex string when no decoding yields non-blank text.
pub fn decode_text(bytes: &[u8]) -> DecodedText {
    for encoding in ENCODING_ORDER {
        if let Some(text) = encoding.decode(bytes) {
            let text = text.trim_end_matches(is_padding);
            if !text.trim().is_empty() {
                return DecodedText {
                    text: text.to_string(),
                    encoding,
                };
            }
        }
    }
    DecodedText {
        text: hex::encode(bytes),
        encoding: TextEncoding::Hex,
    }
}

/// Decode a contact name. Padding is removed from both ends and there is
/// no hex fallback: blank names are `None`.
pub fn decode_name(bytes: &[u8]) -> Option<DecodedText> {
    ENCODING_ORDER.iter().find_map(|&encoding| {
        let text = encoding.decode(bytes)?;
        let text = text.trim_matches(is_padding);
        (!text.trim().is_empty()).then(|| DecodedText {
            text: text.to_string(),
            encoding,
        })
    })
}

/// Windows-1252 differs from ISO-8859-1 only in 0x80-0x9F.
/// 0x81, 0x8D, 0x8F, 0x90 and 0x9D are undefined.
fn windows_1252_char(b: u8) -> Option<char> {
    let c = match b {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        0x81 | 0x8D | 0x8F | 0x90 | 0x9D => return None,
        other => other as char,
    };
    Some(c)
}
