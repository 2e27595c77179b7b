//! Text decoding for toolchain output and serial data

use serde::{Deserialize, Serialize};

/// Character encoding of raw bytes coming from the toolchain or the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8 encoding, invalid sequences replaced
    #[default]
    Utf8,
    /// ASCII (7-bit)
    Ascii,
    /// Latin-1 (ISO-8859-1)
    Latin1,
    /// Shift-JIS, the console encoding of Japanese Windows toolchains
    #[serde(rename = "shift_jis")]
    ShiftJis,
}

impl TextEncoding {
    /// Decode raw bytes into the internal string representation
    pub fn decode(&self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Ascii => data
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Self::Latin1 => data.iter().map(|&b| b as char).collect(),
            Self::ShiftJis => encoding_rs::SHIFT_JIS
                .decode_without_bom_handling(data)
                .0
                .into_owned(),
        }
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Ascii => "ASCII",
            Self::Latin1 => "Latin-1",
            Self::ShiftJis => "Shift_JIS",
        }
    }
}
