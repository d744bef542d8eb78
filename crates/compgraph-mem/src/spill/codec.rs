//! Compression facade for spill segments (feature-gated).
//!
//! Writes compress a whole chunk at once; reads decompress as a stream so a
//! merge never holds more than a buffer per run.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Codec {
    #[default]
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            other => Err(Error::CodecUnsupported(format!("codec tag {other}"))),
        }
    }

    /// Parse a configured codec name. Names whose cargo feature is off are
    /// rejected here rather than on the first spill.
    pub fn from_name(name: &str) -> Result<Self> {
        let codec = match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Codec::None,
            "zstd" => Codec::Zstd,
            "lz4" => Codec::Lz4,
            other => return Err(Error::CodecUnsupported(other.to_string())),
        };
        if !codec.is_available() {
            return Err(Error::CodecUnsupported(format!(
                "{name} (enable the '{name}' feature)"
            )));
        }
        Ok(codec)
    }

    pub fn is_available(self) -> bool {
        match self {
            Codec::None => true,
            Codec::Zstd => cfg!(feature = "zstd"),
            Codec::Lz4 => cfg!(feature = "lz4"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
        }
    }
}

pub fn compress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let lvl = 3;
                let mut out = Vec::new();
                zstd::stream::copy_encode(input, &mut out, lvl)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd".into()))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                use std::io::Write;

                let mut enc = lz4_flex::frame::FrameEncoder::new(Vec::new());
                enc.write_all(input)
                    .map_err(|e| Error::Codec(format!("lz4: {e}")))?;
                enc.finish().map_err(|e| Error::Codec(format!("lz4: {e}")))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4".into()))
            }
        }
    }
}

/// Wrap a raw payload reader in the matching streaming decoder.
pub fn decoder(
    codec: Codec,
    reader: Box<dyn Read + Send>,
) -> Result<Box<dyn Read + Send>> {
    match codec {
        Codec::None => Ok(reader),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let dec = zstd::stream::read::Decoder::new(reader)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(Box::new(dec))
            }
            #[cfg(not(feature = "zstd"))]
            {
                drop(reader);
                Err(Error::CodecUnsupported("zstd".into()))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok(Box::new(lz4_flex::frame::FrameDecoder::new(reader)))
            }
            #[cfg(not(feature = "lz4"))]
            {
                drop(reader);
                Err(Error::CodecUnsupported("lz4".into()))
            }
        }
    }
}
