use crate::error::CodecError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Byte encoding used for persisted and cached entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Plain JSON
    #[default]
    Json,
    /// Gzip-compressed JSON; trades CPU for smaller store and cache entries
    GzipJson,
}

impl Codec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        match self {
            Self::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Self::GzipJson => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                serde_json::to_writer(&mut encoder, value)?;
                Ok(Bytes::from(encoder.finish()?))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(data)?),
            Self::GzipJson => Ok(serde_json::from_reader(GzDecoder::new(data))?),
        }
    }
}
