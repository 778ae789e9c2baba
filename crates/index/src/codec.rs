use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zstd::{decode_all, encode_all};

use crate::IndexError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionCodec {
    None,
    #[default]
    Zstd,
}

/// Value encoding for persisted rows: bincode, then optional zstd.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(encode_all(data, self.level)?),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(decode_all(data)?),
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, IndexError> {
        let encoded = encode_to_vec(value, standard())?;
        self.compress(&encoded)
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, IndexError> {
        let decompressed = self.decompress(data)?;
        let (value, _) = decode_from_slice(&decompressed, standard())?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        slots: Vec<u64>,
    }

    fn row() -> Row {
        Row {
            name: "doc".into(),
            slots: (0..128).collect(),
        }
    }

    #[test]
    fn zstd_and_plain_both_decode() {
        for codec in [CompressionCodec::Zstd, CompressionCodec::None] {
            let cfg = CompressionConfig::default().with_codec(codec);
            let bytes = cfg.encode(&row()).unwrap();
            let back: Row = cfg.decode(&bytes).unwrap();
            assert_eq!(back, row());
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let cfg = CompressionConfig::default();
        let err = cfg.decode::<Row>(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, IndexError::Zstd(_)));

        let plain = CompressionConfig::default().with_codec(CompressionCodec::None);
        let err = plain.decode::<Row>(&[0xFF; 3]).unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
    }
}
