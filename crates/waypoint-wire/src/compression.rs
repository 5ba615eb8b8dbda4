use crate::header::DataType;
use crate::Error;
use bytes::Bytes;

/// Snappy compression policy applied to outgoing KV values, matching
/// `compression_options.hxx`'s defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionOptions {
    pub enabled: bool,
    pub min_size: usize,
    pub min_ratio: f64,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        CompressionOptions {
            enabled: true,
            min_size: 32,
            min_ratio: 0.83,
        }
    }
}

impl CompressionOptions {
    pub fn disabled() -> Self {
        CompressionOptions {
            enabled: false,
            ..Default::default()
        }
    }

    /// Compress `value` if eligible, returning the bytes to put on the wire
    /// and the data-type bits to send alongside them. Values smaller than
    /// `min_size`, or whose compressed form doesn't beat `min_ratio`, are
    /// sent uncompressed.
    pub fn maybe_compress(&self, value: &Bytes, data_type: DataType) -> (Bytes, DataType) {
        if !self.enabled || value.len() < self.min_size {
            return (value.clone(), data_type);
        }
        let compressed = snap::raw::Encoder::new().compress_vec(value).ok();
        match compressed {
            Some(compressed) if (compressed.len() as f64) < self.min_ratio * value.len() as f64 => {
                (Bytes::from(compressed), data_type.with(DataType::SNAPPY))
            }
            _ => (value.clone(), data_type),
        }
    }

    /// Inflate `value` if the snappy bit is set, returning plain bytes and the
    /// data type with the snappy bit cleared.
    pub fn maybe_decompress(value: &Bytes, data_type: DataType) -> Result<Bytes, Error> {
        if !data_type.contains(DataType::SNAPPY) {
            return Ok(value.clone());
        }
        let decompressed = snap::raw::Decoder::new().decompress_vec(value)?;
        Ok(Bytes::from(decompressed))
    }
}
