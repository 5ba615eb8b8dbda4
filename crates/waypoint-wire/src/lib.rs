//! Framing for the binary key-value wire protocol: a 24-byte header, optional
//! framing-extras, extras, a (possibly collection-prefixed) key, and a value
//! that may be Snappy-compressed.

mod codec;
mod collection;
mod compression;
mod error;
mod framing;
mod header;

pub use codec::FrameCodec;
pub use collection::{decode_collection_prefixed_key, encode_collection_prefixed_key};
pub use compression::CompressionOptions;
pub use error::Error;
pub use framing::{DurabilityLevel, FramingExtras};
pub use header::{DataType, Magic, Opcode, Status};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size in bytes of the fixed binary-protocol header.
pub const HEADER_LEN: usize = 24;

/// One decoded request or response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: Magic,
    pub opcode: Opcode,
    pub data_type: DataType,
    /// Status on a response frame; vbucket id on a request frame. The raw
    /// 16 bits are kept as-is and interpreted by the caller based on `magic`.
    pub vbucket_or_status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub framing_extras: FramingExtras,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn status(&self) -> Status {
        Status::from(self.vbucket_or_status)
    }

    /// Server-reported processing duration, decoded from the `server-duration`
    /// framing-extras entry per the response-time encoding:
    /// `micros = round(encoded.pow(1.74) / 2)`.
    pub fn server_duration(&self) -> Option<std::time::Duration> {
        self.framing_extras.server_duration_encoded.map(|raw| {
            let micros = (raw as f64).powf(1.74) / 2.0;
            std::time::Duration::from_micros(micros.round() as u64)
        })
    }

    /// Encode this frame to wire bytes, compressing `value` with Snappy if
    /// `compression` makes it eligible. Framing-extras are only emitted when
    /// `magic` is one of the "alt" (flexible framing) forms.
    pub fn encode(&self, compression: &CompressionOptions) -> Bytes {
        let (value, data_type) = compression.maybe_compress(&self.value, self.data_type);

        let framing_extras_bytes = if self.magic.has_framing_extras() {
            self.framing_extras.encode()
        } else {
            Bytes::new()
        };

        let total_body_len =
            framing_extras_bytes.len() + self.extras.len() + self.key.len() + value.len();

        let mut buf = BytesMut::with_capacity(HEADER_LEN + total_body_len);
        buf.put_u8(self.magic as u8);
        buf.put_u8(self.opcode as u8);

        if self.magic.has_framing_extras() {
            // Alt form: key length is 8 bits, framing-extras length occupies
            // the other 8 bits of the 16-bit field.
            buf.put_u8(framing_extras_bytes.len() as u8);
            buf.put_u8(self.key.len() as u8);
        } else {
            buf.put_u16(self.key.len() as u16);
        }
        buf.put_u8(self.extras.len() as u8);
        buf.put_u8(data_type.bits());
        buf.put_u16(self.vbucket_or_status);
        buf.put_u32(total_body_len as u32);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);

        buf.extend_from_slice(&framing_extras_bytes);
        buf.extend_from_slice(&self.extras);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&value);

        buf.freeze()
    }

    /// Decode one complete frame from `src`, which must already contain at
    /// least `HEADER_LEN + body_len` bytes (see [`FrameCodec`] for a
    /// `Decoder` that accumulates partial frames off a socket).
    pub fn decode(mut src: Bytes) -> Result<Frame, Error> {
        if src.len() < HEADER_LEN {
            return Err(Error::NeedMoreData);
        }
        let magic = Magic::try_from(src[0])?;
        let opcode = Opcode::from_wire(src[1], magic);

        let (framing_extras_len, key_len) = if magic.has_framing_extras() {
            (src[2] as usize, src[3] as usize)
        } else {
            (0, u16::from_be_bytes([src[2], src[3]]) as usize)
        };
        let extras_len = src[4] as usize;
        let data_type = DataType::from_bits(src[5]);
        let vbucket_or_status = u16::from_be_bytes([src[6], src[7]]);
        let total_body_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        let opaque = u32::from_be_bytes([src[12], src[13], src[14], src[15]]);
        let cas = u64::from_be_bytes(src[16..24].try_into().unwrap());

        if src.len() < HEADER_LEN + total_body_len {
            return Err(Error::NeedMoreData);
        }
        let value_len = total_body_len
            .checked_sub(framing_extras_len + extras_len + key_len)
            .ok_or_else(|| Error::protocol("body shorter than header lengths"))?;

        src.advance(HEADER_LEN);
        let framing_extras_bytes = src.split_to(framing_extras_len);
        let extras = src.split_to(extras_len);
        let key = src.split_to(key_len);
        let value = src.split_to(value_len);

        let framing_extras = FramingExtras::decode(&framing_extras_bytes)?;
        let value = CompressionOptions::maybe_decompress(&value, data_type)?;
        let data_type = data_type.without(DataType::SNAPPY);

        Ok(Frame {
            magic,
            opcode,
            data_type,
            vbucket_or_status,
            opaque,
            cas,
            framing_extras,
            extras,
            key,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(magic: Magic, value: Bytes) -> Frame {
        Frame {
            magic,
            opcode: Opcode::Get,
            data_type: DataType::empty(),
            vbucket_or_status: 7,
            opaque: 42,
            cas: 0xdead_beef,
            framing_extras: FramingExtras::default(),
            extras: Bytes::new(),
            key: Bytes::from_static(b"widget::1"),
            value,
        }
    }

    #[test]
    fn round_trips_a_plain_request() {
        let frame = sample(Magic::Request, Bytes::from_static(b"hello world"));
        let encoded = frame.encode(&CompressionOptions::disabled());
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn round_trips_with_compression_for_eligible_values() {
        let value = Bytes::from(vec![b'a'; 4096]);
        let frame = sample(Magic::Request, value.clone());
        let encoded = frame.encode(&CompressionOptions::default());
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.value, value);
        assert!(decoded.data_type.contains(DataType::SNAPPY) == false, "decoder clears the snappy bit after inflating");
    }

    #[test]
    fn rejects_truncated_header() {
        let err = Frame::decode(Bytes::from_static(b"short")).unwrap_err();
        assert!(matches!(err, Error::NeedMoreData));
    }

    #[test]
    fn alt_magic_carries_framing_extras() {
        let mut extras = FramingExtras::default();
        extras.durability = Some((DurabilityLevel::Majority, None));
        let mut frame = sample(Magic::AltRequest, Bytes::from_static(b"v"));
        frame.framing_extras = extras;
        let encoded = frame.encode(&CompressionOptions::disabled());
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(
            decoded.framing_extras.durability,
            Some((DurabilityLevel::Majority, None))
        );
    }
}
