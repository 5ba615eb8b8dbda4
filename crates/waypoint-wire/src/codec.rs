use crate::{CompressionOptions, Error, Frame, HEADER_LEN};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// A `tokio_util::codec` `Decoder`/`Encoder` pair for the binary protocol,
/// used to drive `FramedRead`/`FramedWrite` the same way a
/// `LengthDelimitedCodec` would -- except our length lives at a fixed
/// offset inside a fixed-size header rather than being the whole frame.
pub struct FrameCodec {
    compression: CompressionOptions,
}

impl FrameCodec {
    pub fn new(compression: CompressionOptions) -> Self {
        FrameCodec { compression }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let total_body_len =
            u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        let frame_len = HEADER_LEN + total_body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame_bytes = src.split_to(frame_len).freeze();
        Frame::decode(frame_bytes).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        dst.extend_from_slice(&frame.encode(&self.compression));
        Ok(())
    }
}
