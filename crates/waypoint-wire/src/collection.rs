use crate::Error;
use bytes::{Bytes, BytesMut};

/// Prefix `key` with `collection_id` encoded as unsigned LEB128, as required
/// for every collection-aware opcode once collections are negotiated.
pub fn encode_collection_prefixed_key(collection_id: u32, key: &[u8]) -> Bytes {
    let mut prefix = Vec::with_capacity(5);
    leb128::write::unsigned(&mut prefix, collection_id as u64)
        .expect("writing to a Vec never fails");

    let mut buf = BytesMut::with_capacity(prefix.len() + key.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(key);
    buf.freeze()
}

/// Split a collection-prefixed wire key back into its collection id and the
/// logical key bytes.
pub fn decode_collection_prefixed_key(wire_key: &[u8]) -> Result<(u32, Bytes), Error> {
    let mut reader = wire_key;
    let collection_id = leb128::read::unsigned(&mut reader)
        .map_err(|_| Error::protocol("truncated collection-id prefix"))?;
    Ok((collection_id as u32, Bytes::copy_from_slice(reader)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_and_large_collection_ids() {
        for id in [0u32, 1, 127, 128, 300, u32::MAX] {
            let encoded = encode_collection_prefixed_key(id, b"doc-key");
            let (decoded_id, key) = decode_collection_prefixed_key(&encoded).unwrap();
            assert_eq!(decoded_id, id);
            assert_eq!(&key[..], b"doc-key");
        }
    }
}
