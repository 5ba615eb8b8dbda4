use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};

/// Durability levels, matching the wire encoding used by framing-extras.
/// Pinned down from `durability_level.hxx` in the reference implementation
/// this protocol is modeled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DurabilityLevel {
    None = 0x00,
    Majority = 0x01,
    MajorityAndPersistToActive = 0x02,
    PersistToMajority = 0x03,
}

impl DurabilityLevel {
    fn from_byte(byte: u8) -> Option<DurabilityLevel> {
        match byte {
            0x00 => Some(DurabilityLevel::None),
            0x01 => Some(DurabilityLevel::Majority),
            0x02 => Some(DurabilityLevel::MajorityAndPersistToActive),
            0x03 => Some(DurabilityLevel::PersistToMajority),
            _ => None,
        }
    }
}

const FRAME_ID_DURABILITY: u8 = 0x01;
const FRAME_ID_PRESERVE_TTL: u8 = 0x05;
const FRAME_ID_IMPERSONATE_USER: u8 = 0x04;
const FRAME_ID_SERVER_DURATION: u8 = 0x02;

/// Flexible framing-extras, present only on "alt" magic frames. Each entry is
/// a half-byte id/len pair followed by its payload; unknown ids are preserved
/// verbatim so a frame can be re-encoded without losing server-added fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramingExtras {
    pub durability: Option<(DurabilityLevel, Option<u16>)>,
    pub preserve_ttl: bool,
    pub impersonate_user: Option<Bytes>,
    pub server_duration_encoded: Option<u16>,
    /// Any frame-id we don't specifically model, preserved as raw bytes.
    pub unknown: Vec<(u8, Bytes)>,
}

impl FramingExtras {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        if let Some((level, timeout)) = self.durability {
            let payload_len = if timeout.is_some() { 3 } else { 1 };
            push_header(&mut buf, FRAME_ID_DURABILITY, payload_len);
            buf.put_u8(level as u8);
            if let Some(t) = timeout {
                buf.put_u16(t);
            }
        }
        if self.preserve_ttl {
            push_header(&mut buf, FRAME_ID_PRESERVE_TTL, 0);
        }
        if let Some(user) = &self.impersonate_user {
            push_header(&mut buf, FRAME_ID_IMPERSONATE_USER, user.len());
            buf.extend_from_slice(user);
        }
        for (id, payload) in &self.unknown {
            push_header(&mut buf, *id, payload.len());
            buf.extend_from_slice(payload);
        }

        buf.freeze()
    }

    pub fn decode(mut src: &[u8]) -> Result<FramingExtras, Error> {
        let mut out = FramingExtras::default();

        while !src.is_empty() {
            let control = src[0];
            let mut id = (control >> 4) as u16;
            let mut len = (control & 0x0f) as usize;
            src = &src[1..];

            // Escaped id/len: 0x0f means "read one more byte and add it".
            if id == 0x0f {
                if src.is_empty() {
                    return Err(Error::protocol("truncated framing-extras id"));
                }
                id += src[0] as u16;
                src = &src[1..];
            }
            if len == 0x0f {
                if src.is_empty() {
                    return Err(Error::protocol("truncated framing-extras len"));
                }
                len += src[0] as usize;
                src = &src[1..];
            }
            if src.len() < len {
                return Err(Error::protocol("framing-extras payload overruns body"));
            }
            let payload = &src[..len];
            src = &src[len..];

            match id as u8 {
                FRAME_ID_DURABILITY if !payload.is_empty() => {
                    let level = DurabilityLevel::from_byte(payload[0])
                        .ok_or_else(|| Error::protocol("invalid durability level byte"))?;
                    let timeout = if payload.len() >= 3 {
                        Some(u16::from_be_bytes([payload[1], payload[2]]))
                    } else {
                        None
                    };
                    out.durability = Some((level, timeout));
                }
                FRAME_ID_PRESERVE_TTL => out.preserve_ttl = true,
                FRAME_ID_IMPERSONATE_USER => {
                    out.impersonate_user = Some(Bytes::copy_from_slice(payload))
                }
                FRAME_ID_SERVER_DURATION if payload.len() >= 2 => {
                    out.server_duration_encoded = Some(u16::from_be_bytes([payload[0], payload[1]]))
                }
                other => out.unknown.push((other, Bytes::copy_from_slice(payload))),
            }
        }

        Ok(out)
    }
}

fn push_header(buf: &mut BytesMut, id: u8, len: usize) {
    // None of our own writers ever need the escaped (>=15) form.
    debug_assert!(id < 0x0f && len < 0x0f, "framing-extras escape form not implemented for writers");
    buf.put_u8((id << 4) | (len as u8 & 0x0f));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_durability_with_timeout() {
        let mut extras = FramingExtras::default();
        extras.durability = Some((DurabilityLevel::PersistToMajority, Some(2500)));
        extras.preserve_ttl = true;
        let encoded = extras.encode();
        let decoded = FramingExtras::decode(&encoded).unwrap();
        assert_eq!(decoded, extras);
    }
}
