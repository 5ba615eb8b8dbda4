/// HELLO feature codes this client advertises. The negotiated set used at
/// runtime is always the intersection with whatever the server echoes back
/// in its HELLO response -- this list is simply what we're willing to use.
/// Rather than guess at a server-version-dependent subset, the full
/// non-exhaustive list is advertised unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Feature {
    TcpNoDelay = 0x03,
    MutationSeqno = 0x04,
    Xattr = 0x06,
    SelectBucket = 0x08,
    Snappy = 0x0a,
    Json = 0x0b,
    Duplex = 0x0c,
    ClustermapChangeNotification = 0x0e,
    UnorderedExecution = 0x0f,
    Collections = 0x12,
    SyncReplication = 0x13,
    PreserveTtl = 0x14,
    CreateAsDeleted = 0x17,
    ClustermapChangeNotificationV2 = 0x19,
    SubdocReadReplica = 0x1c,
    PointInTimeRecovery = 0x1e,
}

pub const ADVERTISED_FEATURES: &[Feature] = &[
    Feature::TcpNoDelay,
    Feature::MutationSeqno,
    Feature::Xattr,
    Feature::SelectBucket,
    Feature::Snappy,
    Feature::Json,
    Feature::Duplex,
    Feature::ClustermapChangeNotification,
    Feature::ClustermapChangeNotificationV2,
    Feature::UnorderedExecution,
    Feature::Collections,
    Feature::SyncReplication,
    Feature::PreserveTtl,
    Feature::CreateAsDeleted,
    Feature::SubdocReadReplica,
    Feature::PointInTimeRecovery,
];

/// The subset of [`ADVERTISED_FEATURES`] the peer actually echoed back, in
/// the order it sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedFeatures(pub Vec<Feature>);

impl NegotiatedFeatures {
    pub fn supports(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub(crate) fn from_wire_codes(codes: &[u16]) -> NegotiatedFeatures {
        let known: std::collections::HashMap<u16, Feature> = ADVERTISED_FEATURES
            .iter()
            .map(|f| (*f as u16, *f))
            .collect();
        NegotiatedFeatures(codes.iter().filter_map(|c| known.get(c).copied()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiated_features_ignores_codes_we_did_not_advertise() {
        let negotiated = NegotiatedFeatures::from_wire_codes(&[0x03, 0x06, 0xffff]);
        assert!(negotiated.supports(Feature::TcpNoDelay));
        assert!(negotiated.supports(Feature::Xattr));
        assert!(!negotiated.supports(Feature::Snappy));
        assert_eq!(negotiated.0.len(), 2);
    }
}
