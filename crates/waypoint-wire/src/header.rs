use crate::Error;

/// The leading magic byte of a frame, selecting request/response and whether
/// flexible framing-extras are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    Request = 0x80,
    Response = 0x81,
    AltRequest = 0x08,
    AltResponse = 0x18,
    ServerRequest = 0x82,
}

impl Magic {
    pub fn has_framing_extras(self) -> bool {
        matches!(self, Magic::AltRequest | Magic::AltResponse)
    }

    pub fn is_response(self) -> bool {
        matches!(self, Magic::Response | Magic::AltResponse)
    }
}

impl TryFrom<u8> for Magic {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x80 => Ok(Magic::Request),
            0x81 => Ok(Magic::Response),
            0x08 => Ok(Magic::AltRequest),
            0x18 => Ok(Magic::AltResponse),
            0x82 => Ok(Magic::ServerRequest),
            other => Err(Error::protocol(format!("unknown magic byte 0x{other:02x}"))),
        }
    }
}

/// Opcodes relevant to this core. Per-opcode request/response *encoders* are
/// an external collaborator; only the identifiers needed to route and to
/// recognise server-push frames live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Opcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Noop,
    GetReplica,
    Observe,
    ObserveSeqno,
    GetMeta,
    Stat,
    GetRandomKey,
    SubdocMultiLookup,
    SubdocMultiMutation,
    SelectBucket,
    Hello,
    SaslListMechs,
    SaslAuth,
    SaslStep,
    GetErrorMap,
    GetClusterConfig,
    GetCollectionId,
    GetCollectionsManifest,
    ClustermapChangeNotification,
    DcpNoop,
    Other(u8),
}

impl Opcode {
    /// The wire byte for this opcode, inverse of `From<u8>`.
    pub fn code(self) -> u8 {
        match self {
            Opcode::Get => 0x00,
            Opcode::ClustermapChangeNotification => 0x01,
            Opcode::Set => 0x01, // only ever compared via `Opcode`, never encoded as a request alongside the push notification above
            Opcode::Add => 0x02,
            Opcode::Replace => 0x03,
            Opcode::Delete => 0x04,
            Opcode::Noop => 0x0a,
            Opcode::Stat => 0x10,
            Opcode::Hello => 0x1f,
            Opcode::SaslListMechs => 0x20,
            Opcode::SaslAuth => 0x21,
            Opcode::SaslStep => 0x22,
            Opcode::DcpNoop => 0x5c,
            Opcode::GetClusterConfig => 0xb5,
            Opcode::SelectBucket => 0x89,
            Opcode::GetReplica => 0x83,
            Opcode::ObserveSeqno => 0x91,
            Opcode::Observe => 0x92,
            Opcode::GetMeta => 0xa0,
            Opcode::GetRandomKey => 0xb6,
            Opcode::GetCollectionsManifest => 0xba,
            Opcode::GetCollectionId => 0xbb,
            Opcode::SubdocMultiLookup => 0xd0,
            Opcode::SubdocMultiMutation => 0xd1,
            Opcode::GetErrorMap => 0xfe,
            Opcode::Other(byte) => byte,
        }
    }
}

impl From<u8> for Opcode {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x0a => Opcode::Noop,
            0x10 => Opcode::Stat,
            0x83 => Opcode::GetReplica,
            0x92 => Opcode::Observe,
            0x91 => Opcode::ObserveSeqno,
            0xa0 => Opcode::GetMeta,
            0xb6 => Opcode::GetRandomKey,
            0xd0 => Opcode::SubdocMultiLookup,
            0xd1 => Opcode::SubdocMultiMutation,
            0x89 => Opcode::SelectBucket,
            0x1f => Opcode::Hello,
            0x20 => Opcode::SaslListMechs,
            0x21 => Opcode::SaslAuth,
            0x22 => Opcode::SaslStep,
            0xfe => Opcode::GetErrorMap,
            0xb5 => Opcode::GetClusterConfig,
            0xbb => Opcode::GetCollectionId,
            0xba => Opcode::GetCollectionsManifest,
            other => Opcode::Other(other),
        }
    }
}

impl Opcode {
    /// Opcode byte 0x01 means `Set` on a normal request but
    /// `ClustermapChangeNotification` on a server-push frame; `From<u8>`
    /// alone can't disambiguate, so decoding goes through this ever so
    /// slightly magic-aware lookup instead.
    pub fn from_wire(byte: u8, magic: Magic) -> Opcode {
        if magic == Magic::ServerRequest && byte == 0x01 {
            Opcode::ClustermapChangeNotification
        } else {
            Opcode::from(byte)
        }
    }
}

/// Notable status codes the core interprets without consulting the
/// server-supplied error map. Anything not matched here is `Unmapped` and
/// must be resolved against the error map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    TooBig,
    Invalid,
    NotStored,
    DeltaBadval,
    NotMyVbucket,
    NoBucket,
    Locked,
    AuthError,
    AuthContinue,
    UnknownCollection,
    DurabilityInvalidLevel,
    DurabilityImpossible,
    SyncWriteInProgress,
    SyncWriteAmbiguous,
    SyncWriteReCommitInProgress,
    SubdocPathNotFound,
    Unmapped(u16),
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        match code {
            0x00 => Status::Success,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::TooBig,
            0x04 => Status::Invalid,
            0x05 => Status::NotStored,
            0x06 => Status::DeltaBadval,
            0x07 => Status::NotMyVbucket,
            0x08 => Status::NoBucket,
            0x09 => Status::Locked,
            0x20 => Status::AuthError,
            0x21 => Status::AuthContinue,
            0x88 => Status::UnknownCollection,
            0xa0 => Status::DurabilityInvalidLevel,
            0xa1 => Status::DurabilityImpossible,
            0xa2 => Status::SyncWriteInProgress,
            0xa3 => Status::SyncWriteAmbiguous,
            0xa4 => Status::SyncWriteReCommitInProgress,
            0xc0 => Status::SubdocPathNotFound,
            other => Status::Unmapped(other),
        }
    }
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

/// Data-type bits from the frame header. Kept as a bare bitset rather than
/// pulling in `bitflags` for three flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataType(u8);

impl DataType {
    pub const RAW: DataType = DataType(0x00);
    pub const JSON: DataType = DataType(0x01);
    pub const SNAPPY: DataType = DataType(0x02);
    pub const XATTR: DataType = DataType(0x04);

    pub fn empty() -> Self {
        DataType(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        DataType(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: DataType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: DataType) -> Self {
        DataType(self.0 | other.0)
    }

    pub fn without(self, other: DataType) -> Self {
        DataType(self.0 & !other.0)
    }
}
