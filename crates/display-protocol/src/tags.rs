//! Wire tags for the length-prefixed IPC frame format (spec §6).

/// One-byte message tag. Values match the wire table in spec §6 exactly;
/// do not renumber without bumping the protocol on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Apply = 1,
    Revert = 2,
    Reset = 3,
    ExportGolden = 4,
    ApplyResult = 6,
    Disarm = 7,
    SnapshotCurrent = 8,
    VerificationResult = 9,
    Ping = 0xFE,
    Stop = 0xFF,
}

impl Tag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized message tag: {0:#x}")]
pub struct UnknownTag(pub u8);

impl TryFrom<u8> for Tag {
    type Error = UnknownTag;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tag::Apply),
            2 => Ok(Tag::Revert),
            3 => Ok(Tag::Reset),
            4 => Ok(Tag::ExportGolden),
            6 => Ok(Tag::ApplyResult),
            7 => Ok(Tag::Disarm),
            8 => Ok(Tag::SnapshotCurrent),
            9 => Ok(Tag::VerificationResult),
            0xFE => Ok(Tag::Ping),
            0xFF => Ok(Tag::Stop),
            other => Err(UnknownTag(other)),
        }
    }
}
