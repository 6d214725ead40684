//! Wire format for the display helper's local IPC channel: frame tags,
//! length-prefixed framing, and the JSON extension-field conventions
//! carried inside `Apply`/`ExportGolden`/`SnapshotCurrent` payloads.

mod framing;
mod tags;
mod wire;

pub use framing::{parse_legacy_frame, read_frame, write_frame, FramingError};
pub use tags::{Tag, UnknownTag};
pub use wire::{
    decode_apply_result, decode_verification_result, encode_apply_result,
    encode_verification_result, parse_apply_payload, parse_device_exclude_node,
    parse_device_exclude_payload, ApplyExtensions, MonitorPositions, ParsedApplyPayload,
    WireError,
};
