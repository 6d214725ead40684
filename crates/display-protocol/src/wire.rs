//! JSON payload parsing for the `Apply`/`ExportGolden`/`SnapshotCurrent`
//! frame bodies, and the byte-payload encoding for `ApplyResult` /
//! `VerificationResult` (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A monitor position extension (`sunshine_monitor_positions`): device id to
/// integer (x, y).
pub type MonitorPositions = BTreeMap<String, (i64, i64)>;

/// Extension fields the caller may bundle into an `Apply` payload alongside
/// the plain display configuration JSON. These never reach
/// `display-core::ApplyRequest` as JSON — the caller strips and interprets
/// them before building a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyExtensions {
    pub hdr_blank: Option<bool>,
    pub virtual_layout: Option<String>,
    #[serde(default)]
    pub monitor_positions: MonitorPositions,
    pub snapshot_exclude_devices: Option<Vec<String>>,
    /// Each inner vec is one topology group of device ids.
    pub topology: Option<Vec<Vec<String>>>,
    pub prefer_golden_first: Option<bool>,
}

/// Result of splitting an `Apply` payload into extensions and the remaining
/// configuration JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedApplyPayload {
    pub extensions: ApplyExtensions,
    /// The payload with extension keys removed, as a JSON value the caller
    /// hands to its display-configuration deserializer.
    pub configuration_json: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("apply payload was not valid UTF-8")]
    NotUtf8,
    #[error("apply payload was not a JSON value")]
    InvalidJson,
}

/// Strip the `wa_hdr_toggle` / `sunshine_*` extension keys out of an `Apply`
/// payload and return them alongside the remaining configuration JSON.
///
/// Mirrors the original's `parse_apply_payload`: a payload that doesn't even
/// parse as JSON is passed through unchanged as an empty object with no
/// extensions, since the configuration deserializer downstream is the one
/// that ultimately rejects malformed input.
pub fn parse_apply_payload(payload: &[u8]) -> Result<ParsedApplyPayload, WireError> {
    let text = std::str::from_utf8(payload).map_err(|_| WireError::NotUtf8)?;

    let mut root: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(ParsedApplyPayload {
                extensions: ApplyExtensions::default(),
                configuration_json: Value::String(text.to_owned()),
            });
        }
    };

    let mut extensions = ApplyExtensions::default();

    let Some(obj) = root.as_object_mut() else {
        return Ok(ParsedApplyPayload {
            extensions,
            configuration_json: root,
        });
    };

    if let Some(v) = obj.remove("wa_hdr_toggle") {
        extensions.hdr_blank = v.as_bool();
    }

    if let Some(v) = obj.remove("sunshine_virtual_layout") {
        if let Some(s) = v.as_str() {
            extensions.virtual_layout = Some(s.to_owned());
        }
    }

    if let Some(Value::Object(positions)) = obj.remove("sunshine_monitor_positions") {
        extensions.monitor_positions = parse_monitor_positions(&positions);
    }

    if let Some(v) = obj.remove("sunshine_snapshot_exclude_devices") {
        extensions.snapshot_exclude_devices = Some(parse_device_exclude_node(&v));
    }

    if let Some(Value::Array(groups)) = obj.remove("sunshine_topology") {
        let topology = parse_topology(&groups);
        if !topology.is_empty() {
            extensions.topology = Some(topology);
        }
    }

    if let Some(v) = obj.remove("sunshine_always_restore_from_golden") {
        extensions.prefer_golden_first = v.as_bool();
    }

    Ok(ParsedApplyPayload {
        extensions,
        configuration_json: root,
    })
}

fn parse_monitor_positions(positions: &Map<String, Value>) -> MonitorPositions {
    let mut out = MonitorPositions::new();
    for (device_id, node) in positions {
        let Some(node) = node.as_object() else {
            continue;
        };
        let (Some(x), Some(y)) = (node.get("x").and_then(Value::as_i64), node.get("y").and_then(Value::as_i64)) else {
            continue;
        };
        out.insert(device_id.clone(), (x, y));
    }
    out
}

fn parse_topology(groups: &[Value]) -> Vec<Vec<String>> {
    groups
        .iter()
        .filter_map(|g| g.as_array())
        .map(|g| {
            g.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect()
}

/// Parse a `SnapshotCurrent`/`ExportGolden` payload's optional device-exclude
/// list. An empty payload means "no exclusion list specified"; malformed
/// JSON is treated the same way (spec §6: best-effort, never blocks the
/// command).
pub fn parse_device_exclude_payload(payload: &[u8]) -> Option<Vec<String>> {
    if payload.is_empty() {
        return None;
    }

    let text = std::str::from_utf8(payload).ok()?;
    if text.is_empty() {
        return Some(Vec::new());
    }

    let value: Value = serde_json::from_str(text).ok()?;
    Some(parse_device_exclude_node(&value))
}

/// Accepts a bare array, `{"exclude_devices": [...]}`, or `{"devices": [...]}`;
/// each element is a string or `{"device_id": ...}` / `{"id": ...}`.
pub fn parse_device_exclude_node(node: &Value) -> Vec<String> {
    let array = match node {
        Value::Object(obj) => {
            if let Some(v) = obj.get("exclude_devices") {
                v
            } else if let Some(v) = obj.get("devices") {
                v
            } else {
                return Vec::new();
            }
        }
        other => other,
    };

    let Some(array) = array.as_array() else {
        return Vec::new();
    };

    array
        .iter()
        .filter_map(|el| match el {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("device_id")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        })
        .collect()
}

/// Encode an `ApplyResult` frame body: `[1]` on success, `[0, error...]` on
/// failure with an optional UTF-8 error message appended.
pub fn encode_apply_result(ok: bool, error: Option<&str>) -> Vec<u8> {
    let mut payload = vec![if ok { 1u8 } else { 0u8 }];
    if !ok {
        if let Some(error) = error {
            payload.extend_from_slice(error.as_bytes());
        }
    }
    payload
}

/// Decode an `ApplyResult` frame body as written by [`encode_apply_result`].
pub fn decode_apply_result(payload: &[u8]) -> Result<bool, WireError> {
    match payload.first() {
        Some(1) => Ok(true),
        Some(0) => Ok(false),
        _ => Err(WireError::InvalidJson),
    }
}

/// Encode a `VerificationResult` frame body: `[1]` on success, `[0]` on
/// failure.
pub fn encode_verification_result(ok: bool) -> Vec<u8> {
    vec![if ok { 1u8 } else { 0u8 }]
}

pub fn decode_verification_result(payload: &[u8]) -> Result<bool, WireError> {
    match payload.first() {
        Some(1) => Ok(true),
        Some(0) => Ok(false),
        _ => Err(WireError::InvalidJson),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_known_extension_keys() {
        let payload = serde_json::json!({
            "wa_hdr_toggle": true,
            "sunshine_virtual_layout": "dual",
            "sunshine_monitor_positions": {"disp0": {"x": 10, "y": -20}},
            "sunshine_snapshot_exclude_devices": ["disp1"],
            "sunshine_topology": [["disp0", "disp1"]],
            "sunshine_always_restore_from_golden": true,
            "device_id": "disp0",
        });
        let parsed = parse_apply_payload(payload.to_string().as_bytes()).unwrap();

        assert_eq!(parsed.extensions.hdr_blank, Some(true));
        assert_eq!(parsed.extensions.virtual_layout.as_deref(), Some("dual"));
        assert_eq!(parsed.extensions.monitor_positions.get("disp0"), Some(&(10, -20)));
        assert_eq!(
            parsed.extensions.snapshot_exclude_devices,
            Some(vec!["disp1".to_string()])
        );
        assert_eq!(
            parsed.extensions.topology,
            Some(vec![vec!["disp0".to_string(), "disp1".to_string()]])
        );
        assert_eq!(parsed.extensions.prefer_golden_first, Some(true));

        let remaining = parsed.configuration_json.as_object().unwrap();
        assert!(!remaining.contains_key("wa_hdr_toggle"));
        assert_eq!(remaining.get("device_id").unwrap(), "disp0");
    }

    #[test]
    fn device_exclude_accepts_bare_array_of_strings() {
        let node = serde_json::json!(["a", "b"]);
        assert_eq!(parse_device_exclude_node(&node), vec!["a", "b"]);
    }

    #[test]
    fn device_exclude_accepts_wrapped_object_forms() {
        let exclude = serde_json::json!({"exclude_devices": ["a"]});
        assert_eq!(parse_device_exclude_node(&exclude), vec!["a"]);

        let devices = serde_json::json!({"devices": [{"device_id": "b"}, {"id": "c"}]});
        assert_eq!(parse_device_exclude_node(&devices), vec!["b", "c"]);
    }

    #[test]
    fn device_exclude_payload_empty_means_unspecified() {
        assert_eq!(parse_device_exclude_payload(&[]), None);
    }

    #[test]
    fn apply_result_round_trips() {
        let ok = encode_apply_result(true, None);
        assert_eq!(decode_apply_result(&ok).unwrap(), true);

        let err = encode_apply_result(false, Some("bad config"));
        assert_eq!(err[0], 0);
        assert_eq!(&err[1..], b"bad config");
        assert_eq!(decode_apply_result(&err).unwrap(), false);
    }
}
