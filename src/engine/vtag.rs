//! VLAN tag learned from vendor DHCP options.
//!
//! The option blob is base64 of a sequence of `(code, len, value)` records.
//! One sub-option carries the tag as ASCII decimal. A tag is applied as
//! pending, confirmed by a cloud connection, and rolled back when the uplink
//! keeps failing while it is pending.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::state::{VtagState, VtagStatus};
use crate::error::{Error, Result};
use crate::types::UplinkId;

/// Valid 802.1Q tag range.
pub const VTAG_MIN: u16 = 1;
pub const VTAG_MAX: u16 = 4094;

/// Extract the tag from a vendor option blob.
///
/// Returns `Ok(None)` when the blob is well formed but carries no tag.
pub fn parse_vendor_tag(blob: &str, suboption: u8) -> Result<Option<u16>> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Ok(None);
    }
    let raw = STANDARD
        .decode(blob)
        .map_err(|e| Error::InvalidInput(format!("vendor option is not base64: {e}")))?;

    let mut rest = raw.as_slice();
    while let [code, len, tail @ ..] = rest {
        let len = usize::from(*len);
        if tail.len() < len {
            return Err(Error::InvalidInput(format!(
                "vendor sub-option {code} truncated: need {len} bytes, have {}",
                tail.len()
            )));
        }
        let (value, next) = tail.split_at(len);
        if *code == suboption {
            return parse_tag(value).map(Some);
        }
        rest = next;
    }

    if rest.is_empty() {
        Ok(None)
    } else {
        Err(Error::InvalidInput("vendor option has a dangling byte".into()))
    }
}

fn parse_tag(value: &[u8]) -> Result<u16> {
    let text = std::str::from_utf8(value)
        .map_err(|_| Error::InvalidInput("vlan tag is not ASCII".into()))?
        .trim_end_matches('\0')
        .trim();
    let tag: u16 = text
        .parse()
        .map_err(|_| Error::InvalidInput(format!("vlan tag {text:?} is not a number")))?;
    if !(VTAG_MIN..=VTAG_MAX).contains(&tag) {
        return Err(Error::InvalidInput(format!("vlan tag {tag} out of range")));
    }
    Ok(tag)
}

/// What the caller must write after a tag event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtagEffect {
    None,
    /// Apply this tag on the uplink.
    Apply(u16),
    /// Remove the tag from the uplink.
    Remove(u16),
}

/// A tag was offered for `uplink`.
pub fn offer(state: &mut VtagState, uplink: &UplinkId, tag: u16) -> VtagEffect {
    if state.rejected.contains(&tag) {
        tracing::debug!(uplink = %uplink, tag, "Ignoring rolled back vlan tag");
        return VtagEffect::None;
    }
    if state.tag == Some(tag) && state.uplink.as_ref() == Some(uplink) {
        return VtagEffect::None;
    }

    tracing::info!(uplink = %uplink, tag, "Vlan tag pending");
    state.status = VtagStatus::Pending;
    state.tag = Some(tag);
    state.uplink = Some(uplink.clone());
    state.failures = 0;
    VtagEffect::Apply(tag)
}

/// The cloud connection came up: a pending tag is now known good.
pub fn confirm(state: &mut VtagState) -> bool {
    if state.status != VtagStatus::Pending {
        return false;
    }
    state.status = VtagStatus::Applied;
    state.failures = 0;
    tracing::info!(tag = ?state.tag, "Vlan tag applied");
    true
}

/// Connectivity failed while a tag is pending.
///
/// After more than `threshold` failures the tag is rolled back and never
/// offered again.
pub fn record_failure(state: &mut VtagState, threshold: u32) -> VtagEffect {
    if state.status != VtagStatus::Pending {
        return VtagEffect::None;
    }
    state.failures += 1;
    tracing::info!(
        tag = ?state.tag,
        failures = state.failures,
        threshold,
        "Vlan tag connectivity failed"
    );
    if state.failures <= threshold {
        return VtagEffect::None;
    }

    let Some(tag) = state.tag.take() else {
        state.status = VtagStatus::NotUsed;
        return VtagEffect::None;
    };
    tracing::warn!(tag, "Vlan tag rolled back");
    state.status = VtagStatus::NotUsed;
    state.failures = 0;
    state.rejected.push(tag);
    VtagEffect::Remove(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(records: &[(u8, &[u8])]) -> String {
        let mut raw = Vec::new();
        for (code, value) in records {
            raw.push(*code);
            raw.push(value.len() as u8);
            raw.extend_from_slice(value);
        }
        STANDARD.encode(raw)
    }

    #[test]
    fn test_parse_vendor_tag() {
        let b = blob(&[(1, b"serial"), (2, b"100")]);
        assert_eq!(parse_vendor_tag(&b, 2).unwrap(), Some(100));
        assert_eq!(parse_vendor_tag(&b, 7).unwrap(), None);
        assert_eq!(parse_vendor_tag("", 2).unwrap(), None);
    }

    #[test]
    fn test_parse_vendor_tag_malformed() {
        assert!(parse_vendor_tag("%%%", 2).is_err());
        assert!(parse_vendor_tag(&STANDARD.encode([2u8, 5, b'1']), 2).is_err());
        assert!(parse_vendor_tag(&blob(&[(2, b"5000")]), 2).is_err());
        assert!(parse_vendor_tag(&blob(&[(2, b"abc")]), 2).is_err());
        assert!(parse_vendor_tag(&blob(&[(2, b"0")]), 2).is_err());
    }

    #[test]
    fn test_pending_then_applied() {
        let mut state = VtagState::default();
        let eth0 = UplinkId::from("eth0");
        assert_eq!(offer(&mut state, &eth0, 100), VtagEffect::Apply(100));
        assert_eq!(offer(&mut state, &eth0, 100), VtagEffect::None);
        assert!(confirm(&mut state));
        assert_eq!(state.status, VtagStatus::Applied);
        assert_eq!(record_failure(&mut state, 0), VtagEffect::None);
    }

    #[test]
    fn test_rollback_after_threshold() {
        let mut state = VtagState::default();
        let eth0 = UplinkId::from("eth0");
        offer(&mut state, &eth0, 42);

        for _ in 0..3 {
            assert_eq!(record_failure(&mut state, 3), VtagEffect::None);
        }
        assert_eq!(record_failure(&mut state, 3), VtagEffect::Remove(42));
        assert_eq!(state.status, VtagStatus::NotUsed);
        assert_eq!(state.tag, None);

        assert_eq!(offer(&mut state, &eth0, 42), VtagEffect::None);
        assert_eq!(offer(&mut state, &eth0, 43), VtagEffect::Apply(43));
    }
}
