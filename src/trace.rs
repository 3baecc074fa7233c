//! W3C trace context extraction
//!
//! Upstream strategy services inject a `traceparent` (and optionally
//! `tracestate`) into the signal payload. The consumer parses it and
//! attaches the ids to its processing span so cross-service traces stitch
//! together. A malformed carrier falls back to a fresh trace.

use std::collections::HashMap;

/// Parsed `traceparent` plus optional `tracestate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_span_id: String,
    pub sampled: bool,
    pub tracestate: Option<String>,
}

/// Extract a trace context from a header-style carrier map
pub fn extract(carrier: &HashMap<String, String>) -> Option<TraceContext> {
    let traceparent = carrier.get("traceparent")?;
    let (trace_id, parent_span_id, flags) = parse_traceparent(traceparent)?;
    Some(TraceContext {
        trace_id,
        parent_span_id,
        sampled: flags & 0x01 == 0x01,
        tracestate: carrier.get("tracestate").cloned(),
    })
}

/// Parse `version-traceid-spanid-flags`, accepting only version 00 with
/// well-formed non-zero ids
fn parse_traceparent(value: &str) -> Option<(String, String, u8)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if version != "00" {
        return None;
    }
    if trace_id.len() != 32 || !is_lower_hex(trace_id) || trace_id.bytes().all(|b| b == b'0') {
        return None;
    }
    if span_id.len() != 16 || !is_lower_hex(span_id) || span_id.bytes().all(|b| b == b'0') {
        return None;
    }
    if flags.len() != 2 || !is_lower_hex(flags) {
        return None;
    }

    let flags = u8::from_str_radix(flags, 16).ok()?;
    Some((trace_id.to_string(), span_id.to_string(), flags))
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(traceparent: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("traceparent".to_string(), traceparent.to_string());
        map
    }

    #[test]
    fn test_extracts_valid_traceparent() {
        let ctx = extract(&carrier(
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ))
        .unwrap();
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.parent_span_id, "b7ad6b7169203331");
        assert!(ctx.sampled);
        assert!(ctx.tracestate.is_none());
    }

    #[test]
    fn test_unsampled_flag() {
        let ctx = extract(&carrier(
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00",
        ))
        .unwrap();
        assert!(!ctx.sampled);
    }

    #[test]
    fn test_tracestate_carried_through() {
        let mut map = carrier("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");
        map.insert("tracestate".to_string(), "vendor=value".to_string());
        let ctx = extract(&map).unwrap();
        assert_eq!(ctx.tracestate.as_deref(), Some("vendor=value"));
    }

    #[test]
    fn test_rejects_malformed_carriers() {
        assert!(extract(&carrier("garbage")).is_none());
        assert!(extract(&carrier("00-short-b7ad6b7169203331-01")).is_none());
        // All-zero trace id is invalid per the format
        assert!(extract(&carrier(
            "00-00000000000000000000000000000000-b7ad6b7169203331-01"
        ))
        .is_none());
        // Uppercase hex is invalid
        assert!(extract(&carrier(
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01"
        ))
        .is_none());
        // Unknown version
        assert!(extract(&carrier(
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        ))
        .is_none());
        assert!(extract(&HashMap::new()).is_none());
    }
}
