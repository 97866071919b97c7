// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Metadata packet body encoding and decoding.
//!
//! A metadata packet payload starts with a 4-byte little-endian encoding
//! tag, followed by the encoded metadata message. The only encoding in use
//! is MessagePack; the message is a map `{"method": string, "params": any}`.

use serde_json::Value;

/// The encoding tag for MessagePack metadata bodies.
pub const ENCODING_MSGPACK: u32 = 2;

/// Encodes a metadata message into a packet payload.
pub fn encode(method: &str, params: &Value) -> Vec<u8> {
	let message = serde_json::json!({
		"method": method,
		"params": params,
	});

	// MessagePack encoding of a JSON object cannot fail.
	let body = rmp_serde::to_vec(&message).expect("msgpack encoding of a JSON value");

	let mut payload = Vec::with_capacity(4 + body.len());
	payload.extend_from_slice(&ENCODING_MSGPACK.to_le_bytes());
	payload.extend_from_slice(&body);
	payload
}

/// Decodes a metadata packet payload into a `(method, params)` pair.
///
/// Unknown encodings, malformed MessagePack, and messages without a string
/// `method` all yield `None`; such packets are dropped without affecting the
/// connection. A missing `params` decodes as JSON null.
pub fn decode(payload: &[u8]) -> Option<(String, Value)> {
	if payload.len() < 4 {
		return None;
	}

	let encoding = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
	if encoding != ENCODING_MSGPACK {
		return None;
	}

	let message: Value = rmp_serde::from_slice(&payload[4..]).ok()?;
	let object = message.as_object()?;
	let method = object.get("method")?.as_str()?.to_string();
	let params = object.get("params").cloned().unwrap_or(Value::Null);

	Some((method, params))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_roundtrip() {
		let params = json!({ "signalIds": ["/Value", "/Time"] });
		let payload = encode("available", &params);

		let (method, decoded) = decode(&payload).unwrap();
		assert_eq!(method, "available");
		assert_eq!(decoded, params);
	}

	#[test]
	fn test_null_params_roundtrip() {
		let payload = encode("init", &Value::Null);
		let (method, params) = decode(&payload).unwrap();
		assert_eq!(method, "init");
		assert!(params.is_null());
	}

	#[test]
	fn test_encoding_tag_is_little_endian() {
		let payload = encode("x", &Value::Null);
		assert_eq!(&payload[..4], &[2, 0, 0, 0]);
	}

	#[test]
	fn test_unknown_encoding_is_dropped() {
		let mut payload = encode("x", &Value::Null);
		payload[0] = 9;
		assert!(decode(&payload).is_none());
	}

	#[test]
	fn test_truncated_and_garbage_bodies_are_dropped() {
		assert!(decode(&[]).is_none());
		assert!(decode(&[2, 0]).is_none());
		assert!(decode(&[2, 0, 0, 0, 0xC1, 0xC1, 0xC1]).is_none());
	}

	#[test]
	fn test_missing_method_is_dropped() {
		let message = json!({ "params": 1 });
		let mut payload = ENCODING_MSGPACK.to_le_bytes().to_vec();
		payload.extend_from_slice(&rmp_serde::to_vec(&message).unwrap());
		assert!(decode(&payload).is_none());
	}
}
