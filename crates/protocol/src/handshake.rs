// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! HTTP WebSocket upgrade handshake material.

use base64::{prelude::BASE64_STANDARD, Engine};
use rand::RngCore;
use sha1::{digest::Digest, Sha1};

/// The magic GUID appended to `Sec-WebSocket-Key` when computing the
/// `Sec-WebSocket-Accept` value (RFC 6455 §1.3).
pub const MAGIC_KEY: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Errors produced while validating a handshake.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
	#[error("malformed HTTP message")]
	Malformed,

	#[error("unexpected HTTP status {0}")]
	BadStatus(u16),

	#[error("missing or mismatched Sec-WebSocket-Accept header")]
	BadAcceptKey,
}

/// Computes the `Sec-WebSocket-Accept` value for a client-provided
/// `Sec-WebSocket-Key`.
pub fn accept_key(sec_websocket_key: &str) -> String {
	let mut sha1 = Sha1::new();
	sha1.update(sec_websocket_key.as_bytes());
	sha1.update(MAGIC_KEY.as_bytes());
	BASE64_STANDARD.encode(sha1.finalize())
}

/// Generates a random `Sec-WebSocket-Key`: 16 random bytes, Base64-encoded.
pub fn generate_key() -> String {
	let mut nonce = [0u8; 16];
	rand::thread_rng().fill_bytes(&mut nonce);
	BASE64_STANDARD.encode(nonce)
}

/// Finds the end of an HTTP header block (the byte past the double CRLF).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
	data.windows(4).position(|window| window == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Builds the HTTP upgrade request a client sends to begin streaming.
pub fn build_upgrade_request(host: &str, path: &str, key: &str) -> String {
	format!(
		"GET {path} HTTP/1.1\r\n\
		 Host: {host}\r\n\
		 Connection: Upgrade\r\n\
		 Upgrade: websocket\r\n\
		 Sec-WebSocket-Key: {key}\r\n\
		 Sec-WebSocket-Version: 13\r\n\
		 \r\n"
	)
}

/// Builds the 101 response a server sends to complete the upgrade.
pub fn build_upgrade_response(accept: &str) -> String {
	format!(
		"HTTP/1.1 101 Switching Protocols\r\n\
		 Connection: Upgrade\r\n\
		 Upgrade: websocket\r\n\
		 Sec-WebSocket-Accept: {accept}\r\n\
		 \r\n"
	)
}

/// A validated upgrade response: the number of bytes the response occupied,
/// so the caller can treat anything beyond it as early streaming data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeResponse {
	pub consumed: usize,
}

/// Parses and validates a server's answer to an upgrade request.
///
/// Returns `Ok(None)` while the response headers are still incomplete.
/// `sent_key` is the `Sec-WebSocket-Key` from the request; the response's
/// accept header must match [`accept_key`] of it.
pub fn parse_upgrade_response(data: &[u8], sent_key: &str) -> Result<Option<UpgradeResponse>, HandshakeError> {
	let Some(consumed) = find_header_end(data) else {
		return Ok(None);
	};

	let mut headers = [httparse::EMPTY_HEADER; 32];
	let mut response = httparse::Response::new(&mut headers);

	match response.parse(&data[..consumed]) {
		Ok(httparse::Status::Complete(_)) => {}
		Ok(httparse::Status::Partial) => return Ok(None),
		Err(_) => return Err(HandshakeError::Malformed),
	}

	match response.code {
		Some(101) => {}
		Some(code) => return Err(HandshakeError::BadStatus(code)),
		None => return Err(HandshakeError::Malformed),
	}

	let accept = response
		.headers
		.iter()
		.find(|header| header.name.eq_ignore_ascii_case("sec-websocket-accept"))
		.and_then(|header| std::str::from_utf8(header.value).ok())
		.ok_or(HandshakeError::BadAcceptKey)?;

	if accept.trim() != accept_key(sent_key) {
		return Err(HandshakeError::BadAcceptKey);
	}

	Ok(Some(UpgradeResponse { consumed }))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_accept_key_rfc_vector() {
		// RFC 6455 §1.3.
		assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
	}

	#[test]
	fn test_generated_keys_are_unique_base64() {
		let a = generate_key();
		let b = generate_key();
		assert_ne!(a, b);
		assert_eq!(BASE64_STANDARD.decode(&a).unwrap().len(), 16);
	}

	#[test]
	fn test_find_header_end() {
		assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
		assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
	}

	#[test]
	fn test_response_roundtrip() {
		let key = generate_key();
		let response = build_upgrade_response(&accept_key(&key));

		let mut data = response.into_bytes();
		data.extend_from_slice(b"early");

		let parsed = parse_upgrade_response(&data, &key).unwrap().unwrap();
		assert_eq!(&data[parsed.consumed..], b"early");
	}

	#[test]
	fn test_incomplete_response_is_pending() {
		let key = generate_key();
		let response = build_upgrade_response(&accept_key(&key));
		let partial = &response.as_bytes()[..response.len() - 4];
		assert_eq!(parse_upgrade_response(partial, &key), Ok(None));
	}

	#[test]
	fn test_wrong_status_is_rejected() {
		let data = b"HTTP/1.1 400 Bad Request\r\n\r\n";
		assert_eq!(parse_upgrade_response(data, "k"), Err(HandshakeError::BadStatus(400)));
	}

	#[test]
	fn test_mismatched_accept_key_is_rejected() {
		let response = build_upgrade_response(&accept_key("other-key"));
		assert_eq!(
			parse_upgrade_response(response.as_bytes(), "sent-key"),
			Err(HandshakeError::BadAcceptKey)
		);
	}
}
