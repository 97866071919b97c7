// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The JSON-RPC 2.0 command interface.
//!
//! Subscribe and unsubscribe requests travel over a symmetric JSON-RPC
//! channel: either in-band as `request`/`response` metadata messages on the
//! streaming connection, or out-of-band as HTTP POSTs to an advertised
//! endpoint. A peer advertises its interfaces in the `init` message under
//! `commandInterfaces`; clients prefer the in-band interface.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use ws_streaming_core::StreamingError;
use ws_streaming_protocol::handshake;

/// JSON-RPC 2.0 fault codes.
pub mod fault {
	pub const PARSE_ERROR: i64 = -32700;
	pub const INVALID_REQUEST: i64 = -32600;
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const INVALID_PARAMS: i64 = -32602;
	pub const INTERNAL_ERROR: i64 = -32603;
	pub const SERVER_ERROR: i64 = -32000;
}

/// A handler awaiting a command-interface response.
pub(crate) type ResponseHandler = Box<dyn FnOnce(Result<Value, StreamingError>) + Send>;

/// Builds a JSON-RPC request object.
pub(crate) fn build_request(id: u64, method: &str, params: &Value) -> Value {
	serde_json::json!({
		"jsonrpc": "2.0",
		"id": id,
		"method": method,
		"params": params,
	})
}

/// Builds a JSON-RPC response object carrying a result.
pub(crate) fn build_result_response(id: &Value, result: Value) -> Value {
	serde_json::json!({
		"jsonrpc": "2.0",
		"id": id,
		"result": result,
	})
}

/// Builds a JSON-RPC response object carrying a fault.
pub(crate) fn build_error_response(id: &Value, code: i64, message: &str) -> Value {
	serde_json::json!({
		"jsonrpc": "2.0",
		"id": id,
		"error": { "code": code, "message": message },
	})
}

/// The client half of the in-band command interface: allocates ids, indexes
/// pending handlers, and correlates responses.
#[derive(Default)]
pub(crate) struct InBandCommandClient {
	next_id: u64,
	pending: HashMap<u64, ResponseHandler>,
}

impl InBandCommandClient {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` and returns the request object to transmit.
	pub fn prepare(&mut self, method: &str, params: &Value, handler: ResponseHandler) -> Value {
		let id = self.next_id;
		self.next_id += 1;

		self.pending.insert(id, handler);
		build_request(id, method, params)
	}

	/// Correlates a `response` metadata message with its pending handler.
	pub fn handle_response(&mut self, params: &Value) {
		let Some(id) = params.get("id").and_then(Value::as_u64) else {
			return;
		};

		let Some(handler) = self.pending.remove(&id) else {
			return;
		};

		if let Some(error) = params.get("error") {
			let code = error.get("code").and_then(Value::as_i64).unwrap_or(fault::INTERNAL_ERROR);
			let message = error.get("message").and_then(Value::as_str).unwrap_or("").to_string();
			handler(Err(StreamingError::JsonRpc { code, message }));
		} else {
			handler(Ok(params.get("result").cloned().unwrap_or(Value::Null)));
		}
	}

	/// Aborts every pending request with a cancellation error.
	pub fn cancel(&mut self) {
		for (_, handler) in self.pending.drain() {
			handler(Err(StreamingError::Cancelled));
		}
	}
}

/// The client half of the HTTP command interface. Each request uses a
/// short-lived connection with no keep-alive.
#[derive(Debug, Clone)]
pub(crate) struct HttpCommandClient {
	host: IpAddr,
	port: u16,
	path: String,
	next_id: u64,
}

impl HttpCommandClient {
	const TIMEOUT: Duration = Duration::from_secs(30);

	pub fn new(host: IpAddr, port: u16, path: String) -> Self {
		Self {
			host,
			port,
			path,
			next_id: 0,
		}
	}

	/// Issues a request on a background thread; `handler` runs on that
	/// thread when the response (or a transport error) arrives.
	pub fn request(&mut self, method: &str, params: &Value, handler: ResponseHandler) {
		let id = self.next_id;
		self.next_id += 1;

		let body = build_request(id, method, params).to_string();
		let host = self.host;
		let port = self.port;
		let path = self.path.clone();

		std::thread::Builder::new()
			.name("ws-streaming-http-rpc".to_string())
			.spawn(move || {
				handler(Self::exchange(host, port, &path, &body));
			})
			.expect("failed to spawn HTTP command interface thread");
	}

	fn exchange(host: IpAddr, port: u16, path: &str, body: &str) -> Result<Value, StreamingError> {
		let mut stream = TcpStream::connect_timeout(&(host, port).into(), Self::TIMEOUT)?;
		stream.set_read_timeout(Some(Self::TIMEOUT))?;
		stream.set_write_timeout(Some(Self::TIMEOUT))?;

		let request = format!(
			"POST {path} HTTP/1.1\r\n\
			 Host: {host}\r\n\
			 Content-Type: application/json\r\n\
			 Content-Length: {}\r\n\
			 Connection: close\r\n\
			 \r\n\
			 {body}",
			body.len(),
		);
		stream.write_all(request.as_bytes())?;

		let mut response = Vec::new();
		stream.read_to_end(&mut response)?;

		let header_end = handshake::find_header_end(&response)
			.ok_or(StreamingError::Handshake(handshake::HandshakeError::Malformed))?;

		let response_json: Value = serde_json::from_slice(&response[header_end..])
			.map_err(|e| StreamingError::json_rpc(fault::PARSE_ERROR, e.to_string()))?;

		if let Some(error) = response_json.get("error") {
			let code = error.get("code").and_then(Value::as_i64).unwrap_or(fault::INTERNAL_ERROR);
			let message = error.get("message").and_then(Value::as_str).unwrap_or("").to_string();
			return Err(StreamingError::JsonRpc { code, message });
		}

		Ok(response_json.get("result").cloned().unwrap_or(Value::Null))
	}
}

/// A connection's command-interface client, selected from the interfaces the
/// peer advertised in `init`.
pub(crate) enum CommandInterfaceClient {
	InBand(InBandCommandClient),
	Http(HttpCommandClient),
}

impl CommandInterfaceClient {
	/// Selects a client for the advertised interfaces. The in-band
	/// interface is preferred; the HTTP interface requires a complete
	/// advertisement (`httpMethod`, `httpPath`, `port`).
	pub fn create(interfaces: &Value, remote_host: Option<IpAddr>) -> Option<Self> {
		let interfaces = interfaces.as_object()?;

		if interfaces.contains_key("jsonrpc") {
			return Some(Self::InBand(InBandCommandClient::new()));
		}

		let http = interfaces.get("jsonrpc-http")?.as_object()?;

		let method = http.get("httpMethod")?.as_str()?;
		if !method.eq_ignore_ascii_case("POST") {
			warn!(method, "unsupported command interface HTTP method");
			return None;
		}

		let path = http.get("httpPath")?.as_str()?.to_string();

		let port = match http.get("port")? {
			Value::Number(number) => number.as_u64().and_then(|port| u16::try_from(port).ok())?,
			Value::String(string) => string.parse::<u16>().ok()?,
			_ => return None,
		};

		let host = remote_host?;

		debug!(%host, port, %path, "using HTTP command interface");
		Some(Self::Http(HttpCommandClient::new(host, port, path)))
	}

	pub fn cancel(&mut self) {
		if let Self::InBand(client) = self {
			client.cancel();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	};

	use serde_json::json;

	use super::*;

	#[test]
	fn test_in_band_ids_are_monotonic() {
		let mut client = InBandCommandClient::new();

		let a = client.prepare("s.subscribe", &json!("/V"), Box::new(|_| {}));
		let b = client.prepare("s.subscribe", &json!("/T"), Box::new(|_| {}));

		assert_eq!(a.get("id").and_then(Value::as_u64), Some(0));
		assert_eq!(b.get("id").and_then(Value::as_u64), Some(1));
		assert_eq!(a.get("jsonrpc").and_then(Value::as_str), Some("2.0"));
	}

	#[test]
	fn test_response_correlation() {
		let mut client = InBandCommandClient::new();
		let seen = Arc::new(Mutex::new(Vec::new()));

		for _ in 0..2 {
			let seen = Arc::clone(&seen);
			client.prepare(
				"s.subscribe",
				&json!("/V"),
				Box::new(move |result| {
					seen.lock().unwrap().push(result);
				}),
			);
		}

		client.handle_response(&json!({ "jsonrpc": "2.0", "id": 1, "result": true }));
		assert_eq!(seen.lock().unwrap().as_slice(), &[Ok(Value::Bool(true))]);

		// Unknown and repeated ids are ignored.
		client.handle_response(&json!({ "jsonrpc": "2.0", "id": 1, "result": false }));
		client.handle_response(&json!({ "jsonrpc": "2.0", "id": 9, "result": false }));
		assert_eq!(seen.lock().unwrap().len(), 1);
	}

	#[test]
	fn test_error_response_maps_to_fault() {
		let mut client = InBandCommandClient::new();
		let seen = Arc::new(Mutex::new(None));

		let seen_clone = Arc::clone(&seen);
		client.prepare(
			"s.subscribe",
			&json!("/V"),
			Box::new(move |result| {
				*seen_clone.lock().unwrap() = Some(result);
			}),
		);

		client.handle_response(&json!({
			"jsonrpc": "2.0",
			"id": 0,
			"error": { "code": fault::METHOD_NOT_FOUND, "message": "method not found" },
		}));

		assert_eq!(
			seen.lock().unwrap().take(),
			Some(Err(StreamingError::JsonRpc {
				code: fault::METHOD_NOT_FOUND,
				message: "method not found".to_string(),
			}))
		);
	}

	#[test]
	fn test_cancel_drains_all_pending() {
		let mut client = InBandCommandClient::new();
		let cancelled = Arc::new(AtomicUsize::new(0));

		for _ in 0..3 {
			let cancelled = Arc::clone(&cancelled);
			client.prepare(
				"s.subscribe",
				&json!("/V"),
				Box::new(move |result| {
					assert_eq!(result, Err(StreamingError::Cancelled));
					cancelled.fetch_add(1, Ordering::SeqCst);
				}),
			);
		}

		client.cancel();
		assert_eq!(cancelled.load(Ordering::SeqCst), 3);

		// A second cancel has nothing left to deliver.
		client.cancel();
		assert_eq!(cancelled.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn test_client_selection_prefers_in_band() {
		let interfaces = json!({
			"jsonrpc": {},
			"jsonrpc-http": { "httpMethod": "POST", "httpPath": "/", "port": 7438 },
		});

		let client = CommandInterfaceClient::create(&interfaces, Some("127.0.0.1".parse().unwrap()));
		assert!(matches!(client, Some(CommandInterfaceClient::InBand(_))));
	}

	#[test]
	fn test_client_selection_http_fallback() {
		let interfaces = json!({
			"jsonrpc-http": { "httpMethod": "POST", "httpPath": "/rpc", "port": "7438" },
		});

		let client = CommandInterfaceClient::create(&interfaces, Some("127.0.0.1".parse().unwrap()));
		assert!(matches!(client, Some(CommandInterfaceClient::Http(_))));
	}

	#[test]
	fn test_client_selection_requires_complete_advertisement() {
		let incomplete = json!({ "jsonrpc-http": { "httpMethod": "POST" } });
		assert!(CommandInterfaceClient::create(&incomplete, Some("127.0.0.1".parse().unwrap())).is_none());
		assert!(CommandInterfaceClient::create(&json!({}), None).is_none());
		assert!(CommandInterfaceClient::create(&json!(null), None).is_none());
	}
}
