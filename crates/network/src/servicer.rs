// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Per-socket HTTP servicing.
//!
//! Every accepted TCP connection starts life as an HTTP servicer. The
//! servicer reads one HTTP/1.1 request at a time and branches: WebSocket
//! upgrades hand the socket off to a streaming connection (together with any
//! over-read bytes), POSTs carry command-interface requests, OPTIONS answers
//! CORS preflight, and anything else is a 400.

use std::io::{self, Read, Write};

use mio::net::TcpStream;
use serde_json::Value;
use tracing::trace;
use ws_streaming_core::StreamingError;
use ws_streaming_protocol::handshake;

use crate::command::fault;

/// The largest request (headers plus body) a servicer accepts.
const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// What the reactor should do with this servicer next.
#[derive(Debug)]
pub(crate) enum ServicerAction {
	/// Nothing to hand off; keep the servicer registered.
	Continue,
	/// A WebSocket upgrade completed. Take the stream with
	/// [`HttpServicer::into_stream`] and start a streaming connection,
	/// feeding it the over-read bytes.
	Upgrade { early_data: Vec<u8> },
	/// A valid JSON-RPC request object arrived by POST. Dispatch it, then
	/// answer with [`HttpServicer::complete_command`].
	CommandRequest { request: Value },
	/// The servicer is done; drop it.
	Close,
}

#[derive(Debug)]
enum AfterResponse {
	KeepAlive,
	Close,
	Upgrade { early_data: Vec<u8> },
}

pub(crate) struct HttpServicer {
	stream: TcpStream,
	rx: Vec<u8>,
	tx: Vec<u8>,
	after_response: Option<AfterResponse>,
	dispatch_keep_alive: bool,
	saw_eof: bool,
}

impl HttpServicer {
	pub fn new(stream: TcpStream) -> Self {
		let _ = stream.set_nodelay(true);

		Self {
			stream,
			rx: Vec::new(),
			tx: Vec::new(),
			after_response: None,
			dispatch_keep_alive: false,
			saw_eof: false,
		}
	}

	pub fn wants_write(&self) -> bool {
		!self.tx.is_empty()
	}

	/// Releases the underlying stream for a streaming connection.
	pub fn into_stream(self) -> TcpStream {
		self.stream
	}

	pub fn stream_mut(&mut self) -> &mut TcpStream {
		&mut self.stream
	}

	pub fn on_readable(&mut self) -> Result<ServicerAction, StreamingError> {
		self.fill_rx()?;
		self.flush_tx()?;
		self.advance()
	}

	pub fn on_writable(&mut self) -> Result<ServicerAction, StreamingError> {
		self.flush_tx()?;
		self.advance()
	}

	/// Answers a previously surfaced command request.
	pub fn complete_command(&mut self, status: u16, body: &Value) {
		let keep_alive = self.dispatch_keep_alive;
		self.queue_json_response(status, body, keep_alive);
	}

	fn fill_rx(&mut self) -> Result<(), StreamingError> {
		let mut buf = [0u8; 2048];

		loop {
			match self.stream.read(&mut buf) {
				Ok(0) => {
					self.saw_eof = true;
					break;
				}
				Ok(n) => {
					self.rx.extend_from_slice(&buf[..n]);
					if self.rx.len() > MAX_REQUEST_SIZE {
						return Err(StreamingError::NoBufferSpace);
					}
				}
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}

		Ok(())
	}

	fn flush_tx(&mut self) -> Result<(), StreamingError> {
		while !self.tx.is_empty() {
			match self.stream.write(&self.tx) {
				Ok(0) => return Err(StreamingError::ConnectionClosed),
				Ok(n) => {
					self.tx.drain(..n);
				}
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}

		Ok(())
	}

	fn advance(&mut self) -> Result<ServicerAction, StreamingError> {
		// A queued response must fully drain before anything else happens.
		if !self.tx.is_empty() {
			return Ok(ServicerAction::Continue);
		}

		if let Some(after) = self.after_response.take() {
			match after {
				AfterResponse::KeepAlive => {}
				AfterResponse::Close => return Ok(ServicerAction::Close),
				AfterResponse::Upgrade { early_data } => {
					return Ok(ServicerAction::Upgrade { early_data });
				}
			}
		}

		match self.try_parse_request()? {
			Some(action) => Ok(action),
			None if self.saw_eof => Ok(ServicerAction::Close),
			None => Ok(ServicerAction::Continue),
		}
	}

	fn try_parse_request(&mut self) -> Result<Option<ServicerAction>, StreamingError> {
		let Some(header_end) = handshake::find_header_end(&self.rx) else {
			return Ok(None);
		};

		// Extract everything as owned values so the parse borrows end
		// before the response is queued.
		let (method, parsed, keep_alive, content_length, is_upgrade, websocket_key) = {
			let mut headers = [httparse::EMPTY_HEADER; 32];
			let mut request = httparse::Request::new(&mut headers);

			let parsed = match request.parse(&self.rx[..header_end]) {
				Ok(httparse::Status::Complete(parsed)) => parsed,
				Ok(httparse::Status::Partial) => return Ok(None),
				Err(_) => {
					return Err(StreamingError::Handshake(handshake::HandshakeError::Malformed));
				}
			};

			let header = |name: &str| -> Option<String> {
				request.headers
					.iter()
					.find(|header| header.name.eq_ignore_ascii_case(name))
					.and_then(|header| std::str::from_utf8(header.value).ok())
					.map(|value| value.trim().to_string())
			};

			let keep_alive = match header("connection") {
				Some(value) => !value.eq_ignore_ascii_case("close"),
				None => request.version == Some(1),
			};

			let content_length =
				header("content-length").and_then(|value| value.parse::<usize>().ok()).unwrap_or(0);

			let is_upgrade =
				header("upgrade").is_some_and(|value| value.eq_ignore_ascii_case("websocket"));

			(
				request.method.unwrap_or("").to_string(),
				parsed,
				keep_alive,
				content_length,
				is_upgrade,
				header("sec-websocket-key"),
			)
		};

		if self.rx.len() < parsed + content_length {
			// Body still in flight.
			return Ok(None);
		}

		if is_upgrade {
			let Some(key) = websocket_key else {
				self.queue_plain_response(400, "Bad Request", keep_alive);
				self.rx.drain(..parsed + content_length);
				return Ok(Some(ServicerAction::Continue));
			};

			trace!("upgrading connection to WebSocket streaming");

			let accept = handshake::accept_key(&key);
			self.tx.extend_from_slice(handshake::build_upgrade_response(&accept).as_bytes());

			// Bytes past the request belong to the streaming stream.
			let early_data = self.rx.split_off(parsed + content_length);
			self.rx.clear();
			self.after_response = Some(AfterResponse::Upgrade { early_data });

			self.flush_tx()?;
			return self.advance().map(Some);
		}

		let body = self.rx[parsed..parsed + content_length].to_vec();
		self.rx.drain(..parsed + content_length);

		match method.as_str() {
			"POST" => {
				let request_json: Value = match serde_json::from_slice(&body) {
					Ok(value) => value,
					Err(e) => {
						let fault = serde_json::json!({
							"code": fault::PARSE_ERROR,
							"message": e.to_string(),
						});
						self.queue_json_response(400, &fault, keep_alive);
						return Ok(Some(ServicerAction::Continue));
					}
				};

				let is_request_object = request_json
					.as_object()
					.and_then(|object| object.get("method"))
					.is_some_and(Value::is_string);

				if !is_request_object {
					let fault = serde_json::json!({
						"code": fault::INVALID_REQUEST,
						"message": "request object is invalid",
					});
					self.queue_json_response(400, &fault, keep_alive);
					return Ok(Some(ServicerAction::Continue));
				}

				self.dispatch_keep_alive = keep_alive;
				Ok(Some(ServicerAction::CommandRequest { request: request_json }))
			}

			"OPTIONS" => {
				self.queue_cors_response(keep_alive);
				Ok(Some(ServicerAction::Continue))
			}

			_ => {
				self.queue_plain_response(400, "Bad Request", keep_alive);
				Ok(Some(ServicerAction::Continue))
			}
		}
	}

	fn queue_json_response(&mut self, status: u16, body: &Value, keep_alive: bool) {
		let reason = match status {
			200 => "OK",
			400 => "Bad Request",
			500 => "Internal Server Error",
			_ => "OK",
		};

		let body = body.to_string();
		let connection = if keep_alive {
			"keep-alive"
		} else {
			"close"
		};

		let response = format!(
			"HTTP/1.1 {status} {reason}\r\n\
			 Content-Type: application/json\r\n\
			 Content-Length: {}\r\n\
			 Connection: {connection}\r\n\
			 \r\n\
			 {body}",
			body.len(),
		);

		self.tx.extend_from_slice(response.as_bytes());
		self.after_response = Some(if keep_alive {
			AfterResponse::KeepAlive
		} else {
			AfterResponse::Close
		});
	}

	fn queue_cors_response(&mut self, keep_alive: bool) {
		let connection = if keep_alive {
			"keep-alive"
		} else {
			"close"
		};

		let response = format!(
			"HTTP/1.1 204 No Content\r\n\
			 Access-Control-Allow-Origin: *\r\n\
			 Access-Control-Allow-Methods: POST, OPTIONS\r\n\
			 Access-Control-Allow-Headers: Content-Type\r\n\
			 Connection: {connection}\r\n\
			 \r\n"
		);

		self.tx.extend_from_slice(response.as_bytes());
		self.after_response = Some(if keep_alive {
			AfterResponse::KeepAlive
		} else {
			AfterResponse::Close
		});
	}

	fn queue_plain_response(&mut self, status: u16, reason: &str, keep_alive: bool) {
		let connection = if keep_alive {
			"keep-alive"
		} else {
			"close"
		};

		let response = format!(
			"HTTP/1.1 {status} {reason}\r\n\
			 Content-Length: 0\r\n\
			 Connection: {connection}\r\n\
			 \r\n"
		);

		self.tx.extend_from_slice(response.as_bytes());
		self.after_response = Some(if keep_alive {
			AfterResponse::KeepAlive
		} else {
			AfterResponse::Close
		});
	}
}

impl std::fmt::Debug for HttpServicer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpServicer")
			.field("rx_len", &self.rx.len())
			.field("tx_len", &self.tx.len())
			.finish_non_exhaustive()
	}
}
