// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The transport layer of one streaming connection.
//!
//! A peer owns one non-blocking socket and two fixed-size user-space
//! buffers. Received bytes are decoded into WebSocket frames and then into
//! streaming packets; outbound packets are written through synchronously
//! when the socket accepts them and buffered otherwise. A full buffer in
//! either direction is a protocol-level backpressure failure and closes the
//! connection with [`StreamingError::NoBufferSpace`].

use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use serde_json::Value;
use tracing::trace;
use ws_streaming_core::StreamingError;
use ws_streaming_protocol::{frame, metadata_codec, packet};

/// A message decoded from the receive stream.
#[derive(Debug)]
pub(crate) enum PeerMessage {
	Data { signo: u32, payload: Vec<u8> },
	Metadata { signo: u32, method: String, params: Value },
}

/// The outcome of a receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
	/// The socket is drained for now; wait for the next readable event.
	Open,
	/// The remote closed its sending side.
	Eof,
}

pub(crate) struct Peer {
	stream: TcpStream,
	peer_addr: Option<SocketAddr>,
	is_client: bool,

	rx: Vec<u8>,
	rx_len: usize,

	tx: Vec<u8>,
	tx_len: usize,

	/// Bytes left to drain before closing, once a CLOSE has been queued.
	shutdown_after: Option<usize>,
	closed: bool,
}

impl Peer {
	/// Takes ownership of a connected, non-blocking socket. As much as
	/// possible of the transmit backlog is pushed into the operating
	/// system's send buffer, since that minimizes user-space buffering.
	pub fn new(stream: TcpStream, is_client: bool, rx_buffer_size: usize, tx_buffer_size: usize) -> Self {
		let send_buffer = tx_buffer_size.min(i32::MAX as usize);
		let _ = socket2::SockRef::from(&stream).set_send_buffer_size(send_buffer);
		let _ = stream.set_nodelay(true);

		let peer_addr = stream.peer_addr().ok();

		Self {
			stream,
			peer_addr,
			is_client,
			rx: vec![0; rx_buffer_size],
			rx_len: 0,
			tx: vec![0; tx_buffer_size],
			tx_len: 0,
			shutdown_after: None,
			closed: false,
		}
	}

	pub fn stream(&mut self) -> &mut TcpStream {
		&mut self.stream
	}

	/// The remote endpoint, captured at construction.
	pub fn peer_addr(&self) -> Option<SocketAddr> {
		self.peer_addr
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// True while buffered transmit data awaits a writable socket.
	pub fn wants_write(&self) -> bool {
		!self.closed && self.tx_len > 0
	}

	/// Treats `data` as though it had been received from the socket. Used
	/// when the HTTP handshake over-read into the streaming stream.
	pub fn accept_early_data(&mut self, data: &[u8], out: &mut Vec<PeerMessage>) -> Result<(), StreamingError> {
		if data.len() > self.rx.len() {
			return Err(StreamingError::NoBufferSpace);
		}

		self.rx[..data.len()].copy_from_slice(data);
		self.rx_len = data.len();
		self.process_buffer(out)
	}

	/// Reads everything the socket has, decoding complete frames into
	/// `out`.
	pub fn on_readable(&mut self, out: &mut Vec<PeerMessage>) -> Result<ReadOutcome, StreamingError> {
		if self.closed {
			return Ok(ReadOutcome::Open);
		}

		loop {
			let mut saw_would_block = false;
			let mut saw_eof = false;

			while self.rx_len < self.rx.len() {
				match self.stream.read(&mut self.rx[self.rx_len..]) {
					Ok(0) => {
						saw_eof = true;
						break;
					}
					Ok(n) => self.rx_len += n,
					Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
						saw_would_block = true;
						break;
					}
					Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
					Err(e) => return Err(e.into()),
				}
			}

			self.process_buffer(out)?;

			// A full buffer with no consumable frame means the peer sent
			// a frame larger than we can hold.
			if self.rx_len == self.rx.len() {
				return Err(StreamingError::NoBufferSpace);
			}

			if saw_eof {
				return Ok(ReadOutcome::Eof);
			}

			if saw_would_block || self.closed {
				return Ok(ReadOutcome::Open);
			}
		}
	}

	/// Flushes buffered transmit data after a writable event.
	pub fn on_writable(&mut self) -> Result<(), StreamingError> {
		if self.closed || self.tx_len == 0 {
			return Ok(());
		}

		match self.stream.write(&self.tx[..self.tx_len]) {
			Ok(sent) => {
				self.tx.copy_within(sent..self.tx_len, 0);
				self.tx_len -= sent;

				if let Some(remaining) = self.shutdown_after {
					let remaining = remaining.saturating_sub(sent);
					if remaining == 0 {
						self.close_now();
					} else {
						self.shutdown_after = Some(remaining);
					}
				}

				Ok(())
			}
			Err(ref e)
				if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
			{
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Sends signal data on the given signo. `parts` are concatenated on
	/// the wire without intermediate copies on the unmasked path.
	pub fn send_data(&mut self, signo: u32, parts: &[&[u8]]) -> Result<(), StreamingError> {
		self.send_packet(signo, packet::packet_type::DATA, parts)
	}

	/// Sends a metadata message on the given signo.
	pub fn send_metadata(&mut self, signo: u32, method: &str, params: &Value) -> Result<(), StreamingError> {
		let payload = metadata_codec::encode(method, params);
		self.send_packet(signo, packet::packet_type::METADATA, &[&payload])
	}

	/// Initiates a graceful close: queues a CLOSE frame and closes the
	/// socket once everything queued so far has drained.
	pub fn begin_close(&mut self) -> Result<(), StreamingError> {
		self.send_frame(frame::opcode::CLOSE, &[], true)
	}

	/// Closes the socket immediately, discarding any buffered data.
	pub fn close_now(&mut self) {
		if !self.closed {
			self.closed = true;
			let _ = self.stream.shutdown(Shutdown::Both);
		}
	}

	fn send_packet(&mut self, signo: u32, packet_type: u8, parts: &[&[u8]]) -> Result<(), StreamingError> {
		let payload_size: usize = parts.iter().map(|part| part.len()).sum();

		let mut header = [0u8; packet::MAX_HEADER_SIZE];
		let header_size = packet::encode_header(&mut header, signo, packet_type, payload_size);

		let mut frame_parts: Vec<&[u8]> = Vec::with_capacity(parts.len() + 1);
		frame_parts.push(&header[..header_size]);
		frame_parts.extend_from_slice(parts);

		self.send_frame(frame::opcode::BINARY, &frame_parts, false)
	}

	fn send_frame(&mut self, opcode: u8, parts: &[&[u8]], shutdown_after: bool) -> Result<(), StreamingError> {
		if self.closed {
			return Ok(());
		}

		let payload_size: usize = parts.iter().map(|part| part.len()).sum();
		let mut header = [0u8; frame::MAX_HEADER_SIZE];

		if self.is_client {
			// Masking requires a contiguous payload copy.
			let key = frame::random_masking_key();
			let header_size = frame::encode_header(&mut header, opcode, frame::FLAG_FIN, payload_size, Some(key));

			let mut masked = Vec::with_capacity(payload_size);
			for part in parts {
				masked.extend_from_slice(part);
			}
			frame::apply_mask(&mut masked, key);

			self.write_parts(&[&header[..header_size], &masked], shutdown_after)
		} else {
			let header_size = frame::encode_header(&mut header, opcode, frame::FLAG_FIN, payload_size, None);

			let mut all: Vec<&[u8]> = Vec::with_capacity(parts.len() + 1);
			all.push(&header[..header_size]);
			all.extend_from_slice(parts);

			self.write_parts(&all, shutdown_after)
		}
	}

	fn write_parts(&mut self, parts: &[&[u8]], shutdown_after: bool) -> Result<(), StreamingError> {
		let total: usize = parts.iter().map(|part| part.len()).sum();

		// Data already queued keeps ordering: append behind it and let the
		// writable handler drain both.
		if self.tx_len > 0 {
			return self.enqueue(parts, 0, shutdown_after);
		}

		let slices: Vec<IoSlice<'_>> = parts.iter().map(|part| IoSlice::new(part)).collect();

		let sent = match self.stream.write_vectored(&slices) {
			Ok(sent) => sent,
			Err(ref e)
				if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
			{
				0
			}
			Err(e) => return Err(e.into()),
		};

		if sent == total {
			if shutdown_after {
				self.close_now();
			}
			return Ok(());
		}

		self.enqueue(parts, sent, shutdown_after)
	}

	fn enqueue(&mut self, parts: &[&[u8]], skip: usize, shutdown_after: bool) -> Result<(), StreamingError> {
		let total: usize = parts.iter().map(|part| part.len()).sum::<usize>() - skip;

		if self.tx_len + total > self.tx.len() {
			return Err(StreamingError::NoBufferSpace);
		}

		let mut skip = skip;
		for part in parts {
			if skip >= part.len() {
				skip -= part.len();
				continue;
			}

			let chunk = &part[skip..];
			skip = 0;

			self.tx[self.tx_len..self.tx_len + chunk.len()].copy_from_slice(chunk);
			self.tx_len += chunk.len();
		}

		if shutdown_after {
			self.shutdown_after = Some(self.tx_len);
		}

		Ok(())
	}

	fn process_buffer(&mut self, out: &mut Vec<PeerMessage>) -> Result<(), StreamingError> {
		loop {
			let Some(header) = frame::decode_header(&self.rx[..self.rx_len]) else {
				break;
			};

			if header.flags & frame::FLAG_FIN == 0 {
				return Err(StreamingError::UnexpectedFragment);
			}

			let start = header.header_size;
			let end = start + header.payload_size;

			if header.is_masked {
				frame::apply_mask(&mut self.rx[start..end], header.masking_key);
			}

			match header.opcode {
				frame::opcode::CLOSE => {
					trace!("received CLOSE frame, echoing and draining");
					self.send_frame(frame::opcode::CLOSE, &[], true)?;
				}

				frame::opcode::PING => {
					let payload = self.rx[start..end].to_vec();
					self.send_frame(frame::opcode::PONG, &[&payload], false)?;
				}

				frame::opcode::TEXT => {}

				frame::opcode::BINARY => {
					if let Some(packet_header) = packet::decode_header(&self.rx[start..end]) {
						let payload_start = start + packet_header.header_size;
						let payload = &self.rx[payload_start..payload_start + packet_header.payload_size];

						match packet_header.packet_type {
							packet::packet_type::DATA => out.push(PeerMessage::Data {
								signo: packet_header.signo,
								payload: payload.to_vec(),
							}),
							packet::packet_type::METADATA => {
								if let Some((method, params)) = metadata_codec::decode(payload) {
									out.push(PeerMessage::Metadata {
										signo: packet_header.signo,
										method,
										params,
									});
								}
							}
							_ => {}
						}
					}
				}

				_ => {}
			}

			self.rx.copy_within(end..self.rx_len, 0);
			self.rx_len -= end;
		}

		Ok(())
	}
}

impl std::fmt::Debug for Peer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Peer")
			.field("peer_addr", &self.peer_addr)
			.field("is_client", &self.is_client)
			.field("rx_len", &self.rx_len)
			.field("tx_len", &self.tx_len)
			.field("closed", &self.closed)
			.finish()
	}
}
