// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Endpoint configuration.

use std::time::Duration;

use ws_streaming_protocol::{DEFAULT_COMMAND_INTERFACE_PORT, DEFAULT_WEBSOCKET_PORT};

/// Configuration for streaming servers and clients.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
	/// Size of the per-connection receive buffer. The buffer does not
	/// grow, so this bounds the largest receivable frame; larger frames
	/// close the connection.
	pub rx_buffer_size: usize,

	/// Size of the per-connection transmit buffer. A full transmit buffer
	/// closes the connection.
	pub tx_buffer_size: usize,

	/// Address servers bind their listeners to.
	pub bind_addr: String,

	/// TCP port for WebSocket streaming. Port 0 binds an ephemeral port.
	pub streaming_port: u16,

	/// TCP port for the HTTP command interface, or `None` to disable the
	/// out-of-band interface.
	pub command_interface_port: Option<u16>,

	/// Whether connections advertise the in-band (`jsonrpc`) command
	/// interface. When disabled, peers fall back to the HTTP interface.
	pub in_band_command_interface: bool,

	/// Overall time limit for a client connect attempt.
	pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
	fn default() -> Self {
		Self {
			rx_buffer_size: 1024 * 1024,
			tx_buffer_size: 32 * 1024 * 1024,
			bind_addr: "0.0.0.0".to_string(),
			streaming_port: DEFAULT_WEBSOCKET_PORT,
			command_interface_port: Some(DEFAULT_COMMAND_INTERFACE_PORT),
			in_band_command_interface: true,
			connect_timeout: Duration::from_secs(30),
		}
	}
}

impl EndpointConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn rx_buffer_size(mut self, size: usize) -> Self {
		self.rx_buffer_size = size;
		self
	}

	pub fn tx_buffer_size(mut self, size: usize) -> Self {
		self.tx_buffer_size = size;
		self
	}

	pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
		self.bind_addr = addr.into();
		self
	}

	pub fn streaming_port(mut self, port: u16) -> Self {
		self.streaming_port = port;
		self
	}

	pub fn command_interface_port(mut self, port: Option<u16>) -> Self {
		self.command_interface_port = port;
		self
	}

	pub fn in_band_command_interface(mut self, enabled: bool) -> Self {
		self.in_band_command_interface = enabled;
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = EndpointConfig::default();
		assert_eq!(config.rx_buffer_size, 1024 * 1024);
		assert_eq!(config.tx_buffer_size, 32 * 1024 * 1024);
		assert_eq!(config.streaming_port, 7414);
		assert_eq!(config.command_interface_port, Some(7438));
		assert!(config.in_band_command_interface);
	}

	#[test]
	fn test_builder() {
		let config = EndpointConfig::new()
			.rx_buffer_size(4096)
			.tx_buffer_size(8192)
			.streaming_port(0)
			.command_interface_port(None)
			.in_band_command_interface(false)
			.connect_timeout(Duration::from_secs(5));

		assert_eq!(config.rx_buffer_size, 4096);
		assert_eq!(config.tx_buffer_size, 8192);
		assert_eq!(config.streaming_port, 0);
		assert_eq!(config.command_interface_port, None);
		assert!(!config.in_band_command_interface);
		assert_eq!(config.connect_timeout, Duration::from_secs(5));
	}
}
