// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The server orchestrator.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;
use ws_streaming_core::{Event, LocalSignal, RemoteSignal, StreamingError};

use crate::{
	config::EndpointConfig,
	connection::ConnectionHandle,
	reactor::{Command, CommandSender, Reactor, ServerContext, ServerEvents},
};

/// A streaming server.
///
/// Listens for WebSocket streaming connections and, optionally, HTTP
/// command-interface connections. Local signals added here are registered
/// with every current and future connection; availability and lifecycle
/// events are aggregated across all connections.
pub struct Server {
	commands: CommandSender,
	thread: Option<JoinHandle<()>>,
	events: Arc<ServerEvents>,
	streaming_port: u16,
	command_interface_port: Option<u16>,
}

impl Server {
	/// Binds the configured listeners and starts the server's reactor
	/// thread. Use port 0 in the configuration to bind ephemeral ports and
	/// read them back from [`streaming_port`](Self::streaming_port) and
	/// [`command_interface_port`](Self::command_interface_port).
	pub fn start(config: EndpointConfig) -> Result<Self, StreamingError> {
		let streaming = bind_listener(&config.bind_addr, config.streaming_port)?;
		let streaming_port = streaming.local_addr()?.port();

		let mut listeners = vec![streaming];

		let command_interface_port = match config.command_interface_port {
			Some(port) => {
				let listener = bind_listener(&config.bind_addr, port)?;
				let port = listener.local_addr()?.port();
				listeners.push(listener);
				Some(port)
			}
			None => None,
		};

		let mut advertise = json!({});
		if config.in_band_command_interface {
			advertise["jsonrpc"] = json!({});
		}
		if let Some(port) = command_interface_port {
			advertise["jsonrpc-http"] = json!({
				"httpMethod": "POST",
				"httpPath": "/",
				"httpVersion": "1.1",
				"port": port,
			});
		}

		let events = Arc::new(ServerEvents::new());

		let context = ServerContext {
			signals: Vec::new(),
			events: Arc::clone(&events),
			advertise,
		};

		let (reactor, commands) = Reactor::new(config, listeners, Some(context))?;

		let thread = std::thread::Builder::new()
			.name("ws-streaming-server".to_string())
			.spawn(move || reactor.run())
			.map_err(StreamingError::from)?;

		info!(streaming_port, ?command_interface_port, "streaming server started");

		Ok(Self {
			commands,
			thread: Some(thread),
			events,
			streaming_port,
			command_interface_port,
		})
	}

	/// The bound WebSocket streaming port.
	pub fn streaming_port(&self) -> u16 {
		self.streaming_port
	}

	/// The bound HTTP command-interface port, if enabled.
	pub fn command_interface_port(&self) -> Option<u16> {
		self.command_interface_port
	}

	/// Registers a local signal with every current and future connection.
	pub fn add_signal(&self, signal: &Arc<LocalSignal>) {
		self.commands.send(Command::AddLocalSignal {
			target: None,
			signal: Arc::clone(signal),
		});
	}

	/// Removes a local signal from the server and all its connections.
	pub fn remove_signal(&self, signal_id: &str) {
		self.commands.send(Command::RemoveLocalSignal {
			target: None,
			signal_id: signal_id.to_string(),
		});
	}

	/// Raised when a streaming connection is established.
	pub fn on_client_connected(&self) -> &Event<ConnectionHandle> {
		&self.events.on_client_connected
	}

	/// Raised when a streaming connection closes.
	pub fn on_client_disconnected(&self) -> &Event<(ConnectionHandle, Option<StreamingError>)> {
		&self.events.on_client_disconnected
	}

	/// Raised when any connection's peer advertises a signal.
	pub fn on_available(&self) -> &Event<(ConnectionHandle, Arc<RemoteSignal>)> {
		&self.events.on_available
	}

	/// Raised when any connection's peer retracts a signal, and for every
	/// known signal of a closing connection.
	pub fn on_unavailable(&self) -> &Event<(ConnectionHandle, Arc<RemoteSignal>)> {
		&self.events.on_unavailable
	}

	/// Stops listening, then closes every connection (each emitting its
	/// terminal events).
	pub fn close(&mut self) {
		if let Some(thread) = self.thread.take() {
			self.commands.send(Command::Shutdown);
			let _ = thread.join();
		}
	}
}

impl Drop for Server {
	fn drop(&mut self) {
		self.close();
	}
}

fn bind_listener(bind_addr: &str, port: u16) -> Result<mio::net::TcpListener, StreamingError> {
	let ip: IpAddr = bind_addr.parse().map_err(|_| {
		StreamingError::Io {
			kind: std::io::ErrorKind::InvalidInput,
			message: format!("invalid bind address '{bind_addr}'"),
		}
	})?;

	let addr = SocketAddr::new(ip, port);

	let domain = match addr {
		SocketAddr::V4(_) => Domain::IPV4,
		SocketAddr::V6(_) => Domain::IPV6,
	};

	let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
	socket.set_reuse_address(true)?;
	socket.set_nonblocking(true)?;
	socket.bind(&addr.into())?;
	socket.listen(1024)?;

	Ok(mio::net::TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ephemeral_ports_are_reported() {
		let config = EndpointConfig::new()
			.bind_addr("127.0.0.1")
			.streaming_port(0)
			.command_interface_port(Some(0))
			.rx_buffer_size(64 * 1024)
			.tx_buffer_size(64 * 1024);

		let mut server = Server::start(config).unwrap();
		assert_ne!(server.streaming_port(), 0);
		assert_ne!(server.command_interface_port(), Some(0));
		server.close();
	}

	#[test]
	fn test_invalid_bind_address_is_rejected() {
		let config = EndpointConfig::new().bind_addr("not-an-address");
		assert!(Server::start(config).is_err());
	}
}
