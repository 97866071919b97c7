// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The reactor: one thread, one `mio::Poll`, one slab of endpoints.
//!
//! Every listener, HTTP servicer, and streaming connection of an endpoint
//! lives in the reactor's slab and is driven only from the reactor thread.
//! Work from other threads (data publishes, observer subscribe requests,
//! handle operations) is queued as [`Command`]s and a waker interrupts the
//! poll. This keeps the protocol state machines free of locks and gives
//! every connection strictly sequential execution.

use std::io;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::{net::TcpListener, Events, Interest, Poll, Token, Waker};
use serde_json::Value;
use slab::Slab;
use tracing::{debug, trace, warn};
use ws_streaming_core::{DataBlock, Event, LocalSignal, Metadata, RemoteSignal, StreamingError};

use crate::{
	command::fault,
	config::EndpointConfig,
	connection::{Connection, ConnectionHandle},
	peer::ReadOutcome,
	servicer::{HttpServicer, ServicerAction},
};

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Identifies a connection across the command queue. The slab token alone
/// is not enough: tokens are reused, so each connection also carries a
/// generation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnKey {
	pub token: usize,
	pub id: u64,
}

/// Cross-thread work for the reactor.
pub(crate) enum Command {
	/// Register a local signal: with one connection, or (server-level)
	/// with every current and future connection.
	AddLocalSignal {
		target: Option<ConnKey>,
		signal: Arc<LocalSignal>,
	},
	RemoveLocalSignal {
		target: Option<ConnKey>,
		signal_id: String,
	},
	/// Application data published to a subscribed local signal.
	PublishData {
		key: ConnKey,
		signo: u32,
		block: DataBlock,
	},
	/// Application metadata update on a subscribed local signal.
	MetadataChanged {
		key: ConnKey,
		signo: u32,
		metadata: Metadata,
	},
	/// An observer wants a remote signal's data.
	RequestSubscribe {
		key: ConnKey,
		signal_id: String,
	},
	RequestUnsubscribe {
		key: ConnKey,
		signal_id: String,
	},
	CloseConnection {
		key: ConnKey,
	},
	/// A client-established socket ready to become a streaming connection.
	Adopt {
		stream: std::net::TcpStream,
		early_data: Vec<u8>,
		reply: Box<dyn FnOnce(Result<ConnectionHandle, StreamingError>) + Send>,
	},
	Shutdown,
}

/// A handle for enqueueing reactor commands from any thread.
#[derive(Clone)]
pub(crate) struct CommandSender {
	tx: Sender<Command>,
	waker: Arc<Waker>,
}

impl CommandSender {
	pub fn send(&self, command: Command) {
		// A send after shutdown has nowhere to go; dropping it is fine.
		let _ = self.tx.send(command);
		let _ = self.waker.wake();
	}
}

/// Aggregated events of a server endpoint.
pub struct ServerEvents {
	pub(crate) on_client_connected: Event<ConnectionHandle>,
	pub(crate) on_client_disconnected: Event<(ConnectionHandle, Option<StreamingError>)>,
	pub(crate) on_available: Event<(ConnectionHandle, Arc<RemoteSignal>)>,
	pub(crate) on_unavailable: Event<(ConnectionHandle, Arc<RemoteSignal>)>,
}

impl ServerEvents {
	pub(crate) fn new() -> Self {
		Self {
			on_client_connected: Event::new(),
			on_client_disconnected: Event::new(),
			on_available: Event::new(),
			on_unavailable: Event::new(),
		}
	}
}

/// Server-side reactor state: the signal set applied to every connection.
pub(crate) struct ServerContext {
	pub signals: Vec<Arc<LocalSignal>>,
	pub events: Arc<ServerEvents>,
	pub advertise: Value,
}

enum Endpoint {
	Listener(TcpListener),
	Servicer(HttpServicer),
	Connection {
		connection: Connection,
		_aggregation: Vec<ws_streaming_core::Slot>,
	},
}

pub(crate) struct Reactor {
	poll: Poll,
	slab: Slab<Endpoint>,
	receiver: Receiver<Command>,
	sender: CommandSender,
	config: EndpointConfig,
	server: Option<ServerContext>,
	next_connection_id: u64,
	shutting_down: bool,
}

impl Reactor {
	/// Builds a reactor, registering the given pre-bound listeners.
	pub fn new(
		config: EndpointConfig,
		listeners: Vec<TcpListener>,
		server: Option<ServerContext>,
	) -> io::Result<(Self, CommandSender)> {
		let poll = Poll::new()?;
		let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
		let (tx, receiver) = unbounded();

		let sender = CommandSender { tx, waker };

		let mut reactor = Self {
			poll,
			slab: Slab::new(),
			receiver,
			sender: sender.clone(),
			config,
			server,
			next_connection_id: 0,
			shutting_down: false,
		};

		for mut listener in listeners {
			let entry = reactor.slab.vacant_entry();
			let token = Token(entry.key());
			reactor.poll.registry().register(&mut listener, token, Interest::READABLE)?;
			entry.insert(Endpoint::Listener(listener));
		}

		Ok((reactor, sender))
	}

	pub fn run(mut self) {
		let mut events = Events::with_capacity(256);

		loop {
			if let Err(e) = self.poll.poll(&mut events, None) {
				if e.kind() == io::ErrorKind::Interrupted {
					continue;
				}
				warn!(error = %e, "reactor poll failed");
				break;
			}

			for event in events.iter() {
				let token = event.token();
				if token == WAKE_TOKEN {
					continue;
				}
				self.handle_event(token.0, event.is_readable(), event.is_writable());
			}

			self.drain_commands();

			if self.shutting_down {
				self.shutdown();
				break;
			}
		}
	}

	fn handle_event(&mut self, index: usize, readable: bool, writable: bool) {
		enum Kind {
			Listener,
			Servicer,
			Connection,
		}

		let kind = match self.slab.get(index) {
			Some(Endpoint::Listener(_)) => Kind::Listener,
			Some(Endpoint::Servicer(_)) => Kind::Servicer,
			Some(Endpoint::Connection { .. }) => Kind::Connection,
			None => return,
		};

		match kind {
			Kind::Listener => self.accept(index),
			Kind::Servicer => self.drive_servicer(index, readable, writable),
			Kind::Connection => self.drive_connection(index, readable, writable),
		}
	}

	fn accept(&mut self, index: usize) {
		loop {
			let accepted = match &mut self.slab[index] {
				Endpoint::Listener(listener) => listener.accept(),
				_ => return,
			};

			match accepted {
				Ok((mut stream, addr)) => {
					trace!(%addr, "accepted connection");

					let entry = self.slab.vacant_entry();
					let token = Token(entry.key());

					if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE)
					{
						warn!(error = %e, "failed to register accepted socket");
						continue;
					}

					entry.insert(Endpoint::Servicer(HttpServicer::new(stream)));
				}
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!(error = %e, "listener accept failed");
					break;
				}
			}
		}
	}

	fn drive_servicer(&mut self, index: usize, readable: bool, mut writable: bool) {
		loop {
			let action = {
				let Endpoint::Servicer(servicer) = &mut self.slab[index] else {
					return;
				};

				if readable {
					servicer.on_readable()
				} else if writable {
					servicer.on_writable()
				} else {
					return;
				}
			};

			match action {
				Ok(ServicerAction::Continue) => {
					self.update_interest(index);
					return;
				}
				Ok(ServicerAction::Close) => {
					self.slab.remove(index);
					return;
				}
				Ok(ServicerAction::Upgrade { early_data }) => {
					self.upgrade_servicer(index, early_data);
					return;
				}
				Ok(ServicerAction::CommandRequest { request }) => {
					self.dispatch_http_command(index, &request);
					// Flush the queued response before reading on.
					writable = true;
					continue;
				}
				Err(e) => {
					debug!(error = %e, "servicer failed");
					self.slab.remove(index);
					return;
				}
			}
		}
	}

	/// Converts an upgraded servicer into a streaming connection on the
	/// same socket, feeding any over-read bytes into the new connection.
	fn upgrade_servicer(&mut self, index: usize, early_data: Vec<u8>) {
		let Endpoint::Servicer(servicer) = self.slab.remove(index) else {
			return;
		};

		let stream = servicer.into_stream();
		let events = self.server.as_ref().map(|server| Arc::clone(&server.events));

		self.install_connection(stream, false, &early_data, |handle| {
			if let Some(events) = events {
				events.on_client_connected.emit(&handle);
			}
		});
	}

	/// Registers a socket as a streaming connection and activates it.
	///
	/// `on_installed` runs with the new handle after the connection is
	/// fully observable but before any early data is processed, so a
	/// caller-side observer connected from the callback cannot miss the
	/// peer's first messages.
	fn install_connection(
		&mut self,
		mut stream: mio::net::TcpStream,
		is_client: bool,
		early_data: &[u8],
		on_installed: impl FnOnce(ConnectionHandle),
	) -> Option<usize> {
		let entry = self.slab.vacant_entry();
		let token = Token(entry.key());

		let key = ConnKey {
			token: entry.key(),
			id: self.next_connection_id,
		};
		self.next_connection_id += 1;

		if let Err(e) = self
			.poll
			.registry()
			.reregister(&mut stream, token, Interest::READABLE)
			.or_else(|_| self.poll.registry().register(&mut stream, token, Interest::READABLE))
		{
			warn!(error = %e, "failed to register streaming socket");
			return None;
		}

		let advertise = match &self.server {
			Some(server) => server.advertise.clone(),
			None => serde_json::json!({ "jsonrpc": {} }),
		};

		let mut connection = Connection::new(stream, is_client, key, self.sender.clone(), &self.config, advertise);

		// Server-level signals apply to every connection.
		let server_signals: Vec<Arc<LocalSignal>> = self
			.server
			.as_ref()
			.map(|server| server.signals.clone())
			.unwrap_or_default();

		for signal in &server_signals {
			if let Err(e) = connection.add_local_signal(signal) {
				warn!(error = %e, "failed to register signal with new connection");
			}
		}

		let handle = connection.handle();

		// Bridge per-connection availability events into the server-wide
		// aggregate events.
		let mut aggregation = Vec::new();
		if let Some(server) = &self.server {
			let events = Arc::clone(&server.events);
			let bridged = handle.clone();
			aggregation.push(handle.on_available().connect(move |signal| {
				events.on_available.emit(&(bridged.clone(), Arc::clone(signal)));
			}));

			let events = Arc::clone(&server.events);
			let bridged = handle.clone();
			aggregation.push(handle.on_unavailable().connect(move |signal| {
				events.on_unavailable.emit(&(bridged.clone(), Arc::clone(signal)));
			}));
		}

		entry.insert(Endpoint::Connection {
			connection,
			_aggregation: aggregation,
		});

		let index = key.token;

		on_installed(handle);

		let activation = {
			let Endpoint::Connection { connection, .. } = &mut self.slab[index] else {
				return None;
			};
			connection.activate(early_data)
		};

		match activation {
			Ok(()) => {
				self.update_interest(index);
				Some(index)
			}
			Err(e) => {
				self.remove_connection(index, Some(e));
				None
			}
		}
	}

	fn drive_connection(&mut self, index: usize, readable: bool, writable: bool) {
		let mut error: Option<StreamingError> = None;
		let mut graceful = false;

		{
			let Endpoint::Connection { connection, .. } = &mut self.slab[index] else {
				return;
			};

			if writable {
				if let Err(e) = connection.on_writable() {
					error = Some(e);
				}
			}

			if readable && error.is_none() {
				match connection.on_readable() {
					Ok(ReadOutcome::Eof) => graceful = true,
					Ok(ReadOutcome::Open) => {}
					Err(e) => error = Some(e),
				}
			}

			if connection.is_peer_closed() {
				graceful = true;
			}
		}

		if let Some(e) = error {
			self.remove_connection(index, Some(e));
		} else if graceful {
			self.remove_connection(index, None);
		} else {
			self.update_interest(index);
		}
	}

	fn remove_connection(&mut self, index: usize, reason: Option<StreamingError>) {
		let Endpoint::Connection { mut connection, _aggregation } = self.slab.remove(index) else {
			return;
		};

		let handle = connection.handle();
		connection.teardown(reason.clone());

		if let Some(server) = &self.server {
			server.events.on_client_disconnected.emit(&(handle, reason));
		}
	}

	/// Routes an HTTP command-interface request to the streaming
	/// connection whose stream id prefixes the method name.
	fn dispatch_http_command(&mut self, servicer_index: usize, request: &Value) {
		let method = request.get("method").and_then(Value::as_str).unwrap_or("");
		let stream_id = method.rsplit_once('.').map(|(prefix, _)| prefix).unwrap_or("");

		let target = self.slab.iter().find_map(|(index, endpoint)| match endpoint {
			Endpoint::Connection { connection, .. } if connection.local_stream_id() == stream_id => {
				Some(index)
			}
			_ => None,
		});

		let (status, body) = match target {
			Some(connection_index) => {
				let result = {
					let Endpoint::Connection { connection, .. } = &mut self.slab[connection_index]
					else {
						unreachable!("target index is a connection");
					};
					connection.dispatch_command_request(request)
				};

				match result {
					Ok(response) => {
						self.update_interest(connection_index);
						(200, response)
					}
					Err(e) => {
						self.remove_connection(connection_index, Some(e.clone()));
						(
							500,
							serde_json::json!({
								"code": fault::INTERNAL_ERROR,
								"message": e.to_string(),
							}),
						)
					}
				}
			}
			None => (
				500,
				serde_json::json!({
					"code": fault::INTERNAL_ERROR,
					"message": "no matching connection",
				}),
			),
		};

		if let Endpoint::Servicer(servicer) = &mut self.slab[servicer_index] {
			servicer.complete_command(status, &body);
		}
	}

	fn update_interest(&mut self, index: usize) {
		let registry = self.poll.registry();

		let Some(endpoint) = self.slab.get_mut(index) else {
			return;
		};

		let token = Token(index);
		let result = match endpoint {
			Endpoint::Listener(_) => Ok(()),
			Endpoint::Servicer(servicer) => {
				let interest = if servicer.wants_write() {
					Interest::READABLE | Interest::WRITABLE
				} else {
					Interest::READABLE
				};
				registry.reregister(servicer.stream_mut(), token, interest)
			}
			Endpoint::Connection { connection, .. } => {
				let interest = if connection.wants_write() {
					Interest::READABLE | Interest::WRITABLE
				} else {
					Interest::READABLE
				};
				registry.reregister(connection.peer_stream(), token, interest)
			}
		};

		if let Err(e) = result {
			warn!(error = %e, "failed to update socket interest");
		}
	}

	fn drain_commands(&mut self) {
		while let Ok(command) = self.receiver.try_recv() {
			self.handle_command(command);
		}
	}

	fn handle_command(&mut self, command: Command) {
		match command {
			Command::AddLocalSignal { target: None, signal } => {
				if let Some(server) = &mut self.server {
					if server.signals.iter().any(|existing| existing.id() == signal.id()) {
						return;
					}
					server.signals.push(Arc::clone(&signal));
				}

				let indices: Vec<usize> = self.connection_indices();
				for index in indices {
					self.with_connection_at(index, |connection| connection.add_local_signal(&signal));
				}
			}
			Command::AddLocalSignal {
				target: Some(key),
				signal,
			} => {
				self.with_connection(key, |connection| connection.add_local_signal(&signal));
			}
			Command::RemoveLocalSignal { target: None, signal_id } => {
				if let Some(server) = &mut self.server {
					server.signals.retain(|signal| signal.id() != signal_id);
				}

				let indices: Vec<usize> = self.connection_indices();
				for index in indices {
					self.with_connection_at(index, |connection| {
						connection.remove_local_signal(&signal_id)
					});
				}
			}
			Command::RemoveLocalSignal {
				target: Some(key),
				signal_id,
			} => {
				self.with_connection(key, |connection| connection.remove_local_signal(&signal_id));
			}
			Command::PublishData { key, signo, block } => {
				self.with_connection(key, |connection| connection.publish_local_data(signo, &block));
			}
			Command::MetadataChanged { key, signo, metadata } => {
				self.with_connection(key, |connection| {
					connection.local_metadata_changed(signo, &metadata)
				});
			}
			Command::RequestSubscribe { key, signal_id } => {
				self.with_connection(key, |connection| connection.request_remote(true, &signal_id));
			}
			Command::RequestUnsubscribe { key, signal_id } => {
				self.with_connection(key, |connection| connection.request_remote(false, &signal_id));
			}
			Command::CloseConnection { key } => {
				if let Some(index) = self.find_connection(key) {
					if let Endpoint::Connection { connection, .. } = &mut self.slab[index] {
						connection.begin_close();
					}
					self.remove_connection(index, None);
				}
			}
			Command::Adopt {
				stream,
				early_data,
				reply,
			} => {
				if let Err(e) = stream.set_nonblocking(true) {
					reply(Err(e.into()));
					return;
				}

				let stream = mio::net::TcpStream::from_std(stream);

				let mut reply = Some(reply);
				self.install_connection(stream, true, &early_data, |handle| {
					if let Some(reply) = reply.take() {
						reply(Ok(handle));
					}
				});

				if let Some(reply) = reply.take() {
					reply(Err(StreamingError::ConnectionClosed));
				}
			}
			Command::Shutdown => {
				self.shutting_down = true;
			}
		}
	}

	fn connection_indices(&self) -> Vec<usize> {
		self.slab
			.iter()
			.filter_map(|(index, endpoint)| match endpoint {
				Endpoint::Connection { .. } => Some(index),
				_ => None,
			})
			.collect()
	}

	fn find_connection(&self, key: ConnKey) -> Option<usize> {
		match self.slab.get(key.token) {
			Some(Endpoint::Connection { connection, .. }) if connection.id() == key.id => Some(key.token),
			_ => None,
		}
	}

	fn with_connection(
		&mut self,
		key: ConnKey,
		operation: impl FnOnce(&mut Connection) -> Result<(), StreamingError>,
	) {
		let Some(index) = self.find_connection(key) else {
			return;
		};
		self.with_connection_at(index, operation);
	}

	fn with_connection_at(
		&mut self,
		index: usize,
		operation: impl FnOnce(&mut Connection) -> Result<(), StreamingError>,
	) {
		let result = {
			let Some(Endpoint::Connection { connection, .. }) = self.slab.get_mut(index) else {
				return;
			};
			operation(connection)
		};

		match result {
			Ok(()) => self.update_interest(index),
			Err(e) => self.remove_connection(index, Some(e)),
		}
	}

	/// Closes the endpoint: listeners first, then every connection (each
	/// emitting its terminal events), then the remaining servicers.
	fn shutdown(&mut self) {
		debug!("reactor shutting down");

		let listener_indices: Vec<usize> = self
			.slab
			.iter()
			.filter_map(|(index, endpoint)| match endpoint {
				Endpoint::Listener(_) => Some(index),
				_ => None,
			})
			.collect();
		for index in listener_indices {
			self.slab.remove(index);
		}

		for index in self.connection_indices() {
			if let Some(Endpoint::Connection { connection, .. }) = self.slab.get_mut(index) {
				connection.begin_close();
			}
			self.remove_connection(index, None);
		}

		self.slab.clear();
	}
}
