// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The per-peer connection state machine.
//!
//! A connection is symmetric once established: both sides advertise signals,
//! subscribe to the other side's signals, and stream data. The asymmetry is
//! confined to the hello sequence (a server speaks first; a client answers
//! only after seeing a compatible `init`) and to WebSocket masking.
//!
//! All state here is owned by the reactor thread. Interaction from other
//! threads (publishing application data, observer subscribe requests,
//! handle operations) arrives through the reactor's command queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use mio::net::TcpStream;
use serde_json::{json, Value};
use tracing::{debug, trace, warn};
use ws_streaming_core::{
	DataBlock, Event, LinearTable, LocalSignal, Metadata, RemoteSignal, Rule, Slot, StreamingError,
	SubscribeHolder,
};
use ws_streaming_protocol::{linear::LinearPayload, packet::SIGNO_STREAM, version, version::ProtocolVersion};

use crate::{
	command::{self, fault, CommandInterfaceClient},
	config::EndpointConfig,
	peer::{Peer, PeerMessage, ReadOutcome},
	reactor::{Command, CommandSender, ConnKey},
};

/// A local signal registered with one connection.
struct RegisteredLocalSignal {
	signal: Arc<LocalSignal>,
	signo: u32,
	is_explicitly_subscribed: bool,
	implicit_subscribe_count: u32,
	/// Cumulative count of samples published while subscribed.
	value_index: i64,
	explicit_rule: bool,
	/// This signal's own linear table (linear-rule signals only).
	table: Option<Arc<Mutex<LinearTable>>>,
	domain_signo: u32,
	domain_table: Weak<Mutex<LinearTable>>,
	holder: Option<SubscribeHolder>,
	slots: Vec<Slot>,
}

impl RegisteredLocalSignal {
	fn new(signal: Arc<LocalSignal>, signo: u32) -> Self {
		Self {
			signal,
			signo,
			is_explicitly_subscribed: false,
			implicit_subscribe_count: 0,
			value_index: 0,
			explicit_rule: true,
			table: None,
			domain_signo: 0,
			domain_table: Weak::new(),
			holder: None,
			slots: Vec::new(),
		}
	}

	/// A signal is subscribed on the wire while either reference is held.
	fn is_wire_subscribed(&self) -> bool {
		self.is_explicitly_subscribed || self.implicit_subscribe_count > 0
	}
}

struct RemoteEntry {
	signal: Arc<RemoteSignal>,
	_request_slots: [Slot; 2],
}

/// Connection state observable through [`ConnectionHandle`]s.
pub struct ConnectionShared {
	local_stream_id: String,
	remote_stream_id: Mutex<String>,
	on_available: Event<Arc<RemoteSignal>>,
	on_unavailable: Event<Arc<RemoteSignal>>,
	on_disconnected: Event<Option<StreamingError>>,
}

/// A cloneable application-facing handle to a live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
	pub(crate) key: ConnKey,
	pub(crate) commands: CommandSender,
	pub(crate) shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
	/// The stream id this side advertises in `init`: the remote socket
	/// endpoint as `ip:port`.
	pub fn local_stream_id(&self) -> String {
		self.shared.local_stream_id.clone()
	}

	/// The stream id the peer advertised in its `init`.
	pub fn remote_stream_id(&self) -> String {
		self.shared.remote_stream_id.lock().unwrap().clone()
	}

	/// Raised once per signal the peer advertises.
	pub fn on_available(&self) -> &Event<Arc<RemoteSignal>> {
		&self.shared.on_available
	}

	/// Raised when the peer retracts a signal, and for every known signal
	/// when the connection closes.
	pub fn on_unavailable(&self) -> &Event<Arc<RemoteSignal>> {
		&self.shared.on_unavailable
	}

	/// Raised exactly once when the connection closes. `None` is a
	/// graceful close.
	pub fn on_disconnected(&self) -> &Event<Option<StreamingError>> {
		&self.shared.on_disconnected
	}

	/// Registers a local signal with this connection.
	pub fn add_signal(&self, signal: &Arc<LocalSignal>) {
		self.commands.send(Command::AddLocalSignal {
			target: Some(self.key),
			signal: Arc::clone(signal),
		});
	}

	/// Removes a previously registered local signal.
	pub fn remove_signal(&self, signal_id: &str) {
		self.commands.send(Command::RemoveLocalSignal {
			target: Some(self.key),
			signal_id: signal_id.to_string(),
		});
	}

	/// Closes the connection: a CLOSE frame is sent, every remote signal
	/// is detached, and `on_disconnected` fires.
	pub fn close(&self) {
		self.commands.send(Command::CloseConnection { key: self.key });
	}
}

impl std::fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("local_stream_id", &self.shared.local_stream_id)
			.finish_non_exhaustive()
	}
}

pub(crate) struct Connection {
	peer: Peer,
	is_client: bool,
	key: ConnKey,
	commands: CommandSender,

	api_version: Option<ProtocolVersion>,
	hello_sent: bool,
	remote_stream_id: String,
	advertise: Value,

	next_signo: u32,
	locals: HashMap<u32, RegisteredLocalSignal>,
	locals_by_id: HashMap<String, u32>,

	remotes: HashMap<String, RemoteEntry>,
	remotes_by_signo: HashMap<u32, String>,

	command_client: Option<CommandInterfaceClient>,

	shared: Arc<ConnectionShared>,
	torn_down: bool,
}

impl Connection {
	pub fn new(
		stream: TcpStream,
		is_client: bool,
		key: ConnKey,
		commands: CommandSender,
		config: &EndpointConfig,
		advertise: Value,
	) -> Self {
		let peer = Peer::new(stream, is_client, config.rx_buffer_size, config.tx_buffer_size);

		let local_stream_id = peer
			.peer_addr()
			.map(|addr| addr.to_string())
			.unwrap_or_else(|| "unknown".to_string());

		let shared = Arc::new(ConnectionShared {
			local_stream_id,
			remote_stream_id: Mutex::new(String::new()),
			on_available: Event::new(),
			on_unavailable: Event::new(),
			on_disconnected: Event::new(),
		});

		Self {
			peer,
			is_client,
			key,
			commands,
			api_version: None,
			hello_sent: false,
			remote_stream_id: String::new(),
			advertise,
			next_signo: 1,
			locals: HashMap::new(),
			locals_by_id: HashMap::new(),
			remotes: HashMap::new(),
			remotes_by_signo: HashMap::new(),
			command_client: None,
			shared,
			torn_down: false,
		}
	}

	pub fn handle(&self) -> ConnectionHandle {
		ConnectionHandle {
			key: self.key,
			commands: self.commands.clone(),
			shared: Arc::clone(&self.shared),
		}
	}

	pub fn id(&self) -> u64 {
		self.key.id
	}

	pub fn local_stream_id(&self) -> &str {
		&self.shared.local_stream_id
	}

	pub fn peer_stream(&mut self) -> &mut TcpStream {
		self.peer.stream()
	}

	pub fn wants_write(&self) -> bool {
		self.peer.wants_write()
	}

	pub fn is_peer_closed(&self) -> bool {
		self.peer.is_closed()
	}

	/// Starts the protocol: a server says hello immediately, and any bytes
	/// the HTTP handshake over-read are processed as received data.
	pub fn activate(&mut self, early_data: &[u8]) -> Result<(), StreamingError> {
		if !self.is_client {
			self.send_hello()?;
		}

		if !early_data.is_empty() {
			let mut messages = Vec::new();
			self.peer.accept_early_data(early_data, &mut messages)?;
			self.handle_messages(messages)?;
		}

		Ok(())
	}

	pub fn on_readable(&mut self) -> Result<ReadOutcome, StreamingError> {
		let mut messages = Vec::new();
		let outcome = self.peer.on_readable(&mut messages)?;
		self.handle_messages(messages)?;
		Ok(outcome)
	}

	pub fn on_writable(&mut self) -> Result<(), StreamingError> {
		self.peer.on_writable()
	}

	/// Initiates a graceful close, draining queued data behind a CLOSE
	/// frame.
	pub fn begin_close(&mut self) {
		let _ = self.peer.begin_close();
		let _ = self.peer.on_writable();
	}

	/// Final teardown. Detaches every remote signal, releases local signal
	/// bindings, and emits `on_disconnected` exactly once.
	pub fn teardown(&mut self, reason: Option<StreamingError>) {
		if self.torn_down {
			return;
		}
		self.torn_down = true;

		debug!(stream_id = %self.shared.local_stream_id, ?reason, "connection closed");

		if let Some(client) = &mut self.command_client {
			client.cancel();
		}

		let old: Vec<RemoteEntry> = self.remotes.drain().map(|(_, entry)| entry).collect();
		self.remotes_by_signo.clear();

		for entry in &old {
			entry.signal.detach();
		}
		for entry in &old {
			self.shared.on_unavailable.emit(&entry.signal);
		}

		// Dropping the entries releases subscribe holders and event slots.
		self.locals.clear();
		self.locals_by_id.clear();

		self.peer.close_now();
		self.shared.on_disconnected.emit(&reason);
	}

	// === local signals ===

	/// Registers a local signal, allocating the next signal number.
	/// Numbers are never reused within a connection's lifetime.
	pub fn add_local_signal(&mut self, signal: &Arc<LocalSignal>) -> Result<(), StreamingError> {
		let id = signal.id().to_string();
		if self.locals_by_id.contains_key(&id) {
			return Ok(());
		}

		let signo = self.next_signo;
		self.next_signo += 1;

		self.locals.insert(signo, RegisteredLocalSignal::new(Arc::clone(signal), signo));
		self.locals_by_id.insert(id.clone(), signo);

		if self.hello_sent {
			self.send_metadata(SIGNO_STREAM, "available", &json!({ "signalIds": [id] }))?;
		}

		Ok(())
	}

	pub fn remove_local_signal(&mut self, signal_id: &str) -> Result<(), StreamingError> {
		let Some(signo) = self.locals_by_id.remove(signal_id) else {
			return Ok(());
		};

		self.locals.remove(&signo);

		if self.hello_sent {
			self.send_metadata(SIGNO_STREAM, "unavailable", &json!({ "signalIds": [signal_id] }))?;
		}

		Ok(())
	}

	/// Applies a subscribe request to a local signal. Explicit requests
	/// come from the peer's command interface; implicit ones keep a
	/// value signal's domain signal flowing. Returns false if the signal
	/// is unknown or an explicit subscription already exists.
	fn subscribe_local(&mut self, signal_id: &str, explicit: bool) -> Result<bool, StreamingError> {
		let Some(&signo) = self.locals_by_id.get(signal_id) else {
			return Ok(false);
		};

		let was_subscribed = {
			let entry = self.locals.get_mut(&signo).unwrap();
			let was = entry.is_wire_subscribed();

			if explicit {
				if entry.is_explicitly_subscribed {
					return Ok(false);
				}
				entry.is_explicitly_subscribed = true;
			} else {
				entry.implicit_subscribe_count += 1;
			}

			was
		};

		let metadata = self.locals[&signo].signal.metadata();
		let table_id = metadata.table_id().map(str::to_string);

		// Subscribe the domain signal first, so the subscriber can resolve
		// the tableId reference when this signal's metadata arrives.
		if explicit {
			if let Some(table_id) = &table_id {
				if table_id != signal_id {
					self.subscribe_local(table_id, false)?;
				}
			}
		}

		if !was_subscribed {
			self.wire_subscribe(signo)?;
		}

		// Link the domain table for the publish-side anchor protocol.
		if let Some(table_id) = &table_id {
			let domain_signo = if table_id == signal_id {
				Some(signo)
			} else {
				self.locals_by_id.get(table_id).copied()
			};

			if let Some(domain_signo) = domain_signo {
				let domain_table = self.locals[&domain_signo].table.clone();
				let entry = self.locals.get_mut(&signo).unwrap();
				entry.domain_signo = domain_signo;
				entry.domain_table = domain_table.as_ref().map(Arc::downgrade).unwrap_or_default();
			}
		}

		Ok(true)
	}

	fn unsubscribe_local(&mut self, signal_id: &str, explicit: bool) -> Result<bool, StreamingError> {
		let Some(&signo) = self.locals_by_id.get(signal_id) else {
			return Ok(false);
		};

		let (was_subscribed, now_subscribed) = {
			let entry = self.locals.get_mut(&signo).unwrap();
			let was = entry.is_wire_subscribed();

			if explicit {
				if !entry.is_explicitly_subscribed {
					return Ok(false);
				}
				entry.is_explicitly_subscribed = false;
			} else {
				if entry.implicit_subscribe_count == 0 {
					return Ok(false);
				}
				entry.implicit_subscribe_count -= 1;
			}

			(was, entry.is_wire_subscribed())
		};

		if was_subscribed && !now_subscribed {
			self.wire_unsubscribe(signo)?;
		}

		// Release the domain signal after the value signal.
		if explicit {
			let table_id = self.locals[&signo].signal.metadata().table_id().map(str::to_string);
			if let Some(table_id) = table_id {
				if table_id != signal_id {
					self.unsubscribe_local(&table_id, false)?;
				}
			}
		}

		Ok(true)
	}

	/// Opens the subscription on the wire: `subscribe`, then the current
	/// metadata with the value index merged in, then data flows.
	fn wire_subscribe(&mut self, signo: u32) -> Result<(), StreamingError> {
		let (signal_id, merged) = {
			let entry = self.locals.get_mut(&signo).unwrap();
			let metadata = entry.signal.metadata();

			entry.explicit_rule = metadata.rule() == Rule::Explicit;
			if metadata.rule() == Rule::Linear {
				entry.table = Some(Arc::new(Mutex::new(LinearTable::new(&metadata))));
			}

			let commands = self.commands.clone();
			let key = self.key;
			let data_slot = entry.signal.on_data_published().connect(move |block| {
				commands.send(Command::PublishData {
					key,
					signo,
					block: block.clone(),
				});
			});

			let commands = self.commands.clone();
			let metadata_slot = entry.signal.on_metadata_changed().connect(move |metadata| {
				commands.send(Command::MetadataChanged {
					key,
					signo,
					metadata: metadata.clone(),
				});
			});

			entry.slots = vec![data_slot, metadata_slot];
			entry.holder = Some(entry.signal.increment_subscribe_count());

			(entry.signal.id().to_string(), metadata.with_value_index(entry.value_index))
		};

		trace!(signal = %signal_id, signo, "subscribing local signal");

		self.send_metadata(signo, "subscribe", &json!({ "signalId": signal_id }))?;
		self.send_metadata(signo, "signal", merged.json())
	}

	fn wire_unsubscribe(&mut self, signo: u32) -> Result<(), StreamingError> {
		let signal_id = {
			let entry = self.locals.get_mut(&signo).unwrap();
			entry.slots.clear();
			entry.holder = None;
			entry.table = None;
			entry.domain_table = Weak::new();
			entry.domain_signo = 0;
			entry.signal.id().to_string()
		};

		trace!(signal = %signal_id, signo, "unsubscribing local signal");
		self.send_metadata(signo, "unsubscribe", &json!({ "signalId": signal_id }))
	}

	/// Transmits published data, preceded when necessary by a linear
	/// anchor on the domain signal's channel so the subscriber can
	/// reconstruct every sample's domain value.
	pub fn publish_local_data(&mut self, signo: u32, block: &DataBlock) -> Result<(), StreamingError> {
		let Some(entry) = self.locals.get_mut(&signo) else {
			return Ok(());
		};

		if !entry.is_wire_subscribed() {
			// The publish raced an unsubscribe through the command queue.
			return Ok(());
		}

		let mut anchor: Option<(u32, LinearPayload)> = None;

		if block.sample_count > 0 {
			if let Some(domain_table) = entry.domain_table.upgrade() {
				let mut table = domain_table.lock().unwrap();

				let index = if entry.explicit_rule {
					entry.value_index
				} else {
					table.driven_index()
				};

				if block.domain_value != table.value_at(index) {
					anchor = Some((
						entry.domain_signo,
						LinearPayload {
							sample_index: index,
							value: block.domain_value,
						},
					));
					table.set(index, block.domain_value);
				}
			}
		}

		let explicit_rule = entry.explicit_rule;

		if let Some((domain_signo, payload)) = anchor {
			self.peer.send_data(domain_signo, &[&payload.encode()])?;
		}

		self.peer.send_data(signo, &[&block.data])?;

		let entry = self.locals.get_mut(&signo).unwrap();
		entry.value_index += block.sample_count as i64;

		if explicit_rule {
			if let Some(domain_table) = entry.domain_table.upgrade() {
				domain_table.lock().unwrap().drive_to(entry.value_index);
			}
		}

		Ok(())
	}

	/// Forwards an application metadata update to the subscriber.
	pub fn local_metadata_changed(&mut self, signo: u32, metadata: &Metadata) -> Result<(), StreamingError> {
		let merged = {
			let Some(entry) = self.locals.get_mut(&signo) else {
				return Ok(());
			};

			if !entry.is_wire_subscribed() {
				return Ok(());
			}

			entry.explicit_rule = metadata.rule() == Rule::Explicit;

			match &entry.table {
				Some(table) => table.lock().unwrap().update_metadata(metadata),
				None if metadata.rule() == Rule::Linear => {
					entry.table = Some(Arc::new(Mutex::new(LinearTable::new(metadata))));
				}
				None => {}
			}

			metadata.with_value_index(entry.value_index)
		};

		self.send_metadata(signo, "signal", merged.json())
	}

	// === remote signal requests ===

	/// Issues a subscribe or unsubscribe request for a peer signal through
	/// the selected command interface.
	pub fn request_remote(&mut self, subscribe: bool, signal_id: &str) -> Result<(), StreamingError> {
		let operation = if subscribe {
			"subscribe"
		} else {
			"unsubscribe"
		};
		let method = format!("{}.{}", self.remote_stream_id, operation);
		let params = Value::String(signal_id.to_string());

		let handler_signal = signal_id.to_string();
		let handler: command::ResponseHandler = Box::new(move |result| match result {
			Ok(response) => {
				debug!(signal = %handler_signal, ?response, "command interface request completed")
			}
			Err(e) => warn!(signal = %handler_signal, error = %e, "command interface request failed"),
		});

		let request = match &mut self.command_client {
			Some(CommandInterfaceClient::InBand(client)) => Some(client.prepare(&method, &params, handler)),
			Some(CommandInterfaceClient::Http(client)) => {
				client.request(&method, &params, handler);
				None
			}
			None => {
				warn!(signal = %signal_id, "peer offers no command interface; cannot {operation}");
				None
			}
		};

		if let Some(request) = request {
			self.send_metadata(SIGNO_STREAM, "request", &request)?;
		}

		Ok(())
	}

	// === inbound dispatch ===

	fn handle_messages(&mut self, messages: Vec<PeerMessage>) -> Result<(), StreamingError> {
		for message in messages {
			match message {
				PeerMessage::Data { signo, payload } => self.handle_data_message(signo, &payload),
				PeerMessage::Metadata { signo, method, params } => {
					self.handle_metadata_message(signo, &method, &params)?;
				}
			}
		}
		Ok(())
	}

	fn handle_data_message(&mut self, signo: u32, payload: &[u8]) {
		let Some(signal) = self
			.remotes_by_signo
			.get(&signo)
			.and_then(|id| self.remotes.get(id))
			.map(|entry| Arc::clone(&entry.signal))
		else {
			return;
		};

		signal.handle_data(payload);
	}

	fn handle_metadata_message(&mut self, signo: u32, method: &str, params: &Value) -> Result<(), StreamingError> {
		trace!(signo, method, "metadata received");

		if signo != SIGNO_STREAM {
			return self.handle_signal_metadata(signo, method, params);
		}

		match method {
			"apiVersion" => {
				if let Some(value) = params.get("version").and_then(Value::as_str) {
					self.api_version = ProtocolVersion::parse(value);
				}
				Ok(())
			}
			"init" => self.handle_init(params),
			"available" => self.handle_available(params),
			"unavailable" => self.handle_unavailable(params),
			"request" => {
				let response = self.dispatch_command_request(params)?;
				self.send_metadata(SIGNO_STREAM, "response", &response)
			}
			"response" => {
				if let Some(CommandInterfaceClient::InBand(client)) = &mut self.command_client {
					client.handle_response(params);
				}
				Ok(())
			}
			other => {
				trace!(method = other, "ignoring unknown connection metadata method");
				Ok(())
			}
		}
	}

	fn handle_signal_metadata(&mut self, signo: u32, method: &str, params: &Value) -> Result<(), StreamingError> {
		if method == "subscribe" {
			let Some(signal_id) = params.get("signalId").and_then(Value::as_str) else {
				return Ok(());
			};

			let Some(entry) = self.remotes.get(signal_id) else {
				return Ok(());
			};

			// This signo now belongs exclusively to the named signal.
			self.remotes_by_signo.insert(signo, signal_id.to_string());
			entry.signal.bind_signo(signo);
		}

		let Some(signal) = self
			.remotes_by_signo
			.get(&signo)
			.and_then(|id| self.remotes.get(id))
			.map(|entry| Arc::clone(&entry.signal))
		else {
			return Ok(());
		};

		let remotes = &self.remotes;
		signal.handle_metadata(method, params, &|id: &str| {
			remotes.get(id).map(|entry| Arc::clone(&entry.signal))
		});

		if method == "unsubscribe" {
			self.remotes_by_signo.remove(&signo);
		}

		Ok(())
	}

	fn handle_init(&mut self, params: &Value) -> Result<(), StreamingError> {
		let Some(params) = params.as_object() else {
			return Ok(());
		};

		if let Some(stream_id) = params.get("streamId").and_then(Value::as_str) {
			self.remote_stream_id = stream_id.to_string();
			*self.shared.remote_stream_id.lock().unwrap() = stream_id.to_string();
		}

		if let Some(interfaces) = params.get("commandInterfaces") {
			let remote_host = self.peer.peer_addr().map(|addr| addr.ip());
			self.command_client = CommandInterfaceClient::create(interfaces, remote_host);
		}

		if self.is_client && !self.hello_sent {
			if self.api_version >= Some(version::CURRENT) {
				self.send_hello()?;
			} else {
				warn!(version = ?self.api_version, "peer protocol version too old; staying silent");
			}
		}

		Ok(())
	}

	fn handle_available(&mut self, params: &Value) -> Result<(), StreamingError> {
		let Some(ids) = params.get("signalIds").and_then(Value::as_array) else {
			return Ok(());
		};

		for id in ids {
			let Some(id) = id.as_str() else {
				continue;
			};

			if self.remotes.contains_key(id) {
				continue;
			}

			let signal = RemoteSignal::new(id);

			let commands = self.commands.clone();
			let key = self.key;
			let subscribe_id = id.to_string();
			let subscribe_slot = signal.on_subscribe_requested().connect(move |_| {
				commands.send(Command::RequestSubscribe {
					key,
					signal_id: subscribe_id.clone(),
				});
			});

			let commands = self.commands.clone();
			let unsubscribe_id = id.to_string();
			let unsubscribe_slot = signal.on_unsubscribe_requested().connect(move |_| {
				commands.send(Command::RequestUnsubscribe {
					key,
					signal_id: unsubscribe_id.clone(),
				});
			});

			debug!(signal = %id, "remote signal available");

			self.remotes.insert(
				id.to_string(),
				RemoteEntry {
					signal: Arc::clone(&signal),
					_request_slots: [subscribe_slot, unsubscribe_slot],
				},
			);

			self.shared.on_available.emit(&signal);
		}

		Ok(())
	}

	fn handle_unavailable(&mut self, params: &Value) -> Result<(), StreamingError> {
		let Some(ids) = params.get("signalIds").and_then(Value::as_array) else {
			return Ok(());
		};

		for id in ids {
			let Some(id) = id.as_str() else {
				continue;
			};

			let Some(entry) = self.remotes.remove(id) else {
				continue;
			};

			debug!(signal = %id, "remote signal retracted");

			self.remotes_by_signo.remove(&entry.signal.signo());
			entry.signal.detach();
			self.shared.on_unavailable.emit(&entry.signal);
		}

		Ok(())
	}

	// === command interface (server side) ===

	/// Dispatches a JSON-RPC request addressed to this connection,
	/// producing the response object. Requests arrive in-band as `request`
	/// messages or out-of-band through the HTTP servicer.
	pub fn dispatch_command_request(&mut self, request: &Value) -> Result<Value, StreamingError> {
		let id = request.get("id").cloned().unwrap_or(Value::Null);

		let Some(method) = request.get("method").and_then(Value::as_str) else {
			return Ok(command::build_error_response(
				&id,
				fault::INVALID_REQUEST,
				"invalid request object",
			));
		};

		let method = method.to_string();
		let params = request.get("params").cloned().unwrap_or(Value::Null);

		let subscribe_method = format!("{}.subscribe", self.shared.local_stream_id);
		let unsubscribe_method = format!("{}.unsubscribe", self.shared.local_stream_id);

		let result = if method == subscribe_method {
			self.apply_subscription_params(&params, true)?
		} else if method == unsubscribe_method {
			self.apply_subscription_params(&params, false)?
		} else {
			return Ok(command::build_error_response(&id, fault::METHOD_NOT_FOUND, "method not found"));
		};

		Ok(match result {
			Ok(result) => command::build_result_response(&id, result),
			Err((code, message)) => command::build_error_response(&id, code, message),
		})
	}

	#[allow(clippy::type_complexity)]
	fn apply_subscription_params(
		&mut self,
		params: &Value,
		subscribe: bool,
	) -> Result<Result<Value, (i64, &'static str)>, StreamingError> {
		let apply = |connection: &mut Self, id: &str| -> Result<bool, StreamingError> {
			if subscribe {
				connection.subscribe_local(id, true)
			} else {
				connection.unsubscribe_local(id, true)
			}
		};

		match params {
			Value::String(id) => {
				if apply(self, id)? {
					Ok(Ok(Value::Bool(true)))
				} else if subscribe {
					Ok(Err((fault::SERVER_ERROR, "failed to subscribe signal")))
				} else {
					Ok(Err((fault::SERVER_ERROR, "failed to unsubscribe signal")))
				}
			}
			Value::Array(ids) => {
				let mut results = Vec::with_capacity(ids.len());
				for id in ids {
					let ok = match id.as_str() {
						Some(id) => apply(self, id)?,
						None => false,
					};
					results.push(Value::Bool(ok));
				}
				Ok(Ok(Value::Array(results)))
			}
			_ => Ok(Err((
				fault::INVALID_PARAMS,
				"params must be a signal ID or an array of signal IDs",
			))),
		}
	}

	// === hello ===

	fn send_hello(&mut self) -> Result<(), StreamingError> {
		self.send_metadata(
			SIGNO_STREAM,
			"apiVersion",
			&json!({ "version": version::CURRENT.to_string() }),
		)?;

		self.send_metadata(
			SIGNO_STREAM,
			"init",
			&json!({
				"streamId": self.shared.local_stream_id,
				"commandInterfaces": self.advertise,
			}),
		)?;

		let mut signos: Vec<u32> = self.locals.keys().copied().collect();
		signos.sort_unstable();

		let ids: Vec<&str> = signos.iter().map(|signo| self.locals[signo].signal.id()).collect();

		if !ids.is_empty() {
			self.send_metadata(SIGNO_STREAM, "available", &json!({ "signalIds": ids }))?;
		}

		self.hello_sent = true;
		Ok(())
	}

	fn send_metadata(&mut self, signo: u32, method: &str, params: &Value) -> Result<(), StreamingError> {
		self.peer.send_metadata(signo, method, params)
	}
}
