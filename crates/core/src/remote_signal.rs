// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Consumer-side signal handles.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex, Weak,
};

use bytes::Bytes;
use serde_json::Value;
use tracing::trace;
use ws_streaming_protocol::linear::LinearPayload;

use crate::{
	event::Event,
	linear_table::LinearTable,
	metadata::{Metadata, Rule},
};

/// A received block of sample data, decorated with its domain position.
#[derive(Debug, Clone)]
pub struct DataRecord {
	/// The domain value of the first sample in the block.
	pub domain_value: i64,
	/// The number of samples in the block.
	pub sample_count: usize,
	/// The raw sample bytes.
	pub data: Bytes,
}

struct State {
	signo: u32,
	metadata: Metadata,
	is_subscribed: bool,
	rule: Rule,
	sample_size: usize,
	value_index: i64,
	table: Option<Arc<Mutex<LinearTable>>>,
	domain_table: Weak<Mutex<LinearTable>>,
}

/// A signal advertised by a remote peer.
///
/// Observers call [`subscribe`](Self::subscribe) /
/// [`unsubscribe`](Self::unsubscribe); the owning connection translates the
/// resulting request events into protocol subscribe requests, and feeds
/// received packets back through [`handle_data`](Self::handle_data) and
/// [`handle_metadata`](Self::handle_metadata).
pub struct RemoteSignal {
	id: String,
	subscribe_count: AtomicUsize,
	state: Mutex<State>,

	on_subscribed: Event<()>,
	on_unsubscribed: Event<()>,
	on_metadata_changed: Event<Metadata>,
	on_data_received: Event<DataRecord>,
	on_unavailable: Event<()>,

	on_subscribe_requested: Event<()>,
	on_unsubscribe_requested: Event<()>,
}

impl RemoteSignal {
	pub fn new(id: impl Into<String>) -> Arc<Self> {
		Arc::new(Self {
			id: id.into(),
			subscribe_count: AtomicUsize::new(0),
			state: Mutex::new(State {
				signo: 0,
				metadata: Metadata::new(),
				is_subscribed: false,
				rule: Rule::Explicit,
				sample_size: 0,
				value_index: 0,
				table: None,
				domain_table: Weak::new(),
			}),
			on_subscribed: Event::new(),
			on_unsubscribed: Event::new(),
			on_metadata_changed: Event::new(),
			on_data_received: Event::new(),
			on_unavailable: Event::new(),
			on_subscribe_requested: Event::new(),
			on_unsubscribe_requested: Event::new(),
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// The signal number currently bound to this signal on its connection,
	/// or zero when not subscribed.
	pub fn signo(&self) -> u32 {
		self.state.lock().unwrap().signo
	}

	/// True once the publisher has confirmed the subscription.
	pub fn is_subscribed(&self) -> bool {
		self.state.lock().unwrap().is_subscribed
	}

	pub fn metadata(&self) -> Metadata {
		self.state.lock().unwrap().metadata.clone()
	}

	/// This signal's own linear table, present for linear-rule signals.
	pub fn table(&self) -> Option<Arc<Mutex<LinearTable>>> {
		self.state.lock().unwrap().table.clone()
	}

	/// Registers interest in this signal's data. The first interested
	/// observer triggers a protocol subscribe request.
	pub fn subscribe(&self) {
		if self.subscribe_count.fetch_add(1, Ordering::SeqCst) == 0 {
			self.on_subscribe_requested.emit(&());
		}
	}

	/// Releases interest. The last observer triggers a protocol
	/// unsubscribe request.
	pub fn unsubscribe(&self) {
		if self.subscribe_count.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.on_unsubscribe_requested.emit(&());
		}
	}

	/// Binds this signal to a signal number. Called by the connection when
	/// the publisher opens a subscription on that signo.
	pub fn bind_signo(&self, signo: u32) {
		self.state.lock().unwrap().signo = signo;
	}

	/// Handles a received data packet, decorating it with a domain value
	/// and sample count according to the signal's rule.
	pub fn handle_data(&self, data: &[u8]) {
		let record = {
			let mut state = self.state.lock().unwrap();

			match state.rule {
				Rule::Linear => {
					// The payload anchors this signal's own table.
					let Some(payload) = LinearPayload::decode(data) else {
						trace!(signal = %self.id, "dropping malformed linear payload");
						return;
					};

					if let Some(table) = &state.table {
						table.lock().unwrap().update_payload(&payload);
					}

					DataRecord {
						domain_value: payload.value,
						sample_count: 1,
						data: Bytes::copy_from_slice(data),
					}
				}

				Rule::Explicit => {
					let sample_count = if state.sample_size > 0 {
						data.len() / state.sample_size
					} else {
						0
					};

					let domain_value = state
						.domain_table
						.upgrade()
						.map(|table| table.lock().unwrap().value_at(state.value_index))
						.unwrap_or(0);

					state.value_index += sample_count as i64;

					if let Some(table) = state.domain_table.upgrade() {
						table.lock().unwrap().drive_to(state.value_index);
					}

					DataRecord {
						domain_value,
						sample_count,
						data: Bytes::copy_from_slice(data),
					}
				}

				Rule::Constant => {
					let domain_value = state
						.domain_table
						.upgrade()
						.map(|table| table.lock().unwrap().driven_value())
						.unwrap_or(0);

					DataRecord {
						domain_value,
						sample_count: 1,
						data: Bytes::copy_from_slice(data),
					}
				}
			}
		};

		self.on_data_received.emit(&record);
	}

	/// Handles a metadata message addressed to this signal's signo.
	/// `resolve` looks up sibling remote signals by id so a `tableId`
	/// reference can be linked to its domain signal's table.
	pub fn handle_metadata(&self, method: &str, params: &Value, resolve: &dyn Fn(&str) -> Option<Arc<RemoteSignal>>) {
		match method {
			"subscribe" => {
				let fire = {
					let mut state = self.state.lock().unwrap();
					!std::mem::replace(&mut state.is_subscribed, true)
				};
				if fire {
					self.on_subscribed.emit(&());
				}
			}

			"unsubscribe" => {
				let fire = {
					let mut state = self.state.lock().unwrap();
					state.signo = 0;
					std::mem::replace(&mut state.is_subscribed, false)
				};
				if fire {
					self.on_unsubscribed.emit(&());
				}
			}

			"signal" => {
				let metadata = Metadata::from_value(params.clone());

				{
					let mut state = self.state.lock().unwrap();
					state.rule = metadata.rule();
					state.sample_size = metadata.sample_size();

					if let Some(value_index) = metadata.value_index() {
						state.value_index = value_index;
					}

					if state.rule == Rule::Linear {
						match &state.table {
							Some(table) => table.lock().unwrap().update_metadata(&metadata),
							None => {
								state.table =
									Some(Arc::new(Mutex::new(LinearTable::new(&metadata))));
							}
						}
					}

					state.domain_table = match metadata.table_id() {
						Some(table_id) if table_id == self.id => {
							state.table.as_ref().map(Arc::downgrade).unwrap_or_default()
						}
						Some(table_id) => resolve(table_id)
							.and_then(|domain| domain.table())
							.map(|table| Arc::downgrade(&table))
							.unwrap_or_default(),
						None => Weak::new(),
					};

					state.metadata = metadata.clone();
				}

				self.on_metadata_changed.emit(&metadata);
			}

			other => {
				trace!(signal = %self.id, method = other, "ignoring unknown signal metadata method");
			}
		}
	}

	/// Detaches the signal from its connection: emits the terminal events
	/// and disconnects every observer. Called when the peer retracts the
	/// signal or the connection closes.
	pub fn detach(&self) {
		let fire = {
			let mut state = self.state.lock().unwrap();
			state.signo = 0;
			state.table = None;
			state.domain_table = Weak::new();
			std::mem::replace(&mut state.is_subscribed, false)
		};

		if fire {
			self.on_unsubscribed.emit(&());
		}

		self.on_unavailable.emit(&());

		self.on_subscribed.disconnect_all();
		self.on_unsubscribed.disconnect_all();
		self.on_metadata_changed.disconnect_all();
		self.on_data_received.disconnect_all();
		self.on_unavailable.disconnect_all();
		self.on_subscribe_requested.disconnect_all();
		self.on_unsubscribe_requested.disconnect_all();
	}

	/// Raised when the publisher confirms the subscription.
	pub fn on_subscribed(&self) -> &Event<()> {
		&self.on_subscribed
	}

	/// Raised when the subscription ends.
	pub fn on_unsubscribed(&self) -> &Event<()> {
		&self.on_unsubscribed
	}

	/// Raised when the publisher sends updated signal metadata.
	pub fn on_metadata_changed(&self) -> &Event<Metadata> {
		&self.on_metadata_changed
	}

	/// Raised for every received data packet.
	pub fn on_data_received(&self) -> &Event<DataRecord> {
		&self.on_data_received
	}

	/// Raised once when the signal disappears: peer retraction or
	/// connection close.
	pub fn on_unavailable(&self) -> &Event<()> {
		&self.on_unavailable
	}

	/// Used by the owning connection to translate observer interest into
	/// protocol subscribe requests.
	pub fn on_subscribe_requested(&self) -> &Event<()> {
		&self.on_subscribe_requested
	}

	/// Used by the owning connection to translate lost interest into
	/// protocol unsubscribe requests.
	pub fn on_unsubscribe_requested(&self) -> &Event<()> {
		&self.on_unsubscribe_requested
	}
}

impl std::fmt::Debug for RemoteSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RemoteSignal")
			.field("id", &self.id)
			.field("signo", &self.signo())
			.field("is_subscribed", &self.is_subscribed())
			.finish_non_exhaustive()
	}
}
