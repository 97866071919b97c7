// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Symmetric publish/subscribe streaming of tagged signal data over
//! WebSocket.
//!
//! A process acts as a [`Server`], a [`Client`], or both. Peers advertise
//! named signals, subscribe to each other's signals, and exchange packets
//! of typed binary sample data interleaved with metadata describing signal
//! shape, rule, units, and time domain.
//!
//! # Publishing
//!
//! ```no_run
//! use ws_streaming::{data_types, EndpointConfig, LocalSignal, MetadataBuilder, Server, Unit};
//!
//! let server = Server::start(EndpointConfig::default()).unwrap();
//!
//! let value = LocalSignal::new(
//! 	"/Value",
//! 	MetadataBuilder::new("Value")
//! 		.data_type(data_types::REAL64)
//! 		.unit(Unit::volts())
//! 		.build(),
//! );
//! server.add_signal(&value);
//!
//! let samples = [0.0f64; 100];
//! let bytes: Vec<u8> = samples.iter().flat_map(|sample| sample.to_le_bytes()).collect();
//! value.publish_data(&bytes);
//! ```
//!
//! # Subscribing
//!
//! ```no_run
//! use ws_streaming::{Client, EndpointConfig};
//!
//! let client = Client::new(EndpointConfig::default()).unwrap();
//! client.connect("ws://localhost", |result| {
//! 	let connection = result.unwrap();
//! 	let slot = connection.on_available().connect(|signal| {
//! 		if signal.id() == "/Value" {
//! 			signal.subscribe();
//! 		}
//! 	});
//! 	std::mem::forget(slot);
//! });
//! ```

pub use ws_streaming_core::{
	data_types, rules, DataBlock, DataRecord, Event, LinearTable, LocalSignal, Metadata, MetadataBuilder,
	RemoteSignal, Result, Rule, Slot, StreamingError, SubscribeHolder, Unit,
};
pub use ws_streaming_network::{fault, Client, ConnectionHandle, EndpointConfig, Server};

/// Wire-level codecs, exposed for advanced integrations and tests.
pub use ws_streaming_protocol as protocol;
