// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Linear-rule domain signals: implicit subscription, anchor payloads, and
//! consumer-side domain value reconstruction.

mod common;

use std::sync::{mpsc, Arc};
use std::time::Duration;

use ws_streaming::{data_types, Client, ConnectionHandle, LocalSignal, Metadata, MetadataBuilder, RemoteSignal, Server, Slot, Unit};

const DELTA: i64 = 1_000_000;

fn time_signal() -> Arc<LocalSignal> {
	LocalSignal::new(
		"/T",
		MetadataBuilder::new("T")
			.data_type(data_types::INT64)
			.unit(Unit::seconds())
			.linear_rule(0, DELTA)
			.tick_resolution(1, 1_000_000_000)
			.origin(Metadata::UNIX_EPOCH)
			.table("/T")
			.build(),
	)
}

fn value_signal() -> Arc<LocalSignal> {
	LocalSignal::new(
		"/V",
		MetadataBuilder::new("V").data_type(data_types::REAL64).unit(Unit::volts()).table("/T").build(),
	)
}

struct Harness {
	_client: Client,
	_server: Server,
	_slots: Vec<Slot>,
	connection: ConnectionHandle,
	time: Arc<RemoteSignal>,
	value: Arc<RemoteSignal>,
	time_records: mpsc::Receiver<(i64, usize, usize)>,
	value_records: mpsc::Receiver<(i64, usize)>,
}

/// Connects a client and wires both remote signals with data observers,
/// without subscribing anything yet.
fn connect(server: Server) -> Harness {
	let client = Client::new(common::test_config()).unwrap();

	let (connection_tx, connection_rx) = mpsc::channel();
	let (signal_tx, signal_rx) = mpsc::channel();
	let (time_tx, time_records) = mpsc::channel();
	let (value_tx, value_records) = mpsc::channel();

	client.connect(&format!("ws://127.0.0.1:{}", server.streaming_port()), move |result| {
		let connection = result.unwrap();

		let signal_tx = signal_tx.clone();
		let time_tx = time_tx.clone();
		let value_tx = value_tx.clone();

		let available_slot = connection.on_available().connect(move |signal| {
			let slot = match signal.id() {
				"/T" => {
					let time_tx = time_tx.clone();
					signal.on_data_received().connect(move |record| {
						let _ = time_tx.send((
							record.domain_value,
							record.sample_count,
							record.data.len(),
						));
					})
				}
				"/V" => {
					let value_tx = value_tx.clone();
					signal.on_data_received().connect(move |record| {
						let _ = value_tx.send((record.domain_value, record.sample_count));
					})
				}
				other => panic!("unexpected signal {other}"),
			};

			signal_tx.send((Arc::clone(signal), slot)).unwrap();
		});

		connection_tx.send((connection, available_slot)).unwrap();
	});

	let (connection, available_slot) = connection_rx.recv_timeout(Duration::from_secs(5)).unwrap();

	let mut time = None;
	let mut value = None;
	let mut slots = vec![available_slot];

	for _ in 0..2 {
		let (signal, slot) = signal_rx.recv_timeout(Duration::from_secs(5)).unwrap();
		slots.push(slot);
		match signal.id() {
			"/T" => time = Some(signal),
			_ => value = Some(signal),
		}
	}

	Harness {
		_client: client,
		_server: server,
		_slots: slots,
		connection,
		time: time.expect("/T not advertised"),
		value: value.expect("/V not advertised"),
		time_records,
		value_records,
	}
}

#[test]
fn test_domain_values_are_reconstructed_exactly() {
	let server = Server::start(common::test_config()).unwrap();

	let time = time_signal();
	let value = value_signal();
	server.add_signal(&time);
	server.add_signal(&value);

	let (subscribed_tx, subscribed_rx) = mpsc::channel();
	let _subscribed_slot = value.on_subscribed().connect(move |_| {
		let _ = subscribed_tx.send(());
	});

	let harness = connect(server);
	harness.value.subscribe();

	common::recv_within(&subscribed_rx, 5000).expect("publisher never saw the subscribe");

	let block = common::real64_block(&[0.5; 10]);

	// First block: domain value 5ms diverges from the table's start of 0,
	// so an anchor must precede it.
	value.publish_data_with_domain(5_000_000, 10, &block);

	// Second block lands exactly on the linear extrapolation from the
	// first anchor: no new anchor.
	value.publish_data_with_domain(5_000_000 + 10 * DELTA, 10, &block);

	// Third block diverges again.
	value.publish_data_with_domain(99_000_000, 10, &block);

	let mut decorated = Vec::new();
	for _ in 0..3 {
		decorated.push(common::recv_within(&harness.value_records, 5000).expect("missing value block"));
	}

	// The consumer reconstructs every transmitted domain value exactly.
	assert_eq!(
		decorated,
		vec![(5_000_000, 10), (5_000_000 + 10 * DELTA, 10), (99_000_000, 10)]
	);

	// Exactly the two diverging blocks produced anchors on the domain
	// signal, each a 16-byte linear payload.
	let first_anchor = common::recv_within(&harness.time_records, 5000).expect("missing first anchor");
	assert_eq!(first_anchor, (5_000_000, 1, 16));

	let second_anchor = common::recv_within(&harness.time_records, 5000).expect("missing second anchor");
	assert_eq!(second_anchor, (99_000_000, 1, 16));

	assert!(common::recv_within(&harness.time_records, 300).is_none(), "unexpected extra anchor");

	// Signal numbers are distinct and live.
	assert_ne!(harness.time.signo(), 0);
	assert_ne!(harness.value.signo(), 0);
	assert_ne!(harness.time.signo(), harness.value.signo());

	drop(harness.connection);
}

#[test]
fn test_implicit_subscription_edge_counting() {
	let server = Server::start(common::test_config()).unwrap();

	let time = time_signal();
	let value = value_signal();
	server.add_signal(&time);
	server.add_signal(&value);

	let harness = connect(server);

	let (time_subscribed_tx, time_subscribed_rx) = mpsc::channel();
	let (time_unsubscribed_tx, time_unsubscribed_rx) = mpsc::channel();

	let _subscribed_slot = harness.time.on_subscribed().connect(move |_| {
		let _ = time_subscribed_tx.send(());
	});
	let _unsubscribed_slot = harness.time.on_unsubscribed().connect(move |_| {
		let _ = time_unsubscribed_tx.send(());
	});

	// Explicitly subscribing the value signal implicitly subscribes its
	// domain signal: exactly one on-wire subscribe for /T.
	harness.value.subscribe();
	common::recv_within(&time_subscribed_rx, 5000).expect("/T was never subscribed");

	// An additional explicit subscribe of /T must not resubscribe it.
	harness.time.subscribe();
	assert!(common::recv_within(&time_subscribed_rx, 300).is_none(), "duplicate /T subscribe");

	// Releasing the value signal releases only the implicit reference;
	// the explicit one keeps /T alive.
	harness.value.unsubscribe();
	assert!(common::recv_within(&time_unsubscribed_rx, 300).is_none(), "/T released too early");

	// Releasing the last reference unsubscribes /T on the wire, exactly
	// once.
	harness.time.unsubscribe();
	common::recv_within(&time_unsubscribed_rx, 5000).expect("/T was never unsubscribed");
	assert!(common::recv_within(&time_unsubscribed_rx, 300).is_none(), "duplicate /T unsubscribe");
}
