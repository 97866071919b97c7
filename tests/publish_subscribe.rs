// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Simple publish/subscribe over a real loopback connection.

mod common;

use std::sync::{mpsc, Arc};

use ws_streaming::{data_types, Client, DataRecord, LocalSignal, MetadataBuilder, Server};

#[test]
fn test_simple_publish_subscribe() {
	let server = Server::start(common::test_config()).unwrap();

	let value = LocalSignal::new(
		"/V",
		MetadataBuilder::new("V").data_type(data_types::REAL64).build(),
	);
	server.add_signal(&value);

	// Publish one block as soon as the first peer subscribes.
	let publisher = Arc::clone(&value);
	let _publish_slot = value.on_subscribed().connect(move |_| {
		publisher.publish_data(&common::real64_block(&[1.0, 2.0, 3.0]));
	});

	let client = Client::new(common::test_config()).unwrap();

	let (connection_tx, connection_rx) = mpsc::channel();
	let (record_tx, record_rx) = mpsc::channel::<DataRecord>();

	client.connect(&format!("ws://127.0.0.1:{}", server.streaming_port()), move |result| {
		let connection = result.unwrap();

		let record_tx = record_tx.clone();
		let available_slot = connection.on_available().connect(move |signal| {
			assert_eq!(signal.id(), "/V");

			let record_tx = record_tx.clone();
			let data_slot = signal.on_data_received().connect(move |record| {
				let _ = record_tx.send(record.clone());
			});
			std::mem::forget(data_slot);

			signal.subscribe();
		});

		connection_tx.send((connection, available_slot)).unwrap();
	});

	let (_connection, _available_slot) = connection_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

	let record = common::recv_within(&record_rx, 5000).expect("no data received");
	assert_eq!(record.sample_count, 3);
	assert_eq!(record.domain_value, 0);
	assert_eq!(&record.data[..], &common::real64_block(&[1.0, 2.0, 3.0])[..]);
}

#[test]
fn test_metadata_update_reaches_subscriber() {
	let server = Server::start(common::test_config()).unwrap();

	let value = LocalSignal::new(
		"/V",
		MetadataBuilder::new("V").data_type(data_types::REAL64).build(),
	);
	server.add_signal(&value);

	let (subscribed_tx, subscribed_rx) = mpsc::channel();
	let _subscribed_slot = value.on_subscribed().connect(move |_| {
		let _ = subscribed_tx.send(());
	});

	let client = Client::new(common::test_config()).unwrap();

	let (connection_tx, connection_rx) = mpsc::channel();
	let (metadata_tx, metadata_rx) = mpsc::channel();

	client.connect(&format!("ws://127.0.0.1:{}", server.streaming_port()), move |result| {
		let connection = result.unwrap();

		let metadata_tx = metadata_tx.clone();
		let available_slot = connection.on_available().connect(move |signal| {
			let metadata_tx = metadata_tx.clone();
			let metadata_slot = signal.on_metadata_changed().connect(move |metadata| {
				let _ = metadata_tx.send(metadata.clone());
			});
			std::mem::forget(metadata_slot);

			signal.subscribe();
		});

		connection_tx.send((connection, available_slot)).unwrap();
	});

	let _kept = connection_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

	// The subscription itself carries the initial metadata.
	let initial = common::recv_within(&metadata_rx, 5000).expect("no initial metadata");
	assert_eq!(initial.name(), Some("V"));

	common::recv_within(&subscribed_rx, 5000).expect("publisher never saw the subscribe");

	// An application metadata update is forwarded as a new signal message.
	value.set_metadata(
		MetadataBuilder::new("V-renamed").data_type(data_types::REAL64).range(-1.0, 1.0).build(),
	);

	let updated = common::recv_within(&metadata_rx, 5000).expect("no metadata update");
	assert_eq!(updated.name(), Some("V-renamed"));
	assert_eq!(updated.range(), Some((-1.0, 1.0)));
}
