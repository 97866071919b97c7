// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Connect cancellation: the handler fires exactly once with the
//! cancellation error, and the client remains usable afterwards.

mod common;

use std::net::TcpListener;
use std::sync::mpsc;
use std::time::Duration;

use ws_streaming::{Client, Server, StreamingError};

#[test]
fn test_cancel_aborts_connect_exactly_once() {
	// A listener that never answers: the TCP connect succeeds, but the
	// upgrade response never comes, so the attempt parks in its wait loop.
	let silent = TcpListener::bind("127.0.0.1:0").unwrap();
	let port = silent.local_addr().unwrap().port();

	let client = Client::new(common::test_config()).unwrap();

	let (result_tx, result_rx) = mpsc::channel();
	client.connect(&format!("ws://127.0.0.1:{port}"), move |result| {
		let _ = result_tx.send(result.map(|_| ()));
	});

	std::thread::sleep(Duration::from_millis(200));
	client.cancel();

	let result = result_rx.recv_timeout(Duration::from_secs(5)).expect("handler never ran");
	assert_eq!(result, Err(StreamingError::Cancelled));

	// Exactly once.
	assert!(result_rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn test_client_survives_cancel_and_reconnects() {
	let silent = TcpListener::bind("127.0.0.1:0").unwrap();
	let silent_port = silent.local_addr().unwrap().port();

	let server = Server::start(common::test_config()).unwrap();

	let client = Client::new(common::test_config()).unwrap();

	let (first_tx, first_rx) = mpsc::channel();
	client.connect(&format!("ws://127.0.0.1:{silent_port}"), move |result| {
		let _ = first_tx.send(result.map(|_| ()));
	});

	client.cancel();
	assert_eq!(
		first_rx.recv_timeout(Duration::from_secs(5)).expect("first handler never ran"),
		Err(StreamingError::Cancelled)
	);

	// A sequential attempt on the same client succeeds.
	let (second_tx, second_rx) = mpsc::channel();
	client.connect(&format!("ws://127.0.0.1:{}", server.streaming_port()), move |result| {
		let _ = second_tx.send(result);
	});

	let connection = second_rx
		.recv_timeout(Duration::from_secs(5))
		.expect("second handler never ran")
		.expect("second connect failed");
	assert!(!connection.local_stream_id().is_empty());
}
