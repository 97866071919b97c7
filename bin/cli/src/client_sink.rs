// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Demo client: connects to a streaming server, subscribes to "/Value",
//! and prints a line for every received data block. The hostname is the
//! sole positional argument. Press Ctrl+C to shut down gracefully.

use std::sync::{mpsc, Mutex};

use ws_streaming::{Client, EndpointConfig, Slot};

fn main() {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let hostname = std::env::args().nth(1).unwrap_or_else(|| {
		eprintln!("usage: client-sink <hostname>");
		std::process::exit(2);
	});

	let client = Client::new(EndpointConfig::default()).expect("failed to start client");

	let (shutdown_tx, shutdown_rx) = mpsc::channel();

	let disconnect_tx = shutdown_tx.clone();

	// Slots live for the life of the process.
	static SLOTS: Mutex<Vec<Slot>> = Mutex::new(Vec::new());

	client.connect(&format!("ws://{hostname}"), move |result| {
		let connection = match result {
			Ok(connection) => connection,
			Err(e) => {
				eprintln!("connect failed: {e}");
				std::process::exit(1);
			}
		};

		println!("connected to {}", connection.remote_stream_id());

		let available_slot = connection.on_available().connect(|signal| {
			println!("available signal: {}", signal.id());

			if signal.id() == "/Value" {
				let data_slot = signal.on_data_received().connect(|record| {
					println!(
						"received {} sample(s) ({} byte(s)) with domain value {}",
						record.sample_count,
						record.data.len(),
						record.domain_value
					);
				});
				SLOTS.lock().unwrap().push(data_slot);

				signal.subscribe();
			}
		});

		let unavailable_slot = connection.on_unavailable().connect(|signal| {
			println!("signal no longer available: {}", signal.id());
		});

		let disconnected_slot = connection.on_disconnected().connect(move |reason| {
			match reason {
				Some(e) => println!("connection closed: {e}"),
				None => println!("connection closed"),
			}
			let _ = disconnect_tx.send(());
		});

		let mut slots = SLOTS.lock().unwrap();
		slots.push(available_slot);
		slots.push(unavailable_slot);
		slots.push(disconnected_slot);
	});

	ctrlc::set_handler(move || {
		let _ = shutdown_tx.send(());
	})
	.expect("failed to install SIGINT handler");

	let _ = shutdown_rx.recv();
	println!("shutting down");
	drop(client);
}
