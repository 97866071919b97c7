// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Demo server: publishes a sine wave on "/Value" with a linear time
//! domain on "/Time". The acquisition loop runs only while at least one
//! peer is subscribed. Press Ctrl+C to shut down gracefully.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	mpsc, Arc,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ws_streaming::{data_types, EndpointConfig, LocalSignal, Metadata, MetadataBuilder, Server, Unit};

const SAMPLE_RATE: u64 = 1000;
const BLOCK_RATE: u64 = 10;

fn now_nanos() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_nanos() as i64
}

fn main() {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let time_signal = LocalSignal::new(
		"/Time",
		MetadataBuilder::new("Time")
			.data_type(data_types::INT64)
			.unit(Unit::seconds())
			.linear_rule(0, (1_000_000_000 / SAMPLE_RATE) as i64)
			.tick_resolution(1, 1_000_000_000)
			.origin(Metadata::UNIX_EPOCH)
			.table("/Time")
			.build(),
	);

	let value_signal = LocalSignal::new(
		"/Value",
		MetadataBuilder::new("Value")
			.data_type(data_types::REAL64)
			.unit(Unit::volts())
			.range(-10.0, 10.0)
			.table("/Time")
			.build(),
	);

	let server = Server::start(EndpointConfig::default()).expect("failed to start server");
	server.add_signal(&time_signal);
	server.add_signal(&value_signal);

	println!(
		"serving on port {} (command interface on {:?})",
		server.streaming_port(),
		server.command_interface_port()
	);

	// Lazy-publish: run the acquisition loop only while subscribed.
	let exit = Arc::new(AtomicBool::new(false));

	let acquisition_signal = Arc::clone(&value_signal);
	let acquisition_exit = Arc::clone(&exit);
	let _subscribed_slot = value_signal.on_subscribed().connect(move |_| {
		println!("value signal subscribed, starting acquisition loop");

		acquisition_exit.store(false, Ordering::SeqCst);
		let signal = Arc::clone(&acquisition_signal);
		let exit = Arc::clone(&acquisition_exit);

		std::thread::spawn(move || {
			let block_size = (SAMPLE_RATE / BLOCK_RATE) as usize;
			let mut phase = 0.0f64;

			while !exit.load(Ordering::SeqCst) {
				std::thread::sleep(Duration::from_millis(1000 / BLOCK_RATE));

				let mut bytes = Vec::with_capacity(block_size * 8);
				for _ in 0..block_size {
					phase += std::f64::consts::TAU / SAMPLE_RATE as f64;
					bytes.extend_from_slice(&(10.0 * phase.sin()).to_le_bytes());
				}

				signal.publish_data_with_domain(now_nanos(), block_size, &bytes);
			}
		});
	});

	let stop_exit = Arc::clone(&exit);
	let _unsubscribed_slot = value_signal.on_unsubscribed().connect(move |_| {
		println!("value signal unsubscribed, stopping acquisition loop");
		stop_exit.store(true, Ordering::SeqCst);
	});

	let (shutdown_tx, shutdown_rx) = mpsc::channel();
	ctrlc::set_handler(move || {
		let _ = shutdown_tx.send(());
	})
	.expect("failed to install SIGINT handler");

	let _ = shutdown_rx.recv();
	println!("shutting down");

	exit.store(true, Ordering::SeqCst);
	drop(server);
}
