// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Shared helpers for the end-to-end scenario tests.

#![allow(dead_code)]

use std::sync::mpsc::Receiver;
use std::time::Duration;

use ws_streaming::EndpointConfig;

/// Loopback configuration with ephemeral ports and buffers small enough to
/// keep the tests light.
pub fn test_config() -> EndpointConfig {
	EndpointConfig::new()
		.bind_addr("127.0.0.1")
		.streaming_port(0)
		.command_interface_port(Some(0))
		.rx_buffer_size(256 * 1024)
		.tx_buffer_size(1024 * 1024)
		.connect_timeout(Duration::from_secs(5))
}

/// Receives with a timeout, `None` when nothing arrived in time.
pub fn recv_within<T>(receiver: &Receiver<T>, millis: u64) -> Option<T> {
	receiver.recv_timeout(Duration::from_millis(millis)).ok()
}

/// Encodes real64 samples the way a publisher would.
pub fn real64_block(samples: &[f64]) -> Vec<u8> {
	samples.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}
