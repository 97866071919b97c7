// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Linear-rule domain tables.
//!
//! A linear table is the authoritative cursor for one linear-rule signal. It
//! stores a reference point `(index, value)`, a per-sample `delta`, and the
//! "driven" index: how far the domain has been advanced by published value
//! data.

use ws_streaming_protocol::linear::LinearPayload;

use crate::metadata::Metadata;

/// The cursor state of a linear-rule signal.
///
/// Invariants: `value_at(i) = value + delta * (i - index)`, and
/// `driven_index >= index`. Resetting the reference point pulls the driven
/// index back onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinearTable {
	index: i64,
	value: i64,
	delta: i64,
	driven_index: i64,
}

impl LinearTable {
	pub fn new(metadata: &Metadata) -> Self {
		let mut table = Self::default();
		table.update_metadata(metadata);
		table
	}

	/// Applies metadata to the table: linear-rule `start`/`delta` replace
	/// the value and delta where present, and a `valueIndex` re-anchors the
	/// reference point.
	pub fn update_metadata(&mut self, metadata: &Metadata) {
		let (start, delta) = metadata.linear_start_delta();

		if let Some(start) = start {
			self.value = start;
		}
		if let Some(delta) = delta {
			self.delta = delta;
		}

		if let Some(index) = metadata.value_index() {
			self.index = index;
			self.driven_index = index;
		}
	}

	/// Applies an on-wire anchor payload to the table.
	pub fn update_payload(&mut self, payload: &LinearPayload) {
		self.index = payload.sample_index;
		self.value = payload.value;
		self.driven_index = payload.sample_index;
	}

	/// The domain value at the given sample index.
	pub fn value_at(&self, index: i64) -> i64 {
		self.value + self.delta * (index - self.index)
	}

	/// The domain value at the driven index.
	pub fn driven_value(&self) -> i64 {
		self.value_at(self.driven_index)
	}

	/// Point-sets the reference point, pulling the driven index onto it.
	pub fn set(&mut self, index: i64, value: i64) {
		self.index = index;
		self.value = value;
		self.driven_index = index;
	}

	/// Advances the driven index only.
	pub fn drive_to(&mut self, index: i64) {
		self.driven_index = index;
	}

	pub fn driven_index(&self) -> i64 {
		self.driven_index
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn linear_metadata(start: i64, delta: i64) -> Metadata {
		Metadata::from_value(json!({
			"definition": { "rule": "linear" },
			"interpretation": { "rule": { "parameters": { "start": start, "delta": delta } } },
		}))
	}

	#[test]
	fn test_value_is_affine_in_index() {
		let mut table = LinearTable::default();
		table.set(10, 1000);
		table.update_metadata(&linear_metadata(1000, 5));

		for index in [-3i64, 0, 10, 11, 1000] {
			assert_eq!(table.value_at(index), 1000 + 5 * (index - 10));
		}
	}

	#[test]
	fn test_metadata_value_index_reanchors() {
		let mut table = LinearTable::new(&linear_metadata(0, 7));
		table.drive_to(20);

		let metadata = Metadata::from_value(json!({
			"definition": { "rule": "linear" },
			"interpretation": { "rule": { "parameters": { "start": 100, "delta": 7 } } },
			"valueIndex": 4,
		}));
		table.update_metadata(&metadata);

		assert_eq!(table.driven_index(), 4);
		assert_eq!(table.value_at(4), 100);
		assert_eq!(table.value_at(5), 107);
	}

	#[test]
	fn test_payload_update_resets_driven_index() {
		let mut table = LinearTable::new(&linear_metadata(0, 2));
		table.drive_to(50);

		table.update_payload(&LinearPayload {
			sample_index: 30,
			value: 900,
		});

		assert_eq!(table.driven_index(), 30);
		assert_eq!(table.driven_value(), 900);
		assert_eq!(table.value_at(31), 902);
	}

	#[test]
	fn test_set_and_drive() {
		let mut table = LinearTable::new(&linear_metadata(0, 1_000_000));
		table.set(3, 5_000_000);
		assert_eq!(table.driven_index(), 3);
		assert_eq!(table.driven_value(), 5_000_000);

		table.drive_to(13);
		assert_eq!(table.driven_index(), 13);
		assert_eq!(table.driven_value(), 15_000_000);
	}

	#[test]
	fn test_partial_metadata_keeps_existing_parameters() {
		let mut table = LinearTable::new(&linear_metadata(500, 9));

		// delta only: value and anchor survive
		let metadata = Metadata::from_value(json!({
			"definition": { "rule": "linear" },
			"interpretation": { "rule": { "parameters": { "delta": 4 } } },
		}));
		table.update_metadata(&metadata);

		assert_eq!(table.value_at(0), 500);
		assert_eq!(table.value_at(2), 508);
	}
}
