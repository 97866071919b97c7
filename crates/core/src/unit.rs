// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Units of measurement for signal values.

/// A unit of measurement attached to a signal's interpretation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
	/// Numeric unit id, or -1 when unassigned.
	pub id: i32,
	pub name: String,
	pub quantity: String,
	pub symbol: String,
}

impl Unit {
	pub fn new(id: i32, name: impl Into<String>, quantity: impl Into<String>, symbol: impl Into<String>) -> Self {
		Self {
			id,
			name: name.into(),
			quantity: quantity.into(),
			symbol: symbol.into(),
		}
	}

	pub fn volts() -> Self {
		Self::new(1280, "volts", "voltage", "V")
	}

	pub fn seconds() -> Self {
		Self::new(5457, "seconds", "time", "s")
	}
}
