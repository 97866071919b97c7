// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Signal metadata.
//!
//! Metadata is stored and transmitted as JSON. [`Metadata`] wraps a JSON
//! object and exposes safe accessors for the fields the protocol recognizes;
//! absent or wrong-typed values yield `None` or a documented default, never
//! an error. Use [`crate::MetadataBuilder`] to construct metadata.

use serde_json::Value;

use crate::unit::Unit;

/// Signal data type strings defined by the protocol. User-defined strings
/// are also allowed on the wire.
pub mod data_types {
	pub const INT8: &str = "int8";
	pub const INT16: &str = "int16";
	pub const INT32: &str = "int32";
	pub const INT64: &str = "int64";
	pub const UINT8: &str = "uint8";
	pub const UINT16: &str = "uint16";
	pub const UINT32: &str = "uint32";
	pub const UINT64: &str = "uint64";
	pub const REAL32: &str = "real32";
	pub const REAL64: &str = "real64";
	pub const STRUCT: &str = "struct";
}

/// Rule type strings defined by the protocol.
pub mod rules {
	/// Data is given explicitly for each sample.
	pub const EXPLICIT: &str = "explicit";
	/// Data is an affine function of the sample index.
	pub const LINEAR: &str = "linear";
	/// Data is constant until a new value is published.
	pub const CONSTANT: &str = "constant";
}

/// A signal's domain rule, decoded from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rule {
	#[default]
	Explicit,
	Linear,
	Constant,
}

impl Rule {
	pub fn from_str(value: &str) -> Self {
		match value {
			rules::LINEAR => Self::Linear,
			rules::CONSTANT => Self::Constant,
			_ => Self::Explicit,
		}
	}
}

fn primitive_size(data_type: &str) -> usize {
	match data_type {
		data_types::INT8 | data_types::UINT8 => 1,
		data_types::INT16 | data_types::UINT16 => 2,
		data_types::INT32 | data_types::UINT32 | data_types::REAL32 => 4,
		data_types::INT64 | data_types::UINT64 | data_types::REAL64 => 8,
		_ => 0,
	}
}

/// Metadata describing a signal: its type and format, and how to interpret
/// published data (range, units of measurement, domain).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
	json: Value,
}

impl Metadata {
	/// The UNIX epoch as an ISO-8601 string, suitable as an `origin` value.
	pub const UNIX_EPOCH: &'static str = "1970-01-01T00:00:00.000Z";

	/// Constructs empty metadata. Not valid for a signal on its own.
	pub fn new() -> Self {
		Self {
			json: Value::Object(Default::default()),
		}
	}

	/// Wraps a JSON value. Anything but an object is coerced to an empty
	/// object.
	pub fn from_value(json: Value) -> Self {
		if json.is_object() {
			Self { json }
		} else {
			Self::new()
		}
	}

	/// The underlying JSON object.
	pub fn json(&self) -> &Value {
		&self.json
	}

	/// Walks a field path, returning `None` on any absent or wrong-typed
	/// step.
	fn path(&self, segments: &[&str]) -> Option<&Value> {
		let mut current = &self.json;
		for segment in segments {
			current = current.as_object()?.get(*segment)?;
		}
		Some(current)
	}

	fn path_str(&self, segments: &[&str]) -> Option<&str> {
		self.path(segments)?.as_str()
	}

	/// The signal name.
	pub fn name(&self) -> Option<&str> {
		self.path_str(&["definition", "name"])
	}

	/// The data type string.
	pub fn data_type(&self) -> Option<&str> {
		self.path_str(&["definition", "dataType"])
	}

	/// The byte-order string of sample data.
	pub fn endian(&self) -> Option<&str> {
		self.path_str(&["definition", "endian"])
	}

	/// The rule type string; `explicit` when not set.
	pub fn rule_str(&self) -> &str {
		self.path_str(&["definition", "rule"]).unwrap_or(rules::EXPLICIT)
	}

	/// The decoded domain rule.
	pub fn rule(&self) -> Rule {
		Rule::from_str(self.rule_str())
	}

	/// The expected value range as `(low, high)`.
	pub fn range(&self) -> Option<(f64, f64)> {
		let range = self.path(&["definition", "range"])?;
		let low = range.get("low").and_then(Value::as_f64).unwrap_or(0.0);
		let high = range.get("high").and_then(Value::as_f64).unwrap_or(0.0);
		Some((low, high))
	}

	/// The tick resolution ratio as `(numerator, denominator)`: how much of
	/// the signal's unit one tick represents.
	pub fn tick_resolution(&self) -> Option<(u64, u64)> {
		let resolution = self.path(&["definition", "resolution"])?;
		let numerator = resolution.get("num").and_then(Value::as_u64).unwrap_or(1);
		let denominator = resolution.get("denom").and_then(Value::as_u64).unwrap_or(1);
		Some((numerator, denominator))
	}

	/// The origin string. For time signals this is the ISO-8601 calendar
	/// time represented by zero ticks.
	pub fn origin(&self) -> Option<&str> {
		self.path_str(&["definition", "origin"])
			.or_else(|| self.path_str(&["interpretation", "origin"]))
	}

	/// The id of the associated domain signal, if any.
	pub fn table_id(&self) -> Option<&str> {
		self.path_str(&["tableId"])
	}

	/// The sample index at which the attached linear parameters apply.
	pub fn value_index(&self) -> Option<i64> {
		self.path(&["valueIndex"])?.as_i64()
	}

	/// The linear-rule `(start, delta)` parameters. Either is `None` when
	/// missing, and both are `None` when the signal is not linear-rule.
	pub fn linear_start_delta(&self) -> (Option<i64>, Option<i64>) {
		if self.rule() != Rule::Linear {
			return (None, None);
		}

		let Some(parameters) = self.path(&["interpretation", "rule", "parameters"]) else {
			return (None, None);
		};

		let start = parameters.get("start").and_then(Value::as_i64);
		let delta = parameters.get("delta").and_then(Value::as_i64);
		(start, delta)
	}

	/// The unit of measurement.
	pub fn unit(&self) -> Option<Unit> {
		let unit = self.path(&["interpretation", "unit"])?;

		Some(Unit {
			id: unit.get("id").and_then(Value::as_i64).map(|id| id as i32).unwrap_or(-1),
			name: unit.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
			quantity: unit.get("quantity").and_then(Value::as_str).unwrap_or_default().to_string(),
			symbol: unit.get("symbol").and_then(Value::as_str).unwrap_or_default().to_string(),
		})
	}

	/// The size of one sample in bytes, when deterministic: primitive data
	/// types have fixed sizes, and struct types are the sum of their fields
	/// (a field's first dimension may scale it by a linear size). Unknown
	/// and user-defined types yield 0.
	pub fn sample_size(&self) -> usize {
		let Some(data_type) = self.data_type() else {
			return 0;
		};

		let size = primitive_size(data_type);
		if size != 0 || data_type != data_types::STRUCT {
			return size;
		}

		let Some(fields) = self.path(&["definition", "struct"]).and_then(Value::as_array) else {
			return 0;
		};

		let mut total = 0;
		for field in fields {
			let Some(field_type) = field.get("dataType").and_then(Value::as_str) else {
				continue;
			};

			let mut field_size = primitive_size(field_type);

			let count = field
				.get("dimensions")
				.and_then(Value::as_array)
				.and_then(|dimensions| dimensions.first())
				.and_then(|dimension| dimension.get("linear"))
				.and_then(|linear| linear.get("size"))
				.and_then(Value::as_u64);

			if let Some(count) = count {
				field_size *= count as usize;
			}

			total += field_size;
		}

		total
	}

	/// Returns a copy of this metadata with the top-level `valueIndex`
	/// replaced. The publisher merges the current value index into the
	/// `signal` message sent on subscribe and on metadata updates.
	pub fn with_value_index(&self, value_index: i64) -> Self {
		let mut json = self.json.clone();
		if let Some(object) = json.as_object_mut() {
			object.insert("valueIndex".to_string(), Value::from(value_index));
		}
		Self { json }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn metadata(json: Value) -> Metadata {
		Metadata::from_value(json)
	}

	#[test]
	fn test_non_object_coerces_to_empty() {
		let m = Metadata::from_value(json!([1, 2]));
		assert_eq!(m.json(), &json!({}));
	}

	#[test]
	fn test_accessors_tolerate_missing_and_wrong_types() {
		let m = metadata(json!({ "definition": { "name": 5, "rule": [] } }));
		assert_eq!(m.name(), None);
		assert_eq!(m.data_type(), None);
		assert_eq!(m.rule_str(), rules::EXPLICIT);
		assert_eq!(m.table_id(), None);
		assert_eq!(m.value_index(), None);
		assert_eq!(m.linear_start_delta(), (None, None));
	}

	#[test]
	fn test_linear_parameters() {
		let m = metadata(json!({
			"definition": { "rule": "linear" },
			"interpretation": { "rule": { "parameters": { "start": 0, "delta": 1000 } } },
		}));
		assert_eq!(m.rule(), Rule::Linear);
		assert_eq!(m.linear_start_delta(), (Some(0), Some(1000)));
	}

	#[test]
	fn test_linear_parameters_require_linear_rule() {
		let m = metadata(json!({
			"interpretation": { "rule": { "parameters": { "start": 0, "delta": 1000 } } },
		}));
		assert_eq!(m.linear_start_delta(), (None, None));
	}

	#[test]
	fn test_primitive_sample_sizes() {
		for (data_type, expected) in [
			(data_types::INT8, 1),
			(data_types::UINT16, 2),
			(data_types::REAL32, 4),
			(data_types::INT64, 8),
			(data_types::REAL64, 8),
			("customVendorType", 0),
		] {
			let m = metadata(json!({ "definition": { "dataType": data_type } }));
			assert_eq!(m.sample_size(), expected, "{data_type}");
		}
	}

	#[test]
	fn test_struct_sample_size_with_linear_dimension() {
		let m = metadata(json!({
			"definition": {
				"dataType": "struct",
				"struct": [
					{ "dataType": "uint32" },
					{ "dataType": "real64", "dimensions": [ { "linear": { "size": 4 } } ] },
					{ "dataType": "uint8" },
				],
			},
		}));
		assert_eq!(m.sample_size(), 4 + 8 * 4 + 1);
	}

	#[test]
	fn test_with_value_index_merges() {
		let m = metadata(json!({ "definition": { "name": "v" }, "valueIndex": 2 }));
		let merged = m.with_value_index(40);
		assert_eq!(merged.value_index(), Some(40));
		assert_eq!(merged.name(), Some("v"));
		// The original is untouched.
		assert_eq!(m.value_index(), Some(2));
	}

	#[test]
	fn test_tick_resolution_defaults() {
		let m = metadata(json!({ "definition": { "resolution": { "denom": 1000000000u64 } } }));
		assert_eq!(m.tick_resolution(), Some((1, 1_000_000_000)));
		assert_eq!(metadata(json!({})).tick_resolution(), None);
	}

	#[test]
	fn test_unit() {
		let m = metadata(json!({
			"interpretation": { "unit": { "id": 5, "name": "volts", "quantity": "voltage", "symbol": "V" } },
		}));
		let unit = m.unit().unwrap();
		assert_eq!(unit.id, 5);
		assert_eq!(unit.symbol, "V");
	}
}
