// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Fluent construction of signal metadata.

use serde_json::{json, Map, Value};

use crate::{
	metadata::{rules, Metadata},
	unit::Unit,
};

/// Builds the JSON metadata describing a signal.
///
/// ```
/// use ws_streaming_core::{data_types, MetadataBuilder, Unit};
///
/// let metadata = MetadataBuilder::new("Time")
/// 	.data_type(data_types::INT64)
/// 	.unit(Unit::seconds())
/// 	.linear_rule(0, 1_000_000)
/// 	.tick_resolution(1, 1_000_000_000)
/// 	.origin(ws_streaming_core::Metadata::UNIX_EPOCH)
/// 	.table("/Time")
/// 	.build();
/// assert_eq!(metadata.linear_start_delta(), (Some(0), Some(1_000_000)));
/// ```
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
	definition: Map<String, Value>,
	interpretation: Map<String, Value>,
	table_id: Option<String>,
}

impl MetadataBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		let mut definition = Map::new();
		definition.insert("name".to_string(), Value::from(name.into()));
		definition.insert("rule".to_string(), Value::from(rules::EXPLICIT));

		Self {
			definition,
			interpretation: Map::new(),
			table_id: None,
		}
	}

	pub fn data_type(mut self, data_type: &str) -> Self {
		self.definition.insert("dataType".to_string(), Value::from(data_type));
		self
	}

	pub fn endian(mut self, endian: &str) -> Self {
		self.definition.insert("endian".to_string(), Value::from(endian));
		self
	}

	/// Declares the signal linear-rule with the given start and per-sample
	/// delta.
	pub fn linear_rule(mut self, start: i64, delta: i64) -> Self {
		self.definition.insert("rule".to_string(), Value::from(rules::LINEAR));
		self.interpretation.insert(
			"rule".to_string(),
			json!({ "parameters": { "start": start, "delta": delta } }),
		);
		self
	}

	/// Declares the signal constant-rule: one value per packet, holding
	/// until the next.
	pub fn constant_rule(mut self) -> Self {
		self.definition.insert("rule".to_string(), Value::from(rules::CONSTANT));
		self
	}

	pub fn range(mut self, low: f64, high: f64) -> Self {
		self.definition.insert("range".to_string(), json!({ "low": low, "high": high }));
		self
	}

	pub fn tick_resolution(mut self, numerator: u64, denominator: u64) -> Self {
		self.definition
			.insert("resolution".to_string(), json!({ "num": numerator, "denom": denominator }));
		self
	}

	pub fn origin(mut self, origin: &str) -> Self {
		self.definition.insert("origin".to_string(), Value::from(origin));
		self
	}

	pub fn unit(mut self, unit: Unit) -> Self {
		self.interpretation.insert(
			"unit".to_string(),
			json!({
				"id": unit.id,
				"name": unit.name,
				"quantity": unit.quantity,
				"symbol": unit.symbol,
			}),
		);
		self
	}

	/// References the domain signal providing this signal's domain values.
	pub fn table(mut self, table_id: impl Into<String>) -> Self {
		self.table_id = Some(table_id.into());
		self
	}

	/// Appends a struct field. `count` scales the field by a linear first
	/// dimension. Implies `dataType: "struct"`.
	pub fn struct_field(mut self, name: &str, data_type: &str, count: Option<u64>) -> Self {
		self.definition.insert("dataType".to_string(), Value::from("struct"));

		let mut field = json!({ "name": name, "dataType": data_type });
		if let Some(count) = count {
			field.as_object_mut()
				.unwrap()
				.insert("dimensions".to_string(), json!([ { "linear": { "size": count } } ]));
		}

		match self.definition.get_mut("struct") {
			Some(Value::Array(fields)) => fields.push(field),
			_ => {
				self.definition.insert("struct".to_string(), Value::Array(vec![field]));
			}
		}

		self
	}

	pub fn build(self) -> Metadata {
		let mut root = Map::new();
		root.insert("definition".to_string(), Value::Object(self.definition));

		if !self.interpretation.is_empty() {
			root.insert("interpretation".to_string(), Value::Object(self.interpretation));
		}

		if let Some(table_id) = self.table_id {
			root.insert("tableId".to_string(), Value::from(table_id));
		}

		Metadata::from_value(Value::Object(root))
	}
}
