// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Event dispatch primitives.
//!
//! An [`Event`] is a list of callbacks. Connecting returns a [`Slot`] whose
//! drop disconnects the callback, so observers tie their interest to a scope
//! instead of remembering to unregister. Emission snapshots the callback
//! list first, so a callback may connect or disconnect slots on the same
//! event without deadlocking.

use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
	slots: Vec<(u64, Callback<T>)>,
	next_id: u64,
}

/// A multi-observer event channel carrying values of type `T`.
pub struct Event<T> {
	registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Default for Event<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for Event<T> {
	fn clone(&self) -> Self {
		Self {
			registry: Arc::clone(&self.registry),
		}
	}
}

impl<T: 'static> Event<T> {
	pub fn new() -> Self {
		Self {
			registry: Arc::new(Mutex::new(Registry {
				slots: Vec::new(),
				next_id: 0,
			})),
		}
	}

	/// Connects a callback, returning the slot that keeps it connected.
	#[must_use = "dropping the slot disconnects the callback"]
	pub fn connect(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Slot {
		let id = {
			let mut registry = self.registry.lock().unwrap();
			let id = registry.next_id;
			registry.next_id += 1;
			registry.slots.push((id, Arc::new(callback)));
			id
		};

		let weak = Arc::downgrade(&self.registry);
		Slot {
			detach: Some(Box::new(move || disconnect(&weak, id))),
		}
	}

	/// Invokes every connected callback with `value`.
	pub fn emit(&self, value: &T) {
		let callbacks: Vec<Callback<T>> = {
			let registry = self.registry.lock().unwrap();
			registry.slots.iter().map(|(_, callback)| Arc::clone(callback)).collect()
		};

		for callback in callbacks {
			callback(value);
		}
	}

	/// Disconnects every callback. Outstanding [`Slot`]s become inert.
	pub fn disconnect_all(&self) {
		self.registry.lock().unwrap().slots.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.registry.lock().unwrap().slots.is_empty()
	}
}

fn disconnect<T>(registry: &Weak<Mutex<Registry<T>>>, id: u64) {
	if let Some(registry) = registry.upgrade() {
		registry.lock().unwrap().slots.retain(|(slot_id, _)| *slot_id != id);
	}
}

/// A scoped handle for a connected callback. Dropping it disconnects.
pub struct Slot {
	detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Slot {
	/// Disconnects now instead of at end of scope.
	pub fn disconnect(mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl Drop for Slot {
	fn drop(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl std::fmt::Debug for Slot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Slot").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[test]
	fn test_emit_reaches_all_slots() {
		let event = Event::<u32>::new();
		let count = Arc::new(AtomicUsize::new(0));

		let count_a = Arc::clone(&count);
		let _a = event.connect(move |value| {
			count_a.fetch_add(*value as usize, Ordering::SeqCst);
		});

		let count_b = Arc::clone(&count);
		let _b = event.connect(move |value| {
			count_b.fetch_add(*value as usize, Ordering::SeqCst);
		});

		event.emit(&3);
		assert_eq!(count.load(Ordering::SeqCst), 6);
	}

	#[test]
	fn test_dropped_slot_disconnects() {
		let event = Event::<()>::new();
		let count = Arc::new(AtomicUsize::new(0));

		let count_clone = Arc::clone(&count);
		let slot = event.connect(move |_| {
			count_clone.fetch_add(1, Ordering::SeqCst);
		});

		event.emit(&());
		drop(slot);
		event.emit(&());

		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_disconnect_all() {
		let event = Event::<()>::new();
		let count = Arc::new(AtomicUsize::new(0));

		let count_clone = Arc::clone(&count);
		let slot = event.connect(move |_| {
			count_clone.fetch_add(1, Ordering::SeqCst);
		});

		event.disconnect_all();
		event.emit(&());
		assert_eq!(count.load(Ordering::SeqCst), 0);

		// Dropping the stale slot afterwards must not panic.
		drop(slot);
	}

	#[test]
	fn test_slot_can_drop_inside_callback() {
		// A callback disconnecting a slot of the same event must not
		// deadlock.
		let event = Event::<()>::new();
		let held: Arc<Mutex<Option<Slot>>> = Arc::new(Mutex::new(None));

		let held_clone = Arc::clone(&held);
		let slot = event.connect(move |_| {
			if let Some(slot) = held_clone.lock().unwrap().take() {
				slot.disconnect();
			}
		});

		*held.lock().unwrap() = Some(slot);
		event.emit(&());
		assert!(event.is_empty());
	}
}
