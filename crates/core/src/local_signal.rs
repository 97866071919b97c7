// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Producer-side signal handles.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

use bytes::Bytes;

use crate::{event::Event, metadata::Metadata};

/// A block of published sample data, as fanned out to streaming endpoints.
#[derive(Debug, Clone)]
pub struct DataBlock {
	/// The domain value associated with the first sample, or zero when the
	/// producer published without domain information.
	pub domain_value: i64,
	/// The number of samples in the block, or zero when the producer
	/// published without domain information.
	pub sample_count: usize,
	/// The raw sample bytes.
	pub data: Bytes,
}

/// A signal sourced by the application.
///
/// Create one instance per signal to be streamed and register it with
/// endpoints such as a server; a signal may be registered with any number of
/// connections, which share its subscribe count and data channel.
///
/// [`LocalSignal::publish_data`] and
/// [`LocalSignal::publish_data_with_domain`] may be called from an
/// acquisition thread without further synchronization.
pub struct LocalSignal {
	id: String,
	metadata: Mutex<Metadata>,
	subscribe_count: AtomicUsize,

	on_subscribed: Event<()>,
	on_unsubscribed: Event<()>,
	on_metadata_changed: Event<Metadata>,
	on_data_published: Event<DataBlock>,
}

impl LocalSignal {
	/// Creates a signal with the given globally unique identifier.
	pub fn new(id: impl Into<String>, metadata: Metadata) -> Arc<Self> {
		Arc::new(Self {
			id: id.into(),
			metadata: Mutex::new(metadata),
			subscribe_count: AtomicUsize::new(0),
			on_subscribed: Event::new(),
			on_unsubscribed: Event::new(),
			on_metadata_changed: Event::new(),
			on_data_published: Event::new(),
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn metadata(&self) -> Metadata {
		self.metadata.lock().unwrap().clone()
	}

	/// Replaces the signal's metadata. Subscribed peers receive the update
	/// as a `signal` message before any subsequently published data.
	pub fn set_metadata(&self, metadata: Metadata) {
		*self.metadata.lock().unwrap() = metadata.clone();
		self.on_metadata_changed.emit(&metadata);
	}

	/// Publishes sample data without domain information.
	pub fn publish_data(&self, data: &[u8]) {
		self.on_data_published.emit(&DataBlock {
			domain_value: 0,
			sample_count: 0,
			data: Bytes::copy_from_slice(data),
		});
	}

	/// Publishes sample data for a signal with a linear-rule domain.
	/// `domain_value` is the domain value of the first sample in the block;
	/// endpoints use it to keep consumer-side domain tables anchored.
	pub fn publish_data_with_domain(&self, domain_value: i64, sample_count: usize, data: &[u8]) {
		self.on_data_published.emit(&DataBlock {
			domain_value,
			sample_count,
			data: Bytes::copy_from_slice(data),
		});
	}

	/// True while one or more remote peers are subscribed.
	pub fn is_subscribed(&self) -> bool {
		self.subscribe_count.load(Ordering::SeqCst) > 0
	}

	pub fn subscribe_count(&self) -> usize {
		self.subscribe_count.load(Ordering::SeqCst)
	}

	/// Raises the subscribe count for the lifetime of the returned holder.
	pub fn increment_subscribe_count(self: &Arc<Self>) -> SubscribeHolder {
		if self.subscribe_count.fetch_add(1, Ordering::SeqCst) == 0 {
			self.on_subscribed.emit(&());
		}

		SubscribeHolder {
			signal: Some(Arc::clone(self)),
		}
	}

	/// Raised when the subscribe count transitions from zero. Applications
	/// can use this to lazily start an acquisition loop.
	pub fn on_subscribed(&self) -> &Event<()> {
		&self.on_subscribed
	}

	/// Raised when the subscribe count returns to zero.
	pub fn on_unsubscribed(&self) -> &Event<()> {
		&self.on_unsubscribed
	}

	/// Raised by [`set_metadata`](Self::set_metadata). Used by streaming
	/// endpoints.
	pub fn on_metadata_changed(&self) -> &Event<Metadata> {
		&self.on_metadata_changed
	}

	/// Raised by the publish functions. Used by streaming endpoints.
	pub fn on_data_published(&self) -> &Event<DataBlock> {
		&self.on_data_published
	}
}

impl std::fmt::Debug for LocalSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalSignal")
			.field("id", &self.id)
			.field("subscribe_count", &self.subscribe_count.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}

/// An RAII handle held while a remote peer is subscribed to a local signal.
/// Dropping it decrements the subscribe count, raising `on_unsubscribed`
/// when the count reaches zero.
#[derive(Debug, Default)]
pub struct SubscribeHolder {
	signal: Option<Arc<LocalSignal>>,
}

impl SubscribeHolder {
	/// A holder that tracks no signal.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Releases the held subscription now instead of at end of scope.
	pub fn close(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let Some(signal) = self.signal.take() {
			if signal.subscribe_count.fetch_sub(1, Ordering::SeqCst) == 1 {
				signal.on_unsubscribed.emit(&());
			}
		}
	}
}

impl Drop for SubscribeHolder {
	fn drop(&mut self) {
		self.release();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use crate::MetadataBuilder;

	use super::*;

	fn signal() -> Arc<LocalSignal> {
		LocalSignal::new("/Value", MetadataBuilder::new("Value").build())
	}

	#[test]
	fn test_subscribe_transitions_fire_once() {
		let signal = signal();
		let subscribed = Arc::new(AtomicUsize::new(0));
		let unsubscribed = Arc::new(AtomicUsize::new(0));

		let subscribed_clone = Arc::clone(&subscribed);
		let _a = signal.on_subscribed().connect(move |_| {
			subscribed_clone.fetch_add(1, Ordering::SeqCst);
		});

		let unsubscribed_clone = Arc::clone(&unsubscribed);
		let _b = signal.on_unsubscribed().connect(move |_| {
			unsubscribed_clone.fetch_add(1, Ordering::SeqCst);
		});

		let first = signal.increment_subscribe_count();
		let second = signal.increment_subscribe_count();
		let third = signal.increment_subscribe_count();
		assert_eq!(signal.subscribe_count(), 3);
		assert_eq!(subscribed.load(Ordering::SeqCst), 1);

		drop(second);
		drop(first);
		assert_eq!(unsubscribed.load(Ordering::SeqCst), 0);
		assert!(signal.is_subscribed());

		third.close();
		assert_eq!(unsubscribed.load(Ordering::SeqCst), 1);
		assert_eq!(signal.subscribe_count(), 0);

		// A new cycle fires the transition events again.
		let holder = signal.increment_subscribe_count();
		drop(holder);
		assert_eq!(subscribed.load(Ordering::SeqCst), 2);
		assert_eq!(unsubscribed.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn test_holders_from_many_threads() {
		let signal = signal();
		let transitions = Arc::new(AtomicUsize::new(0));

		let transitions_clone = Arc::clone(&transitions);
		let _slot = signal.on_unsubscribed().connect(move |_| {
			transitions_clone.fetch_add(1, Ordering::SeqCst);
		});

		let handles: Vec<_> = (0..8)
			.map(|_| {
				let signal = Arc::clone(&signal);
				std::thread::spawn(move || {
					for _ in 0..100 {
						let holder = signal.increment_subscribe_count();
						drop(holder);
					}
				})
			})
			.collect();

		for handle in handles {
			handle.join().unwrap();
		}

		// Every 1 -> 0 transition fired exactly once; the final count is
		// the number of live holders.
		assert_eq!(signal.subscribe_count(), 0);
		assert!(transitions.load(Ordering::SeqCst) >= 1);
	}

	#[test]
	fn test_publish_reaches_observers() {
		let signal = signal();
		let seen: Arc<Mutex<Vec<DataBlock>>> = Arc::new(Mutex::new(Vec::new()));

		let seen_clone = Arc::clone(&seen);
		let _slot = signal.on_data_published().connect(move |block| {
			seen_clone.lock().unwrap().push(block.clone());
		});

		signal.publish_data(&[1, 2, 3]);
		signal.publish_data_with_domain(77, 2, &[4, 5]);

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0].domain_value, 0);
		assert_eq!(&seen[0].data[..], &[1, 2, 3]);
		assert_eq!(seen[1].domain_value, 77);
		assert_eq!(seen[1].sample_count, 2);
	}

	#[test]
	fn test_metadata_update_emits() {
		let signal = signal();
		let count = Arc::new(AtomicUsize::new(0));

		let count_clone = Arc::clone(&count);
		let _slot = signal.on_metadata_changed().connect(move |_| {
			count_clone.fetch_add(1, Ordering::SeqCst);
		});

		signal.set_metadata(MetadataBuilder::new("Value2").build());
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(signal.metadata().name(), Some("Value2"));
	}
}
