// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The client orchestrator.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;
use ws_streaming_core::StreamingError;
use ws_streaming_protocol::{handshake, url::WsUrl};

use crate::{
	config::EndpointConfig,
	connection::ConnectionHandle,
	reactor::{Command, CommandSender, Reactor},
};

/// How long one non-blocking slice of a connect or read wait lasts. Short
/// slices keep cancellation responsive.
const POLL_SLICE: Duration = Duration::from_millis(250);

struct Attempt {
	cancelled: Arc<AtomicBool>,
	thread: JoinHandle<()>,
}

/// A streaming client.
///
/// [`connect`](Self::connect) resolves the URL, establishes TCP, performs
/// the HTTP upgrade, and hands the resulting client-role connection to the
/// handler. One client supports any number of sequential connect attempts;
/// [`cancel`](Self::cancel) aborts the attempt in flight.
pub struct Client {
	commands: CommandSender,
	thread: Option<JoinHandle<()>>,
	config: EndpointConfig,
	attempt: Mutex<Option<Attempt>>,
}

impl Client {
	pub fn new(config: EndpointConfig) -> Result<Self, StreamingError> {
		let (reactor, commands) = Reactor::new(config.clone(), Vec::new(), None)?;

		let thread = std::thread::Builder::new()
			.name("ws-streaming-client".to_string())
			.spawn(move || reactor.run())
			.map_err(StreamingError::from)?;

		Ok(Self {
			commands,
			thread: Some(thread),
			config,
			attempt: Mutex::new(None),
		})
	}

	/// Starts an asynchronous connect attempt. The handler is invoked
	/// exactly once, from an internal thread: with the connection handle
	/// once streaming is up, or with the error that stopped the attempt
	/// ([`StreamingError::Cancelled`] after [`cancel`](Self::cancel)).
	pub fn connect(&self, url: &str, handler: impl FnOnce(Result<ConnectionHandle, StreamingError>) + Send + 'static) {
		let cancelled = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&cancelled);
		let commands = self.commands.clone();
		let config = self.config.clone();
		let url = url.to_string();

		let thread = std::thread::Builder::new()
			.name("ws-streaming-connect".to_string())
			.spawn(move || match establish(&url, &config, &flag) {
				Ok((stream, early_data)) => {
					if flag.load(Ordering::SeqCst) {
						handler(Err(StreamingError::Cancelled));
						return;
					}

					commands.send(Command::Adopt {
						stream,
						early_data,
						reply: Box::new(handler),
					});
				}
				Err(e) => {
					if flag.load(Ordering::SeqCst) {
						handler(Err(StreamingError::Cancelled));
					} else {
						handler(Err(e));
					}
				}
			})
			.expect("failed to spawn connect thread");

		let mut attempt = self.attempt.lock().unwrap();
		if let Some(previous) = attempt.take() {
			// A finished previous attempt just needs reaping.
			let _ = previous.thread.join();
		}
		*attempt = Some(Attempt { cancelled, thread });
	}

	/// Aborts the connect attempt in flight; its handler receives
	/// [`StreamingError::Cancelled`].
	pub fn cancel(&self) {
		if let Some(attempt) = self.attempt.lock().unwrap().as_ref() {
			attempt.cancelled.store(true, Ordering::SeqCst);
		}
	}

	/// Cancels any attempt in flight and closes every connection this
	/// client established.
	pub fn close(&mut self) {
		self.cancel();

		if let Some(attempt) = self.attempt.lock().unwrap().take() {
			let _ = attempt.thread.join();
		}

		if let Some(thread) = self.thread.take() {
			self.commands.send(Command::Shutdown);
			let _ = thread.join();
		}
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		self.close();
	}
}

fn establish(
	url: &str,
	config: &EndpointConfig,
	cancelled: &AtomicBool,
) -> Result<(TcpStream, Vec<u8>), StreamingError> {
	let check = || -> Result<(), StreamingError> {
		if cancelled.load(Ordering::SeqCst) {
			Err(StreamingError::Cancelled)
		} else {
			Ok(())
		}
	};

	let url = WsUrl::parse(url)?;
	let deadline = Instant::now() + config.connect_timeout;

	check()?;
	let addrs: Vec<SocketAddr> = (url.host.as_str(), url.port).to_socket_addrs()?.collect();
	if addrs.is_empty() {
		return Err(StreamingError::Io {
			kind: std::io::ErrorKind::NotFound,
			message: format!("no addresses for '{}'", url.host),
		});
	}

	let mut stream = connect_any(&addrs, deadline, &check)?;
	let _ = stream.set_nodelay(true);

	debug!(host = %url.host, port = url.port, "connected, upgrading");

	let key = handshake::generate_key();
	let request = handshake::build_upgrade_request(&url.authority(), &url.path, &key);
	stream.write_all(request.as_bytes())?;

	// Read the upgrade response in short slices so cancellation and the
	// deadline stay responsive.
	stream.set_read_timeout(Some(POLL_SLICE))?;

	let mut response = Vec::new();
	let mut chunk = [0u8; 2048];

	let upgrade = loop {
		check()?;
		if Instant::now() >= deadline {
			return Err(StreamingError::Io {
				kind: std::io::ErrorKind::TimedOut,
				message: "handshake timed out".to_string(),
			});
		}

		match stream.read(&mut chunk) {
			Ok(0) => return Err(StreamingError::ConnectionClosed),
			Ok(n) => {
				response.extend_from_slice(&chunk[..n]);
				if let Some(upgrade) = handshake::parse_upgrade_response(&response, &key)? {
					break upgrade;
				}
			}
			Err(ref e)
				if e.kind() == std::io::ErrorKind::WouldBlock
					|| e.kind() == std::io::ErrorKind::TimedOut
					|| e.kind() == std::io::ErrorKind::Interrupted => {}
			Err(e) => return Err(e.into()),
		}
	};

	stream.set_read_timeout(None)?;

	let early_data = response[upgrade.consumed..].to_vec();
	Ok((stream, early_data))
}

fn connect_any(
	addrs: &[SocketAddr],
	deadline: Instant,
	check: &dyn Fn() -> Result<(), StreamingError>,
) -> Result<TcpStream, StreamingError> {
	let mut last_error: Option<std::io::Error> = None;

	loop {
		let mut any_timed_out = false;

		for addr in addrs {
			check()?;
			if Instant::now() >= deadline {
				return Err(StreamingError::Io {
					kind: std::io::ErrorKind::TimedOut,
					message: "connect timed out".to_string(),
				});
			}

			match TcpStream::connect_timeout(addr, POLL_SLICE) {
				Ok(stream) => return Ok(stream),
				Err(e) if e.kind() == std::io::ErrorKind::TimedOut => any_timed_out = true,
				Err(e) => last_error = Some(e),
			}
		}

		// Every address failed hard; report instead of spinning until the
		// deadline.
		if !any_timed_out {
			return Err(match last_error {
				Some(e) => e.into(),
				None => StreamingError::Io {
					kind: std::io::ErrorKind::TimedOut,
					message: "connect timed out".to_string(),
				},
			});
		}
	}
}
