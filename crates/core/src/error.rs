// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::io;

use ws_streaming_protocol::{handshake::HandshakeError, url::UrlError};

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamingError>;

/// Errors that can occur on a streaming endpoint.
///
/// The error is cloneable so a single close reason can fan out to every
/// observer of a connection; I/O errors are therefore carried as a kind plus
/// message rather than as `std::io::Error` values.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamingError {
	#[error("I/O error ({kind:?}): {message}")]
	Io { kind: io::ErrorKind, message: String },

	#[error("no buffer space")]
	NoBufferSpace,

	#[error("fragmented WebSocket frames are not supported")]
	UnexpectedFragment,

	#[error(transparent)]
	Handshake(#[from] HandshakeError),

	#[error(transparent)]
	Url(#[from] UrlError),

	#[error("peer protocol version is unsupported")]
	UnsupportedVersion,

	#[error("operation cancelled")]
	Cancelled,

	#[error("connection closed")]
	ConnectionClosed,

	#[error("JSON-RPC fault {code}: {message}")]
	JsonRpc { code: i64, message: String },
}

impl StreamingError {
	pub fn json_rpc(code: i64, message: impl Into<String>) -> Self {
		Self::JsonRpc {
			code,
			message: message.into(),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

impl From<io::Error> for StreamingError {
	fn from(err: io::Error) -> Self {
		Self::Io {
			kind: err.kind(),
			message: err.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_io_error_is_cloneable() {
		let err: StreamingError = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();
		let clone = err.clone();
		assert_eq!(err, clone);
		assert!(matches!(
			clone,
			StreamingError::Io {
				kind: io::ErrorKind::ConnectionReset,
				..
			}
		));
	}

	#[test]
	fn test_cancelled_predicate() {
		assert!(StreamingError::Cancelled.is_cancelled());
		assert!(!StreamingError::NoBufferSpace.is_cancelled());
	}
}
