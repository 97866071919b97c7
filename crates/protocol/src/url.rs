// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! `ws://` URL parsing for streaming connect targets.

use crate::DEFAULT_WEBSOCKET_PORT;

/// Errors produced while parsing a streaming URL.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UrlError {
	#[error("URL has no scheme separator")]
	MissingScheme,

	#[error("unsupported scheme '{0}'")]
	UnsupportedScheme(String),

	#[error("URL has no host")]
	MissingHost,

	#[error("invalid port number '{0}'")]
	InvalidPort(String),
}

/// A parsed `ws://host[:port][/path]` URL. A missing port defaults to the
/// streaming port; a missing path defaults to `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
	pub host: String,
	pub port: u16,
	pub path: String,
}

impl WsUrl {
	pub fn parse(input: &str) -> Result<Self, UrlError> {
		let (scheme, rest) = input.split_once("://").ok_or(UrlError::MissingScheme)?;

		if scheme != "ws" {
			return Err(UrlError::UnsupportedScheme(scheme.to_string()));
		}

		let (authority, path) = match rest.find('/') {
			Some(pos) => (&rest[..pos], &rest[pos..]),
			None => (rest, "/"),
		};

		// Bracketed IPv6 literals keep their colons out of the port split.
		let (host, port_str) = if let Some(rest) = authority.strip_prefix('[') {
			let end = rest.find(']').ok_or(UrlError::MissingHost)?;
			let host = &rest[..end];
			let port_str = rest[end + 1..].strip_prefix(':');
			(host, port_str)
		} else {
			match authority.rsplit_once(':') {
				Some((host, port)) => (host, Some(port)),
				None => (authority, None),
			}
		};

		if host.is_empty() {
			return Err(UrlError::MissingHost);
		}

		let port = match port_str {
			Some(port) => port.parse::<u16>().map_err(|_| UrlError::InvalidPort(port.to_string()))?,
			None => DEFAULT_WEBSOCKET_PORT,
		};

		Ok(Self {
			host: host.to_string(),
			port,
			path: path.to_string(),
		})
	}

	/// The `host:port` form used for TCP connection and the HTTP Host
	/// header.
	pub fn authority(&self) -> String {
		if self.host.contains(':') {
			format!("[{}]:{}", self.host, self.port)
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_full_url() {
		let url = WsUrl::parse("ws://example.com:8080/stream/a").unwrap();
		assert_eq!(url.host, "example.com");
		assert_eq!(url.port, 8080);
		assert_eq!(url.path, "/stream/a");
	}

	#[test]
	fn test_defaults() {
		let url = WsUrl::parse("ws://example.com").unwrap();
		assert_eq!(url.port, DEFAULT_WEBSOCKET_PORT);
		assert_eq!(url.path, "/");
	}

	#[test]
	fn test_ipv6_literal() {
		let url = WsUrl::parse("ws://[::1]:7500/x").unwrap();
		assert_eq!(url.host, "::1");
		assert_eq!(url.port, 7500);
		assert_eq!(url.authority(), "[::1]:7500");
	}

	#[test]
	fn test_ipv6_literal_default_port() {
		let url = WsUrl::parse("ws://[fe80::1]").unwrap();
		assert_eq!(url.host, "fe80::1");
		assert_eq!(url.port, DEFAULT_WEBSOCKET_PORT);
	}

	#[test]
	fn test_errors() {
		assert_eq!(WsUrl::parse("example.com"), Err(UrlError::MissingScheme));
		assert_eq!(
			WsUrl::parse("wss://example.com"),
			Err(UrlError::UnsupportedScheme("wss".to_string()))
		);
		assert_eq!(WsUrl::parse("ws://:7414"), Err(UrlError::MissingHost));
		assert_eq!(
			WsUrl::parse("ws://host:notaport"),
			Err(UrlError::InvalidPort("notaport".to_string()))
		);
	}
}
