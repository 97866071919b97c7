// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Wire codecs for the WebSocket Streaming Protocol.
//!
//! This crate contains the pure, I/O-free encoding and decoding layers:
//!
//! - **frame**: WebSocket frame headers (RFC 6455 framing)
//! - **packet**: streaming packet headers (20-bit signal number multiplexing)
//! - **metadata_codec**: MessagePack-encoded metadata packet bodies
//! - **linear**: the 16-byte linear-rule anchor payload
//! - **handshake**: HTTP upgrade requests, responses, and accept keys
//! - **url**: `ws://` URL parsing
//! - **version**: protocol version parsing and comparison

pub mod frame;
pub mod handshake;
pub mod linear;
pub mod metadata_codec;
pub mod packet;
pub mod url;
pub mod version;

/// The default TCP port for WebSocket streaming connections.
pub const DEFAULT_WEBSOCKET_PORT: u16 = 7414;

/// The default TCP port for HTTP command-interface connections.
pub const DEFAULT_COMMAND_INTERFACE_PORT: u16 = 7438;
