//! Protocol consumers of the action engine.
//!
//! Each formats commands, supplies a completion parser and interprets the
//! result code. Vocabularies are kept to what exercises the engine: socket
//! control and bulk receive, and file block reads.

pub mod files;
pub mod sockets;
