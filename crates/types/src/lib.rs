//! Core types for the tripledb term dictionary.
//!
//! This crate provides the value-level building blocks shared by the storage
//! and dictionary crates:
//! - [`Term`]: RDF terms (URIs, blank nodes, literals, variables, wildcard)
//! - [`NodeId`]: fixed-width 64-bit identifiers, including inline encodings
//! - [`codec`]: the self-delimiting binary term encoding
//! - [`hash`]: fixed-length term hashes used as range index keys
//! - [`config`]: store configuration with validation

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod hash;
pub mod inline;
pub mod node_id;
pub mod term;

pub use codec::{CodecError, decode, decode_prefix, encode, encode_to_vec, max_size};
pub use config::{ConfigError, StoreConfig};
pub use hash::{TERM_HASH_LEN, TermHash, term_hash};
pub use node_id::{NodeId, NodeTag};
pub use term::{Literal, Term, xsd};
