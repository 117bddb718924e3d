//! # VellumDB Codec
//!
//! Wire-level primitives for the redo log stream.
//!
//! This crate provides deterministic binary encoding used by both the
//! write path (redo buffers) and the replay path (stream decoding):
//! - Prefix-coded variable-length integers with a bounded worst case
//!   (9 bytes for a full 64-bit value)
//! - Little-endian fixed-width helpers
//! - The redo opcode alphabet
//! - The non-zero record terminator hash for replicated streams
//!
//! ## Varint Format
//!
//! Unlike LEB128, the encoded length is determined entirely by the
//! first byte: the count of leading one bits selects the length class,
//! the remaining bits plus the following big-endian bytes form the
//! payload, and each class carries a cumulative bias so every value has
//! exactly one encoding.
//!
//! ```text
//! 0xxxxxxx                      1 byte,  values 0..2^7
//! 10xxxxxx B                    2 bytes, bias 2^7
//! 110xxxxx B B                  3 bytes, bias 2^7 + 2^14
//! ...
//! 11111111 B B B B B B B B     9 bytes (u64 worst case)
//! ```
//!
//! Signed values are zigzag-folded before encoding.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod ops;

pub use decoder::{
    decode_int_le, decode_long_le, decode_signed_var_long, decode_unsigned_var_int,
    decode_unsigned_var_long,
};
pub use encoder::{
    calc_unsigned_var_int_length, calc_unsigned_var_long_length, convert_signed_var_long,
    encode_int_le, encode_long_le, encode_signed_var_long, encode_unsigned_var_int,
    encode_unsigned_var_long,
};
pub use error::{CodecError, CodecResult};
pub use ops::{nz_hash, RedoOp, HASH_SPREAD, TERMINATOR_LEN};
