/// Byte-level reinterpretation of wire structures and a cursor for
/// consuming captured packet bytes.
pub mod bytes;
/// Integer types stored in a fixed byteorder.
pub mod endian;
/// Error-handling utilities.
pub mod error;
