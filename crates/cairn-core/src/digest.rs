//! End-to-end file digest.
//!
//! MD5 is integrity, not authenticity: it catches radio corruption and
//! missing chunks, nothing more. The 32-character lowercase hex form is
//! what travels in `fs` and completion frames.

use md5::{Digest, Md5};

/// Digest of a whole file's bytes, as carried on the wire.
pub fn file_digest(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
