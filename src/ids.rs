//! Batch and document identifier formats.
//!
//! A batch id is two uppercase ASCII letters followed by six ASCII digits
//! (`AB123456`). Document ids append a 1-based sequence number to their
//! batch id (`AB123456-2`).

use rand::Rng;

const PREFIX_LEN: usize = 2;
const SUFFIX_LEN: usize = 6;
pub const BATCH_ID_LEN: usize = PREFIX_LEN + SUFFIX_LEN;

pub fn generate_batch_id() -> String {
    generate_batch_id_with(&mut rand::thread_rng())
}

pub fn generate_batch_id_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut id = String::with_capacity(BATCH_ID_LEN);
    for _ in 0..PREFIX_LEN {
        id.push(char::from(rng.gen_range(b'A'..=b'Z')));
    }
    for _ in 0..SUFFIX_LEN {
        id.push(char::from(rng.gen_range(b'0'..=b'9')));
    }
    id
}

pub fn is_valid_batch_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == BATCH_ID_LEN
        && bytes[..PREFIX_LEN].iter().all(u8::is_ascii_uppercase)
        && bytes[PREFIX_LEN..].iter().all(u8::is_ascii_digit)
}

pub fn document_id(batch_id: &str, sequence: usize) -> String {
    format!("{batch_id}-{sequence}")
}
