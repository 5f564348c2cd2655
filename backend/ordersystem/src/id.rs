//! Opaque identifiers for collections and tasks.

use rand::Rng;

const ID_ALPHABET: &[u8] = b"ABCDEFGHKLMNPQRSTUVWXYZ";
const ID_LEN: usize = 10;

/// A fresh random identifier, e.g. `KQZRMBTAXH`.
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Whether `s` has the shape of an identifier produced by [`new_id`].
pub fn is_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| ID_ALPHABET.contains(&b))
}
