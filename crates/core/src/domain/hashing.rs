use sha2::{
  Digest,
  Sha256
};

pub fn sha256_hex(
  data: &[u8]
) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Hash of a response text; empty text
/// hashes to the empty string.
pub fn text_hash(text: &str) -> String {
  if text.is_empty() {
    String::new()
  } else {
    sha256_hex(text.as_bytes())
  }
}
