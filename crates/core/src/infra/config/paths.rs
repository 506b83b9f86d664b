use std::path::{
  Path,
  PathBuf
};

/// Relative paths in the config resolve
/// against the config file's directory.
pub(crate) fn resolve_relative(
  config_path: &Path,
  raw: &str
) -> PathBuf {
  let p = Path::new(raw);
  if p.is_absolute() {
    return p.to_path_buf();
  }
  config_path
    .parent()
    .unwrap_or_else(|| Path::new("."))
    .join(p)
}
