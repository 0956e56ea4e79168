//! Wildcard matching for cache invalidation patterns.

/// Match `key` against a pattern where `*` stands for any run of characters.
///
/// A pattern without `*` only matches itself.
pub fn glob_match(pattern: &str, key: &str) -> bool {
  let parts: Vec<&str> = pattern.split('*').collect();
  if parts.len() == 1 {
    return pattern == key;
  }

  let first = parts[0];
  let last = parts[parts.len() - 1];

  let Some(mut rest) = key.strip_prefix(first) else {
    return false;
  };

  for part in &parts[1..parts.len() - 1] {
    match rest.find(part) {
      Some(idx) => rest = &rest[idx + part.len()..],
      None => return false,
    }
  }

  rest.ends_with(last)
}
