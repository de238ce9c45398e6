//! `Link` response header parsing (RFC 8288 subset used for pagination).

use std::collections::HashMap;

/// Relation name → target URL, e.g. `next` → `https://…?page=2`.
pub type Links = HashMap<String, String>;

/// Parse a `Link` header value.
///
/// `<https://x/courses?page=2>; rel="next", <https://x/courses?page=5>; rel="last"`
/// yields `next` and `last`. Malformed segments are skipped.
pub fn parse_link_header(value: &str) -> Links {
  let mut links = Links::new();

  for segment in split_segments(value) {
    let mut parts = segment.split(';');
    let target = match parts.next().map(str::trim) {
      Some(t) if t.starts_with('<') && t.ends_with('>') => &t[1..t.len() - 1],
      _ => continue,
    };

    for param in parts {
      let Some((key, val)) = param.split_once('=') else {
        continue;
      };
      if !key.trim().eq_ignore_ascii_case("rel") {
        continue;
      }
      // rel may hold several space-separated relation types
      for rel in val.trim().trim_matches('"').split_whitespace() {
        links
          .entry(rel.to_ascii_lowercase())
          .or_insert_with(|| target.to_string());
      }
    }
  }

  links
}

/// Split on commas that are outside `<…>` (URLs may contain commas).
fn split_segments(value: &str) -> Vec<&str> {
  let mut segments = Vec::new();
  let mut in_url = false;
  let mut start = 0;

  for (i, c) in value.char_indices() {
    match c {
      '<' => in_url = true,
      '>' => in_url = false,
      ',' if !in_url => {
        segments.push(&value[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  segments.push(&value[start..]);

  segments.into_iter().filter(|s| !s.trim().is_empty()).collect()
}
