use std::collections::HashMap;

use crate::sparse_map::SparseMap;
use crate::Err;

/// Interned symbol id. Interned strings are always non-negative; negative ids
/// are reserved for non-terminal placeholders inside rules.
pub type WordId = i32;

/// Bidirectional string <-> id table.
///
/// Built while grammars are loaded and read-only afterwards. Components that
/// need to name symbols take it by reference.
#[derive(Debug, Default, Clone)]
pub struct Dict {
  words: Vec<String>,
  ids: HashMap<String, WordId>,
}

impl Dict {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn len(&self) -> usize {
    self.words.len()
  }

  pub fn is_empty(&self) -> bool {
    self.words.is_empty()
  }

  /// Returns the id for `s`, interning it if it's new
  pub fn wid(&mut self, s: &str) -> WordId {
    if let Some(id) = self.ids.get(s) {
      return *id;
    }
    let id = self.words.len() as WordId;
    self.words.push(s.to_string());
    self.ids.insert(s.to_string(), id);
    id
  }

  /// Looks up `s` without interning it
  pub fn get(&self, s: &str) -> Option<WordId> {
    self.ids.get(s).copied()
  }

  /// The string for an interned id. Panics on ids this dict never handed out.
  pub fn wsym(&self, id: WordId) -> &str {
    assert!(id >= 0, "placeholder id {} has no symbol", id);
    self
      .words
      .get(id as usize)
      .unwrap_or_else(|| panic!("word id {} out of range (dict size {})", id, self.words.len()))
  }

  pub fn wsyms(&self, ids: &[WordId]) -> String {
    ids
      .iter()
      .map(|id| self.wsym(*id))
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// Interns every whitespace-separated token of a sentence
  pub fn parse_words(&mut self, sentence: &str) -> Vec<WordId> {
    sentence.split_whitespace().map(|w| self.wid(w)).collect()
  }

  /// Parses a feature column: whitespace-separated `name=value` (or `name:value`) pairs
  pub fn parse_features(&mut self, s: &str) -> Result<SparseMap, Err> {
    let mut features = SparseMap::new();
    for pair in s.split_whitespace() {
      let (name, value) = pair
        .rsplit_once('=')
        .or_else(|| pair.rsplit_once(':'))
        .ok_or_else(|| -> Err { format!("bad feature {:?}: expected name=value", pair).into() })?;
      if name.is_empty() {
        return Err(format!("bad feature {:?}: empty name", pair).into());
      }
      let value: f64 = value
        .parse()
        .map_err(|e| -> Err { format!("bad feature value in {:?}: {}", pair, e).into() })?;
      features.insert(self.wid(name), value);
    }
    Ok(features)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_interning_is_stable() {
    let mut dict = Dict::new();
    let a = dict.wid("a");
    let b = dict.wid("b");
    assert_ne!(a, b);
    assert_eq!(dict.wid("a"), a);
    assert_eq!(dict.get("b"), Some(b));
    assert_eq!(dict.get("c"), None);
    assert_eq!(dict.wsym(b), "b");
    assert_eq!(dict.len(), 2);
  }

  #[test]
  fn test_parse_features() {
    let mut dict = Dict::new();
    let fs = dict.parse_features("p=0.5 lex:-1.25").unwrap();
    assert_eq!(fs.get(dict.get("p").unwrap()), Some(0.5));
    assert_eq!(fs.get(dict.get("lex").unwrap()), Some(-1.25));
    assert!(dict.parse_features("").unwrap().is_empty());
  }

  #[test]
  fn test_parse_features_errors() {
    let mut dict = Dict::new();
    assert!(dict.parse_features("p").is_err());
    assert!(dict.parse_features("p=abc").is_err());
    assert!(dict.parse_features("=1").is_err());
  }

  #[test]
  #[should_panic]
  fn test_wsym_out_of_range() {
    let dict = Dict::new();
    dict.wsym(3);
  }
}
