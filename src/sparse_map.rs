use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::dict::{Dict, WordId};

/// Values closer than this compare equal
const TOLERANCE: f64 = 1e-6;

/// A sparse feature vector, mapping feature name ids to real values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseMap(BTreeMap<WordId, f64>);

impl SparseMap {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn insert(&mut self, key: WordId, value: f64) -> Option<f64> {
    self.0.insert(key, value)
  }

  pub fn get(&self, key: WordId) -> Option<f64> {
    self.0.get(&key).copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (WordId, f64)> + '_ {
    self.0.iter().map(|(k, v)| (*k, *v))
  }

  /// Sum of all values
  pub fn total(&self) -> f64 {
    self.0.values().sum()
  }

  pub fn display<'a>(&'a self, dict: &'a Dict) -> SparseMapDisplay<'a> {
    SparseMapDisplay { map: self, dict }
  }
}

impl FromIterator<(WordId, f64)> for SparseMap {
  fn from_iter<I: IntoIterator<Item = (WordId, f64)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl PartialEq for SparseMap {
  fn eq(&self, other: &Self) -> bool {
    if self.len() != other.len() {
      return false;
    }
    self
      .0
      .iter()
      .all(|(k, v)| matches!(other.0.get(k), Some(o) if (o - v).abs() <= TOLERANCE))
  }
}

impl AddAssign<&SparseMap> for SparseMap {
  fn add_assign(&mut self, rhs: &SparseMap) {
    for (k, v) in rhs.iter() {
      if v != 0.0 {
        *self.0.entry(k).or_insert(0.0) += v;
      }
    }
  }
}

pub struct SparseMapDisplay<'a> {
  map: &'a SparseMap,
  dict: &'a Dict,
}

impl fmt::Display for SparseMapDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (idx, (k, v)) in self.map.iter().enumerate() {
      if idx != 0 {
        write!(f, ", ")?;
      }
      write!(f, "\"{}\": {}", self.dict.wsym(k), v)?;
    }
    write!(f, "}}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tolerant_equality() {
    let a: SparseMap = vec![(1, 0.5), (2, -1.0)].into_iter().collect();
    let b: SparseMap = vec![(1, 0.5000001), (2, -1.0)].into_iter().collect();
    let c: SparseMap = vec![(1, 0.6), (2, -1.0)].into_iter().collect();
    let d: SparseMap = vec![(1, 0.5)].into_iter().collect();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
  }

  #[test]
  fn test_add_assign_skips_zeros() {
    let mut a: SparseMap = vec![(1, 1.0)].into_iter().collect();
    let b: SparseMap = vec![(1, 2.0), (2, 0.0), (3, 1.5)].into_iter().collect();
    a += &b;
    assert_eq!(a.get(1), Some(3.0));
    assert_eq!(a.get(2), None);
    assert_eq!(a.get(3), Some(1.5));
  }

  #[test]
  fn test_display_uses_names() {
    let mut dict = Dict::new();
    let p = dict.wid("p");
    let lex = dict.wid("lex");
    let m: SparseMap = vec![(p, 0.5), (lex, -1.0)].into_iter().collect();
    assert_eq!(format!("{}", m.display(&dict)), "{\"p\": 0.5, \"lex\": -1}");
  }
}
