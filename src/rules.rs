use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dict::{Dict, WordId};
use crate::sparse_map::SparseMap;

/// Encodes the `slot`th non-terminal of a rule (source occurrence order)
pub fn placeholder(slot: usize) -> WordId {
  -1 - slot as WordId
}

/// Inverse of [`placeholder`]; `None` for terminals
pub fn placeholder_slot(id: WordId) -> Option<usize> {
  if id < 0 {
    Some((-1 - id) as usize)
  } else {
    None
  }
}

/// The labels a node is built under: the source-side label followed by one
/// label per target factor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeadLabels(pub Vec<WordId>);

impl HeadLabels {
  pub fn new(labels: Vec<WordId>) -> Self {
    assert!(!labels.is_empty(), "head labels need at least a source label");
    Self(labels)
  }

  /// The same label on the source side and on every target factor
  pub fn uniform(label: WordId, trg_factors: usize) -> Self {
    Self(vec![label; trg_factors + 1])
  }

  pub fn source(&self) -> WordId {
    self.0[0]
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn display<'a>(&'a self, dict: &'a Dict) -> HeadLabelsDisplay<'a> {
    HeadLabelsDisplay { labels: self, dict }
  }
}

pub struct HeadLabelsDisplay<'a> {
  labels: &'a HeadLabels,
  dict: &'a Dict,
}

impl fmt::Display for HeadLabelsDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let syms = self.labels.0.iter().map(|l| self.dict.wsym(*l)).collect::<Vec<_>>();
    write!(f, "{}", syms.join("|"))
  }
}

/// A synchronous rule. Source and target sequences mix terminal ids with
/// [`placeholder`]s; `child_labels[i]` are the labels placeholder `i` must
/// be filled with.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRule {
  pub source: Vec<WordId>,
  pub targets: Vec<Vec<WordId>>,
  pub head: HeadLabels,
  pub child_labels: Vec<HeadLabels>,
  pub features: SparseMap,
  pub src_str: String,
}

impl TranslationRule {
  /// Pass-through rule for a word no grammar covers
  pub fn unknown(word: WordId, head: HeadLabels) -> Self {
    let factors = head.len() - 1;
    Self {
      source: vec![word],
      targets: vec![vec![word]; factors],
      head,
      child_labels: Vec::new(),
      features: SparseMap::new(),
      src_str: String::new(),
    }
  }

  pub fn num_slots(&self) -> usize {
    self.child_labels.len()
  }

  /// A rule whose source side is a single non-terminal
  pub fn is_unary(&self) -> bool {
    self.source.len() == 1 && self.source[0] < 0
  }

  /// Renders the rule back into rule-table syntax
  pub fn display<'a>(&'a self, dict: &'a Dict) -> RuleDisplay<'a> {
    RuleDisplay { rule: self, dict }
  }
}

pub type RuleRef = Arc<TranslationRule>;

pub struct RuleDisplay<'a> {
  rule: &'a TranslationRule,
  dict: &'a Dict,
}

impl RuleDisplay<'_> {
  fn write_side(
    &self,
    f: &mut fmt::Formatter<'_>,
    side: &[WordId],
    factor: usize,
    head: WordId,
  ) -> fmt::Result {
    for sym in side {
      match placeholder_slot(*sym) {
        Some(slot) => {
          let label = self.rule.child_labels[slot].0[factor];
          write!(f, "x{}:{} ", slot, self.dict.wsym(label))?;
        }
        None => write!(f, "\"{}\" ", self.dict.wsym(*sym))?,
      }
    }
    write!(f, "@ {}", self.dict.wsym(head))
  }
}

impl fmt::Display for RuleDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rule = self.rule;
    self.write_side(f, &rule.source, 0, rule.head.0[0])?;
    write!(f, " ||| ")?;
    for (idx, target) in rule.targets.iter().enumerate() {
      if idx != 0 {
        write!(f, " |COL| ")?;
      }
      self.write_side(f, target, idx + 1, rule.head.0[idx + 1])?;
    }
    write!(f, " |||")?;
    for (k, v) in rule.features.iter() {
      write!(f, " {}={}", self.dict.wsym(k), v)?;
    }
    Ok(())
  }
}
