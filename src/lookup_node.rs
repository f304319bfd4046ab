use std::collections::BTreeMap;
use std::fmt;

use crate::dict::{Dict, WordId};
use crate::rules::{placeholder_slot, HeadLabels, RuleRef};

pub type LookupNodeMap = BTreeMap<Vec<WordId>, Box<LookupNodeFsm>>;
pub type NtLookupNodeMap = BTreeMap<HeadLabels, Box<LookupNodeFsm>>;

/// Mutable trie node used while a grammar is being loaded.
///
/// Terminal children are keyed by a whole run of terminals; non-terminal
/// children by the labels the gap must be filled with. Rules hang off the
/// node reached once their whole source side is consumed. The tree is frozen
/// into a [`crate::rule_fsm::RuleTrie`] before any parsing happens.
#[derive(Debug, Default)]
pub struct LookupNodeFsm {
  lookup_map: LookupNodeMap,
  nt_lookup_map: NtLookupNodeMap,
  rules: Vec<RuleRef>,
}

impl LookupNodeFsm {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn add_entry(&mut self, key: Vec<WordId>, child: LookupNodeFsm) {
    self.lookup_map.insert(key, Box::new(child));
  }

  pub fn add_nt_entry(&mut self, key: HeadLabels, child: LookupNodeFsm) {
    self.nt_lookup_map.insert(key, Box::new(child));
  }

  pub fn find_child_node(&self, key: &[WordId]) -> Option<&LookupNodeFsm> {
    self.lookup_map.get(key).map(|b| &**b)
  }

  pub fn find_nt_child_node(&self, key: &HeadLabels) -> Option<&LookupNodeFsm> {
    self.nt_lookup_map.get(key).map(|b| &**b)
  }

  pub fn node_map(&self) -> &LookupNodeMap {
    &self.lookup_map
  }

  pub fn nt_node_map(&self) -> &NtLookupNodeMap {
    &self.nt_lookup_map
  }

  pub fn add_rule(&mut self, rule: RuleRef) {
    self.rules.push(rule);
  }

  pub fn rules(&self) -> &[RuleRef] {
    &self.rules
  }

  /// Rules stored at this node and every node below it
  pub fn num_rules(&self) -> usize {
    self.rules.len()
      + self.lookup_map.values().map(|c| c.num_rules()).sum::<usize>()
      + self.nt_lookup_map.values().map(|c| c.num_rules()).sum::<usize>()
  }

  /// Inserts a rule below this node, one maximal terminal run or one
  /// non-terminal per hop
  pub fn insert(&mut self, rule: RuleRef) {
    self.insert_from(0, rule);
  }

  fn insert_from(&mut self, position: usize, rule: RuleRef) {
    let source = &rule.source;
    if position == source.len() {
      self.add_rule(rule);
      return;
    }

    if let Some(slot) = placeholder_slot(source[position]) {
      let key = rule.child_labels[slot].clone();
      self
        .nt_lookup_map
        .entry(key)
        .or_default()
        .insert_from(position + 1, rule);
    } else {
      let end = source[position..]
        .iter()
        .position(|s| *s < 0)
        .map_or(source.len(), |off| position + off);
      let key = source[position..end].to_vec();
      self
        .lookup_map
        .entry(key)
        .or_default()
        .insert_from(end, rule);
    }
  }

  /// Breaks the node into its children and rules, dropping the node itself
  pub(crate) fn into_parts(self) -> (LookupNodeMap, NtLookupNodeMap, Vec<RuleRef>) {
    (self.lookup_map, self.nt_lookup_map, self.rules)
  }

  pub fn display<'a>(&'a self, dict: &'a Dict) -> LookupNodeDisplay<'a> {
    LookupNodeDisplay { node: self, dict }
  }

  fn print(&self, f: &mut fmt::Formatter<'_>, dict: &Dict, indent: usize) -> fmt::Result {
    for rule in self.rules.iter() {
      writeln!(f, "{:indent$}* {}", "", rule.display(dict), indent = indent)?;
    }
    for (key, child) in self.lookup_map.iter() {
      writeln!(f, "{:indent$}- {}", "", dict.wsyms(key), indent = indent)?;
      child.print(f, dict, indent + 2)?;
    }
    for (key, child) in self.nt_lookup_map.iter() {
      writeln!(f, "{:indent$}+ [{}]", "", key.display(dict), indent = indent)?;
      child.print(f, dict, indent + 2)?;
    }
    Ok(())
  }
}

pub struct LookupNodeDisplay<'a> {
  node: &'a LookupNodeFsm,
  dict: &'a Dict,
}

impl fmt::Display for LookupNodeDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.node.print(f, self.dict, 0)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::parse_grammar::parse_rule;

  fn rule(dict: &mut Dict, line: &str) -> RuleRef {
    Arc::new(parse_rule(line, dict, 1).unwrap())
  }

  #[test]
  fn test_terminal_runs_are_single_keys() {
    let mut dict = Dict::new();
    let mut root = LookupNodeFsm::new();
    root.insert(rule(&mut dict, "a b x0:X c ||| c x0:X ||| "));
    root.insert(rule(&mut dict, "a b ||| d ||| "));

    let a = dict.get("a").unwrap();
    let b = dict.get("b").unwrap();
    let c = dict.get("c").unwrap();
    let x = HeadLabels::uniform(dict.get("X").unwrap(), 1);

    assert!(root.find_child_node(&[a]).is_none());
    let ab = root.find_child_node(&[a, b]).unwrap();
    assert_eq!(ab.rules().len(), 1);

    let gap = ab.find_nt_child_node(&x).unwrap();
    assert!(gap.rules().is_empty());
    let end = gap.find_child_node(&[c]).unwrap();
    assert_eq!(end.rules().len(), 1);
    assert_eq!(root.num_rules(), 2);
  }

  #[test]
  fn test_leading_nonterminal() {
    let mut dict = Dict::new();
    let mut root = LookupNodeFsm::new();
    root.insert(rule(&mut dict, "x0:NP x1:VP @ S ||| x0:NP x1:VP @ S ||| "));
    root.insert(rule(&mut dict, "x0:NP x1:VP @ S ||| x1:VP x0:NP @ S ||| "));

    let np = HeadLabels::uniform(dict.get("NP").unwrap(), 1);
    let vp = HeadLabels::uniform(dict.get("VP").unwrap(), 1);
    assert!(root.node_map().is_empty());
    let leaf = root
      .find_nt_child_node(&np)
      .and_then(|n| n.find_nt_child_node(&vp))
      .unwrap();
    assert_eq!(leaf.rules().len(), 2);
    assert!(root.find_nt_child_node(&vp).is_none());
  }

  #[test]
  fn test_manual_entries_and_print() {
    let mut dict = Dict::new();
    let a = dict.wid("a");
    let x = HeadLabels::uniform(dict.wid("X"), 1);

    let mut child = LookupNodeFsm::new();
    child.add_rule(rule(&mut dict, "a x0:X ||| x0:X ||| "));
    let mut mid = LookupNodeFsm::new();
    mid.add_nt_entry(x.clone(), child);
    let mut root = LookupNodeFsm::new();
    root.add_entry(vec![a], mid);

    assert!(root.find_child_node(&[a]).unwrap().find_nt_child_node(&x).is_some());
    let shown = format!("{}", root.display(&dict));
    assert!(shown.contains("- a\n"), "{}", shown);
    assert!(shown.contains("  + [X|X]\n"), "{}", shown);
    assert!(shown.contains("    * \"a\" x0:X @ X"), "{}", shown);
  }
}
