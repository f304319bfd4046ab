use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dict::{Dict, WordId};
use crate::lookup_node::LookupNodeFsm;
use crate::parse_grammar::parse_rule_table;
use crate::rules::{HeadLabels, RuleRef, TranslationRule};
use crate::Err;

/// Widest span a single rule application may cover unless configured otherwise
pub const DEFAULT_SPAN_LIMIT: usize = 20;

/// Rules grouped by the trie node they terminate at
pub type RuleSet = Vec<Vec<RuleRef>>;

/// Index of a node in a [`RuleTrie`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TrieIdx(u32);

impl TrieIdx {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Debug, Default)]
struct TrieNode {
  /// sorted by word
  terminals: Vec<(WordId, TrieIdx)>,
  nonterminals: Vec<(HeadLabels, TrieIdx)>,
  rule_set: Option<usize>,
}

/// Immutable, flattened trie over rule source sides. One edge per terminal,
/// one edge per distinct non-terminal label tuple.
#[derive(Debug, Default)]
pub struct RuleTrie {
  nodes: Vec<TrieNode>,
}

impl RuleTrie {
  pub const ROOT: TrieIdx = TrieIdx(0);

  /// Converts a builder tree into its frozen form, consuming the builder.
  /// Returns the trie and the rule sets its nodes point into.
  pub fn freeze(root: LookupNodeFsm) -> (Self, RuleSet) {
    let mut freezer = Freezer {
      nodes: vec![TrieNode::default()],
      rules: Vec::new(),
    };
    freezer.absorb(Self::ROOT, root);
    for node in freezer.nodes.iter_mut() {
      node.terminals.sort_by_key(|(w, _)| *w);
    }
    (Self { nodes: freezer.nodes }, freezer.rules)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  fn get(&self, idx: TrieIdx) -> &TrieNode {
    &self.nodes[idx.index()]
  }

  /// Follows the terminal edge for `word`
  pub fn child(&self, idx: TrieIdx, word: WordId) -> Option<TrieIdx> {
    let terminals = &self.get(idx).terminals;
    terminals
      .binary_search_by_key(&word, |(w, _)| *w)
      .ok()
      .map(|pos| terminals[pos].1)
  }

  /// Non-terminal edges leaving `idx`, with the labels each gap needs
  pub fn nt_children(&self, idx: TrieIdx) -> &[(HeadLabels, TrieIdx)] {
    &self.get(idx).nonterminals
  }

  /// Index into the [`RuleSet`] of rules ending at `idx`
  pub fn rule_set(&self, idx: TrieIdx) -> Option<usize> {
    self.get(idx).rule_set
  }

  /// Walks a terminal-only path from the root
  pub fn walk(&self, words: &[WordId]) -> Option<TrieIdx> {
    words
      .iter()
      .try_fold(Self::ROOT, |idx, w| self.child(idx, *w))
  }

  /// Whether some rule's source side starts with `words`
  pub fn has_prefix(&self, words: &[WordId]) -> bool {
    self.walk(words).is_some()
  }
}

struct Freezer {
  nodes: Vec<TrieNode>,
  rules: RuleSet,
}

impl Freezer {
  fn alloc(&mut self) -> TrieIdx {
    self.nodes.push(TrieNode::default());
    TrieIdx((self.nodes.len() - 1) as u32)
  }

  fn terminal_child(&mut self, from: TrieIdx, word: WordId) -> TrieIdx {
    if let Some((_, idx)) = self.nodes[from.index()].terminals.iter().find(|(w, _)| *w == word) {
      return *idx;
    }
    let idx = self.alloc();
    self.nodes[from.index()].terminals.push((word, idx));
    idx
  }

  fn nt_child(&mut self, from: TrieIdx, labels: HeadLabels) -> TrieIdx {
    if let Some((_, idx)) = self.nodes[from.index()].nonterminals.iter().find(|(l, _)| *l == labels) {
      return *idx;
    }
    let idx = self.alloc();
    self.nodes[from.index()].nonterminals.push((labels, idx));
    idx
  }

  fn absorb(&mut self, at: TrieIdx, node: LookupNodeFsm) {
    let (lookup_map, nt_lookup_map, rules) = node.into_parts();
    if !rules.is_empty() {
      match self.nodes[at.index()].rule_set {
        Some(set) => self.rules[set].extend(rules),
        None => {
          self.nodes[at.index()].rule_set = Some(self.rules.len());
          self.rules.push(rules);
        }
      }
    }
    for (run, child) in lookup_map {
      let end = run.into_iter().fold(at, |idx, w| self.terminal_child(idx, w));
      self.absorb(end, *child);
    }
    for (labels, child) in nt_lookup_map {
      let next = self.nt_child(at, labels);
      self.absorb(next, *child);
    }
  }
}

/// One precomputed unary rewrite: build `rule`'s head over the node labelled `tail`
#[derive(Debug, Clone)]
pub struct UnaryStep {
  pub tail: HeadLabels,
  /// index into [`UnaryMap::rule`]
  pub rule: usize,
}

/// Unary rules (a lone non-terminal on the source side) indexed by the
/// label they rewrite, with their closures computed once at load time
#[derive(Debug, Default)]
pub struct UnaryMap {
  rules: Vec<RuleRef>,
  by_tail: BTreeMap<HeadLabels, Vec<usize>>,
  outputs: BTreeMap<HeadLabels, BTreeSet<HeadLabels>>,
  closures: HashMap<HeadLabels, Vec<UnaryStep>>,
}

impl UnaryMap {
  fn build(rules: Vec<RuleRef>) -> Self {
    let mut map = Self {
      rules,
      ..Default::default()
    };
    for (idx, rule) in map.rules.iter().enumerate() {
      let input = rule.child_labels[0].clone();
      map
        .outputs
        .entry(input.clone())
        .or_default()
        .insert(rule.head.clone());
      map.by_tail.entry(input).or_default().push(idx);
    }
    let closures = map
      .by_tail
      .keys()
      .map(|label| (label.clone(), map.close(label)))
      .collect();
    map.closures = closures;
    map
  }

  /// Breadth-first walk from `start`. A step is kept when its head is new or
  /// lies strictly deeper than its tail, so the steps come out in an order
  /// where every tail is built before it is used and no cycle is followed.
  fn close(&self, start: &HeadLabels) -> Vec<UnaryStep> {
    let mut steps = Vec::new();
    let mut depth: HashMap<&HeadLabels, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    depth.insert(start, 0);
    queue.push_back(start);

    while let Some(tail) = queue.pop_front() {
      let tail_depth = depth[tail];
      for idx in self.by_tail.get(tail).into_iter().flatten() {
        let head = &self.rules[*idx].head;
        let keep = match depth.get(head) {
          None => {
            depth.insert(head, tail_depth + 1);
            queue.push_back(head);
            true
          }
          Some(head_depth) => *head_depth > tail_depth,
        };
        if keep {
          steps.push(UnaryStep {
            tail: tail.clone(),
            rule: *idx,
          });
        }
      }
    }
    steps
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn rule(&self, idx: usize) -> &RuleRef {
    &self.rules[idx]
  }

  /// Labels reachable from `input` by a single unary rewrite
  pub fn outputs(&self, input: &HeadLabels) -> Option<&BTreeSet<HeadLabels>> {
    self.outputs.get(input)
  }

  /// Every rewrite to apply once a node labelled `input` exists
  pub fn closure(&self, input: &HeadLabels) -> &[UnaryStep] {
    self.closures.get(input).map(|v| v.as_slice()).unwrap_or(&[])
  }
}

/// A frozen grammar: the trie, its rule sets, the unary index and the
/// per-grammar settings the forest builder reads.
#[derive(Debug)]
pub struct RuleFsm {
  trie: RuleTrie,
  rules: RuleSet,
  unaries: UnaryMap,
  span_limit: usize,
  save_src_str: bool,
}

impl RuleFsm {
  pub fn from_rules<I>(rules: I) -> Self
  where
    I: IntoIterator<Item = TranslationRule>,
  {
    let mut root = LookupNodeFsm::new();
    let mut unaries = Vec::new();
    for rule in rules {
      let rule = Arc::new(rule);
      if rule.is_unary() {
        unaries.push(rule);
      } else {
        root.insert(rule);
      }
    }
    debug!(rules = root.num_rules(), unaries = unaries.len(), "freezing rule trie");

    let (trie, rules) = RuleTrie::freeze(root);
    Self {
      trie,
      rules,
      unaries: UnaryMap::build(unaries),
      span_limit: DEFAULT_SPAN_LIMIT,
      save_src_str: false,
    }
  }

  pub fn read_from_rule_table<R: BufRead>(
    reader: R,
    dict: &mut Dict,
    trg_factors: usize,
  ) -> Result<Self, Err> {
    let rules = parse_rule_table(reader, dict, trg_factors)?;
    Ok(Self::from_rules(rules))
  }

  pub fn read_from_file<P: AsRef<Path>>(
    path: P,
    dict: &mut Dict,
    trg_factors: usize,
  ) -> Result<Self, Err> {
    let path = path.as_ref();
    let file = File::open(path)
      .map_err(|e| -> Err { format!("couldn't open {}: {}", path.display(), e).into() })?;
    let fsm = Self::read_from_rule_table(BufReader::new(file), dict, trg_factors)
      .map_err(|e| -> Err { format!("{}: {}", path.display(), e).into() })?;
    info!(
      path = %path.display(),
      trie_nodes = fsm.trie.len(),
      rule_sets = fsm.rules.len(),
      unaries = fsm.unaries.len(),
      "loaded rule table"
    );
    Ok(fsm)
  }

  pub fn span_limit(&self) -> usize {
    self.span_limit
  }

  pub fn set_span_limit(&mut self, limit: usize) {
    self.span_limit = limit;
  }

  pub fn save_src_str(&self) -> bool {
    self.save_src_str
  }

  pub fn set_save_src_str(&mut self, save: bool) {
    self.save_src_str = save;
  }

  pub fn trie(&self) -> &RuleTrie {
    &self.trie
  }

  pub fn rules(&self) -> &RuleSet {
    &self.rules
  }

  pub fn unaries(&self) -> &UnaryMap {
    &self.unaries
  }

  /// Number of rules held, unary ones included
  pub fn num_rules(&self) -> usize {
    self.rules.iter().map(Vec::len).sum::<usize>() + self.unaries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fsm(dict: &mut Dict, table: &str) -> RuleFsm {
    RuleFsm::read_from_rule_table(table.as_bytes(), dict, 1).unwrap()
  }

  fn labels(dict: &Dict, s: &str) -> HeadLabels {
    HeadLabels::uniform(dict.get(s).unwrap(), 1)
  }

  #[test]
  fn test_freeze_expands_runs() {
    let mut dict = Dict::new();
    let g = fsm(
      &mut dict,
      "a b ||| x ||| \n a ||| y ||| \n a c x0:X ||| z x0:X ||| \n",
    );
    let a = dict.get("a").unwrap();
    let b = dict.get("b").unwrap();
    let c = dict.get("c").unwrap();
    let trie = g.trie();

    let at_a = trie.walk(&[a]).unwrap();
    assert!(trie.rule_set(at_a).is_some());
    let at_ab = trie.child(at_a, b).unwrap();
    assert_eq!(g.rules()[trie.rule_set(at_ab).unwrap()].len(), 1);

    let at_ac = trie.walk(&[a, c]).unwrap();
    assert!(trie.rule_set(at_ac).is_none());
    let gaps = trie.nt_children(at_ac);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].0, labels(&dict, "X"));
    assert!(trie.rule_set(gaps[0].1).is_some());

    assert!(trie.has_prefix(&[a, b]));
    assert!(!trie.has_prefix(&[b]));
    assert!(trie.has_prefix(&[]));
    assert_eq!(g.num_rules(), 3);
  }

  #[test]
  fn test_shared_prefix_rules_share_a_set() {
    let mut dict = Dict::new();
    let g = fsm(&mut dict, "a b ||| x ||| p=-1\na b ||| y ||| p=-2\n");
    let a = dict.get("a").unwrap();
    let b = dict.get("b").unwrap();
    let end = g.trie().walk(&[a, b]).unwrap();
    assert_eq!(g.rules()[g.trie().rule_set(end).unwrap()].len(), 2);
    assert_eq!(g.rules().len(), 1);
  }

  #[test]
  fn test_unaries_stay_out_of_the_trie() {
    let mut dict = Dict::new();
    let g = fsm(&mut dict, "x0:N @ NP ||| x0:N @ NP ||| \n");
    assert!(g.trie().nt_children(RuleTrie::ROOT).is_empty());
    assert_eq!(g.unaries().len(), 1);
    let outputs = g.unaries().outputs(&labels(&dict, "N")).unwrap();
    assert!(outputs.contains(&labels(&dict, "NP")));
  }

  #[test]
  fn test_unary_closure_is_transitive() {
    let mut dict = Dict::new();
    // A -> B and B -> C
    let g = fsm(
      &mut dict,
      "x0:B @ A ||| x0:B @ A ||| \n x0:C @ B ||| x0:C @ B ||| \n",
    );
    let steps = g.unaries().closure(&labels(&dict, "C"));
    let heads = steps
      .iter()
      .map(|s| g.unaries().rule(s.rule).head.clone())
      .collect::<Vec<_>>();
    assert_eq!(heads, vec![labels(&dict, "B"), labels(&dict, "A")]);
    assert_eq!(steps[0].tail, labels(&dict, "C"));
    assert_eq!(steps[1].tail, labels(&dict, "B"));
    assert!(g.unaries().closure(&labels(&dict, "A")).is_empty());
  }

  #[test]
  fn test_unary_cycle_terminates() {
    let mut dict = Dict::new();
    let g = fsm(
      &mut dict,
      "x0:B @ A ||| x0:B @ A ||| \n x0:A @ B ||| x0:A @ B ||| \n",
    );
    let steps = g.unaries().closure(&labels(&dict, "A"));
    assert_eq!(steps.len(), 1);
    assert_eq!(g.unaries().rule(steps[0].rule).head, labels(&dict, "B"));
  }

  #[test]
  fn test_read_from_missing_file() {
    let mut dict = Dict::new();
    let err = RuleFsm::read_from_file("/nonexistent/rules.hiero", &mut dict, 1).unwrap_err();
    assert!(format!("{}", err).contains("/nonexistent/rules.hiero"));
  }

  #[test]
  fn test_malformed_table_aborts() {
    let mut dict = Dict::new();
    assert!(RuleFsm::read_from_rule_table("a ||| b ||| \nbad\n".as_bytes(), &mut dict, 1).is_err());
  }

  #[test]
  fn test_trie_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<RuleFsm>();
  }
}
