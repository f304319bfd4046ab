use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::dict::{Dict, WordId};
use crate::hypergraph::{HyperEdge, HyperGraph, HyperNode, NodeId};
use crate::parse_grammar::DEFAULT_LABEL;
use crate::rule_fsm::{RuleFsm, RuleTrie, TrieIdx};
use crate::rules::{HeadLabels, TranslationRule};
use crate::sparse_map::SparseMap;
use crate::Err;

/// Default label of the node expected to cover the whole sentence
pub const DEFAULT_ROOT_LABEL: &str = "S";

/// The span-keyed memo table: at most one node per (begin, end, labels)
#[derive(Debug, Default)]
pub struct NodeMap(HashMap<(usize, usize), HashMap<HeadLabels, NodeId>>);

impl NodeMap {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn get(&self, begin: usize, end: usize, labels: &HeadLabels) -> Option<NodeId> {
    self.0.get(&(begin, end))?.get(labels).copied()
  }

  /// Whether any node covers exactly `[begin, end)`
  pub fn has_span(&self, begin: usize, end: usize) -> bool {
    self.0.get(&(begin, end)).is_some_and(|m| !m.is_empty())
  }

  /// Returns the node for this key, adding a fresh one to `graph` if there
  /// isn't one yet. The flag says whether the node was created.
  pub fn find_or_add(
    &mut self,
    graph: &mut HyperGraph,
    begin: usize,
    end: usize,
    labels: &HeadLabels,
  ) -> (NodeId, bool) {
    if let Some(id) = self.get(begin, end, labels) {
      return (id, false);
    }
    let id = graph.add_node(HyperNode::new(labels.source(), (begin, end)));
    self
      .0
      .entry((begin, end))
      .or_default()
      .insert(labels.clone(), id);
    (id, true)
  }

  pub fn len(&self) -> usize {
    self.0.values().map(HashMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Every `(span, labels, node)` entry, in no particular order
  pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &HeadLabels, NodeId)> + '_ {
    self
      .0
      .iter()
      .flat_map(|(span, nodes)| nodes.iter().map(move |(labels, id)| (*span, labels, *id)))
  }
}

/// Edge probability for a rule. Features are log-domain scores, so the
/// probability is the exponentiated sum, capped at one.
pub fn rule_prob(features: &SparseMap) -> f64 {
  features.total().min(0.0).exp()
}

/// Builds packed forests for input sentences from one or more frozen grammars
#[derive(Debug)]
pub struct LookupTableFsm {
  rule_fsms: Vec<RuleFsm>,
  delete_unknown: bool,
  trg_factors: usize,
  root_label: WordId,
  unk_label: WordId,
  save_src_str: bool,
}

impl LookupTableFsm {
  pub fn new(dict: &mut Dict) -> Self {
    Self {
      rule_fsms: Vec::new(),
      delete_unknown: false,
      trg_factors: 1,
      root_label: dict.wid(DEFAULT_ROOT_LABEL),
      unk_label: dict.wid(DEFAULT_LABEL),
      save_src_str: false,
    }
  }

  /// Loads one grammar per file, in order
  pub fn read_from_files<P: AsRef<Path>>(
    paths: &[P],
    dict: &mut Dict,
    trg_factors: usize,
  ) -> Result<Self, Err> {
    let mut table = Self::new(dict);
    table.set_trg_factors(trg_factors);
    for path in paths {
      table.add_rule_fsm(RuleFsm::read_from_file(path, dict, trg_factors)?);
    }
    Ok(table)
  }

  pub fn add_rule_fsm(&mut self, mut fsm: RuleFsm) {
    if self.save_src_str {
      fsm.set_save_src_str(true);
    }
    self.rule_fsms.push(fsm);
  }

  pub fn rule_fsms(&self) -> &[RuleFsm] {
    &self.rule_fsms
  }

  /// One limit per registered grammar, in registration order
  pub fn set_span_limits(&mut self, limits: &[usize]) -> Result<(), Err> {
    if limits.len() != self.rule_fsms.len() {
      return Err(
        format!(
          "got {} span limits for {} grammars",
          limits.len(),
          self.rule_fsms.len()
        )
        .into(),
      );
    }
    for (fsm, limit) in self.rule_fsms.iter_mut().zip(limits) {
      fsm.set_span_limit(*limit);
    }
    Ok(())
  }

  pub fn set_save_src_str(&mut self, save: bool) {
    self.save_src_str = save;
    for fsm in self.rule_fsms.iter_mut() {
      fsm.set_save_src_str(save);
    }
  }

  pub fn set_delete_unknown(&mut self, delete: bool) {
    self.delete_unknown = delete;
  }

  pub fn delete_unknown(&self) -> bool {
    self.delete_unknown
  }

  pub fn set_root_symbol(&mut self, label: WordId) {
    self.root_label = label;
  }

  pub fn set_unk_symbol(&mut self, label: WordId) {
    self.unk_label = label;
  }

  pub fn set_trg_factors(&mut self, trg_factors: usize) {
    self.trg_factors = trg_factors;
  }

  pub fn trg_factors(&self) -> usize {
    self.trg_factors
  }

  pub fn root_symbol(&self) -> HeadLabels {
    HeadLabels::uniform(self.root_label, self.trg_factors)
  }

  pub fn unk_symbol(&self) -> HeadLabels {
    HeadLabels::uniform(self.unk_label, self.trg_factors)
  }

  /// The pass-through rule used for a word whose single-word span got no node
  pub fn unknown_rule(&self, word: WordId) -> TranslationRule {
    TranslationRule::unknown(word, self.unk_symbol())
  }

  /// The node covering the whole sentence under the root label, if any
  pub fn root_node(&self, graph: &HyperGraph, map: &NodeMap) -> Option<NodeId> {
    map.get(0, graph.words().len(), &self.root_symbol())
  }

  /// Turns a graph of words into the forest of every derivation the grammars allow
  pub fn transform_graph(&self, graph: &HyperGraph) -> HyperGraph {
    self.build_forest(graph).0
  }

  /// Like [`LookupTableFsm::transform_graph`], also handing back the span-keyed node map
  pub fn build_forest(&self, graph: &HyperGraph) -> (HyperGraph, NodeMap) {
    let input = graph.words();
    let mut builder = ForestBuilder::new(input);

    for width in 1..=input.len() {
      for begin in 0..=(input.len() - width) {
        let end = begin + width;
        builder.span_nodes.clear();

        for fsm in self.rule_fsms.iter() {
          if width <= fsm.span_limit() {
            builder.match_span(fsm, begin, end);
          }
        }
        if width == 1 && !builder.map.has_span(begin, end) {
          self.add_unknown(&mut builder, begin);
        }
        builder.apply_unaries(&self.rule_fsms, begin, end);
      }
    }

    let ForestBuilder { graph, map, .. } = builder;
    debug!(
      words = input.len(),
      nodes = graph.num_nodes(),
      edges = graph.num_edges(),
      "built forest"
    );
    if !input.is_empty() && self.root_node(&graph, &map).is_none() {
      warn!(words = input.len(), "no root node covers the sentence");
    }
    (graph, map)
  }

  /// Fallback for a word no single-word rule covers
  fn add_unknown(&self, builder: &mut ForestBuilder<'_>, pos: usize) {
    let word = builder.input[pos];
    if self.delete_unknown {
      debug!(pos, word, "deleting unknown word");
      return;
    }
    debug!(pos, word, "passing through unknown word");
    let rule = self.unknown_rule(word);
    builder.add_rule_edge(&rule, pos, pos + 1, &[], self.save_src_str);
  }
}

/// Per-sentence state. Never shared between sentences or threads.
struct ForestBuilder<'a> {
  input: &'a [WordId],
  graph: HyperGraph,
  map: NodeMap,
  /// nodes created on the span being processed
  span_nodes: Vec<(HeadLabels, NodeId)>,
}

impl<'a> ForestBuilder<'a> {
  fn new(input: &'a [WordId]) -> Self {
    let mut graph = HyperGraph::new();
    graph.set_words(input.to_vec());
    Self {
      input,
      graph,
      map: NodeMap::new(),
      span_nodes: Vec::new(),
    }
  }

  fn head_node(&mut self, begin: usize, end: usize, labels: &HeadLabels) -> NodeId {
    let (id, created) = self.map.find_or_add(&mut self.graph, begin, end, labels);
    if created {
      self.span_nodes.push((labels.clone(), id));
    }
    id
  }

  /// Instantiates one rule over `[begin, end)` with the given tails
  fn add_rule_edge(
    &mut self,
    rule: &TranslationRule,
    begin: usize,
    end: usize,
    tails: &[NodeId],
    save_src_str: bool,
  ) -> NodeId {
    assert_eq!(tails.len(), rule.num_slots(), "tail count must match the rule's slots");
    let head = self.head_node(begin, end, &rule.head);
    let mut edge = HyperEdge::new(head);
    for tail in tails {
      edge.add_tail(*tail);
    }
    edge.set_prob(rule_prob(&rule.features));
    edge.features = rule.features.clone();
    edge.trg_words = rule.targets.clone();
    if save_src_str {
      edge.src_str = Some(rule.src_str.clone());
    }
    let id = self.graph.add_edge(edge);
    trace!(edge = id.0, head = head.0, begin, end, "added edge");
    head
  }

  /// Every application of `fsm`'s rules covering exactly `[begin, end)`
  fn match_span(&mut self, fsm: &RuleFsm, begin: usize, end: usize) {
    let mut tails = Vec::new();
    self.walk(fsm, RuleTrie::ROOT, begin, begin, end, &mut tails);
  }

  fn walk(
    &mut self,
    fsm: &RuleFsm,
    state: TrieIdx,
    pos: usize,
    begin: usize,
    end: usize,
    tails: &mut Vec<NodeId>,
  ) {
    let trie = fsm.trie();
    if pos == end {
      if let Some(set) = trie.rule_set(state) {
        for rule in fsm.rules()[set].iter() {
          self.add_rule_edge(rule, begin, end, tails, fsm.save_src_str());
        }
      }
      return;
    }

    if let Some(next) = trie.child(state, self.input[pos]) {
      self.walk(fsm, next, pos + 1, begin, end, tails);
    }

    // a gap can't cover the whole span; that would be a unary rewrite
    let widest = if pos == begin { end - pos - 1 } else { end - pos };
    for (labels, next) in trie.nt_children(state) {
      for width in 1..=widest {
        if let Some(node) = self.map.get(pos, pos + width, labels) {
          tails.push(node);
          self.walk(fsm, *next, pos + width, begin, end, tails);
          tails.pop();
        }
      }
    }
  }

  /// Applies every grammar's unary closures to the nodes on `[begin, end)`,
  /// including nodes the unary rules themselves create, until nothing new
  /// appears. Each (grammar, unary rule) pair fires at most once per span and
  /// no rewrite closes a cycle, whichever grammars its edges come from.
  fn apply_unaries(&mut self, fsms: &[RuleFsm], begin: usize, end: usize) {
    if fsms.iter().all(|fsm| fsm.unaries().is_empty()) {
      return;
    }
    let mut fired: HashSet<(usize, usize)> = HashSet::new();
    let mut built_from: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    let mut next = 0;
    while next < self.span_nodes.len() {
      let labels = self.span_nodes[next].0.clone();
      next += 1;
      for (grammar, fsm) in fsms.iter().enumerate() {
        let unaries = fsm.unaries();
        for step in unaries.closure(&labels) {
          if !fired.insert((grammar, step.rule)) {
            continue;
          }
          let rule = unaries.rule(step.rule);
          let Some(tail) = self.map.get(begin, end, &step.tail) else {
            continue;
          };
          let existing = self.map.get(begin, end, &rule.head);
          if existing.is_some_and(|head| reaches(&built_from, tail, head)) {
            trace!(begin, end, grammar, "skipping cyclic unary rewrite");
            continue;
          }
          let head = self.add_rule_edge(rule, begin, end, &[tail], fsm.save_src_str());
          built_from.entry(head).or_default().push(tail);
        }
      }
    }
  }
}

/// Whether `from` is built, through unary edges on one span, out of `to`
/// (or is `to` itself)
fn reaches(built_from: &HashMap<NodeId, Vec<NodeId>>, from: NodeId, to: NodeId) -> bool {
  let mut stack = vec![from];
  let mut seen = HashSet::new();
  while let Some(node) = stack.pop() {
    if node == to {
      return true;
    }
    if seen.insert(node) {
      stack.extend(built_from.get(&node).into_iter().flatten().copied());
    }
  }
  false
}
