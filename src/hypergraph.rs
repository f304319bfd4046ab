use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dict::{Dict, WordId};
use crate::rules::placeholder_slot;
use crate::sparse_map::SparseMap;
use crate::Err;

/// Index of a node in its graph's node arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Index of an edge in its graph's edge arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl EdgeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

static SAFE_MODE: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Turns probability validation on edge reads on or off
pub fn set_safe_mode(on: bool) {
  SAFE_MODE.store(on, Ordering::Relaxed);
}

pub fn safe_mode() -> bool {
  SAFE_MODE.load(Ordering::Relaxed)
}

/// Probabilities must lie in [0, 1]
pub fn check_prob(prob: f64) -> Result<f64, Err> {
  if (0.0..=1.0).contains(&prob) {
    Ok(prob)
  } else {
    Err(format!("invalid probability {}", prob).into())
  }
}

/// Whether a node is on the frontier of a derivation (used for rule extraction)
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frontier {
  #[serde(rename = "Y")]
  Yes,
  #[serde(rename = "N")]
  No,
  #[default]
  #[serde(rename = "U")]
  Unset,
}

/// One rule application: a head node built from an ordered list of tail nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperEdge {
  id: Option<EdgeId>,
  head: NodeId,
  tails: Vec<NodeId>,
  prob: f64,
  pub features: SparseMap,
  /// One sequence per target factor; placeholders refer to `tails`
  pub trg_words: Vec<Vec<WordId>>,
  pub src_str: Option<String>,
}

impl HyperEdge {
  pub fn new(head: NodeId) -> Self {
    Self {
      id: None,
      head,
      tails: Vec::new(),
      prob: 1.0,
      features: SparseMap::new(),
      trg_words: Vec::new(),
      src_str: None,
    }
  }

  /// Id assigned by [`HyperGraph::add_edge`]. Panics if the edge was never added.
  pub fn id(&self) -> EdgeId {
    self.id.expect("edge has not been added to a graph")
  }

  pub fn head(&self) -> NodeId {
    self.head
  }

  pub fn tails(&self) -> &[NodeId] {
    &self.tails
  }

  pub fn add_tail(&mut self, tail: NodeId) {
    self.tails.push(tail);
  }

  /// The edge probability. In safe mode an out-of-range value is a bug in
  /// whatever built the edge and aborts.
  pub fn prob(&self) -> f64 {
    if safe_mode() {
      if let Err(e) = check_prob(self.prob) {
        panic!("edge {:?}: {}", self.id, e);
      }
    }
    self.prob
  }

  pub fn set_prob(&mut self, prob: f64) {
    self.prob = prob;
  }

  pub fn display<'a>(&'a self, dict: &'a Dict) -> EdgeDisplay<'a> {
    EdgeDisplay { edge: self, dict }
  }
}

impl PartialEq for HyperEdge {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
      && self.head == other.head
      && self.tails == other.tails
      && (self.prob - other.prob).abs() <= 1e-9
      && self.features == other.features
      && self.trg_words == other.trg_words
      && self.src_str == other.src_str
  }
}

pub struct EdgeDisplay<'a> {
  edge: &'a HyperEdge,
  dict: &'a Dict,
}

impl fmt::Display for EdgeDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let edge = self.edge;
    write!(f, "{} ->", edge.head.0)?;
    for tail in edge.tails.iter() {
      write!(f, " {}", tail.0)?;
    }
    write!(f, " [p={}]", edge.prob)?;
    for (idx, factor) in edge.trg_words.iter().enumerate() {
      write!(f, "{}", if idx == 0 { " :" } else { " |" })?;
      for w in factor {
        match placeholder_slot(*w) {
          Some(slot) => write!(f, " x{}", slot)?,
          None => write!(f, " {}", self.dict.wsym(*w))?,
        }
      }
    }
    if !edge.features.is_empty() {
      write!(f, " {}", edge.features.display(self.dict))?;
    }
    Ok(())
  }
}

/// A forest vertex: a symbol over a half-open span of the input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperNode {
  id: Option<NodeId>,
  pub sym: WordId,
  pub span: (usize, usize),
  pub frontier: Frontier,
  edges: Vec<EdgeId>,
  pub trg_words: Option<Vec<WordId>>,
}

impl HyperNode {
  pub fn new(sym: WordId, span: (usize, usize)) -> Self {
    Self {
      id: None,
      sym,
      span,
      frontier: Frontier::Unset,
      edges: Vec::new(),
      trg_words: None,
    }
  }

  /// Id assigned by [`HyperGraph::add_node`]. Panics if the node was never added.
  pub fn id(&self) -> NodeId {
    self.id.expect("node has not been added to a graph")
  }

  /// Edges that build this node, in insertion order
  pub fn edges(&self) -> &[EdgeId] {
    &self.edges
  }

  pub fn num_edges(&self) -> usize {
    self.edges.len()
  }

  pub fn is_terminal(&self) -> bool {
    self.edges.is_empty()
  }
}

/// A packed forest. Owns every node and edge; all cross references are arena
/// indices, so a graph is freely movable and `Send`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyperGraph {
  words: Vec<WordId>,
  nodes: Vec<HyperNode>,
  edges: Vec<HyperEdge>,
}

impl HyperGraph {
  pub fn new() -> Self {
    Default::default()
  }

  /// The trivial input graph: one terminal node per word
  pub fn from_words(words: Vec<WordId>) -> Self {
    let mut graph = Self::new();
    for (idx, w) in words.iter().enumerate() {
      graph.add_node(HyperNode::new(*w, (idx, idx + 1)));
    }
    graph.words = words;
    graph
  }

  /// Takes ownership of a node and assigns its id. A node can only be added once.
  pub fn add_node(&mut self, mut node: HyperNode) -> NodeId {
    assert!(node.id.is_none(), "node {:?} was already added to a graph", node.id);
    assert!(node.edges.is_empty(), "edges are attached through add_edge");
    let id = NodeId(self.nodes.len() as u32);
    node.id = Some(id);
    self.nodes.push(node);
    id
  }

  /// Takes ownership of an edge, assigns its id and attaches it to its head node
  pub fn add_edge(&mut self, mut edge: HyperEdge) -> EdgeId {
    assert!(edge.id.is_none(), "edge {:?} was already added to a graph", edge.id);
    for tail in edge.tails.iter() {
      assert!(tail.index() < self.nodes.len(), "tail {} out of range", tail.0);
    }
    let id = EdgeId(self.edges.len() as u32);
    edge.id = Some(id);
    self.node_mut(edge.head).edges.push(id);
    self.edges.push(edge);
    id
  }

  pub fn node(&self, id: NodeId) -> &HyperNode {
    self.nodes.get(id.index()).unwrap_or_else(|| {
      panic!("node {} out of range (graph has {})", id.0, self.nodes.len())
    })
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut HyperNode {
    let len = self.nodes.len();
    self
      .nodes
      .get_mut(id.index())
      .unwrap_or_else(|| panic!("node {} out of range (graph has {})", id.0, len))
  }

  pub fn edge(&self, id: EdgeId) -> &HyperEdge {
    self.edges.get(id.index()).unwrap_or_else(|| {
      panic!("edge {} out of range (graph has {})", id.0, self.edges.len())
    })
  }

  pub fn get_node(&self, id: NodeId) -> Option<&HyperNode> {
    self.nodes.get(id.index())
  }

  pub fn get_edge(&self, id: EdgeId) -> Option<&HyperEdge> {
    self.edges.get(id.index())
  }

  pub fn nodes(&self) -> &[HyperNode] {
    &self.nodes
  }

  pub fn edges(&self) -> &[HyperEdge] {
    &self.edges
  }

  pub fn num_nodes(&self) -> usize {
    self.nodes.len()
  }

  pub fn num_edges(&self) -> usize {
    self.edges.len()
  }

  pub fn words(&self) -> &[WordId] {
    &self.words
  }

  pub fn set_words(&mut self, words: Vec<WordId>) {
    self.words = words;
  }

  /// First node with this symbol and span, if any
  pub fn find_node(&self, sym: WordId, span: (usize, usize)) -> Option<NodeId> {
    self
      .nodes
      .iter()
      .find(|n| n.sym == sym && n.span == span)
      .map(|n| n.id())
  }

  /// Compares two graphs node by node and edge by edge. Every difference is
  /// logged; returns whether the graphs are equal.
  pub fn check_equal(&self, other: &HyperGraph) -> bool {
    let mut equal = true;
    if self.words != other.words {
      warn!(left = ?self.words, right = ?other.words, "words differ");
      equal = false;
    }
    if self.nodes.len() != other.nodes.len() {
      warn!(left = self.nodes.len(), right = other.nodes.len(), "node counts differ");
      equal = false;
    }
    if self.edges.len() != other.edges.len() {
      warn!(left = self.edges.len(), right = other.edges.len(), "edge counts differ");
      equal = false;
    }
    for (idx, (l, r)) in self.nodes.iter().zip(other.nodes.iter()).enumerate() {
      if l != r {
        warn!(node = idx, left = ?l, right = ?r, "nodes differ");
        equal = false;
      }
    }
    for (idx, (l, r)) in self.edges.iter().zip(other.edges.iter()).enumerate() {
      if l != r {
        warn!(edge = idx, left = ?l, right = ?r, "edges differ");
        equal = false;
      }
    }
    equal
  }

  pub fn to_json(&self) -> Result<String, Err> {
    Ok(serde_json::to_string(self)?)
  }

  /// Reads a graph written by [`HyperGraph::to_json`], rejecting any that
  /// break the id and reference invariants
  pub fn from_json(s: &str) -> Result<Self, Err> {
    let graph: Self = serde_json::from_str(s)?;
    graph.validate()?;
    Ok(graph)
  }

  fn validate(&self) -> Result<(), Err> {
    for (idx, node) in self.nodes.iter().enumerate() {
      if node.id != Some(NodeId(idx as u32)) {
        return Err(format!("node at {} has id {:?}", idx, node.id).into());
      }
      for e in node.edges.iter() {
        match self.edges.get(e.index()) {
          Some(edge) if edge.head.index() == idx => (),
          Some(_) => return Err(format!("node {} lists edge {} it does not head", idx, e.0).into()),
          None => return Err(format!("node {} lists missing edge {}", idx, e.0).into()),
        }
      }
    }
    for (idx, edge) in self.edges.iter().enumerate() {
      if edge.id != Some(EdgeId(idx as u32)) {
        return Err(format!("edge at {} has id {:?}", idx, edge.id).into());
      }
      let in_range = |n: &NodeId| n.index() < self.nodes.len();
      if !in_range(&edge.head) || !edge.tails.iter().all(in_range) {
        return Err(format!("edge {} references a missing node", idx).into());
      }
      if !self.nodes[edge.head.index()].edges.contains(&EdgeId(idx as u32)) {
        return Err(format!("edge {} is not listed on its head", idx).into());
      }
      check_prob(edge.prob).map_err(|e| -> Err { format!("edge {}: {}", idx, e).into() })?;
    }
    Ok(())
  }

  pub fn display<'a>(&'a self, dict: &'a Dict) -> GraphDisplay<'a> {
    GraphDisplay { graph: self, dict }
  }
}

pub struct GraphDisplay<'a> {
  graph: &'a HyperGraph,
  dict: &'a Dict,
}

impl fmt::Display for GraphDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "words: {}", self.dict.wsyms(&self.graph.words))?;
    for node in self.graph.nodes.iter() {
      writeln!(
        f,
        "node {} {}..{}: {}",
        node.id().0,
        node.span.0,
        node.span.1,
        self.dict.wsym(node.sym)
      )?;
      for e in node.edges.iter() {
        writeln!(f, "  {}", self.graph.edge(*e).display(self.dict))?;
      }
    }
    Ok(())
  }
}

/// A borrowed slice of a forest (e.g. one derivation) and the product of its
/// edge probabilities
#[derive(Debug, Clone)]
pub struct GraphFragment<'a> {
  edges: Vec<&'a HyperEdge>,
  prob: f64,
}

impl Default for GraphFragment<'_> {
  fn default() -> Self {
    Self {
      edges: Vec::new(),
      prob: 1.0,
    }
  }
}

impl<'a> GraphFragment<'a> {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn from_edge(edge: &'a HyperEdge) -> Self {
    let mut frag = Self::new();
    frag.add_edge(edge);
    frag
  }

  pub fn add_edge(&mut self, edge: &'a HyperEdge) {
    self.prob *= edge.prob();
    self.edges.push(edge);
  }

  /// Appends every edge of `other`, keeping the probability a product
  pub fn extend(&mut self, other: &GraphFragment<'a>) {
    self.prob *= other.prob;
    self.edges.extend_from_slice(&other.edges);
  }

  pub fn edges(&self) -> &[&'a HyperEdge] {
    &self.edges
  }

  pub fn len(&self) -> usize {
    self.edges.len()
  }

  pub fn is_empty(&self) -> bool {
    self.edges.is_empty()
  }

  pub fn prob(&self) -> f64 {
    self.prob
  }

  /// Feature totals over every edge in the fragment
  pub fn features(&self) -> SparseMap {
    let mut total = SparseMap::new();
    for edge in self.edges.iter() {
      total += &edge.features;
    }
    total
  }
}

impl PartialEq for GraphFragment<'_> {
  fn eq(&self, other: &Self) -> bool {
    self.prob == other.prob
      && self.edges.len() == other.edges.len()
      && self.edges.iter().zip(other.edges.iter()).all(|(l, r)| l == r)
  }
}

impl fmt::Display for GraphFragment<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[p={}]", self.prob)?;
    for e in self.edges.iter() {
      write!(f, " {}->{:?}", e.head.0, e.tails.iter().map(|t| t.0).collect::<Vec<_>>())?;
    }
    Ok(())
  }
}
