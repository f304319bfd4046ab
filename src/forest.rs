use std::collections::HashMap;

use crate::dict::Dict;
use crate::hypergraph::{GraphFragment, HyperEdge, HyperGraph, NodeId};
use crate::syntree::{Constituent, SynTree, Word};
use crate::utils::combinations;

/// Reading derivations back out of a packed forest
impl HyperGraph {
  /// Number of distinct derivations rooted at `node`. Saturates instead of
  /// overflowing; a node with no incoming edges counts as one (empty)
  /// derivation.
  pub fn derivation_count(&self, node: NodeId) -> u128 {
    let mut memo = HashMap::new();
    self.count_from(node, &mut memo)
  }

  fn count_from(&self, node: NodeId, memo: &mut HashMap<NodeId, u128>) -> u128 {
    if let Some(count) = memo.get(&node) {
      return *count;
    }
    let edges = self.node(node).edges();
    if edges.is_empty() {
      memo.insert(node, 1);
      return 1;
    }
    // a node reached again while still being counted closes a cycle, which adds nothing
    memo.insert(node, 0);

    let mut total = 0u128;
    for e in edges {
      let per_edge = self
        .edge(*e)
        .tails()
        .iter()
        .fold(1u128, |acc, tail| acc.saturating_mul(self.count_from(*tail, memo)));
      total = total.saturating_add(per_edge);
    }
    memo.insert(node, total);
    total
  }

  /// Up to `limit` derivations rooted at `node`. Each fragment lists its
  /// edges in pre-order: an edge, then the derivation of each of its tails
  /// in tail order.
  pub fn derivations(&self, node: NodeId, limit: usize) -> Vec<GraphFragment<'_>> {
    let mut memo = HashMap::new();
    self.derivations_from(node, limit, &mut memo)
  }

  fn derivations_from<'a>(
    &'a self,
    node: NodeId,
    limit: usize,
    memo: &mut HashMap<NodeId, Vec<GraphFragment<'a>>>,
  ) -> Vec<GraphFragment<'a>> {
    if let Some(frags) = memo.get(&node) {
      return frags.clone();
    }
    let edges = self.node(node).edges();
    if edges.is_empty() {
      return vec![GraphFragment::new()];
    }
    memo.insert(node, Vec::new());

    let mut out = Vec::new();
    for e in edges {
      if out.len() >= limit {
        break;
      }
      let edge = self.edge(*e);
      if edge.tails().is_empty() {
        out.push(GraphFragment::from_edge(edge));
        continue;
      }
      let child_sets = edge
        .tails()
        .iter()
        .map(|tail| self.derivations_from(*tail, limit, memo))
        .collect::<Vec<_>>();
      for picks in combinations(&child_sets) {
        if out.len() >= limit {
          break;
        }
        let mut frag = GraphFragment::from_edge(edge);
        for pick in picks.iter() {
          frag.extend(pick);
        }
        out.push(frag);
      }
    }
    memo.insert(node, out.clone());
    out
  }

  /// Up to `limit` derivations rooted at `node`, as trees labelled with node
  /// symbols. Input words not covered by a tail become leaves.
  pub fn derivation_trees(
    &self,
    node: NodeId,
    dict: &Dict,
    limit: usize,
  ) -> Vec<SynTree<String, String>> {
    self
      .derivations(node, limit)
      .iter()
      .map(|frag| self.build_tree(node, &mut frag.edges().iter().copied(), dict))
      .collect()
  }

  fn build_tree<'a, I>(&self, node: NodeId, edges: &mut I, dict: &Dict) -> SynTree<String, String>
  where
    I: Iterator<Item = &'a HyperEdge>,
  {
    let head = self.node(node);
    let cons = Constituent {
      value: dict.wsym(head.sym).to_string(),
      span: head.span,
    };
    if head.edges().is_empty() {
      return SynTree::Branch(cons, Vec::new());
    }
    let edge = match edges.next() {
      Some(edge) => edge,
      None => return SynTree::Branch(cons, Vec::new()),
    };
    debug_assert_eq!(edge.head(), node);

    // subtrees are consumed in tail order, then laid out by position
    let mut subtrees = edge
      .tails()
      .iter()
      .map(|tail| self.build_tree(*tail, &mut *edges, dict))
      .collect::<Vec<_>>();
    subtrees.sort_by_key(|t| t.span().0);

    let mut children = Vec::new();
    let mut subtrees = subtrees.into_iter().peekable();
    let mut pos = head.span.0;
    while pos < head.span.1 {
      match subtrees.next_if(|t| t.span().0 == pos) {
        Some(tree) => {
          pos = tree.span().1.max(pos + 1);
          children.push(tree);
        }
        None => {
          let value = self
            .words()
            .get(pos)
            .map_or("?", |w| dict.wsym(*w))
            .to_string();
          children.push(SynTree::Leaf(Word {
            value,
            span: (pos, pos + 1),
          }));
          pos += 1;
        }
      }
    }
    SynTree::Branch(cons, children)
  }
}

#[cfg(test)]
mod tests {
  use crate::dict::Dict;
  use crate::hypergraph::HyperGraph;
  use crate::lookup_table::LookupTableFsm;
  use crate::rule_fsm::RuleFsm;

  fn table(dict: &mut Dict, grammar: &str) -> LookupTableFsm {
    let mut t = LookupTableFsm::new(dict);
    t.add_rule_fsm(RuleFsm::read_from_rule_table(grammar.as_bytes(), dict, 1).unwrap());
    t
  }

  const BINARY: &str = "x ||| x ||| \n\
    x0:X x1:X ||| x0:X x1:X ||| p=-0.5\n\
    x0:X @ S ||| x0:X @ S ||| ";

  fn catalan(n: u128) -> u128 {
    (0..n).fold(1, |c, i| c * 2 * (2 * i + 1) / (i + 2))
  }

  #[test]
  fn test_counts_follow_bracketings() {
    let mut dict = Dict::new();
    let t = table(&mut dict, BINARY);
    for n in 1..=7usize {
      let words = vec!["x"; n].join(" ");
      let (forest, map) = t.build_forest(&HyperGraph::from_words(dict.parse_words(&words)));
      let root = t.root_node(&forest, &map).unwrap();
      // every binary bracketing of n leaves, each wrapped once in S
      assert_eq!(forest.derivation_count(root), catalan(n as u128 - 1), "n = {}", n);
    }
  }

  #[test]
  fn test_derivations_in_preorder() {
    let mut dict = Dict::new();
    let t = table(&mut dict, BINARY);
    let (forest, map) = t.build_forest(&HyperGraph::from_words(dict.parse_words("x x x")));
    let root = t.root_node(&forest, &map).unwrap();

    let derivs = forest.derivations(root, 10);
    assert_eq!(derivs.len(), 2);
    for d in derivs.iter() {
      // S, X over the span, one binary split below it, three leaves
      assert_eq!(d.len(), 6);
      assert_eq!(d.edges()[0].head(), root);
      assert!((d.prob() - (-1.0f64).exp()).abs() < 1e-9);
      let product = d.edges().iter().map(|e| e.prob()).product::<f64>();
      assert!((d.prob() - product).abs() < 1e-12);
      // two binary splits, and the log-domain total agrees with the probability
      let features = d.features();
      assert_eq!(features.get(dict.get("p").unwrap()), Some(-1.0));
      assert!((features.total().exp() - d.prob()).abs() < 1e-12);
    }
    assert_eq!(forest.derivations(root, 1).len(), 1);
  }

  #[test]
  fn test_derivation_trees() {
    let mut dict = Dict::new();
    let t = table(
      &mut dict,
      "the cat @ NP ||| le chat @ NP ||| \n\
       sat @ V ||| assis @ V ||| \n\
       x0:NP x1:V @ S ||| x0:NP est x1:V @ S ||| \n\
       x0:NP \"quietly\" x1:V @ S ||| x0:NP x1:V ||| ",
    );
    let (forest, map) = t.build_forest(&HyperGraph::from_words(dict.parse_words("the cat sat")));
    let root = t.root_node(&forest, &map).unwrap();
    let trees = forest.derivation_trees(root, &dict, 5);
    assert_eq!(trees.len(), 1);
    assert_eq!(format!("{}", trees[0]), "(S (NP the cat) (V sat))");
    assert_eq!(trees[0].leaves(), vec!["the", "cat", "sat"]);

    let (forest, map) =
      t.build_forest(&HyperGraph::from_words(dict.parse_words("the cat quietly sat")));
    let root = t.root_node(&forest, &map).unwrap();
    let trees = forest.derivation_trees(root, &dict, 5);
    assert_eq!(format!("{}", trees[0]), "(S (NP the cat) quietly (V sat))");
  }

  #[test]
  fn test_count_saturates() {
    let mut dict = Dict::new();
    let mut t = table(&mut dict, BINARY);
    let words = vec!["x"; 80].join(" ");
    t.set_span_limits(&[80]).unwrap();
    let (forest, map) = t.build_forest(&HyperGraph::from_words(dict.parse_words(&words)));
    let root = t.root_node(&forest, &map).unwrap();
    assert_eq!(forest.derivation_count(root), u128::MAX);
  }
}
