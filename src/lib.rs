#[macro_use]
extern crate lazy_static;

pub mod dict;
pub mod forest;
pub mod hypergraph;
pub mod lookup_node;
pub mod lookup_table;
pub mod parse_grammar;
pub mod rule_fsm;
pub mod rules;
pub mod sparse_map;
pub mod syntree;
pub mod utils;

pub use crate::dict::{Dict, WordId};
pub use crate::hypergraph::{GraphFragment, HyperEdge, HyperGraph, HyperNode};
pub use crate::lookup_table::{LookupTableFsm, NodeMap};
pub use crate::rule_fsm::RuleFsm;
pub use crate::rules::{HeadLabels, TranslationRule};
pub use crate::utils::Err;

impl LookupTableFsm {
  /// Splits `sentence` on whitespace and builds its forest
  pub fn parse(&self, sentence: &str, dict: &mut Dict) -> HyperGraph {
    self.transform_graph(&HyperGraph::from_words(dict.parse_words(sentence)))
  }
}

#[cfg(test)]
const TOY: &str = include_str!("../grammars/toy.hiero");
#[cfg(test)]
const GLUE: &str = include_str!("../grammars/glue.hiero");

#[cfg(test)]
fn toy_table(dict: &mut Dict) -> LookupTableFsm {
  let mut t = LookupTableFsm::new(dict);
  t.add_rule_fsm(RuleFsm::read_from_rule_table(TOY.as_bytes(), dict, 1).unwrap());
  t.add_rule_fsm(RuleFsm::read_from_rule_table(GLUE.as_bytes(), dict, 1).unwrap());
  t
}

#[test]
fn test_toy_grammar_end_to_end() {
  let mut dict = Dict::new();
  let mut t = toy_table(&mut dict);
  t.set_span_limits(&[10, 100]).unwrap();

  let input = HyperGraph::from_words(dict.parse_words("the big dog saw a cat"));
  let (forest, map) = t.build_forest(&input);
  let root = t.root_node(&forest, &map).unwrap();
  assert!(forest.derivation_count(root) >= 2);

  let trees = forest.derivation_trees(root, &dict, 100);
  assert!(!trees.is_empty());
  for tree in trees.iter() {
    assert_eq!(tree.span(), (0, 6));
    assert_eq!(tree.leaves(), vec!["the", "big", "dog", "saw", "a", "cat"]);
  }
  // the toy grammar proper covers the whole sentence
  assert!(trees.iter().any(|t| format!("{}", t).starts_with("(S (NP")));
}

#[test]
fn test_glue_passes_unknown_words_through() {
  let mut dict = Dict::new();
  let mut t = toy_table(&mut dict);
  t.set_span_limits(&[10, 100]).unwrap();

  let forest = t.parse("the dog saw zyzzyva", &mut dict);
  let zyzzyva = dict.get("zyzzyva").unwrap();
  let unk = forest.find_node(dict.get("X").unwrap(), (3, 4)).unwrap();
  let edge = forest.edge(forest.node(unk).edges()[0]);
  assert_eq!(edge.trg_words, vec![vec![zyzzyva]]);
  assert!(forest.find_node(dict.get("S").unwrap(), (0, 4)).is_some());

  t.set_delete_unknown(true);
  let forest = t.parse("the dog saw zyzzyva", &mut dict);
  assert!(forest.nodes().iter().all(|n| n.span.1 <= 3));
}

#[test]
fn test_forest_survives_json() {
  let mut dict = Dict::new();
  let mut t = toy_table(&mut dict);
  t.set_save_src_str(true);
  let forest = t.parse("a cat saw the big dog", &mut dict);
  assert!(forest.num_edges() > 0);

  let json = forest.to_json().unwrap();
  let back = HyperGraph::from_json(&json).unwrap();
  assert!(forest.check_equal(&back));
  assert!(back.edges().iter().all(|e| e.src_str.is_some()));
}
