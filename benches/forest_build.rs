use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hieroforest::{Dict, HyperGraph, LookupTableFsm, RuleFsm};

const TOY: &str = include_str!("../grammars/toy.hiero");
const GLUE: &str = include_str!("../grammars/glue.hiero");

const AMBIGUOUS: &str = "x ||| x ||| \nx0:X x1:X ||| x0:X x1:X ||| p=-0.5";

fn build(table: &LookupTableFsm, input: &HyperGraph) -> usize {
  table.transform_graph(input).num_edges()
}

fn criterion_benchmark(c: &mut Criterion) {
  let mut dict = Dict::new();
  let mut toy = LookupTableFsm::new(&mut dict);
  toy.add_rule_fsm(RuleFsm::read_from_rule_table(TOY.as_bytes(), &mut dict, 1).unwrap());
  toy.add_rule_fsm(RuleFsm::read_from_rule_table(GLUE.as_bytes(), &mut dict, 1).unwrap());
  toy.set_span_limits(&[10, 100]).unwrap();

  let mut ambiguous = LookupTableFsm::new(&mut dict);
  ambiguous.add_rule_fsm(RuleFsm::read_from_rule_table(AMBIGUOUS.as_bytes(), &mut dict, 1).unwrap());

  let simple = HyperGraph::from_words(dict.parse_words("the big dog saw a cat"));
  let with_unknowns = HyperGraph::from_words(
    dict.parse_words("a big cat saw the dog and the dog saw a big big cat"),
  );
  let xs = HyperGraph::from_words(dict.parse_words(&vec!["x"; 20].join(" ")));

  c.bench_function("toy sentence", |b| {
    b.iter(|| build(black_box(&toy), black_box(&simple)))
  });

  c.bench_function("toy sentence with glue", |b| {
    b.iter(|| build(black_box(&toy), black_box(&with_unknowns)))
  });

  c.bench_function("fully ambiguous, 20 words", |b| {
    b.iter(|| build(black_box(&ambiguous), black_box(&xs)))
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
