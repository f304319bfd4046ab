use std::env;
use std::io;
use std::io::Write;
use std::process;

use hieroforest::{Dict, Err, HyperGraph, LookupTableFsm};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn usage(prog_name: &str) -> String {
  format!(
    r"Usage: {} FILE [FILE...] [options]

Reads one sentence per line from stdin and prints the forest each one yields.
Set RUST_LOG (e.g. RUST_LOG=debug) to see what the builder is doing.

Options:
  -h, --help               Print this message
  -s, --span-limits N,M    Widest span each grammar may cover, one per FILE
  -d, --delete-unknown     Drop words no rule covers instead of passing them through
  -r, --root LABEL         Label of the node covering the sentence (default S)
  -u, --unk LABEL          Label given to unknown words (default X)
  -f, --factors N          Number of target factors in the grammars (default 1)
      --src-str            Keep each rule's source text on its edges
  -j, --json               Print the forest as JSON
  -t, --trees N            Also print up to N derivation trees with their
                           probability and summed features",
    prog_name
  )
}

struct Args {
  filenames: Vec<String>,
  span_limits: Option<Vec<usize>>,
  delete_unknown: bool,
  root: Option<String>,
  unk: Option<String>,
  factors: usize,
  src_str: bool,
  json: bool,
  trees: usize,
}

impl Args {
  fn make_error_message(msg: &str, prog_name: impl AsRef<str>) -> String {
    format!("argument error: {}.\n\n{}", msg, usage(prog_name.as_ref()))
  }

  fn parse(v: Vec<String>) -> Result<Self, String> {
    let mut iter = v.into_iter();
    let prog_name = match iter.next() {
      Some(name) => name,
      None => return Err(Self::make_error_message("bad argument vector", "hieroforest")),
    };

    let mut args = Self {
      filenames: Vec::new(),
      span_limits: None,
      delete_unknown: false,
      root: None,
      unk: None,
      factors: 1,
      src_str: false,
      json: false,
      trees: 0,
    };

    while let Some(o) = iter.next() {
      let mut value = |flag: &str| {
        iter
          .next()
          .ok_or_else(|| Self::make_error_message(&format!("{} needs a value", flag), &prog_name))
      };
      let number = |s: String| {
        s.parse::<usize>()
          .map_err(|_| Self::make_error_message(&format!("not a number: {}", s), &prog_name))
      };

      match o.as_str() {
        "-h" | "--help" => {
          println!("{}", usage(&prog_name));
          process::exit(0);
        }
        "-s" | "--span-limits" => {
          let limits = value(&o)?
            .split(',')
            .map(|s| number(s.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
          args.span_limits = Some(limits);
        }
        "-d" | "--delete-unknown" => args.delete_unknown = true,
        "-r" | "--root" => args.root = Some(value(&o)?),
        "-u" | "--unk" => args.unk = Some(value(&o)?),
        "-f" | "--factors" => args.factors = number(value(&o)?)?,
        "--src-str" => args.src_str = true,
        "-j" | "--json" => args.json = true,
        "-t" | "--trees" => args.trees = number(value(&o)?)?,
        _ if o.starts_with('-') => {
          return Err(Self::make_error_message(&format!("unknown option {}", o), prog_name));
        }
        _ => args.filenames.push(o),
      }
    }

    if args.filenames.is_empty() {
      Err(Self::make_error_message("missing grammar file", prog_name))
    } else {
      Ok(args)
    }
  }
}

fn print_forest(
  table: &LookupTableFsm,
  dict: &mut Dict,
  sentence: &str,
  opts: &Args,
) -> Result<(), Err> {
  let input = HyperGraph::from_words(dict.parse_words(sentence));
  let (forest, map) = table.build_forest(&input);

  if opts.json {
    println!("{}", forest.to_json()?);
  } else {
    print!("{}", forest.display(dict));
  }

  match table.root_node(&forest, &map) {
    Some(root) => {
      let count = forest.derivation_count(root);
      println!(
        "{} derivation{}",
        count,
        if count == 1 { "" } else { "s" }
      );
      let derivations = forest.derivations(root, opts.trees);
      let trees = forest.derivation_trees(root, dict, opts.trees);
      for (derivation, tree) in derivations.iter().zip(trees) {
        println!(
          "{}\tp={} {}",
          tree,
          derivation.prob(),
          derivation.features().display(dict)
        );
      }
    }
    None => println!("no derivation covers the sentence"),
  }
  Ok(())
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let opts = match Args::parse(env::args().collect()) {
    Ok(opts) => opts,
    Err(msg) => {
      eprintln!("{}", msg);
      process::exit(255);
    }
  };

  let mut dict = Dict::new();
  let mut table = LookupTableFsm::read_from_files(&opts.filenames, &mut dict, opts.factors)?;
  if let Some(limits) = &opts.span_limits {
    table.set_span_limits(limits)?;
  }
  table.set_delete_unknown(opts.delete_unknown);
  table.set_save_src_str(opts.src_str);
  if let Some(root) = &opts.root {
    table.set_root_symbol(dict.wid(root));
  }
  if let Some(unk) = &opts.unk {
    table.set_unk_symbol(dict.wid(unk));
  }
  debug!(grammars = table.rule_fsms().len(), "loaded grammars");

  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    match io::stdin().read_line(&mut input) {
      Ok(_) => {
        if input.is_empty() {
          // ctrl+d
          return Ok(());
        }
        if let Err(e) = print_forest(&table, &mut dict, input.trim(), &opts) {
          warn!(error = %e, "could not print forest");
        }
        input.clear();
      }
      Err(error) => return Err(error.into()),
    }
  }
}
