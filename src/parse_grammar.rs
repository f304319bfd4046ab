//! Line-oriented parsing of hierarchical rule tables

use std::collections::HashMap;
use std::io::BufRead;

use regex::Regex;

use crate::dict::{Dict, WordId};
use crate::rules::{placeholder, HeadLabels, TranslationRule};
use crate::Err;

/// Head label used when a side has no `@ LABEL` suffix
pub const DEFAULT_LABEL: &str = "X";

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

regex_static!(COLUMN_SEP, r"\s*\|\|\|\s*");
regex_static!(FACTOR_SEP, r"\s*\|COL\|\s*");
regex_static!(NONTERMINAL, r"^x(\d+):(\S+)$");

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
  Word(&'a str),
  Slot { name: &'a str, label: &'a str },
}

fn parse_token(tok: &str) -> Token<'_> {
  if let Some(caps) = NONTERMINAL.captures(tok) {
    let name = caps.get(1).unwrap().as_str();
    let label = caps.get(2).unwrap().as_str();
    return Token::Slot { name, label };
  }
  // "word" and word are the same terminal
  if tok.len() >= 2 && tok.starts_with('"') && tok.ends_with('"') {
    Token::Word(&tok[1..tok.len() - 1])
  } else {
    Token::Word(tok)
  }
}

/// Splits one side of a rule into its tokens and its optional `@ LABEL` head
fn parse_side(side: &str) -> Result<(Vec<Token<'_>>, Option<&str>), Err> {
  let mut toks = side.split_whitespace().collect::<Vec<_>>();
  let mut head = None;
  if toks.len() >= 2 && toks[toks.len() - 2] == "@" {
    head = toks.pop();
    toks.pop();
  } else if toks.last() == Some(&"@") {
    return Err(format!("dangling @ without a label in {:?}", side).into());
  }
  Ok((toks.into_iter().map(parse_token).collect(), head))
}

/// Parses a single `SOURCE ||| TARGET ||| FEATURES` line
pub fn parse_rule(line: &str, dict: &mut Dict, trg_factors: usize) -> Result<TranslationRule, Err> {
  let columns = COLUMN_SEP.split(line).collect::<Vec<_>>();
  if columns.len() < 3 {
    return Err(format!("bad line in rule table: {}", line).into());
  }

  let (src_toks, src_head) = parse_side(columns[0])?;
  if src_toks.is_empty() {
    return Err(format!("empty source side in rule: {}", line).into());
  }
  let src_head = dict.wid(src_head.unwrap_or(DEFAULT_LABEL));

  let mut slots: HashMap<&str, usize> = HashMap::new();
  let mut child_labels: Vec<Vec<WordId>> = Vec::new();
  let mut source = Vec::with_capacity(src_toks.len());
  for tok in src_toks.into_iter() {
    match tok {
      Token::Word(w) => source.push(dict.wid(w)),
      Token::Slot { name, label } => {
        if slots.contains_key(name) {
          return Err(format!("non-terminal x{} repeated in source of: {}", name, line).into());
        }
        let slot = child_labels.len();
        slots.insert(name, slot);
        child_labels.push(vec![dict.wid(label); trg_factors + 1]);
        source.push(placeholder(slot));
      }
    }
  }

  let factors = FACTOR_SEP.split(columns[1]).collect::<Vec<_>>();
  if factors.len() != trg_factors {
    return Err(
      format!(
        "expected {} target factor(s) but found {} in: {}",
        trg_factors,
        factors.len(),
        line
      )
      .into(),
    );
  }

  let mut head = vec![src_head; trg_factors + 1];
  let mut targets = Vec::with_capacity(trg_factors);
  for (factor, text) in factors.into_iter().enumerate() {
    let (toks, trg_head) = parse_side(text)?;
    if let Some(label) = trg_head {
      head[factor + 1] = dict.wid(label);
    }
    let mut target = Vec::with_capacity(toks.len());
    for tok in toks {
      match tok {
        Token::Word(w) => target.push(dict.wid(w)),
        Token::Slot { name, label } => {
          let slot = *slots.get(name).ok_or_else(|| -> Err {
            format!("target non-terminal x{} missing from source of: {}", name, line).into()
          })?;
          child_labels[slot][factor + 1] = dict.wid(label);
          target.push(placeholder(slot));
        }
      }
    }
    targets.push(target);
  }

  let features = dict.parse_features(columns[2])?;

  Ok(TranslationRule {
    source,
    targets,
    head: HeadLabels::new(head),
    child_labels: child_labels.into_iter().map(HeadLabels::new).collect(),
    features,
    src_str: columns[0].trim().to_string(),
  })
}

/// Parses every rule in a rule table, one per line. Blank lines and lines
/// starting with `#` are skipped; the first malformed line aborts the load.
pub fn parse_rule_table<R: BufRead>(
  reader: R,
  dict: &mut Dict,
  trg_factors: usize,
) -> Result<Vec<TranslationRule>, Err> {
  let mut rules = Vec::new();
  for (lineno, line) in reader.lines().enumerate() {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    let rule = parse_rule(trimmed, dict, trg_factors)
      .map_err(|e| -> Err { format!("line {}: {}", lineno + 1, e).into() })?;
    rules.push(rule);
  }
  Ok(rules)
}
