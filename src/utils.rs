use std::error::Error;

/// Boxed static error type
pub type Err = Box<dyn Error + Send + Sync + 'static>;

/// Takes one list of alternatives per tail slot and returns every way of picking
/// one alternative per slot, in slot order. Will clone the elements.
///
/// ```
/// // two derivations for the first tail, one for the second, three for the third
/// let v = vec![
///   vec!["np-a", "np-b"],
///   vec!["vp"],
///   vec!["pp-a", "pp-b", "pp-c"],
/// ];
///
/// let picks = hieroforest::utils::combinations(&v);
/// assert_eq!(picks.len(), 6);
/// assert_eq!(picks[0], vec!["np-a", "vp", "pp-a"]);
/// assert_eq!(picks[1], vec!["np-b", "vp", "pp-a"]);
/// ```
pub fn combinations<T>(list: &[Vec<T>]) -> Vec<Vec<T>>
where
  T: Clone,
{
  if list.is_empty() {
    Vec::new()
  } else if list.len() == 1 {
    list[0].iter().map(|e| vec![e.clone()]).collect()
  } else {
    let (head, tail) = list.split_at(1);
    let head = &head[0];

    combinations(tail)
      .into_iter()
      .flat_map(|subseq| {
        // prepend every element of the head to every possible subseq
        head.iter().map(move |v| {
          let mut newseq = subseq.clone();
          newseq.insert(0, v.clone());
          newseq
        })
      })
      .collect()
  }
}
