/// Placement policy: which fitting free block a search settles on.
///
/// All three policies only consider blocks at least as large as the request;
/// ties go to the candidate seen first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
  /// The first fitting block encountered.
  FirstFit,
  /// The smallest fitting block.
  BestFit,
  /// The largest fitting block.
  WorstFit,
}

impl Default for Placement {
  fn default() -> Self {
    Placement::BestFit
  }
}
