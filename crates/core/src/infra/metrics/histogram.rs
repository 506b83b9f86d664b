#[derive(Debug, Clone)]
pub(crate) struct Histogram {
  pub(crate) buckets: Vec<u64>,
  pub(crate) sum: u64,
  pub(crate) count: u64,
}

impl Histogram {
  pub(crate) fn new(
    bucket_len: usize
  ) -> Self {
    Self {
      // Last slot is the +Inf overflow.
      buckets: vec![0; bucket_len + 1],
      sum: 0,
      count: 0,
    }
  }

  pub(crate) fn observe(
    &mut self,
    value_ms: u64,
    bounds: &[u64]
  ) {
    self.sum += value_ms;
    self.count += 1;
    let idx = bounds
      .iter()
      .position(|upper| value_ms <= *upper)
      .unwrap_or(bounds.len());
    self.buckets[idx] += 1;
  }
}
