use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::Ordering;

use super::{
  FETCH_BUCKETS_MS,
  FLUSH_BUCKETS_MS,
  Histogram,
  Metrics
};

pub(super) fn render(
  metrics: &Metrics
) -> String {
  let mut out = String::new();

  header(&mut out, "feedgate_up", "gauge", "Service is running.");
  out.push_str("feedgate_up 1\n");

  header(&mut out, "feedgate_start_time_seconds", "gauge", "Start time in unix seconds.");
  let _ =
    writeln!(out, "feedgate_start_time_seconds {}", metrics.start_time_seconds);

  header(&mut out, "feedgate_batches_total", "counter", "Fetch batches processed.");
  let _ =
    writeln!(out, "feedgate_batches_total {}", metrics.batches.load(Ordering::Relaxed));

  header(&mut out, "feedgate_inflight_fetches", "gauge", "HTTP fetches in flight.");
  let _ = writeln!(
    out,
    "feedgate_inflight_fetches {}",
    metrics.inflight_fetches.load(Ordering::Relaxed)
  );

  labelled_counter(
    &mut out,
    "feedgate_attempts_total",
    "Ledger attempts by status.",
    "status",
    &metrics.attempts_by_status,
  );
  labelled_counter(
    &mut out,
    "feedgate_events_total",
    "Published events by name.",
    "event",
    &metrics.events_by_name,
  );
  labelled_counter(
    &mut out,
    "feedgate_skips_total",
    "Batch items skipped before fetching, by reason.",
    "reason",
    &metrics.skips_by_reason,
  );
  labelled_counter(
    &mut out,
    "feedgate_store_errors_total",
    "Degraded storage operations by store.",
    "store",
    &metrics.store_errors,
  );

  header(&mut out, "feedgate_fetch_latency_ms", "histogram", "Fetch latency by outcome status.");
  let latency = metrics
    .fetch_latency
    .lock()
    .unwrap_or_else(|e| e.into_inner());
  let mut statuses: Vec<&String> =
    latency.keys().collect();
  statuses.sort();
  for status in statuses {
    emit_histogram(
      &mut out,
      "feedgate_fetch_latency_ms",
      &FETCH_BUCKETS_MS,
      &latency[status],
      &[("status", status)],
    );
  }
  drop(latency);

  header(&mut out, "feedgate_ledger_flushed_rows_total", "counter", "Attempts written by flushes.");
  let _ = writeln!(
    out,
    "feedgate_ledger_flushed_rows_total {}",
    metrics.flushed_rows.load(Ordering::Relaxed)
  );

  header(&mut out, "feedgate_ledger_flush_ms", "histogram", "Ledger flush duration.");
  let flush = metrics
    .flush_latency
    .lock()
    .unwrap_or_else(|e| e.into_inner());
  emit_histogram(&mut out, "feedgate_ledger_flush_ms", &FLUSH_BUCKETS_MS, &flush, &[]);

  out
}

fn header(
  out: &mut String,
  name: &str,
  kind: &str,
  help: &str
) {
  let _ =
    writeln!(out, "# HELP {name} {help}");
  let _ =
    writeln!(out, "# TYPE {name} {kind}");
}

fn labelled_counter(
  out: &mut String,
  name: &str,
  help: &str,
  label: &str,
  map: &std::sync::Mutex<HashMap<String, u64>>,
) {
  header(out, name, "counter", help);
  let map =
    map.lock().unwrap_or_else(|e| e.into_inner());
  for (value, count) in sorted_map(&map) {
    let _ =
      writeln!(out, "{name}{} {count}", format_labels(&[(label, &value)], None));
  }
}

fn escape_label(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn sorted_map(
  map: &HashMap<String, u64>
) -> Vec<(String, u64)> {
  let mut items: Vec<(String, u64)> =
    map.iter().map(|(k, v)| (k.clone(), *v)).collect();
  items.sort_by(|a, b| a.0.cmp(&b.0));
  items
}

fn emit_histogram(
  out: &mut String,
  name: &str,
  buckets: &[u64],
  hist: &Histogram,
  labels: &[(&str, &str)]
) {
  let mut cumulative = 0u64;
  for (idx, upper) in buckets.iter().enumerate() {
    cumulative += hist.buckets.get(idx).copied().unwrap_or(0);
    let _ = writeln!(
      out,
      "{name}_bucket{} {cumulative}",
      format_labels(labels, Some(&upper.to_string()))
    );
  }
  cumulative += hist.buckets.get(buckets.len()).copied().unwrap_or(0);
  let _ =
    writeln!(out, "{name}_bucket{} {cumulative}", format_labels(labels, Some("+Inf")));
  let _ =
    writeln!(out, "{name}_sum{} {}", format_labels(labels, None), hist.sum);
  let _ =
    writeln!(out, "{name}_count{} {}", format_labels(labels, None), hist.count);
}

fn format_labels(
  labels: &[(&str, &str)],
  le: Option<&str>
) -> String {
  let mut parts: Vec<String> = labels
    .iter()
    .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
    .collect();
  if let Some(le) = le {
    parts.push(format!("le=\"{le}\""));
  }
  if parts.is_empty() {
    String::new()
  } else {
    format!("{{{}}}", parts.join(","))
  }
}
