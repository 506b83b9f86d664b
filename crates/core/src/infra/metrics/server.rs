use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{
  AsyncBufReadExt,
  AsyncWriteExt,
  BufReader
};
use tokio::net::{
  TcpListener,
  TcpStream
};
use tracing::{
  debug,
  info
};

use super::Metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub(super) async fn spawn(
  bind: &str,
  metrics: Arc<Metrics>
) -> Result<(), String> {
  let addr: SocketAddr = bind
    .parse()
    .map_err(|e| format!("invalid metrics bind '{bind}': {e}"))?;
  let listener = TcpListener::bind(addr)
    .await
    .map_err(|e| format!("metrics bind {bind}: {e}"))?;
  info!(bind = %addr, "Metrics endpoint listening");

  tokio::spawn(async move {
    loop {
      match listener.accept().await {
        | Ok((stream, peer)) => {
          let metrics =
            Arc::clone(&metrics);
          tokio::spawn(async move {
            if let Err(e) = serve_one(stream, &metrics).await {
              debug!(%peer, error = %e, "Metrics scrape aborted");
            }
          });
        }
        | Err(e) => debug!(error = %e, "Metrics accept failed"),
      }
    }
  });

  Ok(())
}

/// Answers a single request and closes
/// the connection. Only the request
/// line is inspected.
async fn serve_one(
  stream: TcpStream,
  metrics: &Metrics
) -> std::io::Result<()> {
  let mut reader =
    BufReader::new(stream);
  let mut request_line = String::new();
  reader.read_line(&mut request_line).await?;

  let mut parts =
    request_line.split_whitespace();
  let method =
    parts.next().unwrap_or("GET");
  let path =
    parts.next().unwrap_or("/");

  let (status, content_type, body) = match path {
    | "/metrics" => ("200 OK", PROMETHEUS_CONTENT_TYPE, metrics.render()),
    | "/healthz" => ("200 OK", "text/plain", "ok\n".to_string()),
    | _ => ("404 Not Found", "text/plain", "not found\n".to_string()),
  };

  let mut out = format!(
    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
    body.len()
  );
  if method != "HEAD" {
    out.push_str(&body);
  }

  let mut stream = reader.into_inner();
  stream.write_all(out.as_bytes()).await?;
  stream.shutdown().await
}
