//! Reqwest-backed HTTP client
//! implementing the `Http` port; folds
//! transport errors and size ceilings
//! into an `AttemptStatus`. Bodies are
//! decoded by the charset the response
//! declares.
use std::error::Error as _;
use std::time::Duration;

use encoding_rs::{
  Encoding,
  UTF_8
};
use reqwest::{
  Client,
  ClientBuilder,
  Proxy,
  Response,
  StatusCode,
  header
};
use tracing::{
  debug,
  warn
};

use crate::domain::model::{
  AttemptStatus,
  FetchResult,
  FetchSettings,
  classify_status_code
};
use crate::ports::http::Http;

pub struct ReqwestHttp {
  client: Client,
  proxy_client: Option<Client>,
  accept: String,
  timeout_ms: u64,
  max_body_bytes: u64,
}

impl ReqwestHttp {
  pub fn new(
    settings: &FetchSettings
  ) -> Result<Self, reqwest::Error> {
    let client =
      Self::builder(settings).build()?;
    let proxy_client = match &settings.proxy_url {
      | Some(url) => Some(Self::builder(settings).proxy(Proxy::all(url)?).build()?),
      | None => None,
    };
    Ok(Self {
      client,
      proxy_client,
      accept: settings.accept.clone(),
      timeout_ms: settings.timeout_ms,
      max_body_bytes: settings.max_body_bytes,
    })
  }

  fn builder(
    settings: &FetchSettings
  ) -> ClientBuilder {
    Client::builder()
      .user_agent(settings.user_agent.clone())
      .pool_idle_timeout(Duration::from_secs(120))
      .timeout(Duration::from_millis(settings.timeout_ms))
  }

  async fn send(
    &self,
    client: &Client,
    url: &str,
    headers: &[(String, String)],
  ) -> Result<Response, reqwest::Error> {
    let mut req =
      client.get(url).header(header::ACCEPT, &self.accept);
    for (name, value) in headers {
      req = req.header(name.as_str(), value.as_str());
    }
    req.send().await
  }

  fn classify_error(
    &self,
    e: &reqwest::Error
  ) -> (AttemptStatus, String) {
    if e.is_timeout() {
      (
        AttemptStatus::FetchTimeout,
        format!("Request took longer than {}ms to complete", self.timeout_ms),
      )
    } else {
      (AttemptStatus::FetchError, error_chain(e))
    }
  }

  fn header_value(
    headers: &header::HeaderMap,
    name: header::HeaderName
  ) -> Option<String> {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(|s| s.to_string())
  }

  fn oversized(
    &self,
    status_code: u16,
    seen: u64
  ) -> FetchResult {
    FetchResult {
      status: Some(AttemptStatus::RefusedOversized),
      status_code: Some(status_code),
      error_message: Some(format!(
        "Response body exceeds {} bytes (saw {seen})",
        self.max_body_bytes
      )),
      ..FetchResult::default()
    }
  }
}

fn error_chain(
  e: &reqwest::Error
) -> String {
  let mut out = e.to_string();
  let mut source = e.source();
  while let Some(s) = source {
    out.push_str(": ");
    out.push_str(&s.to_string());
    source = s.source();
  }
  out
}

/// `charset` parameter of a
/// Content-Type value, unquoted.
fn charset_label(
  content_type: &str
) -> Option<&str> {
  content_type.split(';').skip(1).find_map(|param| {
    let (name, value) =
      param.split_once('=')?;
    name.trim()
      .eq_ignore_ascii_case("charset")
      .then(|| value.trim().trim_matches('"'))
  })
}

/// Unknown or missing labels fall back
/// to UTF-8. Malformed sequences are
/// replaced rather than rejected.
fn decode_body(
  content_type: Option<&str>,
  body: &[u8]
) -> String {
  let encoding = content_type
    .and_then(charset_label)
    .and_then(|label| Encoding::for_label(label.as_bytes()))
    .unwrap_or(UTF_8);
  let (text, _, _) =
    encoding.decode(body);
  text.into_owned()
}

#[async_trait::async_trait]
impl Http for ReqwestHttp {
  async fn fetch(
    &self,
    url: &str
  ) -> FetchResult {
    self.fetch_with_headers(url, &[]).await
  }

  async fn fetch_with_headers(
    &self,
    url: &str,
    headers: &[(String, String)]
  ) -> FetchResult {
    let start =
      tokio::time::Instant::now();
    debug!(url, "HTTP GET start");

    let mut sent =
      self.send(&self.client, url, headers).await;
    let throttled =
      matches!(&sent, Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS);
    if throttled && let Some(proxy) = &self.proxy_client {
      debug!(url, "Rate limited, retrying through proxy");
      sent = self.send(proxy, url, headers).await;
    }

    let mut resp = match sent {
      | Ok(resp) => resp,
      | Err(e) => {
        warn!(url, error = %e, "HTTP GET failed");
        let (status, message) =
          self.classify_error(&e);
        return FetchResult {
          status: Some(status),
          error_message: Some(message),
          latency_ms: start.elapsed().as_millis() as u64,
          ..FetchResult::default()
        };
      }
    };

    let status_code =
      resp.status().as_u16();
    let resp_headers = resp.headers();
    let etag =
      Self::header_value(resp_headers, header::ETAG);
    let last_modified =
      Self::header_value(resp_headers, header::LAST_MODIFIED);
    let server =
      Self::header_value(resp_headers, header::SERVER);
    let content_type =
      Self::header_value(resp_headers, header::CONTENT_TYPE);

    if let Some(len) = resp.content_length()
      && len > self.max_body_bytes
    {
      let mut result =
        self.oversized(status_code, len);
      result.latency_ms = start.elapsed().as_millis() as u64;
      return result;
    }

    let mut body: Vec<u8> = Vec::new();
    if resp.status() != StatusCode::NOT_MODIFIED {
      loop {
        match resp.chunk().await {
          | Ok(Some(chunk)) => {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_body_bytes {
              let mut result =
                self.oversized(status_code, body.len() as u64);
              result.latency_ms = start.elapsed().as_millis() as u64;
              return result;
            }
          }
          | Ok(None) => break,
          | Err(e) => {
            warn!(url, error = %e, "Failed reading body");
            let (status, message) = if e.is_timeout() {
              self.classify_error(&e)
            } else {
              (AttemptStatus::ParseError, error_chain(&e))
            };
            return FetchResult {
              status: Some(status),
              status_code: Some(status_code),
              etag,
              last_modified,
              server,
              error_message: Some(message),
              latency_ms: start.elapsed().as_millis() as u64,
              ..FetchResult::default()
            };
          }
        }
      }
    }

    FetchResult {
      status: Some(classify_status_code(status_code)),
      status_code: Some(status_code),
      body: Some(decode_body(content_type.as_deref(), &body)),
      etag,
      last_modified,
      server,
      error_message: None,
      latency_ms: start.elapsed().as_millis() as u64,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    Mutex
  };

  use tokio::io::{
    AsyncReadExt,
    AsyncWriteExt
  };
  use tokio::net::TcpListener;

  use super::*;

  fn settings() -> FetchSettings {
    FetchSettings {
      user_agent: "feedgate-test".to_string(),
      accept: "application/rss+xml".to_string(),
      timeout_ms: 5_000,
      max_body_bytes: 1024,
      max_concurrent_fetches: 4,
      known_cdn_servers: Vec::new(),
      proxy_url: None,
    }
  }

  fn reply(
    status: &str,
    content_type: &str,
    body: &[u8]
  ) -> Vec<u8> {
    let mut out = format!(
      "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
      body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
  }

  /// Answers one connection per
  /// scripted reply and records each
  /// request head.
  async fn serve(
    replies: Vec<Vec<u8>>
  ) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener =
      TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen =
      Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
      for reply in replies {
        let (mut stream, _) =
          listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
          let n =
            stream.read(&mut buf).await.unwrap();
          if n == 0 {
            break;
          }
          head.extend_from_slice(&buf[..n]);
        }
        log.lock()
          .unwrap()
          .push(String::from_utf8_lossy(&head).into_owned());
        stream.write_all(&reply).await.unwrap();
        let _ = stream.shutdown().await;
      }
    });
    (base, seen)
  }

  #[test]
  fn charset_label_reads_quoted_and_cased_params() {
    assert_eq!(charset_label("text/xml; Charset=\"ISO-8859-1\""), Some("ISO-8859-1"));
    assert_eq!(charset_label("text/xml;charset=utf-8"), Some("utf-8"));
    assert_eq!(charset_label("text/xml"), None);
  }

  #[tokio::test]
  async fn latin1_body_is_decoded_by_declared_charset() {
    let (base, _) = serve(vec![reply(
      "200 OK",
      "application/rss+xml; charset=iso-8859-1",
      b"<rss>caf\xe9</rss>",
    )])
    .await;
    let http =
      ReqwestHttp::new(&settings()).unwrap();

    let result =
      http.fetch(&format!("{base}/feed")).await;

    assert_eq!(result.attempt_status(), AttemptStatus::Ok);
    assert_eq!(result.body.as_deref(), Some("<rss>café</rss>"));
  }

  #[tokio::test]
  async fn invalid_utf8_without_charset_is_replaced_not_rejected() {
    let (base, _) =
      serve(vec![reply("200 OK", "application/rss+xml", b"<rss>\xff</rss>")]).await;
    let http =
      ReqwestHttp::new(&settings()).unwrap();

    let result =
      http.fetch(&format!("{base}/feed")).await;

    assert_eq!(result.attempt_status(), AttemptStatus::Ok);
    assert_eq!(result.body.as_deref(), Some("<rss>\u{fffd}</rss>"));
  }

  #[tokio::test]
  async fn body_over_ceiling_is_refused() {
    let big = vec![b'a'; 2048];
    let (base, _) =
      serve(vec![reply("200 OK", "text/plain", &big)]).await;
    let http =
      ReqwestHttp::new(&settings()).unwrap();

    let result =
      http.fetch(&format!("{base}/feed")).await;

    assert_eq!(result.attempt_status(), AttemptStatus::RefusedOversized);
    assert!(result.body.is_none());
  }

  #[tokio::test]
  async fn rate_limited_response_is_retried_through_proxy() {
    let (origin, origin_seen) =
      serve(vec![reply("429 Too Many Requests", "text/plain", b"slow down")]).await;
    let (proxy, proxy_seen) =
      serve(vec![reply("200 OK", "application/rss+xml", b"<rss/>")]).await;
    let mut cfg = settings();
    cfg.proxy_url = Some(proxy);
    let http =
      ReqwestHttp::new(&cfg).unwrap();

    let url = format!("{origin}/feed");
    let result = http.fetch(&url).await;

    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.body.as_deref(), Some("<rss/>"));
    assert_eq!(origin_seen.lock().unwrap().len(), 1);
    let proxied =
      proxy_seen.lock().unwrap();
    assert_eq!(proxied.len(), 1);
    assert!(proxied[0].starts_with(&format!("GET {url} ")));
  }

  #[tokio::test]
  async fn rate_limited_response_without_proxy_is_kept() {
    let (origin, _) =
      serve(vec![reply("429 Too Many Requests", "text/plain", b"slow down")]).await;
    let http =
      ReqwestHttp::new(&settings()).unwrap();

    let result =
      http.fetch(&format!("{origin}/feed")).await;

    assert_eq!(result.status_code, Some(429));
    assert_eq!(result.attempt_status(), AttemptStatus::BadStatusCode);
  }

  #[tokio::test]
  async fn caller_headers_are_sent_with_request() {
    let (base, seen) =
      serve(vec![reply("200 OK", "application/rss+xml", b"<rss/>")]).await;
    let http =
      ReqwestHttp::new(&settings()).unwrap();
    let headers =
      vec![("x-feed-token".to_string(), "s3cret".to_string())];

    let result =
      http.fetch_with_headers(&format!("{base}/feed"), &headers).await;

    assert_eq!(result.attempt_status(), AttemptStatus::Ok);
    let head =
      seen.lock().unwrap()[0].to_ascii_lowercase();
    assert!(head.contains("x-feed-token: s3cret"));
    assert!(head.contains("accept: application/rss+xml"));
  }
}
