//! Minimal HTTP/1.1 server for exercising the real network paths.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every request with one canned response and records the request heads.
pub(crate) struct TestServer {
  pub url: String,
  requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
  pub async fn start(status: u16, body: &'static str) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
      while let Ok((mut socket, _)) = listener.accept().await {
        let seen = seen.clone();
        tokio::spawn(async move {
          let mut head = Vec::new();
          let mut chunk = [0u8; 1024];
          while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
              Ok(0) | Err(_) => break,
              Ok(n) => head.extend_from_slice(&chunk[..n]),
            }
          }
          seen.lock().unwrap().push(String::from_utf8_lossy(&head).into_owned());

          let response = format!(
            "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
          );
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });

    Self {
      url: format!("http://{}/", addr),
      requests,
    }
  }

  /// Request heads received so far, in arrival order.
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }

  pub fn hits(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}
