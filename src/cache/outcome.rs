//! Classification of a single remote call attempt.
//!
//! Every network call made on behalf of the engine resolves to exactly one
//! [`RemoteOutcome`]. Classification is pure: the same raw reply always
//! produces the same outcome, and nothing here retries.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failures the synchronization engine can surface.
///
/// The `Display` output is the human-readable message carried by
/// `Resource::Error`, so it must never be empty.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// The call could not complete (DNS, TLS, connection reset, timeout)
  #[error("network error: {0}")]
  Transport(String),

  /// The remote answered with a non-success status
  #[error("{message}")]
  Remote { status: u16, message: String },

  /// The remote answered 2xx but the body could not be decoded
  #[error("unexpected response: {0}")]
  Decode(String),

  /// A cache transaction failed to commit, or a cache read failed
  #[error("cache error: {0}")]
  Storage(String),
}

/// The raw result of a completed HTTP exchange, before classification.
#[derive(Debug, Clone)]
pub struct RawReply {
  pub status: u16,
  pub body: Vec<u8>,
}

/// Result of exactly one remote call attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome<T> {
  Success(T),
  /// A successful reply with no content
  Empty,
  Error(SyncError),
}

impl<T: DeserializeOwned> RemoteOutcome<T> {
  /// Classify a call's raw outcome.
  ///
  /// - transport failure → `Error`
  /// - non-2xx status → `Error` with a message taken from the body when possible
  /// - 204, or 2xx with a blank body → `Empty`
  /// - otherwise the decoded body → `Success`
  pub fn classify(reply: std::result::Result<RawReply, SyncError>) -> Self {
    let reply = match reply {
      Ok(reply) => reply,
      Err(e) => return Self::Error(e),
    };

    if !(200..300).contains(&reply.status) {
      return Self::Error(SyncError::Remote {
        status: reply.status,
        message: error_message(&reply),
      });
    }

    if reply.status == 204 || reply.body.iter().all(u8::is_ascii_whitespace) {
      return Self::Empty;
    }

    match serde_json::from_slice(&reply.body) {
      Ok(body) => Self::Success(body),
      Err(e) => Self::Error(SyncError::Decode(e.to_string())),
    }
  }
}

impl<T> RemoteOutcome<T> {
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteOutcome<U> {
    match self {
      Self::Success(body) => RemoteOutcome::Success(f(body)),
      Self::Empty => RemoteOutcome::Empty,
      Self::Error(e) => RemoteOutcome::Error(e),
    }
  }

  /// Convert to a plain result for callers that need a body (pass-through calls).
  pub fn into_result(self) -> Result<T> {
    match self {
      Self::Success(body) => Ok(body),
      Self::Empty => Err(eyre!("Remote returned no content")),
      Self::Error(e) => Err(e.into()),
    }
  }
}

/// Derive a human-readable message from an error reply.
///
/// Prefers a message field from a JSON body, then the raw body text, then
/// the canonical reason phrase for the status.
fn error_message(reply: &RawReply) -> String {
  if let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(&reply.body) {
    for field in ["status_message", "message", "error"] {
      if let Some(message) = fields.get(field).and_then(|v| v.as_str()) {
        if !message.trim().is_empty() {
          return message.trim().to_string();
        }
      }
    }
  }

  let text = String::from_utf8_lossy(&reply.body);
  let text = text.trim();
  if !text.is_empty() && !text.starts_with('{') {
    return text.chars().take(200).collect();
  }

  let reason = reqwest::StatusCode::from_u16(reply.status)
    .ok()
    .and_then(|s| s.canonical_reason());

  match reason {
    Some(reason) => format!("HTTP {} {}", reply.status, reason),
    None => format!("HTTP {}", reply.status),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn reply(status: u16, body: &str) -> std::result::Result<RawReply, SyncError> {
    Ok(RawReply {
      status,
      body: body.as_bytes().to_vec(),
    })
  }

  #[test]
  fn test_success_decodes_body() {
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(200, "[1,2,3]"));
    assert_eq!(outcome, RemoteOutcome::Success(vec![1, 2, 3]));
  }

  #[test]
  fn test_no_content_is_empty() {
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(204, ""));
    assert_eq!(outcome, RemoteOutcome::Empty);

    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(200, "  \n"));
    assert_eq!(outcome, RemoteOutcome::Empty);
  }

  #[test]
  fn test_plain_text_error_body_is_the_message() {
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(429, "rate limited"));
    match outcome {
      RemoteOutcome::Error(e) => {
        assert_eq!(e.to_string(), "rate limited");
        assert!(matches!(e, SyncError::Remote { status: 429, .. }));
      }
      other => panic!("expected error, got {:?}", other),
    }
  }

  #[test]
  fn test_json_error_body_uses_status_message() {
    let body = r#"{"status_code":7,"status_message":"Invalid API key: You must be granted a valid key."}"#;
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(401, body));
    match outcome {
      RemoteOutcome::Error(e) => {
        assert_eq!(
          e.to_string(),
          "Invalid API key: You must be granted a valid key."
        )
      }
      other => panic!("expected error, got {:?}", other),
    }
  }

  #[test]
  fn test_blank_error_body_falls_back_to_reason() {
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(503, ""));
    match outcome {
      RemoteOutcome::Error(e) => assert_eq!(e.to_string(), "HTTP 503 Service Unavailable"),
      other => panic!("expected error, got {:?}", other),
    }
  }

  #[test]
  fn test_transport_failure_is_error() {
    let outcome: RemoteOutcome<Vec<u32>> =
      RemoteOutcome::classify(Err(SyncError::Transport("connection refused".to_string())));
    match outcome {
      RemoteOutcome::Error(e) => assert_eq!(e.to_string(), "network error: connection refused"),
      other => panic!("expected error, got {:?}", other),
    }
  }

  #[test]
  fn test_undecodable_body_is_error() {
    let outcome: RemoteOutcome<Vec<u32>> = RemoteOutcome::classify(reply(200, "<html>"));
    assert!(matches!(outcome, RemoteOutcome::Error(SyncError::Decode(_))));
  }
}
