//! Status envelope emitted by the synchronization engine.

/// Where a resource is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// A load is in progress; `data` may hold the previous content
  Loading,
  /// Data reflects committed cache state
  Success,
  /// The last refresh failed; `data` holds the last good cached content
  Error,
}

/// A value tagged with its load status and an optional message.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<T> {
  pub status: Status,
  pub data: Option<T>,
  pub message: Option<String>,
}

impl<T> Resource<T> {
  pub fn loading(data: Option<T>) -> Self {
    Self {
      status: Status::Loading,
      data,
      message: None,
    }
  }

  pub fn success(data: Option<T>) -> Self {
    Self {
      status: Status::Success,
      data,
      message: None,
    }
  }

  /// Build an error resource. The message is never empty.
  pub fn error(message: impl Into<String>, data: Option<T>) -> Self {
    let message = message.into();
    let message = if message.trim().is_empty() {
      "unknown error".to_string()
    } else {
      message
    };

    Self {
      status: Status::Error,
      data,
      message: Some(message),
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == Status::Loading
  }

  /// `Success` and `Error` end a load cycle.
  pub fn is_terminal(&self) -> bool {
    matches!(self.status, Status::Success | Status::Error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_loading_keeps_previous_data() {
    let resource = Resource::loading(Some(vec![1, 2]));
    assert!(resource.is_loading());
    assert!(!resource.is_terminal());
    assert_eq!(resource.data, Some(vec![1, 2]));
  }

  #[test]
  fn test_error_message_is_never_empty() {
    let resource: Resource<()> = Resource::error("  ", None);
    assert_eq!(resource.status, Status::Error);
    assert_eq!(resource.message.as_deref(), Some("unknown error"));
  }
}
