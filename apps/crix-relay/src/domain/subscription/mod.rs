//! Subscription Descriptor
//!
//! The ordered list of serialized subscribe frames that the feed connection
//! replays, in full and in order, after every successful connect.
//!
//! # Design
//!
//! Frames are validated once at construction. A malformed frame is a
//! configuration error that surfaces at startup, before the first connect.
//! After construction the descriptor is immutable and cheap to clone.

use std::sync::Arc;

/// Errors raised while building a subscription descriptor.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// No frames were supplied.
    #[error("subscription descriptor has no frames")]
    Empty,

    /// A frame is not a non-empty JSON array.
    #[error("subscribe frame {index} is malformed: {reason}")]
    MalformedFrame {
        /// Position of the offending frame.
        index: usize,
        /// Why the frame was rejected.
        reason: String,
    },
}

/// Immutable ordered set of subscribe frames.
#[derive(Debug, Clone)]
pub struct SubscriptionDescriptor {
    frames: Arc<[String]>,
}

impl SubscriptionDescriptor {
    /// Build a descriptor from serialized frames.
    ///
    /// Every frame must be a non-empty JSON array.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError` if the list is empty or any frame is
    /// malformed.
    pub fn new(frames: Vec<String>) -> Result<Self, SubscriptionError> {
        if frames.is_empty() {
            return Err(SubscriptionError::Empty);
        }

        for (index, frame) in frames.iter().enumerate() {
            validate_frame(index, frame)?;
        }

        Ok(Self {
            frames: frames.into(),
        })
    }

    /// Frames in replay order.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always `false` for a constructed descriptor.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn validate_frame(index: usize, frame: &str) -> Result<(), SubscriptionError> {
    let value: serde_json::Value =
        serde_json::from_str(frame).map_err(|e| SubscriptionError::MalformedFrame {
            index,
            reason: e.to_string(),
        })?;

    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(()),
        Some(_) => Err(SubscriptionError::MalformedFrame {
            index,
            reason: "empty array".to_string(),
        }),
        None => Err(SubscriptionError::MalformedFrame {
            index,
            reason: "expected a JSON array".to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_frame_order() {
        let descriptor = SubscriptionDescriptor::new(vec![
            r#"[{"ticket":"a"},{"type":"ticker","codes":["KRW-BTC"]}]"#.to_string(),
            r#"[{"ticket":"a"},{"type":"ticker","codes":["KRW-ETH"]}]"#.to_string(),
        ])
        .unwrap();

        assert_eq!(descriptor.len(), 2);
        assert!(descriptor.frames()[0].contains("KRW-BTC"));
        assert!(descriptor.frames()[1].contains("KRW-ETH"));
    }

    #[test]
    fn clone_shares_frames() {
        let descriptor = SubscriptionDescriptor::new(vec![r#"[{"ticket":"a"}]"#.to_string()]).unwrap();
        let cloned = descriptor.clone();
        assert_eq!(descriptor.frames(), cloned.frames());
    }

    #[test]
    fn rejects_empty_descriptor() {
        assert!(matches!(
            SubscriptionDescriptor::new(vec![]),
            Err(SubscriptionError::Empty)
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        let result = SubscriptionDescriptor::new(vec![
            r#"[{"ticket":"a"}]"#.to_string(),
            "[{\"ticket\":".to_string(),
        ]);
        assert!(matches!(
            result,
            Err(SubscriptionError::MalformedFrame { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_array_frame() {
        let result = SubscriptionDescriptor::new(vec![r#"{"ticket":"a"}"#.to_string()]);
        assert!(matches!(
            result,
            Err(SubscriptionError::MalformedFrame { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_empty_array_frame() {
        let result = SubscriptionDescriptor::new(vec!["[]".to_string()]);
        assert!(matches!(
            result,
            Err(SubscriptionError::MalformedFrame { index: 0, .. })
        ));
    }
}
