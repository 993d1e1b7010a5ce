//! Feedback recorder: validates human judgments on notifications and
//! appends them to the learning log.
//!
//! Resubmitting for the same notification appends another entry; the log
//! is never deduplicated or overwritten.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::NotificationFeedback;
use crate::store::TelemetryStore;

const MISSING_FIELDS: &str = "notificationId and helpful (boolean) are required";

// ---

/// A request body that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSubmission {
    pub notification_id: String,
    pub helpful: bool,
    pub comment: Option<String>,
}

impl FeedbackSubmission {
    /// Validate a raw JSON body.
    ///
    /// `notificationId` must be a non-empty string and `helpful` a JSON
    /// boolean (`"yes"`, `1` and `"true"` are all rejected). `comment` may be
    /// absent, null or a string.
    pub fn from_json(body: &Value) -> Result<Self> {
        // ---
        let notification_id = match body.get("notificationId") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            _ => return Err(Error::Validation(MISSING_FIELDS.to_string())),
        };

        let helpful = match body.get("helpful") {
            Some(Value::Bool(helpful)) => *helpful,
            _ => return Err(Error::Validation(MISSING_FIELDS.to_string())),
        };

        let comment = match body.get("comment") {
            None | Some(Value::Null) => None,
            Some(Value::String(comment)) => Some(comment.clone()),
            Some(_) => return Err(Error::Validation("comment must be a string".to_string())),
        };

        Ok(Self {
            notification_id,
            helpful,
            comment,
        })
    }
}

#[derive(Clone)]
pub struct FeedbackRecorder {
    store: Arc<dyn TelemetryStore>,
}

impl FeedbackRecorder {
    // ---
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Append one entry. No side effect beyond the log write.
    pub async fn submit(&self, submission: FeedbackSubmission) -> Result<NotificationFeedback> {
        // ---
        let entry = NotificationFeedback {
            id: Uuid::new_v4(),
            notification_id: submission.notification_id,
            helpful: submission.helpful,
            comment: submission.comment,
            submitted_at: Utc::now(),
        };
        self.store.append_feedback(&entry).await?;

        info!(
            notification_id = %entry.notification_id,
            helpful = entry.helpful,
            "Feedback recorded"
        );
        Ok(entry)
    }

    /// Every entry for a notification, oldest first.
    pub async fn history(&self, notification_id: &str) -> Result<Vec<NotificationFeedback>> {
        Ok(self.store.feedback_for(notification_id).await?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_accepts_minimal_valid_body() {
        // ---
        let sub = FeedbackSubmission::from_json(&json!({"notificationId": "n1", "helpful": true}))
            .unwrap();

        assert_eq!(sub.notification_id, "n1");
        assert!(sub.helpful);
        assert_eq!(sub.comment, None);
    }

    #[test]
    fn test_rejects_non_boolean_helpful() {
        // ---
        for helpful in [json!("yes"), json!("true"), json!(1), json!(null)] {
            let result = FeedbackSubmission::from_json(
                &json!({"notificationId": "n1", "helpful": helpful}),
            );
            assert!(matches!(result, Err(Error::Validation(_))), "{helpful}");
        }

        let missing = FeedbackSubmission::from_json(&json!({"helpful": "yes"}));
        assert!(matches!(missing, Err(Error::Validation(_))));
    }

    #[test]
    fn test_rejects_missing_or_empty_notification_id() {
        // ---
        for body in [
            json!({"helpful": true}),
            json!({"notificationId": "", "helpful": true}),
            json!({"notificationId": "   ", "helpful": false}),
            json!({"notificationId": 42, "helpful": false}),
            json!("not an object"),
        ] {
            assert!(FeedbackSubmission::from_json(&body).is_err(), "{body}");
        }
    }

    #[test]
    fn test_comment_must_be_text() {
        // ---
        let with_null = FeedbackSubmission::from_json(
            &json!({"notificationId": "n1", "helpful": false, "comment": null}),
        )
        .unwrap();
        assert_eq!(with_null.comment, None);

        let numeric = FeedbackSubmission::from_json(
            &json!({"notificationId": "n1", "helpful": false, "comment": 5}),
        );
        assert!(numeric.is_err());
    }

    #[tokio::test]
    async fn test_submit_then_history_round_trip() {
        // ---
        let recorder = FeedbackRecorder::new(Arc::new(MemoryStore::new()));
        let sub = FeedbackSubmission {
            notification_id: "n1".to_string(),
            helpful: false,
            comment: Some("valve alert was a false alarm".to_string()),
        };

        recorder.submit(sub.clone()).await.unwrap();
        let history = recorder.history("n1").await.unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].notification_id, sub.notification_id);
        assert_eq!(history[0].helpful, sub.helpful);
        assert_eq!(history[0].comment, sub.comment);
    }

    #[tokio::test]
    async fn test_resubmission_appends() {
        // ---
        let recorder = FeedbackRecorder::new(Arc::new(MemoryStore::new()));
        for helpful in [true, false] {
            let sub = FeedbackSubmission {
                notification_id: "n7".to_string(),
                helpful,
                comment: None,
            };
            recorder.submit(sub).await.unwrap();
        }

        let history = recorder.history("n7").await.unwrap();
        let verdicts: Vec<bool> = history.iter().map(|f| f.helpful).collect();
        assert_eq!(verdicts, vec![true, false]);
        assert!(recorder.history("other").await.unwrap().is_empty());
    }
}
