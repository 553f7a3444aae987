use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::activity::{Activity, ActivityAction, MAX_STORED_ACTIVITIES};
use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

fn activity_key(user_id: &Uuid) -> String {
    format!("user:{}:activities", user_id)
}

impl Repository {
    /// Appends to the user's activity log and mirrors the event to tracing.
    pub async fn log_activity(
        &self,
        user_id: &Uuid,
        action: ActivityAction,
        details: JsonValue,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), AppError> {
        let failure = matches!(action, ActivityAction::LoginFailed | ActivityAction::TwoFactorFailed);
        if failure {
            tracing::warn!(
                category = "audit",
                action = ?action,
                user_id = %user_id,
                ip = ip.unwrap_or("-"),
                user_agent = user_agent.unwrap_or("-"),
                "security activity (failure)"
            );
        } else {
            tracing::info!(
                category = "audit",
                action = ?action,
                user_id = %user_id,
                ip = ip.unwrap_or("-"),
                user_agent = user_agent.unwrap_or("-"),
                "security activity"
            );
        }

        let activity = Activity {
            id: Uuid::new_v4(),
            user_id: *user_id,
            action,
            details,
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: Utc::now(),
        };

        let key = activity_key(user_id);
        self.store.lpush(&key, &serde_json::to_string(&activity)?).await?;
        self.store.ltrim(&key, 0, MAX_STORED_ACTIVITIES - 1).await
    }

    /// Newest first.
    pub async fn list_activities(&self, user_id: &Uuid, limit: usize) -> Result<Vec<Activity>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.lrange(&activity_key(user_id), 0, limit - 1).await?;
        raw.iter().map(|entry| serde_json::from_str(entry).map_err(AppError::from)).collect()
    }
}
