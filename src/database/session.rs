use crate::database::repository::Repository;
use crate::database::user::user_key;
use crate::error::app_error::AppError;
use crate::models::user::{User, UserSession};
use chrono::{Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

/// `last_active` is only rewritten when it is older than this.
const ACTIVITY_WRITE_INTERVAL_SECONDS: i64 = 60;

fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Repository {
    /// Adds a session to the user's list. `None` when the user does not exist.
    pub async fn create_session(&self, user_id: &Uuid, user_agent: &str, ip: &str) -> Result<Option<String>, AppError> {
        let session_id = generate_session_id();
        let now = Utc::now();
        let session = UserSession {
            id: session_id.clone(),
            user_agent: user_agent.to_string(),
            ip: ip.to_string(),
            last_active: now,
            created_at: now,
        };

        let updated = self
            .modify(&user_key(user_id), |user: &mut User| {
                user.sessions.push(session.clone());
                Ok(())
            })
            .await?;

        Ok(updated.map(|_| session_id))
    }

    /// Resolves the cookie pair to a user, provided the session is still listed on the record.
    pub async fn get_session_user(&self, user_id: &Uuid, session_id: &str) -> Result<Option<User>, AppError> {
        Ok(self.get_user_by_id(user_id).await?.filter(|user| user.has_session(session_id)))
    }

    pub async fn update_session_activity(&self, user: &User, session_id: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let stale = user
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .is_some_and(|s| now - s.last_active > Duration::seconds(ACTIVITY_WRITE_INTERVAL_SECONDS));
        if !stale {
            return Ok(());
        }

        self.modify(&user_key(&user.id), |user: &mut User| {
            if let Some(session) = user.sessions.iter_mut().find(|s| s.id == session_id) {
                session.last_active = now;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Removes one session. Returns whether it existed.
    pub async fn delete_session(&self, user_id: &Uuid, session_id: &str) -> Result<bool, AppError> {
        let updated = self
            .modify_with(&user_key(user_id), |user: &mut User| {
                let before = user.sessions.len();
                user.sessions.retain(|s| s.id != session_id);
                Ok(user.sessions.len() != before)
            })
            .await?;
        Ok(updated.is_some_and(|(_, removed)| removed))
    }

    /// Signs out every session except `keep`. Returns how many were removed.
    pub async fn delete_other_sessions(&self, user_id: &Uuid, keep: &str) -> Result<usize, AppError> {
        let updated = self
            .modify_with(&user_key(user_id), |user: &mut User| {
                let before = user.sessions.len();
                user.sessions.retain(|s| s.id == keep);
                Ok(before - user.sessions.len())
            })
            .await?;
        Ok(updated.map(|(_, removed)| removed).unwrap_or(0))
    }

    pub async fn invalidate_all_sessions(&self, user_id: &Uuid) -> Result<(), AppError> {
        self.modify(&user_key(user_id), |user: &mut User| {
            user.sessions.clear();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Most recently active first.
    pub async fn list_sessions(&self, user_id: &Uuid) -> Result<Vec<UserSession>, AppError> {
        let mut sessions = self.get_user_by_id(user_id).await?.map(|u| u.sessions).unwrap_or_default();
        sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_verified_user, memory_repo};

    #[rocket::async_test]
    async fn session_ids_are_random_hex() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let a = repo.create_session(&user.id, "ua", "1.1.1.1").await.unwrap().unwrap();
        let b = repo.create_session(&user.id, "ua", "1.1.1.1").await.unwrap().unwrap();

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(repo.list_sessions(&user.id).await.unwrap().len(), 2);
    }

    #[rocket::async_test]
    async fn deleted_session_no_longer_resolves() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let session = repo.create_session(&user.id, "ua", "1.1.1.1").await.unwrap().unwrap();

        assert!(repo.get_session_user(&user.id, &session).await.unwrap().is_some());
        assert!(repo.delete_session(&user.id, &session).await.unwrap());
        assert!(!repo.delete_session(&user.id, &session).await.unwrap());
        assert!(repo.get_session_user(&user.id, &session).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn session_of_another_user_does_not_resolve() {
        let repo = memory_repo();
        let ada = create_verified_user(&repo, "ada@example.com").await;
        let bob = create_verified_user(&repo, "bob@example.com").await;
        let session = repo.create_session(&ada.id, "ua", "1.1.1.1").await.unwrap().unwrap();

        assert!(repo.get_session_user(&bob.id, &session).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn delete_other_sessions_keeps_current() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let keep = repo.create_session(&user.id, "ua", "1.1.1.1").await.unwrap().unwrap();
        repo.create_session(&user.id, "ua", "2.2.2.2").await.unwrap();
        repo.create_session(&user.id, "ua", "3.3.3.3").await.unwrap();

        assert_eq!(repo.delete_other_sessions(&user.id, &keep).await.unwrap(), 2);
        let sessions = repo.list_sessions(&user.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, keep);
    }

    #[rocket::async_test]
    async fn invalidate_all_sessions_empties_list() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        repo.create_session(&user.id, "ua", "1.1.1.1").await.unwrap();
        repo.invalidate_all_sessions(&user.id).await.unwrap();
        assert!(repo.list_sessions(&user.id).await.unwrap().is_empty());
    }
}
