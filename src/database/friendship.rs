use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::friendship::{FriendEntry, Friendship, FriendshipStatus};
use crate::models::user::{User, UserSummary};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

fn friendship_key(id: &Uuid) -> String {
    format!("friendship:{}", id)
}

/// One record per unordered pair of users.
fn pair_key(a: &Uuid, b: &Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("friendship:pair:{}:{}", low, high)
}

fn friends_key(user_id: &Uuid) -> String {
    format!("user:friends:{}", user_id)
}

fn pending_key(user_id: &Uuid) -> String {
    format!("user:pending:{}", user_id)
}

fn blocked_key(user_id: &Uuid) -> String {
    format!("user:blocked:{}", user_id)
}

fn request_not_found() -> AppError {
    AppError::not_found("Friend request")
}

impl Repository {
    async fn index_friendship(&self, friendship: &Friendship) -> Result<(), AppError> {
        let id = friendship.id.to_string();
        match friendship.status {
            FriendshipStatus::Pending => self.store.sadd(&pending_key(&friendship.friend_id), &id).await,
            FriendshipStatus::Accepted => {
                self.store.sadd(&friends_key(&friendship.user_id), &id).await?;
                self.store.sadd(&friends_key(&friendship.friend_id), &id).await
            }
            FriendshipStatus::Blocked => self.store.sadd(&blocked_key(&friendship.user_id), &id).await,
            FriendshipStatus::Rejected => Ok(()),
        }
    }

    async fn unindex_friendship(&self, friendship: &Friendship) -> Result<(), AppError> {
        let id = friendship.id.to_string();
        for user_id in [&friendship.user_id, &friendship.friend_id] {
            self.store.srem(&friends_key(user_id), &id).await?;
            self.store.srem(&pending_key(user_id), &id).await?;
            self.store.srem(&blocked_key(user_id), &id).await?;
        }
        Ok(())
    }

    /// Rewrites a friendship and moves it between the per-user indices.
    async fn transition_friendship<F>(&self, id: &Uuid, mut apply: F) -> Result<Option<Friendship>, AppError>
    where
        F: FnMut(&mut Friendship) -> Result<(), AppError> + Send,
    {
        let updated = self
            .modify_with(&friendship_key(id), |friendship: &mut Friendship| {
                let before = friendship.clone();
                apply(friendship)?;
                Ok(before)
            })
            .await?;

        match updated {
            Some((after, before)) => {
                self.unindex_friendship(&before).await?;
                self.index_friendship(&after).await?;
                Ok(Some(after))
            }
            None => Ok(None),
        }
    }

    pub async fn get_friendship(&self, id: &Uuid) -> Result<Option<Friendship>, AppError> {
        self.load(&friendship_key(id)).await
    }

    pub async fn get_friendship_between(&self, a: &Uuid, b: &Uuid) -> Result<Option<Friendship>, AppError> {
        match self.store.get(&pair_key(a, b)).await? {
            Some(raw_id) => self.get_friendship(&Uuid::parse_str(&raw_id)?).await,
            None => Ok(None),
        }
    }

    /// Sends a request to the account registered under `email`. A previously rejected
    /// request between the two users is reopened.
    pub async fn send_friend_request(&self, from: &Uuid, email: &str) -> Result<(Friendship, User), AppError> {
        let target = self.get_user_by_email(email).await?.ok_or(AppError::UserNotFound)?;
        if target.id == *from {
            return Err(AppError::BadRequest("You cannot send a friend request to yourself".to_string()));
        }

        if let Some(existing) = self.get_friendship_between(from, &target.id).await? {
            let reopened = self
                .transition_friendship(&existing.id, |friendship: &mut Friendship| {
                    match friendship.status {
                        FriendshipStatus::Accepted => Err(AppError::Conflict("You are already friends with this user".to_string())),
                        FriendshipStatus::Pending => Err(AppError::Conflict("Friend request already sent".to_string())),
                        FriendshipStatus::Blocked => Err(AppError::BadRequest("You cannot send a friend request to this user".to_string())),
                        FriendshipStatus::Rejected => {
                            friendship.user_id = *from;
                            friendship.friend_id = target.id;
                            friendship.status = FriendshipStatus::Pending;
                            Ok(())
                        }
                    }
                })
                .await?
                .ok_or_else(request_not_found)?;
            return Ok((reopened, target));
        }

        let now = Utc::now();
        let friendship = Friendship {
            id: Uuid::new_v4(),
            user_id: *from,
            friend_id: target.id,
            status: FriendshipStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        if !self.store.set_if_absent(&pair_key(from, &target.id), &friendship.id.to_string()).await? {
            return Err(AppError::Conflict("Friend request already sent".to_string()));
        }
        self.insert(&friendship_key(&friendship.id), &friendship).await?;
        self.index_friendship(&friendship).await?;

        Ok((friendship, target))
    }

    /// Only the recipient of a pending request may answer it.
    async fn answer_friend_request(&self, id: &Uuid, actor: &Uuid, status: FriendshipStatus) -> Result<Friendship, AppError> {
        self.transition_friendship(id, |friendship: &mut Friendship| {
            if friendship.status != FriendshipStatus::Pending || friendship.friend_id != *actor {
                return Err(request_not_found());
            }
            friendship.status = status;
            Ok(())
        })
        .await?
        .ok_or_else(request_not_found)
    }

    pub async fn accept_friend_request(&self, id: &Uuid, actor: &Uuid) -> Result<Friendship, AppError> {
        self.answer_friend_request(id, actor, FriendshipStatus::Accepted).await
    }

    pub async fn reject_friend_request(&self, id: &Uuid, actor: &Uuid) -> Result<Friendship, AppError> {
        self.answer_friend_request(id, actor, FriendshipStatus::Rejected).await
    }

    /// Blocks `other`, replacing whatever relationship existed. If `other` already
    /// blocked `actor` the existing block is kept as it is.
    pub async fn block_user(&self, actor: &Uuid, other: &Uuid) -> Result<Friendship, AppError> {
        if actor == other {
            return Err(AppError::BadRequest("You cannot block yourself".to_string()));
        }
        if self.get_user_by_id(other).await?.is_none() {
            return Err(AppError::UserNotFound);
        }

        if let Some(existing) = self.get_friendship_between(actor, other).await? {
            if existing.status == FriendshipStatus::Blocked {
                return Ok(existing);
            }
            return self
                .transition_friendship(&existing.id, |friendship: &mut Friendship| {
                    if friendship.status != FriendshipStatus::Blocked {
                        friendship.user_id = *actor;
                        friendship.friend_id = *other;
                        friendship.status = FriendshipStatus::Blocked;
                    }
                    Ok(())
                })
                .await?
                .ok_or_else(|| AppError::not_found("Friendship"));
        }

        let now = Utc::now();
        let friendship = Friendship {
            id: Uuid::new_v4(),
            user_id: *actor,
            friend_id: *other,
            status: FriendshipStatus::Blocked,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        if !self.store.set_if_absent(&pair_key(actor, other), &friendship.id.to_string()).await? {
            return Err(AppError::Conflict("The relationship changed concurrently, please retry".to_string()));
        }
        self.insert(&friendship_key(&friendship.id), &friendship).await?;
        self.index_friendship(&friendship).await?;
        Ok(friendship)
    }

    async fn delete_friendship(&self, friendship: &Friendship) -> Result<(), AppError> {
        self.unindex_friendship(friendship).await?;
        self.store.del(&pair_key(&friendship.user_id, &friendship.friend_id)).await?;
        self.store.del(&friendship_key(&friendship.id)).await
    }

    /// Only the blocker can lift a block.
    pub async fn unblock_user(&self, actor: &Uuid, other: &Uuid) -> Result<(), AppError> {
        match self.get_friendship_between(actor, other).await? {
            Some(friendship) if friendship.status == FriendshipStatus::Blocked && friendship.user_id == *actor => self.delete_friendship(&friendship).await,
            _ => Err(AppError::not_found("Blocked user")),
        }
    }

    pub async fn remove_friend(&self, actor: &Uuid, other: &Uuid) -> Result<(), AppError> {
        match self.get_friendship_between(actor, other).await? {
            Some(friendship) if friendship.status == FriendshipStatus::Accepted => self.delete_friendship(&friendship).await,
            _ => Err(AppError::not_found("Friend")),
        }
    }

    async fn friend_entries(&self, user_id: &Uuid, index_key: &str) -> Result<Vec<FriendEntry>, AppError> {
        let ids = self.store.smembers(index_key).await?;
        let friendships: Vec<Friendship> = self
            .load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| friendship_key(&id)).collect::<Vec<_>>())
            .await?;

        let mut entries = Vec::with_capacity(friendships.len());
        for friendship in friendships {
            if let Some(other) = self.get_user_by_id(&friendship.other(user_id)).await? {
                entries.push(FriendEntry {
                    user: UserSummary::from(&other),
                    friendship,
                });
            }
        }
        entries.sort_by(|a, b| a.user.name.to_lowercase().cmp(&b.user.name.to_lowercase()));
        Ok(entries)
    }

    pub async fn list_friends(&self, user_id: &Uuid) -> Result<Vec<FriendEntry>, AppError> {
        self.friend_entries(user_id, &friends_key(user_id)).await
    }

    /// Incoming requests awaiting an answer from `user_id`.
    pub async fn list_pending_requests(&self, user_id: &Uuid) -> Result<Vec<FriendEntry>, AppError> {
        self.friend_entries(user_id, &pending_key(user_id)).await
    }

    /// Users blocked by `user_id`.
    pub async fn list_blocked(&self, user_id: &Uuid) -> Result<Vec<FriendEntry>, AppError> {
        self.friend_entries(user_id, &blocked_key(user_id)).await
    }

    pub async fn are_friends(&self, a: &Uuid, b: &Uuid) -> Result<bool, AppError> {
        Ok(self
            .get_friendship_between(a, b)
            .await?
            .is_some_and(|f| f.status == FriendshipStatus::Accepted))
    }

    /// True when either user has blocked the other.
    pub async fn is_blocked_between(&self, a: &Uuid, b: &Uuid) -> Result<bool, AppError> {
        Ok(self
            .get_friendship_between(a, b)
            .await?
            .is_some_and(|f| f.status == FriendshipStatus::Blocked))
    }

    pub async fn friend_ids(&self, user_id: &Uuid) -> Result<HashSet<Uuid>, AppError> {
        let ids = self.store.smembers(&friends_key(user_id)).await?;
        let friendships: Vec<Friendship> = self
            .load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| friendship_key(&id)).collect::<Vec<_>>())
            .await?;
        Ok(friendships.iter().map(|f| f.other(user_id)).collect())
    }
}
