//! Short-lived checkout state between "pick a plan" and "pick a payment
//! method" in the chat flow.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A checkout abandoned for this long starts over from plan selection.
const SESSION_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub tariff_id: Uuid,
    pub month_count: i32,
    pub email: Option<String>,
}

fn session_key(user_id: i64) -> String {
    format!("checkout:{user_id}")
}

#[derive(Clone)]
pub struct SessionStore {
    redis: ConnectionManager,
}

impl SessionStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn put(&self, user_id: i64, session: &CheckoutSession) -> BillingResult<()> {
        let payload =
            serde_json::to_string(session).map_err(|e| BillingError::Cache(e.to_string()))?;
        let mut conn = self.redis.clone();
        let _: () = conn
            .set_ex(session_key(user_id), payload, SESSION_TTL_SECS)
            .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: i64) -> BillingResult<Option<CheckoutSession>> {
        let mut conn = self.redis.clone();
        let payload: Option<String> = conn.get(session_key(user_id)).await?;
        match payload {
            Some(payload) => {
                let session = serde_json::from_str(&payload)
                    .map_err(|e| BillingError::Cache(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn clear(&self, user_id: i64) -> BillingResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(session_key(user_id)).await?;
        Ok(())
    }
}
