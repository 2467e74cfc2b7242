//! The server-session table.

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use jiff::Timestamp;
use keygate_core::models::{ServerSession, SessionStatus};

use crate::error::StoreError;
use crate::item::{self, Item};

/// GSI names on the session table.
pub const GSI_BY_USER: &str = "by-user";
pub const GSI_BY_PROFILE: &str = "by-profile";
pub const GSI_BY_STATUS: &str = "by-status";
pub const GSI_BY_DEVICE: &str = "by-device";

pub trait SessionStore: Send + Sync {
    fn create(
        &self,
        session: &ServerSession,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<ServerSession, StoreError>> + Send;

    fn update(
        &self,
        session: &ServerSession,
        expected_updated_at: Timestamp,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn list_by_user(
        &self,
        user: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ServerSession>, StoreError>> + Send;

    fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ServerSession>, StoreError>> + Send;

    fn list_by_status(
        &self,
        status: SessionStatus,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ServerSession>, StoreError>> + Send;

    fn list_by_device(
        &self,
        device_id: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ServerSession>, StoreError>> + Send;

    /// Sessions started inside `[start, end)`.
    fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ServerSession>, StoreError>> + Send;
}

#[derive(Clone)]
pub struct DynamoSessionStore {
    client: Client,
    table: String,
}

impl DynamoSessionStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    async fn query_index(
        &self,
        index: &str,
        key_name: &str,
        key_value: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        let resp = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(index)
            .key_condition_expression("#k = :v")
            .expression_attribute_names("#k", key_name)
            .expression_attribute_values(":v", item::s(key_value))
            .limit(limit)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.into_service_error().to_string()))?;

        resp.items().iter().map(from_item).collect()
    }
}

impl SessionStore for DynamoSessionStore {
    async fn create(&self, session: &ServerSession) -> Result<(), StoreError> {
        tracing::debug!(table = %self.table, id = %session.id, "creating session row");
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(session)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::AlreadyExists {
                        id: session.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ServerSession, StoreError> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.into_service_error().to_string()))?;

        match resp.item() {
            Some(found) => from_item(found),
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    async fn update(
        &self,
        session: &ServerSession,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(session)))
            .condition_expression("updated_at = :expected")
            .expression_attribute_values(":expected", item::ts(expected_updated_at))
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::ConcurrentModification {
                        id: session.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn list_by_user(&self, user: &str, limit: i32) -> Result<Vec<ServerSession>, StoreError> {
        self.query_index(GSI_BY_USER, "user", user, limit).await
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        self.query_index(GSI_BY_PROFILE, "profile", profile, limit)
            .await
    }

    async fn list_by_status(
        &self,
        status: SessionStatus,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        self.query_index(GSI_BY_STATUS, "status", status.as_str(), limit)
            .await
    }

    async fn list_by_device(
        &self,
        device_id: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        self.query_index(GSI_BY_DEVICE, "device_id", device_id, limit)
            .await
    }

    async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        let resp = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(limit)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.into_service_error().to_string()))?;

        let mut sessions: Vec<ServerSession> = resp
            .items()
            .iter()
            .map(from_item)
            .collect::<Result<_, _>>()?;
        sessions.retain(|s| s.started_at >= start && s.started_at < end);
        Ok(sessions)
    }
}

fn to_item(session: &ServerSession) -> Item {
    let mut out = Item::new();
    out.insert("id".into(), item::s(&session.id));
    out.insert("user".into(), item::s(&session.user));
    out.insert("profile".into(), item::s(&session.profile));
    out.insert(
        "server_instance_id".into(),
        item::s(&session.server_instance_id),
    );
    if let Some(device_id) = &session.device_id {
        out.insert("device_id".into(), item::s(device_id));
    }
    out.insert("source_identity".into(), item::s(&session.source_identity));
    out.insert("status".into(), item::s(session.status.as_str()));
    out.insert("started_at".into(), item::ts(session.started_at));
    out.insert("last_access_at".into(), item::ts(session.last_access_at));
    out.insert("updated_at".into(), item::ts(session.updated_at));
    out.insert("expires_at".into(), item::ts(session.expires_at));
    out.insert("request_count".into(), item::n(session.request_count as i64));
    out.insert("revoked_by".into(), item::s(&session.revoked_by));
    out.insert("revoked_reason".into(), item::s(&session.revoked_reason));
    out
}

fn from_item(found: &Item) -> Result<ServerSession, StoreError> {
    let status = match item::get_s(found, "status")?.as_str() {
        "active" => SessionStatus::Active,
        "revoked" => SessionStatus::Revoked,
        "expired" => SessionStatus::Expired,
        other => {
            return Err(StoreError::MalformedRow(format!(
                "unknown session status: {other}"
            )));
        }
    };

    Ok(ServerSession {
        id: item::get_s(found, "id")?,
        user: item::get_s(found, "user")?,
        profile: item::get_s(found, "profile")?,
        server_instance_id: item::get_s_or_default(found, "server_instance_id"),
        device_id: item::get_opt_s(found, "device_id"),
        source_identity: item::get_s_or_default(found, "source_identity"),
        status,
        started_at: item::get_ts(found, "started_at")?,
        last_access_at: item::get_ts(found, "last_access_at")?,
        updated_at: item::get_ts(found, "updated_at")?,
        expires_at: item::get_ts(found, "expires_at")?,
        request_count: item::get_u64(found, "request_count")?,
        revoked_by: item::get_s_or_default(found, "revoked_by"),
        revoked_reason: item::get_s_or_default(found, "revoked_reason"),
    })
}
