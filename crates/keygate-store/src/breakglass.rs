//! The break-glass event table.

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use jiff::Timestamp;
use keygate_core::models::{BreakGlassEvent, BreakGlassStatus, ReasonCode};

use crate::error::StoreError;
use crate::item::{self, Item};

/// GSI names on the break-glass table.
pub const GSI_BY_INVOKER_PROFILE: &str = "by-invoker-profile";
pub const GSI_BY_PROFILE: &str = "by-profile";
pub const GSI_BY_STATUS: &str = "by-status";

pub trait BreakGlassStore: Send + Sync {
    fn create(
        &self,
        event: &BreakGlassEvent,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<BreakGlassEvent, StoreError>> + Send;

    fn update(
        &self,
        event: &BreakGlassEvent,
        expected_updated_at: Timestamp,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// The single-active probe: an Active, unexpired event for
    /// `(invoker, profile)`.
    fn find_active(
        &self,
        invoker: &str,
        profile: &str,
        now: Timestamp,
    ) -> impl std::future::Future<Output = Result<Option<BreakGlassEvent>, StoreError>> + Send;

    fn list_by_invoker(
        &self,
        invoker: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<BreakGlassEvent>, StoreError>> + Send;

    fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<BreakGlassEvent>, StoreError>> + Send;

    fn list_by_status(
        &self,
        status: BreakGlassStatus,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<BreakGlassEvent>, StoreError>> + Send;

    /// Events created inside `[start, end)`.
    fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<BreakGlassEvent>, StoreError>> + Send;
}

#[derive(Clone)]
pub struct DynamoBreakGlassStore {
    client: Client,
    table: String,
}

impl DynamoBreakGlassStore {
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
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
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

impl BreakGlassStore for DynamoBreakGlassStore {
    async fn create(&self, event: &BreakGlassEvent) -> Result<(), StoreError> {
        tracing::debug!(table = %self.table, id = %event.id, "creating break-glass row");
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(event)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::AlreadyExists {
                        id: event.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<BreakGlassEvent, StoreError> {
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
        event: &BreakGlassEvent,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(event)))
            .condition_expression("updated_at = :expected")
            .expression_attribute_values(":expected", item::ts(expected_updated_at))
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::ConcurrentModification {
                        id: event.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn find_active(
        &self,
        invoker: &str,
        profile: &str,
        now: Timestamp,
    ) -> Result<Option<BreakGlassEvent>, StoreError> {
        let rows = self
            .query_index(
                GSI_BY_INVOKER_PROFILE,
                "invoker_profile",
                &item::composite(invoker, profile),
                25,
            )
            .await?;
        Ok(rows
            .into_iter()
            .find(|e| e.status == BreakGlassStatus::Active && e.expires_at > now))
    }

    async fn list_by_invoker(
        &self,
        invoker: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        // The invoker-profile GSI is the duplicate-active probe; plain
        // per-invoker listing scans with a filter.
        let resp = self
            .client
            .scan()
            .table_name(&self.table)
            .filter_expression("invoker = :v")
            .expression_attribute_values(":v", item::s(invoker))
            .limit(limit)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.into_service_error().to_string()))?;

        resp.items().iter().map(from_item).collect()
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        self.query_index(GSI_BY_PROFILE, "profile", profile, limit)
            .await
    }

    async fn list_by_status(
        &self,
        status: BreakGlassStatus,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        self.query_index(GSI_BY_STATUS, "status", status.as_str(), limit)
            .await
    }

    async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        let resp = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(limit)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.into_service_error().to_string()))?;

        let mut events: Vec<BreakGlassEvent> = resp
            .items()
            .iter()
            .map(from_item)
            .collect::<Result<_, _>>()?;
        events.retain(|e| e.created_at >= start && e.created_at < end);
        Ok(events)
    }
}

fn to_item(event: &BreakGlassEvent) -> Item {
    let mut out = Item::new();
    out.insert("id".into(), item::s(&event.id));
    out.insert("invoker".into(), item::s(&event.invoker));
    out.insert("profile".into(), item::s(&event.profile));
    out.insert(
        "invoker_profile".into(),
        item::s(item::composite(&event.invoker, &event.profile)),
    );
    out.insert("reason_code".into(), item::s(event.reason_code.as_str()));
    out.insert("justification".into(), item::s(&event.justification));
    out.insert("duration_secs".into(), item::n(event.duration_secs));
    out.insert("status".into(), item::s(event.status.as_str()));
    out.insert("created_at".into(), item::ts(event.created_at));
    out.insert("updated_at".into(), item::ts(event.updated_at));
    out.insert("expires_at".into(), item::ts(event.expires_at));
    out.insert("closed_by".into(), item::s(&event.closed_by));
    out.insert("closed_reason".into(), item::s(&event.closed_reason));
    if let Some(request_id) = &event.request_id {
        out.insert("request_id".into(), item::s(request_id));
    }
    out
}

fn from_item(found: &Item) -> Result<BreakGlassEvent, StoreError> {
    let reason_code: ReasonCode = item::get_s(found, "reason_code")?
        .parse()
        .map_err(|e| StoreError::MalformedRow(format!("{e}")))?;
    let status = match item::get_s(found, "status")?.as_str() {
        "active" => BreakGlassStatus::Active,
        "closed" => BreakGlassStatus::Closed,
        "expired" => BreakGlassStatus::Expired,
        other => {
            return Err(StoreError::MalformedRow(format!(
                "unknown break-glass status: {other}"
            )));
        }
    };

    Ok(BreakGlassEvent {
        id: item::get_s(found, "id")?,
        invoker: item::get_s(found, "invoker")?,
        profile: item::get_s(found, "profile")?,
        reason_code,
        justification: item::get_s(found, "justification")?,
        duration_secs: item::get_i64(found, "duration_secs")?,
        status,
        created_at: item::get_ts(found, "created_at")?,
        updated_at: item::get_ts(found, "updated_at")?,
        expires_at: item::get_ts(found, "expires_at")?,
        closed_by: item::get_s_or_default(found, "closed_by"),
        closed_reason: item::get_s_or_default(found, "closed_reason"),
        request_id: item::get_opt_s(found, "request_id"),
    })
}
