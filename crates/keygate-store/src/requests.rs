//! The access-request table.

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use jiff::Timestamp;
use keygate_core::models::{AccessRequest, RequestStatus};

use crate::error::StoreError;
use crate::item::{self, Item};

/// GSI names on the request table.
pub const GSI_BY_REQUESTER: &str = "by-requester";
pub const GSI_BY_PROFILE: &str = "by-profile";
pub const GSI_BY_STATUS: &str = "by-status";

/// The request table contract. The approval workflow is the only writer;
/// the broker's override probe and the query surface read.
pub trait RequestStore: Send + Sync {
    /// Create-if-absent. An existing row with the same id fails
    /// [`StoreError::AlreadyExists`].
    fn create(
        &self,
        request: &AccessRequest,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<AccessRequest, StoreError>> + Send;

    /// Optimistically-locked full-row write. `expected_updated_at` must
    /// match the persisted token or the write fails
    /// [`StoreError::ConcurrentModification`].
    fn update(
        &self,
        request: &AccessRequest,
        expected_updated_at: Timestamp,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn list_by_requester(
        &self,
        requester: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<AccessRequest>, StoreError>> + Send;

    fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<AccessRequest>, StoreError>> + Send;

    fn list_by_status(
        &self,
        status: RequestStatus,
        limit: i32,
    ) -> impl std::future::Future<Output = Result<Vec<AccessRequest>, StoreError>> + Send;

    /// The broker's override probe: an Approved, unconsumed, unexpired
    /// request for `(requester, profile)`.
    fn find_approved(
        &self,
        requester: &str,
        profile: &str,
        now: Timestamp,
    ) -> impl std::future::Future<Output = Result<Option<AccessRequest>, StoreError>> + Send;
}

#[derive(Clone)]
pub struct DynamoRequestStore {
    client: Client,
    table: String,
}

impl DynamoRequestStore {
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
    ) -> Result<Vec<AccessRequest>, StoreError> {
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

impl RequestStore for DynamoRequestStore {
    async fn create(&self, request: &AccessRequest) -> Result<(), StoreError> {
        tracing::debug!(table = %self.table, id = %request.id, "creating request row");
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(request)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::AlreadyExists {
                        id: request.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<AccessRequest, StoreError> {
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
        request: &AccessRequest,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(request)))
            .condition_expression("updated_at = :expected")
            .expression_attribute_values(":expected", item::ts(expected_updated_at))
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    StoreError::ConcurrentModification {
                        id: request.id.clone(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn list_by_requester(
        &self,
        requester: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        self.query_index(GSI_BY_REQUESTER, "requester", requester, limit)
            .await
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        self.query_index(GSI_BY_PROFILE, "profile", profile, limit)
            .await
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        self.query_index(GSI_BY_STATUS, "status", status.as_str(), limit)
            .await
    }

    async fn find_approved(
        &self,
        requester: &str,
        profile: &str,
        now: Timestamp,
    ) -> Result<Option<AccessRequest>, StoreError> {
        // Expiry is compared client-side; the per-requester row count is
        // small and RFC 3339 strings are not reliably range-comparable.
        let rows = self
            .query_index(GSI_BY_REQUESTER, "requester", requester, 50)
            .await?;
        Ok(rows.into_iter().find(|r| {
            r.profile == profile && r.status == RequestStatus::Approved && r.expires_at > now
        }))
    }
}

fn to_item(request: &AccessRequest) -> Item {
    let mut out = Item::new();
    out.insert("id".into(), item::s(&request.id));
    out.insert("requester".into(), item::s(&request.requester));
    out.insert("profile".into(), item::s(&request.profile));
    out.insert("justification".into(), item::s(&request.justification));
    out.insert("duration_secs".into(), item::n(request.duration_secs));
    out.insert("status".into(), item::s(request.status.as_str()));
    out.insert("created_at".into(), item::ts(request.created_at));
    out.insert("updated_at".into(), item::ts(request.updated_at));
    out.insert("expires_at".into(), item::ts(request.expires_at));
    out.insert("approver".into(), item::s(&request.approver));
    out.insert(
        "approver_comment".into(),
        item::s(&request.approver_comment),
    );
    if let Some(consumed_at) = request.consumed_at {
        out.insert("consumed_at".into(), item::ts(consumed_at));
    }
    out
}

fn from_item(found: &Item) -> Result<AccessRequest, StoreError> {
    let status: RequestStatus = item::get_s(found, "status")?
        .parse()
        .map_err(|e| StoreError::MalformedRow(format!("{e}")))?;

    Ok(AccessRequest {
        id: item::get_s(found, "id")?,
        requester: item::get_s(found, "requester")?,
        profile: item::get_s(found, "profile")?,
        justification: item::get_s(found, "justification")?,
        duration_secs: item::get_i64(found, "duration_secs")?,
        status,
        created_at: item::get_ts(found, "created_at")?,
        updated_at: item::get_ts(found, "updated_at")?,
        expires_at: item::get_ts(found, "expires_at")?,
        approver: item::get_s_or_default(found, "approver"),
        approver_comment: item::get_s_or_default(found, "approver_comment"),
        consumed_at: item::get_opt_ts(found, "consumed_at")?,
    })
}
