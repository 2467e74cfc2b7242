//! In-memory stores implementing the same contracts as the DynamoDB
//! stores, including create-if-absent and the optimistic-lock comparison.
//! Used by the test suites and by local mode.

use std::collections::HashMap;
use std::sync::RwLock;

use jiff::Timestamp;
use keygate_core::models::{
    AccessRequest, BreakGlassEvent, BreakGlassStatus, RequestStatus, ServerSession, SessionStatus,
};

use crate::breakglass::BreakGlassStore;
use crate::error::StoreError;
use crate::requests::RequestStore;
use crate::sessions::SessionStore;

#[derive(Default)]
pub struct MemoryRequestStore {
    rows: RwLock<HashMap<String, AccessRequest>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for MemoryRequestStore {
    async fn create(&self, request: &AccessRequest) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists {
                id: request.id.clone(),
            });
        }
        rows.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<AccessRequest, StoreError> {
        self.rows
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update(
        &self,
        request: &AccessRequest,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        let current = rows
            .get(&request.id)
            .ok_or_else(|| StoreError::NotFound {
                id: request.id.clone(),
            })?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::ConcurrentModification {
                id: request.id.clone(),
            });
        }
        rows.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn list_by_requester(
        &self,
        requester: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |r: &AccessRequest| {
            r.requester == requester
        }))
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |r: &AccessRequest| {
            r.profile == profile
        }))
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |r: &AccessRequest| {
            r.status == status
        }))
    }

    async fn find_approved(
        &self,
        requester: &str,
        profile: &str,
        now: Timestamp,
    ) -> Result<Option<AccessRequest>, StoreError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .values()
            .find(|r| {
                r.requester == requester
                    && r.profile == profile
                    && r.status == RequestStatus::Approved
                    && r.expires_at > now
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryBreakGlassStore {
    rows: RwLock<HashMap<String, BreakGlassEvent>>,
}

impl MemoryBreakGlassStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BreakGlassStore for MemoryBreakGlassStore {
    async fn create(&self, event: &BreakGlassEvent) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&event.id) {
            return Err(StoreError::AlreadyExists {
                id: event.id.clone(),
            });
        }
        rows.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<BreakGlassEvent, StoreError> {
        self.rows
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update(
        &self,
        event: &BreakGlassEvent,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        let current = rows.get(&event.id).ok_or_else(|| StoreError::NotFound {
            id: event.id.clone(),
        })?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::ConcurrentModification {
                id: event.id.clone(),
            });
        }
        rows.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        invoker: &str,
        profile: &str,
        now: Timestamp,
    ) -> Result<Option<BreakGlassEvent>, StoreError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .values()
            .find(|e| {
                e.invoker == invoker
                    && e.profile == profile
                    && e.status == BreakGlassStatus::Active
                    && e.expires_at > now
            })
            .cloned())
    }

    async fn list_by_invoker(
        &self,
        invoker: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |e: &BreakGlassEvent| {
            e.invoker == invoker
        }))
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |e: &BreakGlassEvent| {
            e.profile == profile
        }))
    }

    async fn list_by_status(
        &self,
        status: BreakGlassStatus,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |e: &BreakGlassEvent| {
            e.status == status
        }))
    }

    async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |e: &BreakGlassEvent| {
            e.created_at >= start && e.created_at < end
        }))
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    rows: RwLock<HashMap<String, ServerSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &ServerSession) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists {
                id: session.id.clone(),
            });
        }
        rows.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ServerSession, StoreError> {
        self.rows
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update(
        &self,
        session: &ServerSession,
        expected_updated_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        let current = rows
            .get(&session.id)
            .ok_or_else(|| StoreError::NotFound {
                id: session.id.clone(),
            })?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::ConcurrentModification {
                id: session.id.clone(),
            });
        }
        rows.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn list_by_user(&self, user: &str, limit: i32) -> Result<Vec<ServerSession>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |s: &ServerSession| {
            s.user == user
        }))
    }

    async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |s: &ServerSession| {
            s.profile == profile
        }))
    }

    async fn list_by_status(
        &self,
        status: SessionStatus,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |s: &ServerSession| {
            s.status == status
        }))
    }

    async fn list_by_device(
        &self,
        device_id: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |s: &ServerSession| {
            s.device_id.as_deref() == Some(device_id)
        }))
    }

    async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<ServerSession>, StoreError> {
        Ok(filter_rows(&self.rows, limit, |s: &ServerSession| {
            s.started_at >= start && s.started_at < end
        }))
    }
}

fn filter_rows<T: Clone>(
    rows: &RwLock<HashMap<String, T>>,
    limit: i32,
    predicate: impl Fn(&T) -> bool,
) -> Vec<T> {
    rows.read()
        .unwrap()
        .values()
        .filter(|row| predicate(row))
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}
