//! InMemoryPostbox - 開発・テスト用の Postbox 実装
//!
//! # 実装詳細
//! - `tokio::sync::Mutex` で状態全体を保護
//! - transaction は lock を commit / rollback まで保持する（直列化）
//! - transaction 内の変更は触れた record だけを staged に積み、commit 時にだけ書き戻す
//! - pending な record は sequence 順の index で引く（処理済みの履歴は走査しない）
//! - 障害注入（commit 失敗・query 失敗・mark 失敗）をサポート

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::app::status::PostboxCounts;
use crate::domain::{
    PendingRequest, Request, RequestId, RequestState, RequestStatus, Response, StorageError,
};
use crate::ports::{Postbox, PostboxTransaction, PostboxTransactor};

/// One stored request. This is the single source of truth for its state.
#[derive(Debug, Clone)]
struct RequestRecord {
    /// Enqueue order; pending requests are handed out in this order.
    sequence: u64,
    request: Request,
    state: RequestState,
    response: Option<Response>,
    process_at: DateTime<Utc>,
}

impl RequestRecord {
    fn pending(sequence: u64, request: Request, process_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            request,
            state: RequestState::Pending,
            response: None,
            process_at,
        }
    }

    fn status(&self) -> RequestStatus {
        match (self.state, &self.response) {
            (RequestState::Processed, Some(response)) => RequestStatus::Processed(response.clone()),
            (RequestState::Dead, Some(response)) => RequestStatus::Dead(response.clone()),
            _ => RequestStatus::Pending,
        }
    }

    fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.state == RequestState::Pending && self.process_at <= as_of
    }
}

#[derive(Debug, Default)]
struct PostboxState {
    records: HashMap<RequestId, RequestRecord>,
    /// sequence -> id, pending records only.
    pending: BTreeMap<u64, RequestId>,
    next_sequence: u64,
}

impl PostboxState {
    fn store(
        &mut self,
        request_id: RequestId,
        request: Request,
        process_at: DateTime<Utc>,
    ) -> RequestStatus {
        if let Some(existing) = self.records.get(&request_id) {
            return existing.status();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.insert(request_id, RequestRecord::pending(sequence, request, process_at));
        RequestStatus::Pending
    }

    fn insert(&mut self, request_id: RequestId, record: RequestRecord) {
        if record.state == RequestState::Pending {
            self.pending.insert(record.sequence, request_id);
        } else {
            self.pending.remove(&record.sequence);
        }
        self.records.insert(request_id, record);
    }

    fn apply(&mut self, staged: StagedChanges) {
        if let Some(next_sequence) = staged.next_sequence {
            self.next_sequence = next_sequence;
        }
        for (request_id, record) in staged.records {
            self.insert(request_id, record);
        }
    }

    fn status(&self, request_id: RequestId) -> Result<RequestStatus, StorageError> {
        self.records
            .get(&request_id)
            .map(RequestRecord::status)
            .ok_or(StorageError::NotFound(request_id))
    }

    fn counts(&self) -> PostboxCounts {
        let mut counts = PostboxCounts::default();
        for record in self.records.values() {
            match record.state {
                RequestState::Pending => counts.pending += 1,
                RequestState::Processed => counts.processed += 1,
                RequestState::Dead => counts.dead += 1,
            }
        }
        counts
    }
}

/// Records created or resolved inside one transaction.
#[derive(Debug, Default)]
struct StagedChanges {
    records: HashMap<RequestId, RequestRecord>,
    next_sequence: Option<u64>,
}

/// Injected failures. Lives outside `PostboxState` so rollbacks do not undo it.
#[derive(Debug, Default)]
struct Faults {
    commit: Option<String>,
    query: Option<String>,
    marks: HashMap<RequestId, String>,
}

/// In-memory postbox; also its own transactor.
#[derive(Clone, Default)]
pub struct InMemoryPostbox {
    state: Arc<Mutex<PostboxState>>,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryPostbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue outside of any caller-visible transaction.
    pub async fn store(
        &self,
        request_id: RequestId,
        request: Request,
        process_at: DateTime<Utc>,
    ) -> RequestStatus {
        let mut state = self.state.lock().await;
        debug!(%request_id, %process_at, "storing request");
        state.store(request_id, request, process_at)
    }

    pub async fn status(&self, request_id: RequestId) -> Result<RequestStatus, StorageError> {
        let state = self.state.lock().await;
        state.status(request_id)
    }

    pub async fn counts(&self) -> PostboxCounts {
        let state = self.state.lock().await;
        state.counts()
    }

    /// The next commit fails with `StorageError::Transaction(reason)`.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.faults().commit = Some(reason.into());
    }

    /// The next `pending_requests` call fails with `StorageError::Unavailable(reason)`.
    pub fn fail_next_query(&self, reason: impl Into<String>) {
        self.faults().query = Some(reason.into());
    }

    /// Every mark call for `request_id` fails with `StorageError::Unavailable(reason)`.
    pub fn fail_marks_for(&self, request_id: RequestId, reason: impl Into<String>) {
        self.faults().marks.insert(request_id, reason.into());
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self) -> InMemoryTransaction {
        let guard = Arc::clone(&self.state).lock_owned().await;
        trace!("transaction started");
        InMemoryTransaction {
            guard,
            staged: StagedChanges::default(),
            faults: Arc::clone(&self.faults),
        }
    }
}

#[async_trait]
impl PostboxTransactor for InMemoryPostbox {
    async fn begin(&self) -> Result<Box<dyn PostboxTransaction>, StorageError> {
        Ok(Box::new(self.open().await))
    }
}

/// Holds the store lock until commit / rollback / drop.
struct InMemoryTransaction {
    guard: OwnedMutexGuard<PostboxState>,
    staged: StagedChanges,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryTransaction {
    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Staged version first, then the committed one.
    fn record(&self, request_id: &RequestId) -> Option<&RequestRecord> {
        self.staged
            .records
            .get(request_id)
            .or_else(|| self.guard.records.get(request_id))
    }

    fn due(&self, limit: usize, as_of: DateTime<Utc>) -> Vec<PendingRequest> {
        let committed = self
            .guard
            .pending
            .values()
            .filter(|id| !self.staged.records.contains_key(*id))
            .filter_map(|id| self.guard.records.get_key_value(id));
        let staged = self.staged.records.iter();

        let mut due: Vec<(&RequestId, &RequestRecord)> = committed
            .chain(staged)
            .filter(|(_, r)| r.is_due(as_of))
            .collect();
        due.sort_by_key(|(_, r)| r.sequence);

        due.into_iter()
            .take(limit)
            .map(|(id, r)| PendingRequest::new(*id, r.request.clone()))
            .collect()
    }

    fn mark(
        &mut self,
        request_id: RequestId,
        next: RequestState,
        response: Response,
    ) -> Result<(), StorageError> {
        if let Some(reason) = self.faults().marks.get(&request_id) {
            return Err(StorageError::Unavailable(reason.clone()));
        }

        let record = self
            .record(&request_id)
            .ok_or(StorageError::NotFound(request_id))?;
        if !record.state.can_transition_to(next) {
            return Err(StorageError::AlreadyResolved {
                request_id,
                state: record.state,
            });
        }

        let resolved = RequestRecord {
            state: next,
            response: Some(response),
            ..record.clone()
        };
        trace!(%request_id, state = %next, "marking request");
        self.staged.records.insert(request_id, resolved);
        Ok(())
    }

    fn stage_store(
        &mut self,
        request_id: RequestId,
        request: Request,
        process_at: DateTime<Utc>,
    ) -> RequestStatus {
        if let Some(existing) = self.record(&request_id) {
            return existing.status();
        }

        let sequence = self.staged.next_sequence.unwrap_or(self.guard.next_sequence);
        self.staged.next_sequence = Some(sequence + 1);
        self.staged
            .records
            .insert(request_id, RequestRecord::pending(sequence, request, process_at));
        RequestStatus::Pending
    }
}

#[async_trait]
impl Postbox for InMemoryTransaction {
    async fn pending_requests(
        &self,
        limit: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PendingRequest>, StorageError> {
        if let Some(reason) = self.faults().query.take() {
            return Err(StorageError::Unavailable(reason));
        }
        Ok(self.due(limit, as_of))
    }

    async fn mark_processed(
        &mut self,
        request_id: RequestId,
        response: Response,
    ) -> Result<(), StorageError> {
        self.mark(request_id, RequestState::Processed, response)
    }

    async fn mark_dead(
        &mut self,
        request_id: RequestId,
        response: Response,
    ) -> Result<(), StorageError> {
        self.mark(request_id, RequestState::Dead, response)
    }

    async fn store(
        &mut self,
        request_id: RequestId,
        request: Request,
        process_at: DateTime<Utc>,
    ) -> Result<RequestStatus, StorageError> {
        Ok(self.stage_store(request_id, request, process_at))
    }

    async fn status(&self, request_id: RequestId) -> Result<RequestStatus, StorageError> {
        self.record(&request_id)
            .map(RequestRecord::status)
            .ok_or(StorageError::NotFound(request_id))
    }
}

#[async_trait]
impl PostboxTransaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(reason) = self.faults().commit.take() {
            trace!(%reason, "commit failed, discarding staged changes");
            return Err(StorageError::Transaction(reason));
        }

        let InMemoryTransaction {
            mut guard, staged, ..
        } = *self;
        trace!(changed = staged.records.len(), "transaction committed");
        guard.apply(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        trace!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ulid::Ulid;

    use super::*;
    use crate::domain::{Method, Status};
    use crate::ports::TransactorExt;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn new_id(n: u64) -> RequestId {
        RequestId::from_ulid(Ulid::from_parts(n, 0))
    }

    async fn seeded(n: u64) -> (InMemoryPostbox, Vec<RequestId>) {
        let postbox = InMemoryPostbox::new();
        let mut ids = Vec::new();
        for i in 1..=n {
            let id = new_id(i);
            postbox
                .store(id, Request::new(Method::Post, format!("/orders/{i}")), t0())
                .await;
            ids.push(id);
        }
        (postbox, ids)
    }

    #[tokio::test]
    async fn pending_requests_are_returned_in_store_order_up_to_limit() {
        let (postbox, ids) = seeded(3).await;

        let mut tx = postbox.begin().await.unwrap();
        let pending = tx.pending_requests(2, t0()).await.unwrap();
        tx.rollback().await.unwrap();

        let got: Vec<RequestId> = pending.iter().map(|p| p.request_id).collect();
        assert_eq!(got, vec![ids[0], ids[1]]);
        assert_eq!(pending[0].request.uri, "/orders/1");
    }

    #[tokio::test]
    async fn future_requests_are_not_due_yet() {
        let postbox = InMemoryPostbox::new();
        let later = t0() + ChronoDuration::minutes(5);
        postbox
            .store(new_id(1), Request::new(Method::Get, "/later"), later)
            .await;

        let tx = postbox.begin().await.unwrap();
        assert!(tx.pending_requests(10, t0()).await.unwrap().is_empty());
        assert_eq!(tx.pending_requests(10, later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_makes_marks_visible() {
        let (postbox, ids) = seeded(2).await;

        let mut tx = postbox.begin().await.unwrap();
        tx.mark_processed(ids[0], Response::new(Status::OK))
            .await
            .unwrap();
        tx.mark_dead(ids[1], Response::new(Status::BAD_REQUEST))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            postbox.status(ids[0]).await.unwrap(),
            RequestStatus::Processed(Response::new(Status::OK))
        );
        assert_eq!(
            postbox.status(ids[1]).await.unwrap().state(),
            RequestState::Dead
        );
        let counts = postbox.counts().await;
        assert_eq!((counts.pending, counts.processed, counts.dead), (0, 1, 1));
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_marks() {
        let (postbox, ids) = seeded(1).await;

        let mut tx = postbox.begin().await.unwrap();
        tx.mark_processed(ids[0], Response::new(Status::OK))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = postbox.begin().await.unwrap();
            tx.mark_dead(ids[0], Response::new(Status::BAD_REQUEST))
                .await
                .unwrap();
            // dropped without commit
        }

        assert_eq!(postbox.status(ids[0]).await.unwrap(), RequestStatus::Pending);
    }

    #[tokio::test]
    async fn resolved_requests_cannot_be_marked_again() {
        let (postbox, ids) = seeded(1).await;

        let mut tx = postbox.begin().await.unwrap();
        tx.mark_dead(ids[0], Response::new(Status::BAD_REQUEST))
            .await
            .unwrap();
        let err = tx
            .mark_processed(ids[0], Response::new(Status::OK))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StorageError::AlreadyResolved {
                request_id: ids[0],
                state: RequestState::Dead,
            }
        );
    }

    #[tokio::test]
    async fn unknown_requests_are_not_found() {
        let postbox = InMemoryPostbox::new();
        let id = new_id(42);

        let mut tx = postbox.begin().await.unwrap();
        let err = tx
            .mark_processed(id, Response::new(Status::OK))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::NotFound(id));
        drop(tx);

        assert_eq!(
            postbox.status(id).await.unwrap_err(),
            StorageError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn storing_twice_keeps_the_first_record() {
        let (postbox, ids) = seeded(1).await;

        let mut tx = postbox.begin().await.unwrap();
        tx.mark_processed(ids[0], Response::new(Status::ACCEPTED))
            .await
            .unwrap();
        let again = tx
            .store(ids[0], Request::new(Method::Delete, "/other"), t0())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(again, RequestStatus::Processed(Response::new(Status::ACCEPTED)));
        assert_eq!(postbox.counts().await.total(), 1);
    }

    #[tokio::test]
    async fn perform_as_result_commits_on_ok() {
        let (postbox, ids) = seeded(1).await;
        let id = ids[0];

        let fetched = postbox
            .perform_as_result(move |tx| {
                Box::pin(async move {
                    let pending = tx.pending_requests(10, t0()).await?;
                    tx.mark_processed(id, Response::new(Status::OK)).await?;
                    Ok::<_, StorageError>(pending.len())
                })
            })
            .await
            .unwrap();

        assert_eq!(fetched, 1);
        assert_eq!(postbox.status(id).await.unwrap().state(), RequestState::Processed);
    }

    #[tokio::test]
    async fn perform_as_result_rolls_back_on_err() {
        let (postbox, ids) = seeded(1).await;
        let id = ids[0];

        let err = postbox
            .perform_as_result(move |tx| {
                Box::pin(async move {
                    tx.mark_processed(id, Response::new(Status::OK)).await?;
                    Err::<(), _>(StorageError::Unavailable("disk on fire".to_string()))
                })
            })
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Unavailable("disk on fire".to_string()));
        assert_eq!(postbox.status(id).await.unwrap(), RequestStatus::Pending);
    }

    #[tokio::test]
    async fn failed_commit_discards_everything() {
        let (postbox, ids) = seeded(1).await;
        let id = ids[0];
        postbox.fail_next_commit("connection reset");

        let err = postbox
            .perform_as_result(move |tx| {
                Box::pin(async move { tx.mark_dead(id, Response::new(Status::BAD_REQUEST)).await })
            })
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Transaction("connection reset".to_string()));
        assert_eq!(postbox.status(id).await.unwrap(), RequestStatus::Pending);

        // 障害は一度だけ
        let mut tx = postbox.begin().await.unwrap();
        tx.mark_dead(id, Response::new(Status::BAD_REQUEST))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(postbox.status(id).await.unwrap().state(), RequestState::Dead);
    }

    #[tokio::test]
    async fn transactions_stage_only_the_records_they_touch() {
        let (postbox, ids) = seeded(5).await;
        let mut tx = postbox.begin().await.unwrap();
        for id in &ids[..3] {
            tx.mark_processed(*id, Response::new(Status::OK)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = postbox.open().await;
        assert!(tx.staged.records.is_empty());
        assert_eq!(tx.guard.pending.len(), 2);

        tx.mark_processed(ids[3], Response::new(Status::OK)).await.unwrap();
        assert_eq!(tx.staged.records.len(), 1);
        let pending: Vec<RequestId> = tx
            .pending_requests(10, t0())
            .await
            .unwrap()
            .iter()
            .map(|p| p.request_id)
            .collect();
        assert_eq!(pending, vec![ids[4]]);
        Box::new(tx).commit().await.unwrap();

        assert_eq!(postbox.state.lock().await.pending.len(), 1);
        assert_eq!(postbox.counts().await.processed, 4);
    }

    #[tokio::test]
    async fn stores_inside_a_transaction_keep_enqueue_order() {
        let (postbox, ids) = seeded(1).await;

        let mut tx = postbox.begin().await.unwrap();
        let staged_id = new_id(9);
        let request = Request::new(Method::Post, "/staged");
        assert_eq!(
            tx.store(staged_id, request.clone(), t0()).await.unwrap(),
            RequestStatus::Pending
        );
        assert_eq!(
            tx.store(staged_id, request, t0()).await.unwrap(),
            RequestStatus::Pending
        );
        tx.commit().await.unwrap();

        let later_id = new_id(10);
        postbox
            .store(later_id, Request::new(Method::Post, "/later"), t0())
            .await;

        let tx = postbox.begin().await.unwrap();
        let order: Vec<RequestId> = tx
            .pending_requests(10, t0())
            .await
            .unwrap()
            .iter()
            .map(|p| p.request_id)
            .collect();
        assert_eq!(order, vec![ids[0], staged_id, later_id]);
    }

    #[tokio::test]
    async fn injected_query_and_mark_failures() {
        let (postbox, ids) = seeded(1).await;
        postbox.fail_next_query("db down");
        postbox.fail_marks_for(ids[0], "row locked");

        let mut tx = postbox.begin().await.unwrap();
        assert_eq!(
            tx.pending_requests(10, t0()).await.unwrap_err(),
            StorageError::Unavailable("db down".to_string())
        );
        assert_eq!(tx.pending_requests(10, t0()).await.unwrap().len(), 1);
        assert_eq!(
            tx.mark_processed(ids[0], Response::new(Status::OK))
                .await
                .unwrap_err(),
            StorageError::Unavailable("row locked".to_string())
        );
    }
}
