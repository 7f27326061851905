//! Postbox port - 永続化された request の正本（source of truth）
//!
//! Postbox は以下を管理します：
//! - pending な request の取得（期限到来分のみ）
//! - 状態遷移（pending -> processed / dead）
//! - enqueue と status 参照
//!
//! # 設計原則
//! - 状態遷移はすべて transaction 内で行う
//! - 取得した batch は同じ transaction 内で解決してから commit する
//! - lease / lock は持たない（複数インスタンスでの同時実行は未対応）

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{PendingRequest, Request, RequestId, RequestStatus, Response, StorageError};

/// Storage view handed to a unit of work.
#[async_trait]
pub trait Postbox: Send + Sync {
    /// Up to `limit` requests that are pending and due at `as_of`, in storage
    /// order. Has no side effects.
    async fn pending_requests(
        &self,
        limit: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PendingRequest>, StorageError>;

    /// Pending -> Processed, persisting `response`.
    async fn mark_processed(
        &mut self,
        request_id: RequestId,
        response: Response,
    ) -> Result<(), StorageError>;

    /// Pending -> Dead, persisting the rejecting `response`.
    async fn mark_dead(
        &mut self,
        request_id: RequestId,
        response: Response,
    ) -> Result<(), StorageError>;

    /// Enqueue `request`, eligible for processing from `process_at`.
    ///
    /// Storing an id twice leaves the first record untouched and returns its
    /// current status.
    async fn store(
        &mut self,
        request_id: RequestId,
        request: Request,
        process_at: DateTime<Utc>,
    ) -> Result<RequestStatus, StorageError>;

    async fn status(&self, request_id: RequestId) -> Result<RequestStatus, StorageError>;
}

/// An open transaction. Dropping it without `commit` must not persist anything.
#[async_trait]
pub trait PostboxTransaction: Postbox {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Opens transactions over the postbox storage.
#[async_trait]
pub trait PostboxTransactor: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PostboxTransaction>, StorageError>;
}

/// Future returned by a unit of work; borrows the transaction for `'t`.
pub type UnitOfWork<'t, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 't>>;

/// `perform_as_result` for every transactor.
pub trait TransactorExt: PostboxTransactor {
    /// Run `work` inside one transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
    /// A failed commit is reported as the error of the whole unit of work.
    fn perform_as_result<'s, T, F>(
        &'s self,
        work: F,
    ) -> impl Future<Output = Result<T, StorageError>> + Send + 's
    where
        T: Send + 's,
        F: for<'t> FnOnce(&'t mut dyn PostboxTransaction) -> UnitOfWork<'t, T> + Send + 's,
    {
        async move {
            let mut tx = self.begin().await?;
            let outcome = work(&mut *tx).await;
            match outcome {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed after unit of work error");
                    }
                    Err(err)
                }
            }
        }
    }
}

impl<X: PostboxTransactor + ?Sized> TransactorExt for X {}
