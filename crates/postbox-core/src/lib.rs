//! postbox-core
//!
//! Transactional outbox ("postbox") processing: requests are stored next to
//! business data and a background processor replays them against a
//! downstream handler, marking each one processed or dead.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request / response, state, events, errors）
//! - **ports**: 抽象化レイヤー（Postbox, Transactor, RequestHandler, ExecutionContext, EventSink, Clock）
//! - **app**: PostboxProcessor と builder / config
//! - **impls**: 実装（InMemoryPostbox, TokioExecutionContext, ManualExecutionContext など）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{BuildError, PostboxProcessor, ProcessingConfig};
pub use crate::domain::{Request, RequestId, Response, Status};
