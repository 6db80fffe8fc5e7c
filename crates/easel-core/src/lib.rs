//! easel-core
//!
//! Chat mention → dispatch queue → image generation worker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（request, mention, artifact, state, outcome, errors）
//! - **ports**: 抽象化レイヤー（DispatchQueue, InferenceGateway, ArtifactStore, NotificationChannel, Clock）
//! - **app**: アプリケーションロジック（receiver, dispatch, worker, worker_loop, server, builder）
//! - **impls**: 実装（InMemoryDispatchQueue, LocalArtifactStore, HttpInferenceGateway, SlackNotifier）
//! - **config**: figment で読む Settings

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod test_support;
