pub mod client;
pub mod models;

pub use client::HttpLockerService;
pub use models::Redemption;

use async_trait::async_trait;

use crate::error::RemoteError;

/// The remote locker service. Every call is bounded by a timeout and never retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockerService: Send + Sync {
    /// `GET /{code}`.
    async fn redeem(&self, code: &str) -> Result<Redemption, RemoteError>;

    /// `PATCH /{code}`: marks the code used. Best effort.
    async fn invalidate(&self, code: &str) -> Result<(), RemoteError>;

    /// `GET /test`: `true` on a 2xx within the probe timeout.
    async fn health_check(&self) -> bool;
}
