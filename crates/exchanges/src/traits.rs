//! Seams between the reconciliation engine and a venue's REST surface

use crate::errors::Result;
use crate::transport::ChannelSpec;
use crate::types::{CanonicalOrder, CanonicalPosition};

use async_trait::async_trait;
use std::time::Duration;

/// Authoritative REST snapshots, already normalized
#[async_trait(?Send)]
pub trait SnapshotProvider {
    async fn get_open_orders(&self) -> Result<Vec<CanonicalOrder>>;

    /// Positions currently held (non-zero amounts)
    async fn get_open_positions(&self) -> Result<Vec<CanonicalPosition>>;
}

/// How to reach the private user-event channel
#[async_trait(?Send)]
pub trait UserStreamProvider {
    /// Build the channel spec, creating any session token it needs
    async fn user_channel_spec(&self) -> Result<ChannelSpec>;

    /// How often [`UserStreamProvider::keepalive`] must run, if at all
    fn keepalive_interval(&self) -> Option<Duration> {
        None
    }

    async fn keepalive(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything the user-data engine needs from one account
pub trait AccountGateway: SnapshotProvider + UserStreamProvider {}

impl<T: SnapshotProvider + UserStreamProvider> AccountGateway for T {}
