use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::TargetWriter;
use crate::error::Result;

/// Foreign key checks suspended on the destination write session.
///
/// Created by [`suspend`](Self::suspend) before the first write of Phase 1
/// and consumed by [`restore`](Self::restore) after the last write of Phase 1C.
/// Checks are re-enabled exactly once: if the guard is dropped without
/// `restore` (early return, panic) the drop handler schedules the restore on
/// the current runtime.
pub struct ForeignKeyChecksGuard {
    target: Arc<dyn TargetWriter>,
    database: String,
    restored: bool,
}

impl ForeignKeyChecksGuard {
    /// Disable foreign key checks.
    pub async fn suspend(target: Arc<dyn TargetWriter>, database: &str) -> Result<Self> {
        target.set_foreign_key_checks(false).await?;
        info!("{}: foreign key checks disabled", database);
        Ok(Self {
            target,
            database: database.to_string(),
            restored: false,
        })
    }

    /// Re-enable foreign key checks.
    pub async fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.target.set_foreign_key_checks(true).await?;
        info!("{}: foreign key checks restored", self.database);
        Ok(())
    }
}

impl Drop for ForeignKeyChecksGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        warn!(
            "{}: foreign key guard dropped without restore; re-enabling checks",
            self.database
        );
        let target = self.target.clone();
        let database = std::mem::take(&mut self.database);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = target.set_foreign_key_checks(true).await {
                        error!("{}: failed to restore foreign key checks: {}", database, e);
                    }
                });
            }
            Err(_) => error!(
                "{}: no runtime available to restore foreign key checks",
                database
            ),
        }
    }
}
