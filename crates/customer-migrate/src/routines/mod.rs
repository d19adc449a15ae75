//! Stored procedure and function copy.
//!
//! Definitions are copied verbatim: the `SHOW CREATE` statement from the
//! source replaces any routine of the same name on the destination. Triggers
//! and events are not copied.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::{RoutineDescriptor, RoutineKind, SourceReader, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::state::TaskStatus;

/// Outcome of copying one routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineOutcome {
    pub name: String,
    pub kind: RoutineKind,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Copies routine definitions from source to destination.
#[derive(Clone)]
pub struct RoutineMigrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
}

impl RoutineMigrator {
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<dyn TargetWriter>) -> Self {
        Self { source, target }
    }

    /// Copy one routine.
    pub async fn migrate_routine(&self, database: &str, routine: &RoutineDescriptor) -> Result<()> {
        let definition = self
            .source
            .routine_definition(database, routine)
            .await
            .map_err(|e| MigrateError::routine(&routine.name, e.to_string()))?;

        if definition.trim().is_empty() {
            return Err(MigrateError::routine(
                &routine.name,
                "empty definition (missing privileges on the source?)",
            ));
        }

        self.target
            .replace_routine(database, routine, &definition)
            .await
            .map_err(|e| MigrateError::routine(&routine.name, e.to_string()))?;

        info!("{}: {} {} migrated", database, routine.kind, routine.name);
        Ok(())
    }

    /// Copy every routine of a database, continuing past failures.
    pub async fn migrate_routines(&self, database: &str) -> Result<Vec<RoutineOutcome>> {
        let routines = self.source.list_routines(database).await?;
        let mut outcomes = Vec::with_capacity(routines.len());

        for routine in &routines {
            let outcome = match self.migrate_routine(database, routine).await {
                Ok(()) => RoutineOutcome {
                    name: routine.name.clone(),
                    kind: routine.kind,
                    status: TaskStatus::Completed,
                    error: None,
                },
                Err(e) => {
                    warn!("{}: {}", database, e);
                    RoutineOutcome {
                        name: routine.name.clone(),
                        kind: routine.kind,
                        status: TaskStatus::Failed,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}
