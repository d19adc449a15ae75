//! Terminal confirmation for large reference tables.

use customer_migrate::{ConfirmationRequest, Confirmer, MigrateError};
use dialoguer::Confirm;

/// Asks on the terminal. The default answer is no.
pub struct InteractiveConfirmer;

impl Confirmer for InteractiveConfirmer {
    fn confirm(&self, request: &ConfirmationRequest) -> customer_migrate::Result<bool> {
        Confirm::new()
            .with_prompt(prompt_text(request))
            .default(false)
            .interact()
            .map_err(|e| {
                MigrateError::Config(format!(
                    "cannot ask about {}.{} ({}); pass --confirm always-accept, always-decline or threshold:N",
                    request.database, request.table, e
                ))
            })
    }
}

fn prompt_text(request: &ConfirmationRequest) -> String {
    let rows = request
        .row_count
        .map(|n| format!("{} rows", n))
        .unwrap_or_else(|| "an unknown number of rows".to_string());
    format!(
        "{}.{} has {} (threshold {}). Copy the whole table?",
        request.database, request.table, rows, request.threshold
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text() {
        let mut request = ConfirmationRequest {
            database: "shop".into(),
            table: "audit_log".into(),
            row_count: Some(1200),
            threshold: 400,
        };
        assert_eq!(
            prompt_text(&request),
            "shop.audit_log has 1200 rows (threshold 400). Copy the whole table?"
        );
        request.row_count = None;
        assert!(prompt_text(&request).contains("an unknown number of rows"));
    }
}
