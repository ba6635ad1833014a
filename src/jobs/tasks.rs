/// Background task implementations
use crate::{context::AppContext, error::VaultResult, reminders::SweepReport};

/// Scan every user's subscriptions for upcoming renewals
pub async fn sweep_reminders(ctx: &AppContext) -> VaultResult<SweepReport> {
    ctx.reminders.sweep().await
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> VaultResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    #[tokio::test]
    async fn test_tasks_run_against_empty_store() {
        let ctx = test_context().await;
        health_check(&ctx).await.unwrap();

        let report = sweep_reminders(&ctx).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
