use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        if self.context.config.reminders.sweep_enabled {
            tokio::spawn(Self::reminder_sweep_job(Arc::clone(&self)));
        } else {
            info!("Reminder sweep disabled");
        }

        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Log upcoming renewals (daily by default)
    async fn reminder_sweep_job(scheduler: Arc<Self>) {
        let period = Duration::from_secs(scheduler.context.config.reminders.sweep_interval_secs);
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            info!("Running renewal reminder sweep");

            let started = Instant::now();
            let status = match tasks::sweep_reminders(&scheduler.context).await {
                Ok(report) => {
                    if report.failed_rows > 0 {
                        info!(
                            "Reminder sweep: {} due, {} rows skipped on decode errors",
                            report.due, report.failed_rows
                        );
                    }
                    "success"
                }
                Err(e) => {
                    error!("Reminder sweep failed: {}", e);
                    "error"
                }
            };
            crate::metrics::record_background_job(
                "reminder_sweep",
                status,
                started.elapsed().as_secs_f64(),
            );
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            let started = Instant::now();
            let status = match tasks::health_check(&scheduler.context).await {
                Ok(_) => "success",
                Err(e) => {
                    error!("Health check failed: {}", e);
                    "error"
                }
            };
            crate::metrics::record_background_job(
                "health_check",
                status,
                started.elapsed().as_secs_f64(),
            );
        }
    }
}
