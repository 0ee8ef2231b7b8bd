use crate::{cmd::*, retry::RetryDecision, FailCause, Result, Settings};
use serde_json::json;

/// Print the retry schedule the configured policy yields for a failure
#[derive(Debug, clap::Args)]
pub struct Cmd {
    /// Failure cause, by name or 3GPP code
    #[arg(long, default_value = "timeout")]
    pub cause: FailCause,

    /// Maximum number of attempts to show
    #[arg(long, default_value_t = 10)]
    pub attempts: u32,
}

impl Cmd {
    pub async fn run(&self, settings: Settings) -> Result {
        let policy = settings.retry_policy()?;
        let class = self.cause.class();
        let mut schedule = vec![];
        for retry in 0..self.attempts {
            let decision = policy.next(retry, class);
            schedule.push(json!({ "retry": retry, "decision": decision }));
            if !matches!(decision, RetryDecision::Retry(_)) {
                break;
            }
        }
        print_json(&json!({
            "cause": self.cause,
            "class": class,
            "schedule": schedule,
        }))
    }
}
