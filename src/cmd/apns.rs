use crate::{cmd::*, ApnType, Error, Result, Settings, Tracker};
use serde_json::json;

/// List registered apn types with their ids and candidate profiles
#[derive(Debug, clap::Args)]
pub struct Cmd {
    /// Only list the given apn type
    #[arg(long = "type")]
    pub apn_type: Option<String>,
}

impl Cmd {
    pub async fn run(&self, settings: Settings) -> Result {
        let tracker = Tracker::new(&settings)?;
        let registry = tracker.registry();
        let only = self.apn_type.as_ref().map(ApnType::new);
        if let Some(apn_type) = &only {
            if !registry.contains(apn_type) {
                return Err(Error::unknown_apn_type(apn_type));
            }
        }
        let apns: Vec<serde_json::Value> = registry
            .iter()
            .filter(|apn_type| only.as_ref().map_or(true, |only| only == *apn_type))
            .map(|apn_type| {
                let profiles: Vec<&str> = tracker
                    .profiles()
                    .iter()
                    .filter(|profile| profile.can_handle(apn_type))
                    .map(|profile| profile.name.as_str())
                    .collect();
                json!({
                    "type": apn_type,
                    "id": registry.id(apn_type),
                    "auto_enabled": tracker.context(apn_type).map_or(false, |ctx| ctx.is_enabled()),
                    "profiles": profiles,
                })
            })
            .collect();
        print_json(&apns)
    }
}
