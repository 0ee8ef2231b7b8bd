use crate::{
    bus, dispatcher::Dispatcher, effect::Notification, event::Event, radio::SimulatedRadio,
    Result, Settings,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub async fn run(shutdown: &triggered::Listener, settings: &Settings) -> Result {
    let (bus, messages) = bus::message_channel(settings.tracker.queue_size);
    let radio = SimulatedRadio::new(bus.clone(), &settings.simulator);
    let mut dispatcher = Dispatcher::new(settings, messages, bus.clone(), radio)?;
    let notifications = dispatcher.subscribe();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        profiles = settings.apn.profiles.len(),
        "starting server"
    );
    // the simulated modem comes up attached with its records loaded
    for event in [
        Event::RadioAvailable,
        Event::RecordsLoaded,
        Event::DataAttached,
    ] {
        bus.post(event).await?;
    }
    tokio::try_join!(
        dispatcher.run(shutdown),
        log_notifications(notifications, shutdown)
    )
    .map(|_| ())
}

#[tracing::instrument(skip_all)]
async fn log_notifications(
    mut notifications: broadcast::Receiver<Notification>,
    shutdown: &triggered::Listener,
) -> Result {
    loop {
        tokio::select! {
            _ = shutdown.clone() => return Ok(()),
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    let json = serde_json::to_string(&notification)?;
                    info!(notification = %json, "notification")
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifications lagged")
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}
