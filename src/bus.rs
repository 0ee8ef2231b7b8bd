use crate::{
    bearer::{BearerHandle, QosParams},
    event::Event,
    retry::RetryDelay,
    sync,
    tracker::{ApnEnable, TrackerStatus},
    ApnType, Result,
};
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum Message {
    Event(Event),
    EnableApn {
        apn_type: ApnType,
        response: sync::ResponseSender<ApnEnable>,
    },
    RequestBearer {
        parent: ApnType,
        qos: QosParams,
        response: sync::ResponseSender<Result<BearerHandle>>,
    },
    Status(sync::ResponseSender<TrackerStatus>),
}

pub type MessageSender = sync::MessageSender<Message>;
pub type MessageReceiver = sync::MessageReceiver<Message>;

pub fn message_channel(size: usize) -> (MessageSender, MessageReceiver) {
    sync::message_channel(size)
}

impl MessageSender {
    /// Queues an event behind every message already on the bus.
    pub async fn post(&self, event: Event) -> Result {
        self.send(Message::Event(event)).await
    }

    /// Posts the event once `delay` has elapsed unless the returned timer is
    /// cancelled first.
    pub fn schedule_after(&self, event: Event, delay: Duration) -> Timer {
        let sender = self.clone();
        let name = event.name();
        Timer(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(event = name, "timer fired");
            if let Err(err) = sender.post(event).await {
                warn!(event = name, %err, "dropping timer event");
            }
        }))
    }

    pub async fn enable_apn(&self, apn_type: ApnType) -> Result<ApnEnable> {
        self.request(|response| Message::EnableApn { apn_type, response })
            .await
    }

    pub async fn request_bearer(&self, parent: ApnType, qos: QosParams) -> Result<BearerHandle> {
        self.request(|response| Message::RequestBearer {
            parent,
            qos,
            response,
        })
        .await?
    }

    pub async fn status(&self) -> Result<TrackerStatus> {
        self.request(Message::Status).await
    }
}

/// A cancellable pending event.
#[derive(Debug)]
pub struct Timer(JoinHandle<()>);

impl Timer {
    /// Cancels the timer. Cancelling a fired or already cancelled timer does
    /// nothing.
    pub fn cancel(&self) {
        self.0.abort()
    }
}

/// The delay to arm a timer with: the base delay plus a uniform random offset
/// below the randomization bound.
pub fn randomized(delay: &RetryDelay) -> Duration {
    let bound = delay.randomization.as_millis() as u64;
    if bound == 0 {
        return delay.base;
    }
    delay.base + Duration::from_millis(rand::thread_rng().gen_range(0..bound))
}
