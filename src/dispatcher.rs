//! The single logical worker. Messages are taken off the bus one at a time,
//! run through the tracker, and the resulting effects are executed before the
//! next message is looked at.

use crate::{
    bus::{self, Message, MessageReceiver, MessageSender, Timer},
    effect::{Effect, Effects, Notification, RadioRequest},
    event::{AlarmId, Event},
    radio::Radio,
    tracker::Tracker,
    FailCause, Result, Settings,
};
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 64;

pub struct Dispatcher<R> {
    tracker: Tracker,
    messages: MessageReceiver,
    bus: MessageSender,
    radio: R,
    notifications: broadcast::Sender<Notification>,
    timers: HashMap<AlarmId, Timer>,
}

impl<R: Radio> Dispatcher<R> {
    pub fn new(
        settings: &Settings,
        messages: MessageReceiver,
        bus: MessageSender,
        radio: R,
    ) -> Result<Self> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Ok(Self {
            tracker: Tracker::new(settings)?,
            messages,
            bus,
            radio,
            notifications,
            timers: HashMap::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self, shutdown: &triggered::Listener) -> Result {
        info!(contexts = self.tracker.registry().len(), "starting");
        loop {
            tokio::select! {
                _ = shutdown.clone() => {
                    info!("shutting down");
                    self.timers.drain().for_each(|(_, timer)| timer.cancel());
                    return Ok(())
                },
                message = self.messages.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        warn!("message channel closed");
                        return Ok(())
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Event(event) => {
                let fx = self.handle_event(event);
                self.process(fx).await
            }
            Message::EnableApn { apn_type, response } => {
                let mut fx = Effects::default();
                response.send(self.tracker.apn_enable(&apn_type, &mut fx));
                self.process(fx).await
            }
            Message::RequestBearer {
                parent,
                qos,
                response,
            } => {
                let mut fx = Effects::default();
                response.send(self.tracker.request_bearer(&parent, qos, &mut fx));
                self.process(fx).await
            }
            Message::Status(response) => response.send(self.tracker.status()),
        }
    }

    fn handle_event(&mut self, event: Event) -> Effects {
        if let Event::Alarm(alarm) = &event {
            self.timers.remove(&alarm.id);
        }
        let mut fx = Effects::default();
        self.tracker.handle(event, &mut fx);
        fx
    }

    /// Executes effects. Events that effects turn into, such as a setup that
    /// could not be submitted, are handled before the next bus message.
    async fn process(&mut self, fx: Effects) {
        let mut followups = VecDeque::new();
        self.execute(fx, &mut followups).await;
        while let Some(event) = followups.pop_front() {
            let fx = self.handle_event(event);
            self.execute(fx, &mut followups).await;
        }
    }

    async fn execute(&mut self, fx: Effects, followups: &mut VecDeque<Event>) {
        for effect in fx {
            match effect {
                Effect::Radio(request) => {
                    let setup = match &request {
                        RadioRequest::SetupData {
                            request, apn_type, ..
                        } => Some((apn_type.clone(), *request)),
                        _ => None,
                    };
                    if let Err(err) = self.radio.send(request).await {
                        warn!(%err, "radio request not submitted");
                        if let Some((apn_type, request)) = setup {
                            followups.push_back(Event::SetupComplete {
                                apn_type,
                                request,
                                result: Err(FailCause::RequestSubmission),
                            });
                        }
                    }
                }
                Effect::Notify(notification) => {
                    debug!(?notification, "notify");
                    // no subscribers is fine
                    let _ = self.notifications.send(notification);
                }
                Effect::Schedule { alarm, delay } => {
                    let armed = bus::randomized(&delay);
                    let id = alarm.id;
                    debug!(alarm = %id, delay_ms = armed.as_millis() as u64, "arming alarm");
                    let timer = self.bus.schedule_after(Event::Alarm(alarm), armed);
                    if let Some(previous) = self.timers.insert(id, timer) {
                        previous.cancel();
                    }
                }
                Effect::Cancel(id) => {
                    if let Some(timer) = self.timers.remove(&id) {
                        debug!(alarm = %id, "cancelling alarm");
                        timer.cancel();
                    }
                }
            }
        }
    }
}
