use crate::{
    bus::MessageSender,
    effect::RadioRequest,
    event::{Event, LinkProperties},
    settings::SimulatorSettings,
    FailCause, Result,
};
use async_trait::async_trait;
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use tracing::{debug, info};

/// The radio collaborator. `send` only submits a request; its outcome comes
/// back as a completion event on the bus.
#[async_trait]
pub trait Radio: Send {
    async fn send(&mut self, request: RadioRequest) -> Result;
}

/// In process radio that answers every request after a fixed latency.
/// Profiles named in `reject_apns` are refused as unknown apns.
#[derive(Debug)]
pub struct SimulatedRadio {
    bus: MessageSender,
    latency: Duration,
    reject_apns: Vec<String>,
    interfaces: u8,
}

impl SimulatedRadio {
    pub fn new(bus: MessageSender, settings: &SimulatorSettings) -> Self {
        Self {
            bus,
            latency: settings.latency(),
            reject_apns: settings.reject_apns.clone(),
            interfaces: 0,
        }
    }

    fn link(&mut self) -> LinkProperties {
        self.interfaces = self.interfaces.wrapping_add(1);
        let index = self.interfaces;
        LinkProperties {
            interface: format!("rmnet_data{index}"),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 64, index, 2))],
            dns: vec![IpAddr::V4(Ipv4Addr::new(10, 64, 0, 53))],
            gateway: Some(IpAddr::V4(Ipv4Addr::new(10, 64, index, 1))),
            mtu: Some(1500),
        }
    }

    fn reply(&mut self, request: RadioRequest) -> Option<Event> {
        match request {
            RadioRequest::SetupData {
                request,
                apn_type,
                profile,
            } => {
                let result = if self.reject_apns.contains(&profile.name) {
                    Err(FailCause::MissingUnknownApn)
                } else {
                    Ok(self.link())
                };
                Some(Event::SetupComplete {
                    apn_type,
                    request,
                    result,
                })
            }
            // a forced teardown is never confirmed
            RadioRequest::DeactivateData { forced: true, .. } => None,
            RadioRequest::DeactivateData {
                apn_type, handle, ..
            } => Some(Event::TeardownComplete { apn_type, handle }),
            RadioRequest::ActivateBearer { bearer, .. } => Some(Event::BearerSetupComplete {
                bearer,
                result: Ok(()),
            }),
            RadioRequest::ModifyBearer { bearer, qos } => Some(Event::BearerModifyComplete {
                bearer,
                result: Ok(qos),
            }),
            RadioRequest::DeactivateBearer { bearer } => {
                Some(Event::BearerDeactivateComplete(bearer))
            }
            RadioRequest::AbortBearer { bearer } => Some(Event::BearerAbortComplete(bearer)),
        }
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn send(&mut self, request: RadioRequest) -> Result {
        info!(request = ?request, "radio request");
        if let Some(event) = self.reply(request) {
            debug!(event = event.name(), latency_ms = self.latency.as_millis() as u64, "simulating reply");
            self.bus.schedule_after(event, self.latency);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{bus, bus::Message, event::RequestId, ApnProfile, ApnType};

    fn radio(reject: &[&str]) -> (SimulatedRadio, bus::MessageReceiver) {
        let (tx, rx) = bus::message_channel(8);
        let settings = SimulatorSettings {
            latency_ms: 100,
            reject_apns: reject.iter().map(|name| name.to_string()).collect(),
        };
        (SimulatedRadio::new(tx, &settings), rx)
    }

    fn setup(name: &str) -> RadioRequest {
        RadioRequest::SetupData {
            request: RequestId(1),
            apn_type: ApnType::DEFAULT,
            profile: ApnProfile::new(name, &[ApnType::DEFAULT]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answers_setup() {
        let (mut radio, mut rx) = radio(&[]);
        radio.send(setup("internet")).await.expect("send");
        match rx.recv().await {
            Some(Message::Event(Event::SetupComplete { result: Ok(link), .. })) => {
                assert_eq!("rmnet_data1", link.interface)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_configured_apns() {
        let (mut radio, mut rx) = radio(&["internet"]);
        radio.send(setup("internet")).await.expect("send");
        assert!(matches!(
            rx.recv().await,
            Some(Message::Event(Event::SetupComplete {
                result: Err(FailCause::MissingUnknownApn),
                ..
            }))
        ));
    }

    #[test]
    fn forced_teardown_is_not_confirmed() {
        let (mut radio, _rx) = radio(&[]);
        let reply = radio.reply(RadioRequest::DeactivateData {
            apn_type: ApnType::DEFAULT,
            handle: crate::event::ConnectionHandle(3),
            forced: true,
        });
        assert!(reply.is_none());
    }
}
