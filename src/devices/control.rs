//! Reading and switching outlets with push confirmation

use crate::gateway::{ApiClient, EventStreamClient, GatewayError};
use crate::mailbox::KeyedMailbox;
use appliance_shared::wire::{LightResource, SetStateBody};
use appliance_shared::{EventKind, GatewayEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub on: bool,
    pub reachable: bool,
}

pub struct DeviceControlService {
    api: Arc<ApiClient>,
    confirmations: Arc<KeyedMailbox<String, bool>>,
    confirmation_timeout: Duration,
}

impl DeviceControlService {
    pub fn new(api: Arc<ApiClient>, stream: &EventStreamClient, confirmation_timeout: Duration) -> Self {
        let confirmations = Arc::new(KeyedMailbox::new());

        let mailbox = confirmations.clone();
        stream.subscribe(EventKind::StateChanged, move |event| {
            if let GatewayEvent::StateChanged { unique_id, on } = event {
                if !mailbox.put(unique_id, *on) {
                    trace!("Confirmation slot of {} already filled", unique_id);
                }
            }
        });

        Self {
            api,
            confirmations,
            confirmation_timeout,
        }
    }

    pub async fn get_state(&self, endpoint_id: &str) -> Result<DeviceState, GatewayError> {
        let light: LightResource = self.api.get_json(&format!("lights/{}", endpoint_id)).await?;
        let on = light.state.on.ok_or_else(|| {
            GatewayError::BadResponse(format!("light {} reports no on state", endpoint_id))
        })?;

        Ok(DeviceState {
            on,
            reachable: light.state.reachable.unwrap_or(true),
        })
    }

    /// Switch an outlet and wait for the gateway to push the new state
    pub async fn set_state(&self, endpoint_id: &str, on: bool) -> Result<(), GatewayError> {
        let current = self.get_state(endpoint_id).await?;
        if !current.reachable {
            warn!("Outlet {} is not reachable", endpoint_id);
            return Err(GatewayError::Unreachable(endpoint_id.to_string()));
        }
        if current.on == on {
            debug!("Outlet {} already on={}", endpoint_id, on);
            return Ok(());
        }

        let key = endpoint_id.to_string();
        self.confirmations.clear(&key).await;
        self.api
            .put_json(&format!("lights/{}/state", endpoint_id), &SetStateBody { on })
            .await?;

        match self
            .confirmations
            .recv_timeout(&key, self.confirmation_timeout)
            .await
        {
            Some(reported) if reported == on => {
                debug!("Outlet {} confirmed on={}", endpoint_id, on);
                Ok(())
            }
            Some(reported) => Err(GatewayError::ConfirmationMismatch {
                endpoint: key,
                requested: on,
                reported,
            }),
            None => Err(GatewayError::ConfirmationTimeout { endpoint: key, on }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::test_support::{api_client, FakeConnector, FakeTransport};
    use crate::gateway::HttpMethod;

    struct Fixture {
        transport: Arc<FakeTransport>,
        stream: Arc<EventStreamClient>,
        control: Arc<DeviceControlService>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(FakeTransport::new());
        let stream = Arc::new(EventStreamClient::new(
            Arc::new(FakeConnector::new()),
            StreamConfig::default(),
        ));
        let control = Arc::new(DeviceControlService::new(
            api_client(&transport),
            &stream,
            Duration::from_secs(5),
        ));
        Fixture {
            transport,
            stream,
            control,
        }
    }

    /// Echo every accepted switch command back as a push event
    fn confirm_commands(fixture: &Fixture) {
        let stream = fixture.stream.clone();
        fixture.transport.on_switch(move |id, on| {
            stream.dispatch(&GatewayEvent::StateChanged {
                unique_id: id.to_string(),
                on,
            })
        });
    }

    #[tokio::test]
    async fn test_get_state() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", true, false);

        let state = fixture.control.get_state("00:aa-01").await.expect("state");
        assert_eq!(
            state,
            DeviceState {
                on: true,
                reachable: false
            }
        );
    }

    #[tokio::test]
    async fn test_already_in_target_state_sends_nothing() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", true, true);

        fixture
            .control
            .set_state("00:aa-01", true)
            .await
            .expect("no-op");

        assert_eq!(fixture.transport.count(HttpMethod::Put, "/state"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_fails_without_command() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", false, false);

        let result = fixture.control.set_state("00:aa-01", true).await;

        assert!(matches!(result, Err(GatewayError::Unreachable(_))));
        assert_eq!(fixture.transport.count(HttpMethod::Put, "/state"), 0);
    }

    #[tokio::test]
    async fn test_switch_is_confirmed_by_push_event() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", false, true);
        confirm_commands(&fixture);

        fixture
            .control
            .set_state("00:aa-01", true)
            .await
            .expect("confirmed");

        assert_eq!(fixture.transport.count(HttpMethod::Put, "/state"), 1);
        assert_eq!(fixture.transport.light("00:aa-01"), Some(true));
    }

    #[tokio::test]
    async fn test_stale_confirmation_is_discarded() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", false, true);
        fixture.stream.dispatch(&GatewayEvent::StateChanged {
            unique_id: "00:aa-01".into(),
            on: true,
        });
        confirm_commands(&fixture);

        fixture
            .control
            .set_state("00:aa-01", true)
            .await
            .expect("confirmed by fresh event");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_confirmation_times_out() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", false, true);
        let start = tokio::time::Instant::now();

        let result = fixture.control.set_state("00:aa-01", true).await;

        assert!(matches!(
            result,
            Err(GatewayError::ConfirmationTimeout { on: true, .. })
        ));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contradicting_confirmation_fails() {
        let fixture = fixture();
        fixture.transport.add_light("00:aa-01", false, true);

        let waiter = {
            let control = fixture.control.clone();
            tokio::spawn(async move { control.set_state("00:aa-01", true).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        fixture.stream.dispatch(&GatewayEvent::StateChanged {
            unique_id: "00:aa-01".into(),
            on: false,
        });

        let result = waiter.await.expect("join");
        assert!(matches!(
            result,
            Err(GatewayError::ConfirmationMismatch {
                requested: true,
                reported: false,
                ..
            })
        ));
    }
}
