//! Pairing new outlets through the gateway

use crate::gateway::{ApiClient, EventStreamClient, GatewayError};
use appliance_shared::wire::PairingConfig;
use appliance_shared::{EventKind, GatewayEvent};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("A pairing scan is already in progress")]
    AlreadyScanning,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Default)]
struct ScanSession {
    active: bool,
    found: Option<oneshot::Sender<String>>,
}

pub struct DeviceRegistrationService {
    api: Arc<ApiClient>,
    session: Arc<Mutex<ScanSession>>,
    pairing_window_secs: u32,
}

/// Ends the session however the scan returns
struct SessionGuard<'a>(&'a Mutex<ScanSession>);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut session = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        session.active = false;
        session.found = None;
    }
}

impl DeviceRegistrationService {
    pub fn new(api: Arc<ApiClient>, stream: &EventStreamClient, pairing_window_secs: u32) -> Self {
        let session: Arc<Mutex<ScanSession>> = Arc::default();

        let pending = session.clone();
        stream.subscribe(EventKind::DeviceAdded, move |event| {
            if let GatewayEvent::DeviceAdded { unique_id } = event {
                let found = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .found
                    .take();
                match found {
                    Some(tx) => {
                        let _ = tx.send(unique_id.clone());
                    }
                    None => debug!("Outlet {} joined outside of a scan", unique_id),
                }
            }
        });

        Self {
            api,
            session,
            pairing_window_secs,
        }
    }

    /// Open the pairing window and wait for one outlet to join.
    ///
    /// Returns the new outlet's unique id, or `None` if the window closed
    /// without one.
    pub async fn scan_for_new_device(&self) -> Result<Option<String>, RegistrationError> {
        let found = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if session.active {
                return Err(RegistrationError::AlreadyScanning);
            }
            let (tx, rx) = oneshot::channel();
            session.active = true;
            session.found = Some(tx);
            rx
        };
        let _guard = SessionGuard(&self.session);

        info!("Scanning for new outlets for {}s", self.pairing_window_secs);
        self.set_pairing_window(self.pairing_window_secs).await?;

        let window = Duration::from_secs(u64::from(self.pairing_window_secs));
        match tokio::time::timeout(window, found).await {
            Ok(Ok(unique_id)) => {
                info!("New outlet {} joined", unique_id);
                Ok(Some(unique_id))
            }
            _ => {
                warn!("No outlet joined within {}s", self.pairing_window_secs);
                if let Err(e) = self.set_pairing_window(0).await {
                    warn!("Could not close the pairing window: {}", e);
                }
                Ok(None)
            }
        }
    }

    async fn set_pairing_window(&self, seconds: u32) -> Result<(), GatewayError> {
        self.api
            .put_json("config", &PairingConfig { permitjoin: seconds })
            .await?;
        Ok(())
    }
}
