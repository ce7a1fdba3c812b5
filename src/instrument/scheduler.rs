use super::service::LiveInstrumentService;
use super::Instrumentation;
use crate::error::{ProbeError, Result};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Background thread that expires instruments and retries pending ones.
pub struct Scheduler {
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts the thread. `attach` runs first on the new thread; whatever it
    /// returns is dropped when the thread exits.
    pub fn start<I, A, G>(
        service: Arc<LiveInstrumentService<I>>,
        sweep_every: Duration,
        retry_every: Duration,
        attach: A,
    ) -> Result<Self>
    where
        I: Instrumentation + 'static,
        A: FnOnce() -> G + Send + 'static,
        G: 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("probe-scheduler".to_string())
            .spawn(move || {
                let _attached = attach();
                let sweep = tick(sweep_every);
                let retry = tick(retry_every);
                info!(?sweep_every, ?retry_every, "instrument scheduler started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(sweep) -> _ => {
                            let expired = service.sweep_expired();
                            if expired > 0 {
                                debug!(expired, "expired instruments removed");
                            }
                        }
                        recv(retry) -> _ => {
                            let applied = service.retry_pending();
                            if applied > 0 {
                                debug!(applied, "pending instruments applied");
                            }
                        }
                    }
                }
                info!("instrument scheduler stopped");
            })
            .map_err(|e| ProbeError::Io("scheduler thread".to_string(), e))?;

        Ok(Scheduler { stop: Mutex::new(Some(stop_tx)), handle: Mutex::new(Some(handle)) })
    }

    pub fn stop(&self) {
        self.stop.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("instrument scheduler panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
