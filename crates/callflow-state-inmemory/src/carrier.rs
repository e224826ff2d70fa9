//! Carrier fake that records every command

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use callflow_core::{CallFlowError, CallFlowResult, CallId, CarrierClient, DialLegRequest};

/// A command the engine sent to the carrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarrierCommand {
    /// Outbound leg placed
    Dial {
        /// Leg id handed back to the engine
        leg: CallId,
        /// Dial request
        request: DialLegRequest,
    },
    /// Live call redirected
    Redirect {
        /// Redirected call
        call_id: CallId,
        /// New document URL
        url: String,
    },
    /// Live call ended
    Hangup {
        /// Ended call
        call_id: CallId,
    },
}

/// Carrier client that keeps a log of commands instead of calling out
#[derive(Debug, Clone, Default)]
pub struct RecordingCarrier {
    commands: Arc<Mutex<Vec<CarrierCommand>>>,
    next_leg: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl RecordingCarrier {
    /// Create an empty carrier log
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following command fail with a carrier error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every command so far
    pub async fn commands(&self) -> Vec<CarrierCommand> {
        self.commands.lock().await.clone()
    }

    /// Dial requests so far
    pub async fn dials(&self) -> Vec<DialLegRequest> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                CarrierCommand::Dial { request, .. } => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Redirect URLs so far, per call
    pub async fn redirects(&self) -> Vec<(CallId, String)> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                CarrierCommand::Redirect { call_id, url } => Some((call_id.clone(), url.clone())),
                _ => None,
            })
            .collect()
    }

    /// Calls hung up so far
    pub async fn hangups(&self) -> Vec<CallId> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                CarrierCommand::Hangup { call_id } => Some(call_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded commands
    pub async fn clear(&self) {
        self.commands.lock().await.clear();
    }

    fn check(&self) -> CallFlowResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CallFlowError::Carrier("carrier unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CarrierClient for RecordingCarrier {
    async fn dial_leg(&self, request: DialLegRequest) -> CallFlowResult<CallId> {
        self.check()?;
        let n = self.next_leg.fetch_add(1, Ordering::SeqCst) + 1;
        let leg = CallId(format!("LEG{}", n));
        debug!(%leg, to = %request.to, "Recorded dial");
        self.commands.lock().await.push(CarrierCommand::Dial {
            leg: leg.clone(),
            request,
        });
        Ok(leg)
    }

    async fn redirect_call(&self, call_id: &CallId, url: &str) -> CallFlowResult<()> {
        self.check()?;
        self.commands.lock().await.push(CarrierCommand::Redirect {
            call_id: call_id.clone(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn hangup_call(&self, call_id: &CallId) -> CallFlowResult<()> {
        self.check()?;
        self.commands.lock().await.push(CarrierCommand::Hangup {
            call_id: call_id.clone(),
        });
        Ok(())
    }
}
