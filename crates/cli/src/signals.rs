use crate::error::Error;
use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};

/// Indefinitely listens to signals and sends signal events to the provided channel.
pub async fn wait_for_signal(signal_event: &Sender<SignalEvent>) -> Result<(), Error> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(Error::SignalHandler)?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(Error::SignalHandler)?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(Error::SignalHandler)?;

    loop {
        let event = tokio::select! {
            _ = sigint.recv() => SignalEvent::SigINT,
            _ = sigterm.recv() => SignalEvent::SigTERM,
            _ = sighup.recv() => SignalEvent::SigHUP,
            _ = sigusr1.recv() => SignalEvent::SigUSR1,
            _ = sigusr2.recv() => SignalEvent::SigUSR2,
        };
        signal_event.send_async(event).await?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Stop all loops and exit.
    SigINT,
    SigTERM,
    /// Reload the configuration file.
    SigHUP,
    /// Dump a status summary to the log.
    SigUSR1,
    /// Persist telemetry now.
    SigUSR2,
}

impl SignalEvent {
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::SigINT | Self::SigTERM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_int_and_term_shut_down() {
        assert!(SignalEvent::SigINT.is_shutdown());
        assert!(SignalEvent::SigTERM.is_shutdown());
        assert!(!SignalEvent::SigHUP.is_shutdown());
        assert!(!SignalEvent::SigUSR1.is_shutdown());
        assert!(!SignalEvent::SigUSR2.is_shutdown());
    }
}
