//! Events emitted by a running probe

use crate::report::Report;
use crate::warnings::WarningKind;
use bitprobe_core::DiagnosticError;
use tokio::sync::mpsc;

/// Everything a probe reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    /// A bitrate sample was taken
    Bitrate {
        /// Sample value in kbps
        value: f64,
    },
    /// A step failed
    Error {
        /// What failed
        error: DiagnosticError,
    },
    /// A warning became active
    Warning {
        /// Warning kind
        kind: WarningKind,
    },
    /// A warning stopped being active
    WarningCleared {
        /// Warning kind
        kind: WarningKind,
    },
    /// The probe stopped. Always the last event, emitted exactly once.
    End {
        /// Final report
        report: Report,
    },
}

impl ProbeEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ProbeEvent::Bitrate { .. } => "bitrate",
            ProbeEvent::Error { .. } => "error",
            ProbeEvent::Warning { .. } => "warning",
            ProbeEvent::WarningCleared { .. } => "warning-cleared",
            ProbeEvent::End { .. } => "end",
        }
    }

    /// Check if this is a warning raise or clear
    pub fn is_warning_event(&self) -> bool {
        matches!(
            self,
            ProbeEvent::Warning { .. } | ProbeEvent::WarningCleared { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, ProbeEvent::Error { .. })
    }

    /// Check if this is the final event
    pub fn is_end(&self) -> bool {
        matches!(self, ProbeEvent::End { .. })
    }
}

/// Stream of probe events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<ProbeEvent>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<ProbeEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<ProbeEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<ProbeEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Consume events until the final report arrives.
    ///
    /// Returns `None` if the probe went away without reporting.
    pub async fn into_report(mut self) -> Option<Report> {
        while let Some(event) = self.receiver.recv().await {
            if let ProbeEvent::End { report } = event {
                return Some(report);
            }
        }
        None
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Check if the event stream is closed
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        let warning = ProbeEvent::Warning {
            kind: WarningKind::LowBitrate,
        };
        assert_eq!(warning.event_type(), "warning");
        assert!(warning.is_warning_event());
        assert!(!warning.is_end());

        let error = ProbeEvent::Error {
            error: DiagnosticError::new("No iceServers found"),
        };
        assert!(error.is_error_event());
        assert_eq!(ProbeEvent::Bitrate { value: 1.0 }.event_type(), "bitrate");
    }

    #[tokio::test]
    async fn test_try_next_reports_disconnect() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx);

        assert_eq!(stream.try_next().unwrap(), None);
        tx.send(ProbeEvent::Bitrate { value: 8.0 }).unwrap();
        assert_eq!(
            stream.try_next().unwrap(),
            Some(ProbeEvent::Bitrate { value: 8.0 })
        );

        drop(tx);
        assert!(stream.try_next().is_err());
    }

    #[test]
    fn test_close_stops_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx);
        assert!(!stream.is_closed());

        stream.close();
        assert!(stream.is_closed());
        assert!(tx.send(ProbeEvent::Bitrate { value: 8.0 }).is_err());
    }

    #[tokio::test]
    async fn test_into_report_without_end() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ProbeEvent::Bitrate { value: 8.0 }).unwrap();
        drop(tx);

        assert!(EventStream::new(rx).into_report().await.is_none());
    }
}
