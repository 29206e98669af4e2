use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Replaying,
    Capturing,
    Scanning,
    Analyzing,
    Reporting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Replaying => "replaying",
            Phase::Capturing => "capturing",
            Phase::Scanning => "scanning",
            Phase::Analyzing => "analyzing",
            Phase::Reporting => "reporting",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub step: usize,
    pub total: usize,
    pub message: String,
}

/// Sending half of the progress stream. Events are dropped silently when no
/// receiver is attached or the receiver has gone away.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl Progress {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, phase: Phase, step: usize, total: usize, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                phase,
                step,
                total,
                message: message.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let progress = Progress::new(tx);
        progress.emit(Phase::Replaying, 1, 2, "navigate");
        progress.emit(Phase::Capturing, 1, 2, "step 1");
        assert_eq!(rx.try_recv().unwrap().phase, Phase::Replaying);
        assert_eq!(rx.try_recv().unwrap().phase, Phase::Capturing);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        Progress::new(tx).emit(Phase::Reporting, 0, 0, "done");
        Progress::none().emit(Phase::Reporting, 0, 0, "done");
    }
}
