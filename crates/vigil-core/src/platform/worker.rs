//! Background timing source on its own tokio task.
//!
//! The task only sends ticks; the guard stays single-owner and decides what
//! a tick means.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::alarm::TimingSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick {
    pub source: String,
}

pub struct WorkerTimer {
    name: String,
    tx: UnboundedSender<TimerTick>,
    task: Option<JoinHandle<()>>,
}

impl WorkerTimer {
    #[must_use]
    pub fn new(name: &str, tx: UnboundedSender<TimerTick>) -> Self {
        Self {
            name: name.to_string(),
            tx,
            task: None,
        }
    }
}

impl TimingSource for WorkerTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok() && !self.tx.is_closed()
    }

    fn arm(&mut self, interval_ms: u64) -> Result<()> {
        self.disarm();

        let handle = tokio::runtime::Handle::try_current()?;
        let period = Duration::from_millis(interval_ms);
        let tx = self.tx.clone();
        let source = self.name.clone();

        self.task = Some(handle.spawn(async move {
            // the first alert already fired when the alarm started
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx
                    .send(TimerTick {
                        source: source.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));
        log::debug!("Timing source {} armed every {interval_ms} ms", self.name);
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Timing source {} disarmed", self.name);
        }
    }
}

impl Drop for WorkerTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_unavailable_outside_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let timer = WorkerTimer::new("worker", tx);
        assert!(!timer.is_available());
    }

    #[tokio::test]
    async fn test_ticks_after_one_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = WorkerTimer::new("worker", tx);
        assert!(timer.is_available());

        timer.arm(20).unwrap();
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.source, "worker");

        timer.disarm();
        assert!(timer.task.is_none());
    }
}
