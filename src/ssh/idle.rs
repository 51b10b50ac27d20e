//! Per-session idle timer.
//!
//! Starts at session handshake, reset by console activity, and disabled
//! permanently on the first successful `tcpip-forward` or on accepting a
//! `direct-tcpip` splice. Mirrors the original's `time.AfterFunc` +
//! `Stop()`-return-value dance: a poke that loses the race with the timer
//! firing has no effect, and a fired timer is irrevocable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

enum Command {
    Poke,
    Disable,
}

pub struct IdleTimer {
    tx: mpsc::UnboundedSender<Command>,
    fired: Arc<Notify>,
}

impl IdleTimer {
    pub fn spawn(duration: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fired = Arc::new(Notify::new());
        let fired_handle = fired.clone();

        tokio::spawn(async move {
            let mut disabled = false;
            loop {
                let sleep = tokio::time::sleep(duration);
                tokio::pin!(sleep);

                tokio::select! {
                    _ = &mut sleep, if !disabled => {
                        fired_handle.notify_waiters();
                        return;
                    }
                    cmd = rx.recv() => match cmd {
                        Some(Command::Poke) => continue,
                        Some(Command::Disable) => disabled = true,
                        None => return,
                    }
                }
            }
        });

        Self { tx, fired }
    }

    /// Reset the deadline. No-op if the timer already fired or was
    /// disabled.
    pub fn poke(&self) {
        let _ = self.tx.send(Command::Poke);
    }

    /// Permanently stop the timer from ever firing.
    pub fn disable(&self) {
        let _ = self.tx.send(Command::Disable);
    }

    /// Resolves once the timer fires. Never resolves if the timer was
    /// disabled before firing.
    pub async fn fired(&self) {
        self.fired.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration_with_no_activity() {
        let timer = IdleTimer::spawn(Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(60)).await;
        timer.fired().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poke_resets_the_deadline() {
        let timer = IdleTimer::spawn(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;
        timer.poke();
        tokio::time::advance(Duration::from_millis(60)).await;
        // 120ms elapsed since spawn, but only 60ms since the poke: still alive.
        let fired = tokio::time::timeout(Duration::from_millis(1), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_prevents_future_firing() {
        let timer = IdleTimer::spawn(Duration::from_millis(10));
        timer.disable();
        tokio::time::advance(Duration::from_secs(5)).await;
        let fired = tokio::time::timeout(Duration::from_millis(1), timer.fired()).await;
        assert!(fired.is_err());
    }
}
