use std::time::Duration;
use tokio::sync::watch;

/// Flipped to `true` once to ask every consumer loop to stop.
pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `true` if the sleep was cut short by shutdown.
pub async fn sleep_unless_shutdown(shutdown_rx: &mut ShutdownReceiver, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        res = shutdown_rx.changed() => res.is_err() || *shutdown_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_cut_short_by_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        let sleeper = tokio::spawn(async move {
            sleep_unless_shutdown(&mut rx, Duration::from_secs(3600)).await
        });
        tx.send(true).unwrap();
        assert!(sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_out_without_shutdown() {
        let (_tx, mut rx) = shutdown_channel();
        assert!(!sleep_unless_shutdown(&mut rx, Duration::from_millis(10)).await);
    }
}
