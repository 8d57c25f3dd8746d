use tokio::sync::watch;

/// Resolves once `true` is sent on the shutdown channel.
///
/// If the sender goes away without signalling, this never resolves and the
/// caller keeps running until the process exits.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_immediately_if_already_signalled() {
        let (_tx, mut rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_millis(100), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_never_resolves() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let result =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut rx)).await;
        assert!(result.is_err());
    }
}
