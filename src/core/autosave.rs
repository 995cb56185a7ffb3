use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// 要求延遲保存；沒有接上背景任務時為 no-op
#[derive(Debug, Clone, Default)]
pub struct SaveTrigger {
    tx: Option<mpsc::UnboundedSender<()>>,
}

impl SaveTrigger {
    pub fn request(&self) {
        if let Some(tx) = &self.tx {
            // 接收端已關閉代表正在關機，最後一次保存由關機流程負責
            let _ = tx.send(());
        }
    }
}

pub fn channel() -> (SaveTrigger, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SaveTrigger { tx: Some(tx) }, rx)
}

/// 防抖動：最後一次要求後靜默 `delay` 才保存
pub async fn run_debounced<F, Fut>(mut rx: mpsc::UnboundedReceiver<()>, delay: Duration, save: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(delay, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    save().await;
                    return;
                }
                Err(_) => break,
            }
        }
        save().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_requests_saves_once() {
        let (trigger, rx) = channel();
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = saves.clone();

        let task = tokio::spawn(run_debounced(rx, Duration::from_secs(2), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        for _ in 0..5 {
            trigger.request();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(saves.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        drop(trigger);
        task.await.unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_trigger_is_noop() {
        SaveTrigger::default().request();
    }
}
