use async_trait::async_trait;
use pg_warden::workers::periodic::{Flow, PeriodicTask, Worker};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::timeout;

struct CountingTask {
    runs: Arc<AtomicU32>,
    stop_after: Option<u32>,
}

#[async_trait]
impl PeriodicTask for CountingTask {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn run_once(&mut self) -> Flow {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        match self.stop_after {
            Some(limit) if run >= limit => Flow::Stop,
            _ => Flow::Continue,
        }
    }
}

#[tokio::test]
async fn test_worker_repeats_until_stopped() {
    let runs = Arc::new(AtomicU32::new(0));
    let worker = Worker::spawn_periodic(
        CountingTask {
            runs: runs.clone(),
            stop_after: None,
        },
        Duration::from_millis(10),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(worker.is_alive());
    assert!(runs.load(Ordering::SeqCst) >= 2);

    worker.stop();
    timeout(Duration::from_secs(1), worker.join())
        .await
        .expect("worker must exit promptly after stop");
    assert!(!worker.is_alive());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let runs = Arc::new(AtomicU32::new(0));
    let worker = Worker::spawn_periodic(
        CountingTask {
            runs,
            stop_after: None,
        },
        Duration::from_millis(10),
    );

    worker.stop();
    worker.stop();
    timeout(Duration::from_secs(1), worker.join()).await.unwrap();
    // Stopping an already-joined worker is still a no-op.
    worker.stop();
    assert!(!worker.is_alive());
}

#[tokio::test]
async fn test_task_can_end_its_own_loop() {
    let runs = Arc::new(AtomicU32::new(0));
    let worker = Worker::spawn_periodic(
        CountingTask {
            runs: runs.clone(),
            stop_after: Some(3),
        },
        Duration::from_millis(10),
    );

    timeout(Duration::from_secs(1), worker.join())
        .await
        .expect("worker must exit once the task stops itself");
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(!worker.is_alive());
}

#[tokio::test]
async fn test_stop_interrupts_a_long_sleep() {
    let runs = Arc::new(AtomicU32::new(0));
    let worker = Worker::spawn_periodic(
        CountingTask {
            runs: runs.clone(),
            stop_after: None,
        },
        Duration::from_secs(3600),
    );

    // Let the first iteration run, then interrupt the hour-long sleep.
    while runs.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.stop();
    timeout(Duration::from_secs(1), worker.join())
        .await
        .expect("stop must wake the sleeping worker");
}
