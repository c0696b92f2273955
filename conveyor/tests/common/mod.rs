#![allow(dead_code)]

use conveyor::Reply;
use futures::channel::oneshot;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for a reply path to be completed.
pub async fn recv(rx: oneshot::Receiver<Reply>) -> Reply {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("no reply within 5s")
        .expect("reply path dropped without completion")
}
