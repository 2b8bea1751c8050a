//! Two callers sharing one countdown

use std::sync::Arc;

use futures::StreamExt;
use timer_broadcast::{BroadcastConfig, CancellationToken, Duration, LocalGateway, TimerBroadcast};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let shutdown = CancellationToken::new();
    let broadcast = TimerBroadcast::new(
        BroadcastConfig::new("demo"),
        Arc::new(LocalGateway::new()),
        shutdown.clone(),
    );

    // The first caller starts a 6 second timer polled every second
    let mut first = broadcast.subscribe("kettle", 6, 1).await?;
    let first_task = tokio::spawn(async move {
        while let Some(ping) = first.recv().await {
            println!("[every 1s] '{}': {}s left", ping.timer_name, ping.seconds_left);
        }
        println!("[every 1s] stream closed");
    });

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // A second caller joins the running timer; its duration is ignored
    let second = broadcast.subscribe("kettle", 60, 2).await?;
    println!(
        "Second caller joined, {} subscriber(s) on 'kettle'",
        broadcast.subscriber_count("kettle")
    );
    second
        .for_each(|ping| async move {
            println!("[every 2s] '{}': {}s left", ping.timer_name, ping.seconds_left);
        })
        .await;
    println!("[every 2s] stream closed");

    first_task.await?;

    // Demonstrate leaving early while the timer keeps running for others
    let session = CancellationToken::new();
    let mut stays = broadcast.subscribe("toast", 4, 1).await?;
    let mut leaves = broadcast
        .subscribe_until("toast", 4, 1, session.clone())
        .await?;

    if let Some(ping) = leaves.recv().await {
        println!("Leaving '{}' at {}s left", ping.timer_name, ping.seconds_left);
    }
    session.cancel();
    assert!(leaves.recv().await.is_none());

    while let Some(ping) = stays.recv().await {
        println!("Still watching '{}': {}s left", ping.timer_name, ping.seconds_left);
    }

    // Shutdown gracefully
    shutdown.cancel();
    println!("Active timers at exit: {:?}", broadcast.active_timers());
    Ok(())
}
