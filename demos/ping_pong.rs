//! Two channels talking to each other: in-process first, then over a framed byte stream.

use procbridge::{
    BoxError, Channel, ChannelConfig, EnvelopeTransport, ExitStatus, FramedTransport,
    MemoryTransport, SendOptions, StreamConfig, StreamFrameTransport,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    memory_example().await?;
    stream_example().await?;
    Ok(())
}

async fn memory_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- MemoryTransport ---");

    let (t1, t2) = MemoryTransport::create_pair("ping-pong");
    let parent = Channel::with_config(t1, ChannelConfig::from_env())?;
    let child = Channel::new(t2);
    let _parent_pump = parent.start();
    let child_pump = child.start();

    child.on("add", |req: AddRequest| async move { Ok(req.a + req.b) })?;
    child.on("slow", |_: ()| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok("done")
    })?;
    child.on_void("log", |line: String| async move {
        println!("child log: {}", line);
        Ok::<(), BoxError>(())
    })?;

    parent.on_exit(|status| println!("parent saw exit: {}", status));

    let sum: i64 = parent.send("add", &AddRequest { a: 2, b: 3 }).await?;
    println!("2 + 3 = {}", sum);

    parent.notify("log", "hello from the parent").await?;

    match parent
        .send_with::<_, String>(
            "slow",
            &(),
            SendOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await
    {
        Ok(reply) => println!("slow replied: {}", reply),
        Err(e) => println!("slow failed ({}): {}", e.kind(), e),
    }

    if let Err(e) = parent.send::<_, ()>("missing", &()).await {
        println!("missing failed ({}): {}", e.kind(), e);
    }

    child.transport().disconnect(ExitStatus::new().with_code(0));
    child_pump.join().await;
    // Let the parent's pump observe the disconnect.
    tokio::time::sleep(Duration::from_millis(10)).await;

    if let Some(stats) = parent.transport().stats() {
        println!(
            "parent stats: sent={}, received={}",
            stats.messages_sent, stats.messages_received
        );
    }

    println!();
    Ok(())
}

async fn stream_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- StreamFrameTransport over a duplex pipe ---");

    let (a, b) = tokio::io::duplex(64 * 1024);
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let config = StreamConfig::default().with_max_frame_size(1024 * 1024);
    let client = Channel::new(FramedTransport::new(StreamFrameTransport::new(
        "client",
        ar,
        aw,
        config.clone(),
    )));
    let server = Channel::new(FramedTransport::new(StreamFrameTransport::new(
        "server", br, bw, config,
    )));
    let _client_pump = client.start();
    let _server_pump = server.start();

    server.on("upper", |s: String| async move { Ok(s.to_uppercase()) })?;

    let reply: String = client.send("upper", "ping").await?;
    println!("upper(ping) = {}", reply);

    println!();
    Ok(())
}
