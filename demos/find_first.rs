//! Basic example: Find the first nearby UART device and connect to it
//!
//! Run with: cargo run --example find_first

use nus_uart::{find_first_within, BleScanner, Error, Result, UartEvent, UART_SERVICE_UUID};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nus_uart=debug".parse().unwrap()),
        )
        .init();

    println!("Scanning for a Nordic UART device (30 seconds)...");

    let scanner = BleScanner::new().await?;

    // The scan is stopped on a match and on timeout alike
    let session =
        match find_first_within(&scanner, UART_SERVICE_UUID, Duration::from_secs(30)).await {
            Ok(session) => session,
            Err(Error::DiscoveryTimeout(_)) => {
                println!("No UART device found.");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

    println!("\nFound device: {}", session.identity());

    let mut events = session.subscribe();
    session.connect().await?;
    println!("Connected, state: {}", session.state());

    // Print whatever arrives for ten seconds
    let listen = async {
        while let Ok(event) = events.recv().await {
            match event {
                UartEvent::DataAvailable => {
                    println!("Received: {:?}", session.read_all_string());
                }
                other => println!("Event: {}", other),
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(10), listen).await;

    session.disconnect().await?;
    println!("Done.");

    Ok(())
}
