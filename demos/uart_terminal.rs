//! Interactive example: A line-based terminal over the Nordic UART Service
//!
//! Lines typed on stdin are written to the device; everything the device
//! sends is printed as it arrives. Press Ctrl+C to quit.
//!
//! Run with: cargo run --example uart_terminal [-- --with-response]

use nus_uart::{
    BleScanner, DiscoverySession, Result, SessionConfig, UartEvent, UartObserver,
    UART_SERVICE_UUID,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Reports link changes.
struct LinkPrinter;

impl UartObserver for LinkPrinter {
    fn connected(&self) {
        println!("[connected]");
    }

    fn disconnected(&self) {
        println!("[disconnected]");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nus_uart=info".parse().unwrap()),
        )
        .init();

    let with_response = std::env::args().any(|a| a == "--with-response");

    println!("Scanning for a Nordic UART device...");

    let scanner = BleScanner::new().await?;
    let session = DiscoverySession::start(&scanner, UART_SERVICE_UUID)
        .await?
        .with_config(SessionConfig::new().with_write_response(with_response))
        .first_match()
        .await?;

    println!("Found {}", session.identity());

    session.register(Arc::new(LinkPrinter));
    let mut events = session.subscribe();

    session.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => session.write_str(&format!("{}\n", line)),
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("stdin error: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(UartEvent::DataAvailable) | Err(RecvError::Lagged(_)) => {
                        print!("{}", session.read_all_string());
                        let _ = std::io::stdout().flush();
                    }
                    Ok(UartEvent::Disconnected) | Err(RecvError::Closed) => {
                        println!("Link lost.");
                        break;
                    }
                    Ok(UartEvent::Connected) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    session.disconnect().await?;

    Ok(())
}
