//! Bitrate probe demo
//!
//! Runs both bitrate tests over the in-memory loopback transport. The media
//! connection test degrades the simulated link halfway through so the
//! low-bitrate warning is raised, then restores it so the warning clears.

use anyhow::Context;
use bitprobe::{
    BitProbe, GlobalConfig, IceServer, LinkProfile, LoopbackTransport, ProbeConfig, ProbeEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn probe_config(duration: Duration) -> ProbeConfig {
    ProbeConfig::new(vec![IceServer::turn(
        "turn:turn.example.com:3478?transport=udp",
        "demo",
        "demo-secret",
    )])
    .min_bitrate_threshold(100.0)
    .duration(duration)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let global = GlobalConfig::with_logging("bitrate_demo=info,bitprobe_diagnostics=info");

    let transport = LoopbackTransport::new(LinkProfile::kbps(2400));
    let probe = BitProbe::init_with(Arc::new(transport), global.clone())?;

    info!("Running stand-alone bitrate test");
    let (_handle, events) = probe.bitrate_test(probe_config(Duration::from_secs(4)));
    let report = events
        .into_report()
        .await
        .context("bitrate test ended without a report")?;
    info!(
        "Bitrate test: average {:.1} kbps, passed: {:?}",
        report.average_bitrate, report.did_pass
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Running media connection bitrate test with a degrading link");
    let transport = LoopbackTransport::new(LinkProfile::kbps(2400));
    let probe = BitProbe::init_with(Arc::new(transport.clone()), global)?;
    let (handle, mut events) =
        probe.media_connection_bitrate_test(probe_config(Duration::from_secs(14)));

    let link = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3500)).await;
        info!("Link degraded to 40 kbps");
        link.set_link_rate(Some(5));
        tokio::time::sleep(Duration::from_millis(6000)).await;
        info!("Link restored");
        link.set_link_rate(Some(300));
    });

    while let Some(event) = events.next().await {
        match event {
            ProbeEvent::Bitrate { value } => info!("Bitrate: {:.1} kbps", value),
            ProbeEvent::Warning { kind } => info!("Warning raised: {}", kind),
            ProbeEvent::WarningCleared { kind } => info!("Warning cleared: {}", kind),
            ProbeEvent::Error { error } => info!("Error: {}", error),
            ProbeEvent::End { report } => {
                info!(
                    "Media connection test finished after {}ms with {} samples",
                    report.test_timing.duration,
                    report.values.len()
                );
            }
        }
    }

    handle.stop();
    Ok(())
}
