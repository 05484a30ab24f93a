//! End-to-end demo: start a session, log, record metrics, read back.
//!
//! Run with `cargo run --example console_demo`.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use loggerhead_agent::{
    finished_session_files, start_session, AgentConfig, SessionFileReader, SessionInfo, Severity,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let repository = std::env::temp_dir().join("loggerhead-demo");
    let config = AgentConfig::testing(&repository);
    let info = SessionInfo::new("Loggerhead Samples", "Console Demo", "0.1.0")
        .with_environment("development");

    let session = start_session(config, info)?;

    // A subscriber that prints every alert the hub raises.
    let subscription = session.alerts().subscribe(|alert| {
        println!(
            "ALERT: {} message(s), worst severity {}, {}ms behind",
            alert.total_count,
            alert.top_severity,
            alert.latency.as_millis()
        );
        alert.set_minimum_delay(Duration::from_secs(2));
    });

    session.log(Severity::Information, "demo", "session is up")?;
    session.marker("demo-start")?;

    let depth = session.define_metric("queue.depth", "packets", true)?;
    for i in 0..20 {
        session.record_metric(&depth, f64::from(i))?;
        session.log(Severity::Verbose, "demo.loop", format!("iteration {i}"))?;
    }

    session.log(Severity::Error, "demo", "synthetic failure to trip the alert hub")?;
    session.comment("demo ran to completion")?;

    session.alerts().unsubscribe(subscription);
    session.end_session()?;

    // Read the repository back the way a viewer would.
    for path in finished_session_files(&repository)? {
        let mut reader = SessionFileReader::open(&path)?;
        let packets = reader.read_all()?;
        println!(
            "{}: {} packet(s), {} corrupt",
            path.display(),
            packets.len(),
            reader.corrupt_packet_count()
        );
    }

    Ok(())
}
