//! Human-readable console lines for the simulator
//!
//! Pure formatting; `main` decides where the text goes.

use crate::alert::AlertReason;
use crate::config::DeviceIdentity;
use crate::publisher::TickOutcome;
use crate::session::{InboundMessage, StatsSnapshot};
use chrono::{DateTime, Local, Utc};
use std::fmt::Write;
use std::path::Path;

const RULE_WIDTH: usize = 60;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn local_clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

pub fn banner(identity: &DeviceIdentity) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Secure IoT Device Simulator - MQTT over TLS with X.509");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "📱 Device ID:     {}", identity.device_id());
    let _ = writeln!(out, "🌐 Broker:        {}:{}", identity.hostname(), identity.port());
    let _ = writeln!(out, "🔐 Certificate:   {}", file_name(identity.cert_path()));
    let _ = writeln!(out, "🔑 Private key:   {}", file_name(identity.key_path()));
    let _ = writeln!(out, "🔒 Protocol:      MQTT v3.1.1 over TLS 1.2+");
    out
}

/// One console entry per tick: header line plus the vitals
pub fn tick_lines(tick: &TickOutcome, now: DateTime<Utc>) -> String {
    let number = tick.sequence_number() + 1;
    let clock = local_clock(now);

    let header = match &tick.result {
        Err(e) => format!("❌ [{clock}] Message #{number} not sent: {e}"),
        Ok(_) if tick.classification.is_alert => format!("⚠️  [{clock}] Message #{number} (ALERT)"),
        Ok(_) => format!("✅ [{clock}] Message #{number}"),
    };

    let r = &tick.message.reading;
    let mark = |reason| if tick.classification.flags(reason) { " (!)" } else { "" };
    format!(
        "{header}\n   HR: {:.1} bpm{} | SpO2: {:.1}%{} | Temp: {:.2}°C{}",
        r.heart_rate,
        mark(AlertReason::HeartRate),
        r.spo2,
        mark(AlertReason::Spo2),
        r.temperature,
        mark(AlertReason::Temperature),
    )
}

pub fn inbound_lines(message: &InboundMessage) -> String {
    let payload = match message.payload_text() {
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} bytes, not UTF-8>", message.payload.len()),
    };
    format!(
        "📩 [{}] C2D message received\n   Topic: {}\n   Payload: {}",
        local_clock(message.received_at),
        message.topic,
        payload
    )
}

pub fn stats_block(stats: &StatsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "Session statistics");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "📊 Messages sent:        {}", stats.messages_sent);
    let _ = writeln!(out, "📬 Messages acknowledged: {}", stats.messages_acknowledged);
    let _ = writeln!(out, "❌ Messages failed:      {}", stats.messages_failed);
    let _ = writeln!(out, "📩 C2D received:         {}", stats.messages_received);
    let _ = writeln!(out, "🔌 Connection attempts:  {}", stats.connection_attempts);
    if let Some(at) = stats.last_message_at {
        let _ = writeln!(out, "⏱️  Last message:         {}", local_clock(at));
    }
    if let Some(error) = &stats.last_error {
        let _ = writeln!(out, "⚠️  Last error:           {}", error);
    }
    out
}

pub fn troubleshooting(port: u16) -> String {
    format!(
        "Could not establish the connection. Check that:\n   • the broker is reachable\n   • the certificates are valid\n   • the device is registered\n   • the firewall allows port {port}"
    )
}
