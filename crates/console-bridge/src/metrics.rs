use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::demux::StreamKind;
use crate::error::ErrorKind;
use crate::intent::IntentName;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static EXEC_SESSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "console_bridge_exec_sessions_total",
            "exec sessions opened by intent",
        ),
        &["intent"],
    )
    .expect("exec session counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("console_bridge_errors_total", "failed requests by error kind"),
        &["kind"],
    )
    .expect("error counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FRAMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "console_bridge_frames_total",
            "multiplexed frames decoded by stream",
        ),
        &["stream"],
    )
    .expect("frame counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FRAME_BYTES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "console_bridge_frame_bytes_total",
            "payload bytes decoded by stream",
        ),
        &["stream"],
    )
    .expect("frame byte counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn record_exec(intent: IntentName) {
    EXEC_SESSIONS.with_label_values(&[intent.as_str()]).inc();
}

pub fn record_error(kind: ErrorKind) {
    ERRORS.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_frame(stream: StreamKind, payload_len: usize) {
    FRAMES.with_label_values(&[stream.as_str()]).inc();
    FRAME_BYTES
        .with_label_values(&[stream.as_str()])
        .inc_by(payload_len as u64);
}

/// Prometheus text exposition of every bridge metric.
pub fn gather_text() -> String {
    Lazy::force(&EXEC_SESSIONS);
    Lazy::force(&ERRORS);
    Lazy::force(&FRAMES);
    Lazy::force(&FRAME_BYTES);
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_frames_show_up_in_exposition() {
        record_frame(StreamKind::Stdout, 3);
        record_error(ErrorKind::Timeout);
        let text = gather_text();
        assert!(text.contains("console_bridge_frames_total"));
        assert!(text.contains("stream=\"stdout\""));
        assert!(text.contains("kind=\"Timeout\""));
    }
}
