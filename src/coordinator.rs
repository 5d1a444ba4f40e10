//! Role Coordinator (spec.md §4.6): Director-mode TCP listener and
//! Real-Server-mode TCP prober, gating Start/Stop of the local
//! Reconciler Loop with asymmetric hysteresis.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::metrics::Metrics;

/// Director mode: accepting a connection on any listed port means "I am
/// alive as director". The connection is kept open (spec.md §4.6) until
/// the real server closes it or this process shuts down — establishment
/// alone is the liveness signal, no payload is ever exchanged.
pub async fn run_director_listener(ports: Vec<u16>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let mut listeners = Vec::new();
    for port in &ports {
        let listener = TcpListener::bind(("0.0.0.0", *port)).await?;
        info!(port = port, "director liveness listener bound");
        listeners.push(listener);
    }

    let mut held = JoinSet::new();

    loop {
        let accept_any = async {
            let mut futs: Vec<_> = listeners.iter().map(|l| Box::pin(l.accept())).collect();
            futures::future::select_all(futs.drain(..)).await
        };

        tokio::select! {
            (result, _idx, _rest) = accept_any => {
                match result {
                    Ok((stream, addr)) => {
                        info!(peer = %addr, "accepted director liveness probe");
                        held.spawn(hold_until_closed(stream));
                    }
                    Err(e) => warn!(error = %e, "director listener accept failed"),
                }
            }
            Some(_) = held.join_next(), if !held.is_empty() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    held.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Blocks until the peer closes its end (or the read fails), so the
/// accepted connection stays open rather than being dropped right after
/// the accept log line.
async fn hold_until_closed(mut stream: TcpStream) {
    let mut buf = [0u8; 1];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Hysteresis state machine for the Real-Server side (spec.md §4.6).
///
/// `last_status` starts optimistic (`true`, director assumed alive) so
/// a freshly-started real-server never fails over on its very first
/// tick before the director has had a chance to be observed at all.
pub struct Hysteresis {
    last_status: bool,
    tries: u32,
    max_tries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Stop,
    Start,
    None,
}

impl Hysteresis {
    pub fn new(max_tries: u32) -> Self {
        Hysteresis { last_status: true, tries: 0, max_tries }
    }

    /// Feeds one probe result, returning the Start/Stop decision (if
    /// any) per spec.md §4.6. Asymmetric by design: becoming active
    /// requires `max_tries` consecutive false probes; yielding happens
    /// on the very first true probe after a down streak.
    pub fn observe(&mut self, r: bool) -> Decision {
        if r == self.last_status {
            return Decision::None;
        }

        if r {
            self.last_status = true;
            self.tries = 1;
            return Decision::Stop;
        }

        self.tries += 1;
        if self.tries >= self.max_tries {
            self.last_status = false;
            self.tries = 1;
            return Decision::Start;
        }
        Decision::None
    }
}

/// Real-Server mode: dials `127.0.0.1:<port>` once per second, with
/// linger=0/nodelay/no-keepalive so the probe completes in a single RTT
/// (spec.md §4.6). Drives `worker_enabled` Start/Stop per `Hysteresis`.
pub async fn run_realserver_prober(
    port: u16,
    max_tries: u32,
    worker_enabled: watch::Sender<bool>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut hysteresis = Hysteresis::new(max_tries);

    loop {
        tokio::select! {
            _ = sleep(Duration::from_secs(1)) => {
                let alive = probe_once(port).await;
                match hysteresis.observe(alive) {
                    Decision::Stop => {
                        info!("director probe succeeded, stopping local worker");
                        let _ = worker_enabled.send(false);
                        metrics.coordinator_transitions.with_label_values(&["stop"]).inc();
                    }
                    Decision::Start => {
                        warn!("director probe failed {} times, starting local worker", max_tries);
                        let _ = worker_enabled.send(true);
                        metrics.coordinator_transitions.with_label_values(&["start"]).inc();
                    }
                    Decision::None => {
                        metrics.hazard_total.inc();
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn probe_once(port: u16) -> bool {
    match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            let _ = stream.set_linger(Some(Duration::from_secs(0)));
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_false_then_trues_never_starts() {
        let mut h = Hysteresis::new(3);
        assert_eq!(h.observe(false), Decision::None);
        // Director never confirmed down long enough; subsequent "up"
        // probes are not even a state change from the optimistic start.
        assert_eq!(h.observe(true), Decision::None);
        assert_eq!(h.observe(true), Decision::None);
    }

    #[test]
    fn max_tries_consecutive_falses_starts_exactly_once_then_stops_on_first_true() {
        let mut h = Hysteresis::new(3);
        assert_eq!(h.observe(false), Decision::None);
        assert_eq!(h.observe(false), Decision::None);
        assert_eq!(h.observe(false), Decision::Start);
        assert_eq!(h.observe(true), Decision::Stop);
    }

    #[test]
    fn repeated_same_value_never_changes_state() {
        let mut h = Hysteresis::new(3);
        assert_eq!(h.observe(true), Decision::None);
        assert_eq!(h.observe(true), Decision::None);
    }

    #[test]
    fn yields_immediately_on_first_true_after_active() {
        let mut h = Hysteresis::new(1);
        assert_eq!(h.observe(false), Decision::Start);
        assert_eq!(h.observe(true), Decision::Stop);
    }
}
