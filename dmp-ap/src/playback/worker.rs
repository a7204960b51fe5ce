//! Control worker
//!
//! Receives render-path notifications (end of stream, gapless promotion, drain complete)
//! and runs periodic housekeeping: delayed track-start announcements, closing and
//! dropping retired streams, radio metadata polling and underrun reporting. Holds only a
//! weak reference to the player.

use super::player::Player;
use super::render::WorkerMessage;
use crate::error::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Housekeeping cadence
const TICK: Duration = Duration::from_millis(20);

/// Interval between underrun reports
const UNDERRUN_REPORT: Duration = Duration::from_secs(5);

pub(crate) fn spawn(player: Weak<Player>, rx: Receiver<WorkerMessage>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("player-control".to_string())
        .spawn(move || run(player, rx))?;
    Ok(handle)
}

fn run(player: Weak<Player>, rx: Receiver<WorkerMessage>) {
    debug!("Player control worker started");
    let mut last_report = Instant::now();
    let mut reported_underruns = 0u64;

    loop {
        let message = match rx.recv_timeout(TICK) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if message == Some(WorkerMessage::Shutdown) {
            break;
        }
        let Some(player) = player.upgrade() else {
            break;
        };

        match message {
            Some(WorkerMessage::EndOfStream(id)) => player.handle_end_of_stream(id),
            Some(WorkerMessage::Promoted { ended, started }) => player.handle_promoted(ended, started),
            Some(WorkerMessage::DrainComplete) => {
                thread::sleep(player.config().rate_change_delay());
                player.handle_drain_complete();
            }
            Some(WorkerMessage::Shutdown) | None => {}
        }

        let now = Instant::now();
        player.handle_tick(now);

        if now.duration_since(last_report) >= UNDERRUN_REPORT {
            last_report = now;
            let underruns = player.diagnostics().underruns;
            if underruns > reported_underruns {
                warn!("{} new underruns ({} total)", underruns - reported_underruns, underruns);
            }
            reported_underruns = underruns;
        }
    }
    info!("Player control worker stopped");
}
