use crate::server::{Command, LocalAuthority};
use blockview_common::BlockPos;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Sweep pattern the authority's background placer follows: walk x back and
/// forth across `[-LIMIT, LIMIT]`, stepping up one layer at each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    x: i32,
    y: i32,
    increment: i32,
}

impl Sweep {
    const LIMIT: i32 = 10;

    pub fn new() -> Self {
        Self {
            x: 0,
            y: 0,
            increment: -1,
        }
    }
}

impl Default for Sweep {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Sweep {
    type Item = BlockPos;

    fn next(&mut self) -> Option<BlockPos> {
        if self.x > Self::LIMIT {
            self.y += 1;
            self.increment = -1;
        } else if self.x < -Self::LIMIT {
            self.y += 1;
            self.increment = 1;
        }
        let pos = BlockPos::new(self.x, self.y, 0);
        self.x += self.increment;
        Some(pos)
    }
}

/// Background thread that places one block per interval on the authority.
pub struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(authority: &LocalAuthority, interval: Duration) -> std::io::Result<Self> {
        let commands = authority.command_sender();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("authority-ticker".into())
            .spawn(move || {
                let mut sweep = Sweep::new();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(pos) = sweep.next() else { break };
                    tracing::trace!(%pos, "ticker placing block");
                    if commands.send(Command::Place(pos)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop placing blocks and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread with Disconnected.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
