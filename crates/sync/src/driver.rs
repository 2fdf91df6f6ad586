use crate::viewer::{Viewer, ViewerError};
use blockview_kernel::FrameStats;
use blockview_render::RenderSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Stops a running [`FrameDriver`] from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Totals for one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverReport {
    pub frames: u64,
    pub updates: u64,
}

/// Calls [`Viewer::frame`] at a fixed refresh rate with monotonic
/// millisecond timestamps, standing in for a display refresh callback.
///
/// Runs until stopped, until `max_frames` is reached, or until a frame
/// fails. A failed frame is not retried.
#[derive(Debug)]
pub struct FrameDriver {
    interval: Duration,
    max_frames: Option<u64>,
    stop: StopHandle,
}

impl FrameDriver {
    /// A non-positive `refresh_hz` falls back to 60 Hz.
    pub fn new(refresh_hz: f64) -> Self {
        let interval = Duration::try_from_secs_f64(1.0 / refresh_hz)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| {
                tracing::warn!(refresh_hz, "invalid refresh rate, using 60 Hz");
                Duration::from_secs_f64(1.0 / 60.0)
            });
        Self {
            interval,
            max_frames: None,
            stop: StopHandle::default(),
        }
    }

    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn run<R, F>(&self, viewer: &mut Viewer<R>, mut on_frame: F) -> Result<DriverReport, ViewerError>
    where
        R: RenderSink,
        F: FnMut(u64, &FrameStats, &Viewer<R>),
    {
        let _span = tracing::info_span!("frame_driver").entered();
        let origin = Instant::now();
        let mut next = origin;
        let mut report = DriverReport::default();

        while !self.stop.is_stopped() && self.max_frames.is_none_or(|max| report.frames < max) {
            let now_ms = origin.elapsed().as_secs_f64() * 1000.0;
            let stats = match viewer.frame(now_ms) {
                Ok(stats) => stats,
                Err(err) => {
                    tracing::error!(%err, frames = report.frames, "frame failed, driver stopping");
                    return Err(err);
                }
            };
            report.frames += 1;
            report.updates += u64::from(stats.updates);
            on_frame(report.frames, &stats, viewer);

            next += self.interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Fell behind; resume from now rather than bursting.
                next = now;
            }
        }

        tracing::debug!(frames = report.frames, updates = report.updates, "frame driver stopped");
        Ok(report)
    }
}
