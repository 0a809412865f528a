//! Render bridge
//!
//! A dedicated render thread that draws frames into the video encoder's
//! input surface whenever the encoder accepts a frame.

use crate::codec::InputSurface;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;

/// Column-major 4x4 texture transform
pub type Transform = [f32; 16];

pub const IDENTITY: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Produces frame pixels on the render thread
pub trait FrameRenderer: Send {
    /// A new target surface was adopted.
    fn prepare(&mut self) -> RecorderResult<()> {
        Ok(())
    }

    fn render(&mut self, transform: &Transform) -> RecorderResult<Vec<u8>>;

    fn release(&mut self) {}
}

struct BridgeState {
    target: Option<Arc<dyn InputSurface>>,
    pending_target: Option<Arc<dyn InputSurface>>,
    clear_requested: bool,
    pending_draws: u32,
    transform: Transform,
    release_requested: bool,
    released: bool,
}

struct BridgeShared {
    state: Mutex<BridgeState>,
    cond: Condvar,
    epoch: Instant,
    frames_rendered: AtomicU64,
}

/// Handle to the render thread
pub struct FrameBridge {
    shared: Arc<BridgeShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrameBridge {
    /// Start the render thread. Returns once it is running.
    pub fn spawn(name: &str, renderer: Box<dyn FrameRenderer>) -> RecorderResult<Self> {
        let shared = Arc::new(BridgeShared {
            state: Mutex::new(BridgeState {
                target: None,
                pending_target: None,
                clear_requested: false,
                pending_draws: 0,
                transform: IDENTITY,
                release_requested: false,
                released: false,
            }),
            cond: Condvar::new(),
            epoch: Instant::now(),
            frames_rendered: AtomicU64::new(0),
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || render_loop(thread_shared, renderer, ready_tx))?;
        ready_rx
            .blocking_recv()
            .map_err(|_| RecorderError::Render("render thread exited early".into()))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Switch rendering to `surface`. Blocks until the render thread adopted it.
    pub fn set_target(&self, surface: Arc<dyn InputSurface>) -> RecorderResult<()> {
        let mut state = self.shared.state.lock();
        if state.release_requested {
            return Err(RecorderError::Render("render bridge already released".into()));
        }
        state.pending_target = Some(surface);
        self.shared.cond.notify_all();
        while state.pending_target.is_some() && !state.released {
            self.shared.cond.wait(&mut state);
        }
        Ok(())
    }

    /// Drop the current target and any queued draws. Blocks until the render
    /// thread no longer touches the old surface; the bridge stays usable.
    pub fn clear_target(&self) {
        let mut state = self.shared.state.lock();
        if state.release_requested {
            return;
        }
        state.pending_target = None;
        state.clear_requested = true;
        self.shared.cond.notify_all();
        while state.clear_requested && !state.released {
            self.shared.cond.wait(&mut state);
        }
    }

    /// Queue one frame. `None` keeps the last transform.
    pub fn draw(&self, transform: Option<&Transform>) {
        let mut state = self.shared.state.lock();
        if state.release_requested {
            return;
        }
        if let Some(transform) = transform {
            state.transform = *transform;
        }
        state.pending_draws += 1;
        self.shared.cond.notify_all();
    }

    pub fn has_target(&self) -> bool {
        self.shared.state.lock().target.is_some()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    /// Stop the render thread and drop the target surface. Idempotent.
    pub fn release(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.release_requested {
                return;
            }
            state.release_requested = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("render thread panicked");
            }
        }
    }
}

impl Drop for FrameBridge {
    fn drop(&mut self) {
        self.release();
    }
}

fn render_loop(
    shared: Arc<BridgeShared>,
    mut renderer: Box<dyn FrameRenderer>,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    tracing::debug!("render thread started");

    loop {
        let (surface, transform) = {
            let mut state = shared.state.lock();
            loop {
                if state.release_requested {
                    break;
                }
                if state.clear_requested {
                    state.target = None;
                    state.pending_draws = 0;
                    state.clear_requested = false;
                    shared.cond.notify_all();
                    continue;
                }
                if let Some(surface) = state.pending_target.take() {
                    if let Err(e) = renderer.prepare() {
                        tracing::error!("renderer failed to adopt surface: {}", e);
                    }
                    state.target = Some(surface);
                    shared.cond.notify_all();
                    continue;
                }
                if state.pending_draws > 0 {
                    state.pending_draws -= 1;
                    break;
                }
                shared.cond.wait(&mut state);
            }
            if state.release_requested {
                break;
            }
            (state.target.clone(), state.transform)
        };

        let Some(surface) = surface else {
            continue;
        };
        match renderer.render(&transform) {
            Ok(pixels) => {
                let pts = shared.epoch.elapsed().as_micros() as i64;
                match surface.submit_frame(&pixels, pts) {
                    Ok(()) => {
                        shared.frames_rendered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!("failed to submit frame: {}", e),
                }
            }
            Err(e) => tracing::warn!("failed to render frame: {}", e),
        }
    }

    renderer.release();
    let mut state = shared.state.lock();
    state.target = None;
    state.pending_target = None;
    state.clear_requested = false;
    state.released = true;
    shared.cond.notify_all();
    tracing::debug!("render thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct RecordingSurface {
        frames: Mutex<Vec<usize>>,
    }

    impl InputSurface for RecordingSurface {
        fn submit_frame(&self, pixels: &[u8], _presentation_time_us: i64) -> RecorderResult<()> {
            self.frames.lock().push(pixels.len());
            Ok(())
        }

        fn release(&self) {}
    }

    struct SolidRenderer;

    impl FrameRenderer for SolidRenderer {
        fn render(&mut self, transform: &Transform) -> RecorderResult<Vec<u8>> {
            Ok(vec![transform[0] as u8; 16])
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_draw_without_target_renders_nothing() {
        let bridge = FrameBridge::spawn("render-test", Box::new(SolidRenderer)).unwrap();
        bridge.draw(None);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(bridge.frames_rendered(), 0);
        bridge.release();
    }

    #[test]
    fn test_draw_submits_to_target() {
        let bridge = FrameBridge::spawn("render-test", Box::new(SolidRenderer)).unwrap();
        let surface = Arc::new(RecordingSurface {
            frames: Mutex::new(Vec::new()),
        });
        bridge.set_target(surface.clone()).unwrap();
        assert!(bridge.has_target());

        bridge.draw(Some(&IDENTITY));
        bridge.draw(None);

        assert!(wait_for(|| bridge.frames_rendered() == 2));
        assert_eq!(surface.frames.lock().as_slice(), &[16, 16]);
        bridge.release();
        assert!(!bridge.has_target());
    }

    #[test]
    fn test_clear_target_keeps_bridge_usable() {
        let bridge = FrameBridge::spawn("render-test", Box::new(SolidRenderer)).unwrap();
        let first = Arc::new(RecordingSurface {
            frames: Mutex::new(Vec::new()),
        });
        bridge.set_target(first.clone()).unwrap();
        bridge.clear_target();
        assert!(!bridge.has_target());

        bridge.draw(None);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(bridge.frames_rendered(), 0);
        assert!(first.frames.lock().is_empty());

        let second = Arc::new(RecordingSurface {
            frames: Mutex::new(Vec::new()),
        });
        bridge.set_target(second.clone()).unwrap();
        bridge.draw(None);
        assert!(wait_for(|| bridge.frames_rendered() == 1));
        assert!(first.frames.lock().is_empty());
        assert_eq!(second.frames.lock().len(), 1);
        bridge.release();
    }

    #[test]
    fn test_release_is_idempotent() {
        let bridge = FrameBridge::spawn("render-test", Box::new(SolidRenderer)).unwrap();
        bridge.release();
        bridge.release();
        bridge.draw(None);
        assert!(bridge.set_target(Arc::new(RecordingSurface {
            frames: Mutex::new(Vec::new()),
        }))
        .is_err());
    }
}
