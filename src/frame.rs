// Frame synchronization engine
//
// Drives one tick of wait -> acquire -> write uniforms -> reset fence ->
// submit -> present for the current frame slot, then advances the slot modulo
// the slot count. The GPU side sits behind `FrameTarget` so the ordering can
// be exercised without a device.

use anyhow::Result;

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::uniforms::UniformBlock;

/// GPU operations the engine sequences. Each call is about one frame slot.
pub trait FrameTarget {
    /// Block until the slot's previous submission has retired
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn write_uniforms(&mut self, slot: usize, block: &UniformBlock) -> Result<()>;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    /// Idle the device and rebuild every per-generation object
    fn rebuild_surface(&mut self) -> Result<RebuildOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The surface has zero area; the old generation is gone and nothing
    /// can be drawn until a later rebuild succeeds
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// Presented, then the surface was rebuilt
    PresentedStale { image_index: u32, surface: RebuildOutcome },
    /// Acquire was stale; nothing submitted, surface rebuilt
    Skipped { surface: RebuildOutcome },
}

impl FrameOutcome {
    pub fn presented(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }

    /// A rebuild had to wait for a non-zero surface size
    pub fn surface_deferred(&self) -> bool {
        matches!(
            self,
            Self::Skipped { surface: RebuildOutcome::Deferred }
                | Self::PresentedStale { surface: RebuildOutcome::Deferred, .. }
        )
    }
}

pub struct FrameSyncEngine {
    frames_in_flight: usize,
    current_slot: usize,
    frame_number: u64,
}

impl FrameSyncEngine {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_slot: 0,
            frame_number: 0,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Frames presented so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn tick<T: FrameTarget>(&mut self, target: &mut T, block: &UniformBlock) -> Result<FrameOutcome> {
        let slot = self.current_slot;

        target.wait_for_slot(slot)?;

        let image_index = match target.acquire_image(slot)? {
            AcquireOutcome::Ready { image_index } => image_index,
            AcquireOutcome::Stale { .. } => {
                // Fence is still signaled, so the slot can be retried as is
                log::debug!("Stale acquire on slot {}, rebuilding surface", slot);
                let surface = target.rebuild_surface()?;
                return Ok(FrameOutcome::Skipped { surface });
            }
        };

        // The fence wait above gives this slot's uniforms exclusive access
        target.write_uniforms(slot, block)?;

        target.reset_slot_fence(slot)?;
        target.submit(slot, image_index)?;
        let presented = target.present(slot, image_index)?;

        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
        self.frame_number += 1;

        match presented {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented { image_index }),
            PresentOutcome::Stale => {
                log::debug!("Stale present of image {}, rebuilding surface", image_index);
                let surface = target.rebuild_surface()?;
                Ok(FrameOutcome::PresentedStale { image_index, surface })
            }
        }
    }
}

/// A reconstruction the app should perform now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildRequest {
    pub width: u32,
    pub height: u32,
    pub reload_shaders: bool,
}

/// Tracks window size changes and holds back reconstruction while the
/// surface has zero area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeState {
    width: u32,
    height: u32,
    pending: bool,
    reload_shaders: bool,
}

impl ResizeState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pending: false,
            reload_shaders: false,
        }
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.pending = true;
        }
    }

    /// Rebuild on the next opportunity regardless of size changes
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// Rebuild with freshly loaded shaders. Survives until a rebuild is
    /// actually handed out.
    pub fn request_reload(&mut self) {
        self.pending = true;
        self.reload_shaders = true;
    }

    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The rebuild to perform, once a non-zero size is known
    pub fn take_rebuild(&mut self) -> Option<RebuildRequest> {
        if !self.pending || self.is_minimized() {
            return None;
        }
        self.pending = false;
        Some(RebuildRequest {
            width: self.width,
            height: self.height,
            reload_shaders: std::mem::take(&mut self.reload_shaders),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Write(usize),
        Reset(usize),
        Submit(usize, u32),
        Present(usize, u32),
        Rebuild,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        rebuilds: VecDeque<RebuildOutcome>,
        next_image: u32,
        images: u32,
        /// Image count of the surface produced by the next successful rebuild
        rebuilt_images: Option<u32>,
    }

    impl Recorder {
        fn with_images(images: u32) -> Self {
            Self {
                images,
                ..Default::default()
            }
        }
    }

    impl FrameTarget for Recorder {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.images;
                AcquireOutcome::Ready { image_index }
            }))
        }

        fn write_uniforms(&mut self, slot: usize, _block: &UniformBlock) -> Result<()> {
            self.calls.push(Call::Write(slot));
            Ok(())
        }

        fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild_surface(&mut self) -> Result<RebuildOutcome> {
            self.calls.push(Call::Rebuild);
            let outcome = self.rebuilds.pop_front().unwrap_or(RebuildOutcome::Rebuilt);
            if outcome == RebuildOutcome::Rebuilt {
                if let Some(images) = self.rebuilt_images.take() {
                    self.images = images;
                }
                self.next_image = 0;
            }
            Ok(outcome)
        }
    }

    #[test]
    fn tick_runs_steps_in_order() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);

        let outcome = engine.tick(&mut target, &UniformBlock::default()).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(
            target.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Write(0),
                Call::Reset(0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn slots_rotate_modulo_frames_in_flight_not_images() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);

        for _ in 0..6 {
            engine.tick(&mut target, &UniformBlock::default()).unwrap();
        }

        let submits: Vec<_> = target
            .calls
            .iter()
            .filter_map(|c| match *c {
                Call::Submit(slot, image) => Some((slot, image)),
                _ => None,
            })
            .collect();
        assert_eq!(
            submits,
            vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2)]
        );
        assert_eq!(engine.frame_number(), 6);
    }

    #[test]
    fn every_uniform_write_follows_that_slots_wait() {
        let mut engine = FrameSyncEngine::new(3);
        let mut target = Recorder::with_images(2);

        for _ in 0..7 {
            engine.tick(&mut target, &UniformBlock::default()).unwrap();
        }

        let mut last_wait = None;
        for call in &target.calls {
            match *call {
                Call::Wait(slot) => last_wait = Some(slot),
                Call::Write(slot) => assert_eq!(last_wait, Some(slot)),
                _ => {}
            }
        }
    }

    #[test]
    fn stale_acquire_rebuilds_without_submitting() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);
        target
            .acquires
            .push_back(AcquireOutcome::Stale { semaphore_signaled: true });

        let outcome = engine.tick(&mut target, &UniformBlock::default()).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped { surface: RebuildOutcome::Rebuilt });
        assert!(!outcome.presented());
        assert_eq!(target.calls, vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild]);
        // Same slot is retried next tick
        assert_eq!(engine.current_slot(), 0);
        assert_eq!(engine.frame_number(), 0);
    }

    #[test]
    fn stale_present_rebuilds_after_presenting() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);
        target.presents.push_back(PresentOutcome::Stale);

        let outcome = engine.tick(&mut target, &UniformBlock::default()).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::PresentedStale {
                image_index: 0,
                surface: RebuildOutcome::Rebuilt
            }
        );
        assert!(outcome.presented());
        assert_eq!(target.calls.last(), Some(&Call::Rebuild));
        assert_eq!(engine.current_slot(), 1);
    }

    fn submits(calls: &[Call]) -> Vec<(usize, u32)> {
        calls
            .iter()
            .filter_map(|c| match *c {
                Call::Submit(slot, image) => Some((slot, image)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ticks_continue_on_the_rebuilt_surface() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);
        target.presents.extend([PresentOutcome::Presented, PresentOutcome::Stale]);
        target.rebuilt_images = Some(4);

        for _ in 0..7 {
            engine.tick(&mut target, &UniformBlock::default()).unwrap();
        }

        let rebuild_at = target.calls.iter().position(|c| *c == Call::Rebuild).unwrap();
        assert_eq!(submits(&target.calls[..rebuild_at]), vec![(0, 0), (1, 1)]);
        // Slots keep rotating modulo F while images now cycle through all four
        assert_eq!(
            submits(&target.calls[rebuild_at..]),
            vec![(0, 0), (1, 1), (0, 2), (1, 3), (0, 0)]
        );
        assert_eq!(target.calls.iter().filter(|c| **c == Call::Rebuild).count(), 1);
        assert_eq!(engine.frame_number(), 7);
    }

    #[test]
    fn zero_area_rebuild_is_reported_as_deferred() {
        let mut engine = FrameSyncEngine::new(2);
        let mut target = Recorder::with_images(3);
        target
            .acquires
            .push_back(AcquireOutcome::Stale { semaphore_signaled: false });
        target.rebuilds.push_back(RebuildOutcome::Deferred);

        let outcome = engine.tick(&mut target, &UniformBlock::default()).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped { surface: RebuildOutcome::Deferred });
        assert!(outcome.surface_deferred());
        assert_eq!(engine.current_slot(), 0);

        let presented = engine.tick(&mut target, &UniformBlock::default()).unwrap();
        assert!(!presented.surface_deferred());
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let engine = FrameSyncEngine::new(0);
        assert_eq!(engine.frames_in_flight(), 1);
    }

    fn rebuild(width: u32, height: u32, reload_shaders: bool) -> RebuildRequest {
        RebuildRequest {
            width,
            height,
            reload_shaders,
        }
    }

    #[test]
    fn minimized_window_defers_rebuild() {
        let mut resize = ResizeState::new(800, 600);
        resize.on_resize(0, 0);
        assert!(resize.is_minimized());
        assert_eq!(resize.take_rebuild(), None);

        resize.on_resize(1024, 768);
        assert_eq!(resize.take_rebuild(), Some(rebuild(1024, 768, false)));
        assert_eq!(resize.take_rebuild(), None);
    }

    #[test]
    fn zero_width_alone_counts_as_minimized() {
        let mut resize = ResizeState::new(800, 600);
        resize.on_resize(0, 600);
        assert_eq!(resize.take_rebuild(), None);
    }

    #[test]
    fn unchanged_size_needs_no_rebuild() {
        let mut resize = ResizeState::new(800, 600);
        resize.on_resize(800, 600);
        assert_eq!(resize.take_rebuild(), None);
    }

    #[test]
    fn explicit_request_waits_for_non_zero_size() {
        let mut resize = ResizeState::new(0, 0);
        resize.request();
        assert_eq!(resize.take_rebuild(), None);
        resize.on_resize(640, 480);
        assert_eq!(resize.take_rebuild(), Some(rebuild(640, 480, false)));
    }

    #[test]
    fn shader_reload_survives_a_minimized_window() {
        let mut resize = ResizeState::new(800, 600);
        resize.on_resize(0, 0);
        resize.request_reload();
        assert_eq!(resize.take_rebuild(), None);

        resize.on_resize(800, 600);
        assert_eq!(resize.take_rebuild(), Some(rebuild(800, 600, true)));

        // Consumed by that rebuild
        resize.request();
        assert_eq!(resize.take_rebuild(), Some(rebuild(800, 600, false)));
    }
}
