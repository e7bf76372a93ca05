// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing: a ring of in-flight slots over the swapchain images.
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::trace;

/// Number of frames the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Stage of the frame currently being drawn. Back to `Idle` whenever
/// `draw_frame` returns, error or not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    OutOfDate,
    Suboptimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and presented; the swapchain is still current.
    Presented,
    /// Submitted and presented, but the swapchain must be rebuilt.
    PresentedStale,
    /// The swapchain was out of date at acquire; nothing was submitted.
    SkippedOutOfDate,
}

impl FrameOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, FrameOutcome::Presented)
    }
}

/// The GPU operations one frame is made of. Every call may block.
pub trait FrameBackend {
    type Slot;

    fn wait_fence(&mut self, slot: &Self::Slot) -> Result<()>;
    fn reset_fence(&mut self, slot: &Self::Slot) -> Result<()>;
    fn acquire(&mut self, slot: &Self::Slot) -> Result<AcquireOutcome>;
    fn update_uniforms(&mut self, image: u32, elapsed: f32) -> Result<()>;
    fn submit(&mut self, slot: &Self::Slot, image: u32) -> Result<()>;
    fn present(&mut self, slot: &Self::Slot, image: u32) -> Result<PresentOutcome>;
}

/// Owns the in-flight slots and remembers which slot last used each
/// swapchain image.
pub struct FrameScheduler<S> {
    slots: Vec<S>,
    images_in_flight: Vec<Option<usize>>,
    frame_counter: u64,
    clock_start: Instant,
    state: FrameState,
}

impl<S> FrameScheduler<S> {
    pub fn new(slots: Vec<S>, image_count: usize) -> Self {
        Self {
            slots,
            images_in_flight: vec![None; image_count],
            frame_counter: 0,
            clock_start: Instant::now(),
            state: FrameState::Idle,
        }
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    /// Forget image ownership; the new swapchain's images have never been
    /// submitted.
    pub fn on_swapchain_recreated(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    pub fn draw_frame<B>(&mut self, backend: &mut B) -> Result<FrameOutcome>
    where
        B: FrameBackend<Slot = S>,
    {
        let result = self.run_frame(backend);
        let stage = std::mem::replace(&mut self.state, FrameState::Idle);
        result.with_context(|| format!("frame {} failed while {stage:?}", self.frame_counter))
    }

    fn run_frame<B>(&mut self, backend: &mut B) -> Result<FrameOutcome>
    where
        B: FrameBackend<Slot = S>,
    {
        let current = self.current_slot();
        let slot = &self.slots[current];

        self.state = FrameState::Acquiring;
        backend.wait_fence(slot)?;
        let image = match backend.acquire(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => {
                if suboptimal {
                    trace!("acquired image {image} from a suboptimal swapchain");
                }
                image
            }
            AcquireOutcome::OutOfDate => return Ok(FrameOutcome::SkippedOutOfDate),
        };

        let idx = image as usize;
        if idx >= self.images_in_flight.len() {
            self.images_in_flight.resize(idx + 1, None);
        }
        if let Some(owner) = self.images_in_flight[idx] {
            backend.wait_fence(&self.slots[owner])?;
        }
        self.images_in_flight[idx] = Some(current);

        self.state = FrameState::Recording;
        backend.update_uniforms(image, self.clock_start.elapsed().as_secs_f32())?;

        self.state = FrameState::Submitting;
        backend.reset_fence(slot)?;
        backend.submit(slot, image)?;

        self.state = FrameState::Presenting;
        let presented = backend.present(slot, image)?;
        self.frame_counter += 1;

        Ok(match presented {
            PresentOutcome::Presented => FrameOutcome::Presented,
            PresentOutcome::OutOfDate | PresentOutcome::Suboptimal => FrameOutcome::PresentedStale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Fence {
        Signaled,
        Reset,
        Pending(u64),
    }

    /// Fake GPU: submitted work completes only when someone waits on it.
    struct MockGpu {
        fences: Vec<Fence>,
        images: Vec<u32>,
        acquires: usize,
        submitted: u64,
        blocked_on: Vec<u64>,
        max_pending: usize,
        out_of_date_at: Option<usize>,
        present_result: PresentOutcome,
        uniform_updates: Vec<u32>,
        fail_submit: bool,
    }

    impl MockGpu {
        fn new(images: Vec<u32>) -> Self {
            Self {
                fences: vec![Fence::Signaled; MAX_FRAMES_IN_FLIGHT],
                images,
                acquires: 0,
                submitted: 0,
                blocked_on: Vec::new(),
                max_pending: 0,
                out_of_date_at: None,
                present_result: PresentOutcome::Presented,
                uniform_updates: Vec::new(),
                fail_submit: false,
            }
        }

        fn pending(&self) -> usize {
            self.fences
                .iter()
                .filter(|f| matches!(f, Fence::Pending(_)))
                .count()
        }
    }

    impl FrameBackend for MockGpu {
        type Slot = usize;

        fn wait_fence(&mut self, slot: &usize) -> Result<()> {
            match self.fences[*slot] {
                Fence::Signaled => {}
                Fence::Reset => panic!("wait on a reset fence would never return"),
                Fence::Pending(frame) => {
                    self.blocked_on.push(frame);
                    self.fences[*slot] = Fence::Signaled;
                }
            }
            Ok(())
        }

        fn reset_fence(&mut self, slot: &usize) -> Result<()> {
            assert_eq!(self.fences[*slot], Fence::Signaled, "reset of a busy fence");
            self.fences[*slot] = Fence::Reset;
            Ok(())
        }

        fn acquire(&mut self, _slot: &usize) -> Result<AcquireOutcome> {
            let n = self.acquires;
            self.acquires += 1;
            if self.out_of_date_at == Some(n) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            Ok(AcquireOutcome::Acquired {
                image: self.images[n % self.images.len()],
                suboptimal: false,
            })
        }

        fn update_uniforms(&mut self, image: u32, elapsed: f32) -> Result<()> {
            assert!(elapsed >= 0.0);
            self.uniform_updates.push(image);
            Ok(())
        }

        fn submit(&mut self, slot: &usize, _image: u32) -> Result<()> {
            assert_eq!(self.fences[*slot], Fence::Reset, "submit without reset");
            if self.fail_submit {
                anyhow::bail!("queue submit: device lost");
            }
            self.fences[*slot] = Fence::Pending(self.submitted);
            self.submitted += 1;
            self.max_pending = self.max_pending.max(self.pending());
            Ok(())
        }

        fn present(&mut self, _slot: &usize, _image: u32) -> Result<PresentOutcome> {
            Ok(self.present_result)
        }
    }

    fn scheduler(images: usize) -> FrameScheduler<usize> {
        FrameScheduler::new((0..MAX_FRAMES_IN_FLIGHT).collect(), images)
    }

    #[test]
    fn never_more_than_two_frames_in_flight() {
        let mut gpu = MockGpu::new(vec![0, 1, 2]);
        let mut sched = scheduler(3);
        for _ in 0..50 {
            assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
            assert!(gpu.pending() <= MAX_FRAMES_IN_FLIGHT);
            assert_eq!(sched.state(), FrameState::Idle);
        }
        assert_eq!(gpu.max_pending, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(sched.frame_counter(), 50);
    }

    #[test]
    fn frame_k_plus_two_waits_for_frame_k() {
        let mut gpu = MockGpu::new(vec![0, 1]);
        let mut sched = scheduler(2);
        for k in 0..10u64 {
            let before = gpu.blocked_on.len();
            sched.draw_frame(&mut gpu).unwrap();
            let waited: Vec<u64> = gpu.blocked_on[before..].to_vec();
            if k < 2 {
                assert!(waited.is_empty(), "frame {k} blocked on {waited:?}");
            } else {
                assert_eq!(waited, vec![k - 2]);
            }
        }
    }

    #[test]
    fn image_owned_by_other_slot_forces_extra_wait() {
        let mut gpu = MockGpu::new(vec![0, 1, 1]);
        let mut sched = scheduler(3);
        sched.draw_frame(&mut gpu).unwrap();
        sched.draw_frame(&mut gpu).unwrap();
        assert!(gpu.blocked_on.is_empty());
        // slot 0 waits for frame 0, image 1 still belongs to frame 1
        sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(gpu.blocked_on, vec![0, 1]);
    }

    #[test]
    fn out_of_date_acquire_submits_nothing() {
        let mut gpu = MockGpu::new(vec![0, 1, 2]);
        gpu.out_of_date_at = Some(1);
        let mut sched = scheduler(3);
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        let outcome = sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(outcome, FrameOutcome::SkippedOutOfDate);
        assert!(outcome.needs_recreate());
        assert_eq!(gpu.submitted, 1);
        assert_eq!(gpu.uniform_updates.len(), 1);
        assert_eq!(sched.frame_counter(), 1);
        // the slot fence stayed signaled, so the next frame does not hang
        sched.on_swapchain_recreated(3);
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        assert_eq!(gpu.submitted, 2);
    }

    #[test]
    fn stale_present_still_advances() {
        let mut gpu = MockGpu::new(vec![0, 1, 2]);
        gpu.present_result = PresentOutcome::Suboptimal;
        let mut sched = scheduler(3);
        let outcome = sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentedStale);
        assert!(outcome.needs_recreate());
        assert_eq!(sched.frame_counter(), 1);
        assert_eq!(sched.current_slot(), 1);

        gpu.present_result = PresentOutcome::OutOfDate;
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::PresentedStale);
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn failed_submit_returns_to_idle_without_advancing() {
        let mut gpu = MockGpu::new(vec![0, 1, 2]);
        let mut sched = scheduler(3);
        sched.draw_frame(&mut gpu).unwrap();

        gpu.fail_submit = true;
        let err = sched.draw_frame(&mut gpu).unwrap_err();
        assert_eq!(err.to_string(), "frame 1 failed while Submitting");
        assert!(format!("{err:#}").contains("device lost"));
        assert_eq!(sched.state(), FrameState::Idle);
        assert_eq!(sched.frame_counter(), 1);
        assert_eq!(sched.current_slot(), 1);
        assert_eq!(gpu.submitted, 1);
    }

    #[test]
    fn out_of_date_acquire_leaves_scheduler_idle() {
        let mut gpu = MockGpu::new(vec![0, 1]);
        gpu.out_of_date_at = Some(0);
        let mut sched = scheduler(2);
        assert_eq!(sched.draw_frame(&mut gpu).unwrap(), FrameOutcome::SkippedOutOfDate);
        assert_eq!(sched.state(), FrameState::Idle);
    }
}
