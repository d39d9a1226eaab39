use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Outcome of asking the surface for its next image, or of presenting one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus<T> {
    Ready(T),
    /// Out of date or suboptimal: the swapchain must be rebuilt
    Stale,
}

/// GPU synchronisation the scheduler drives, one call per protocol step.
/// Implemented over the frame slots and by test doubles.
pub trait FrameSync {
    /// Block until the slot's previous submission has retired
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>>;
    /// Unsignal the slot's fence ahead of a new submission
    fn reset_slot(&mut self, slot: usize) -> Result<()>;
    /// Submit the slot's recorded commands, signalling its fence and render-finished semaphore
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>>;
    fn wait_idle(&mut self) -> Result<()>;
}

/// Cycles through `slots` frame slots. The slot index is `frame mod slots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    frame: u64,
    slots: usize,
}

impl SlotCursor {
    pub fn new(slots: usize) -> Self {
        Self { frame: 0, slots }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn slot(&self) -> usize {
        (self.frame % self.slots as u64) as usize
    }

    fn advance(&mut self) {
        self.frame += 1;
    }
}

/// A frame that owns its slot and a swapchain image until `end_frame`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameToken {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BeginFrame {
    Ready(FrameToken),
    /// The swapchain must be rebuilt; the same slot is retried next time
    Retry,
}

/// Paces frames over N slots: wait for the slot, acquire, record, submit, present.
pub struct FrameScheduler {
    cursor: SlotCursor,
    in_frame: bool,
    rebuild_requested: bool,
    shut_down: bool,
}

impl FrameScheduler {
    pub fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(eyre!("Frame scheduler needs at least one slot"));
        }
        Ok(Self {
            cursor: SlotCursor::new(slots),
            in_frame: false,
            rebuild_requested: false,
            shut_down: false,
        })
    }

    pub fn cursor(&self) -> SlotCursor {
        self.cursor
    }

    /// Waits for the current slot, then acquires an image with its semaphore. The fence is
    /// reset only once an image was acquired, so a retried slot can be waited on again.
    pub fn begin_frame(&mut self, sync: &mut impl FrameSync) -> Result<BeginFrame> {
        if self.shut_down {
            return Err(eyre!("Frame requested after shutdown"));
        }
        if self.in_frame {
            return Err(eyre!("Frame {} has not ended", self.cursor.frame()));
        }

        let slot = self.cursor.slot();
        sync.wait_for_slot(slot)?;

        let image_index = match sync.acquire_image(slot)? {
            SurfaceStatus::Ready(image_index) => image_index,
            SurfaceStatus::Stale => {
                log::warn!(
                    "Swapchain stale on acquire at frame {}, retrying slot {slot} after rebuild",
                    self.cursor.frame(),
                );
                self.rebuild_requested = true;
                return Ok(BeginFrame::Retry);
            }
        };

        sync.reset_slot(slot)?;
        self.in_frame = true;
        Ok(BeginFrame::Ready(FrameToken {
            frame: self.cursor.frame(),
            slot,
            image_index,
        }))
    }

    /// Submit and present the frame. A stale present still counts as displayed and
    /// schedules a rebuild before the next frame.
    pub fn end_frame(&mut self, sync: &mut impl FrameSync, token: FrameToken) -> Result<()> {
        if !self.in_frame || token.frame != self.cursor.frame() {
            return Err(eyre!("Frame {} ended out of order", token.frame));
        }

        sync.submit(token.slot)?;
        if sync.present(token.slot, token.image_index)? == SurfaceStatus::Stale {
            log::warn!("Swapchain stale on present at frame {}", token.frame);
            self.rebuild_requested = true;
        }

        self.in_frame = false;
        self.cursor.advance();
        Ok(())
    }

    /// Ask for a rebuild before the next frame, e.g. after a window resize
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub fn take_rebuild_request(&mut self) -> bool {
        std::mem::take(&mut self.rebuild_requested)
    }

    /// Drain every in-flight frame. Slot resources may be released once this returns.
    pub fn shutdown(&mut self, sync: &mut impl FrameSync) -> Result<()> {
        if !self.shut_down {
            sync.wait_idle()?;
            self.shut_down = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Submit(usize),
        Present(usize, u32),
        Idle,
    }

    /// Simulated GPU: a submitted slot stays busy until its fence is waited on
    struct MockSync {
        events: Vec<Event>,
        busy: Vec<bool>,
        acquires: u64,
        stale_acquires: HashSet<u64>,
        stale_presents: HashSet<u64>,
        presents: u64,
        images: u32,
    }

    impl MockSync {
        fn new(slots: usize) -> Self {
            Self {
                events: Vec::new(),
                busy: vec![false; slots],
                acquires: 0,
                stale_acquires: HashSet::new(),
                stale_presents: HashSet::new(),
                presents: 0,
                images: 3,
            }
        }
    }

    impl FrameSync for MockSync {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.busy[slot] = false;
            self.events.push(Event::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>> {
            self.events.push(Event::Acquire(slot));
            let n = self.acquires;
            self.acquires += 1;
            if self.stale_acquires.contains(&n) {
                Ok(SurfaceStatus::Stale)
            } else {
                Ok(SurfaceStatus::Ready((n % self.images as u64) as u32))
            }
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.events.push(Event::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            if self.busy[slot] {
                return Err(eyre!("Slot {slot} re-submitted while in flight"));
            }
            self.busy[slot] = true;
            self.events.push(Event::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>> {
            self.events.push(Event::Present(slot, image_index));
            let n = self.presents;
            self.presents += 1;
            if self.stale_presents.contains(&n) {
                Ok(SurfaceStatus::Stale)
            } else {
                Ok(SurfaceStatus::Ready(()))
            }
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.busy.iter_mut().for_each(|b| *b = false);
            self.events.push(Event::Idle);
            Ok(())
        }
    }

    fn run_frame(scheduler: &mut FrameScheduler, sync: &mut MockSync) -> BeginFrame {
        match scheduler.begin_frame(sync).unwrap() {
            BeginFrame::Ready(token) => {
                scheduler.end_frame(sync, token.clone()).unwrap();
                BeginFrame::Ready(token)
            }
            BeginFrame::Retry => BeginFrame::Retry,
        }
    }

    #[test]
    fn slots_cycle_round_robin() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        let slots: Vec<usize> = (0..5)
            .map(|_| match run_frame(&mut scheduler, &mut sync) {
                BeginFrame::Ready(token) => token.slot,
                BeginFrame::Retry => panic!("unexpected retry"),
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(scheduler.cursor().frame(), 5);
    }

    #[test]
    fn slot_is_never_resubmitted_before_its_fence_is_waited() {
        let mut scheduler = FrameScheduler::new(3).unwrap();
        let mut sync = MockSync::new(3);
        for _ in 0..20 {
            run_frame(&mut scheduler, &mut sync);
        }

        // Between two submits of the same slot there is always a wait on that slot
        for slot in 0..3 {
            let mut waited = true;
            for event in &sync.events {
                match event {
                    Event::Wait(s) if *s == slot => waited = true,
                    Event::Submit(s) if *s == slot => {
                        assert!(waited, "slot {slot} submitted twice without a wait");
                        waited = false;
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn fence_is_reset_only_after_a_successful_acquire() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        sync.stale_acquires.insert(0);

        assert_eq!(scheduler.begin_frame(&mut sync).unwrap(), BeginFrame::Retry);
        assert_eq!(sync.events, vec![Event::Wait(0), Event::Acquire(0)]);

        run_frame(&mut scheduler, &mut sync);
        assert_eq!(&sync.events[2..5], &[Event::Wait(0), Event::Acquire(0), Event::Reset(0)]);
    }

    #[test]
    fn out_of_date_on_frame_ten_retries_the_same_slot() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        sync.stale_acquires.insert(10);

        for _ in 0..10 {
            assert_ne!(run_frame(&mut scheduler, &mut sync), BeginFrame::Retry);
        }
        assert!(!scheduler.take_rebuild_request());

        let before = scheduler.cursor();
        assert_eq!(scheduler.begin_frame(&mut sync).unwrap(), BeginFrame::Retry);
        assert_eq!(scheduler.cursor(), before);
        assert!(scheduler.take_rebuild_request());
        assert!(!scheduler.take_rebuild_request());

        match scheduler.begin_frame(&mut sync).unwrap() {
            BeginFrame::Ready(token) => {
                assert_eq!(token.frame, 10);
                assert_eq!(token.slot, before.slot());
                scheduler.end_frame(&mut sync, token).unwrap();
            }
            BeginFrame::Retry => panic!("second acquire should succeed"),
        }
        assert_eq!(scheduler.cursor().frame(), 11);
    }

    #[test]
    fn stale_present_schedules_a_rebuild_but_advances() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        sync.stale_presents.insert(1);

        run_frame(&mut scheduler, &mut sync);
        assert!(!scheduler.take_rebuild_request());
        run_frame(&mut scheduler, &mut sync);
        assert!(scheduler.take_rebuild_request());
        assert_eq!(scheduler.cursor().frame(), 2);
    }

    #[test]
    fn frames_must_end_before_the_next_begins() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        let token = match scheduler.begin_frame(&mut sync).unwrap() {
            BeginFrame::Ready(token) => token,
            BeginFrame::Retry => panic!("unexpected retry"),
        };
        assert!(scheduler.begin_frame(&mut sync).is_err());
        scheduler.end_frame(&mut sync, token).unwrap();
        assert!(scheduler.begin_frame(&mut sync).is_ok());
    }

    #[test]
    fn shutdown_drains_once_and_refuses_new_frames() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut sync = MockSync::new(2);
        run_frame(&mut scheduler, &mut sync);

        scheduler.shutdown(&mut sync).unwrap();
        scheduler.shutdown(&mut sync).unwrap();
        assert_eq!(sync.events.iter().filter(|e| **e == Event::Idle).count(), 1);
        assert!(sync.busy.iter().all(|b| !b));
        assert!(scheduler.begin_frame(&mut sync).is_err());
    }

    #[test]
    fn zero_slots_is_rejected() {
        assert!(FrameScheduler::new(0).is_err());
    }
}
