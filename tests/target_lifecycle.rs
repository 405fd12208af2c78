use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glade_renderer::frame::Effects;
use glade_renderer::targets::{FrameTargets, ResizeOutcome, TargetDesc, TargetError, TargetFactory, TargetSlot};

struct Tracked {
    desc: TargetDesc,
    live: Rc<Cell<usize>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
struct TrackingFactory {
    live: Rc<Cell<usize>>,
    created: Cell<usize>,
    failing: RefCell<Vec<TargetSlot>>,
}

impl TargetFactory for TrackingFactory {
    type Target = Tracked;

    fn create(&self, desc: &TargetDesc) -> Result<Tracked, TargetError> {
        if self.failing.borrow().contains(&desc.slot) {
            return Err(TargetError::Allocation { slot: desc.slot, message: "out of memory".into() });
        }
        self.live.set(self.live.get() + 1);
        self.created.set(self.created.get() + 1);
        Ok(Tracked { desc: *desc, live: self.live.clone() })
    }
}

#[test]
fn repeated_resizes_do_not_leak_targets() {
    let factory = TrackingFactory::default();
    let mut targets = FrameTargets::new(800, 600, 1024);
    targets.ensure(&factory).expect("initial targets");
    let baseline = factory.live.get();
    assert_eq!(baseline, TargetSlot::ALL.len());

    for (w, h) in [(1024, 768), (640, 480), (1920, 1080), (1920, 1080), (800, 600)] {
        targets.resize(&factory, w, h).expect("resize");
        assert_eq!(factory.live.get(), baseline);
        assert_eq!(targets.live_count(), baseline);
    }
    let depth = targets.get(TargetSlot::SceneDepth).expect("depth target");
    assert_eq!((depth.desc.width, depth.desc.height), (800, 600));
    let shadow = targets.get(TargetSlot::ShadowMap).expect("shadow map");
    assert_eq!((shadow.desc.width, shadow.desc.height), (1024, 1024));
}

#[test]
fn same_size_resize_is_a_no_op() {
    let factory = TrackingFactory::default();
    let mut targets = FrameTargets::new(320, 240, 512);
    targets.ensure(&factory).expect("initial targets");
    let created = factory.created.get();

    assert_eq!(targets.resize(&factory, 320, 240).expect("resize"), ResizeOutcome::Unchanged);
    assert_eq!(factory.created.get(), created);
}

#[test]
fn minimized_window_defers_until_restored() {
    let factory = TrackingFactory::default();
    let mut targets = FrameTargets::new(320, 240, 512);
    targets.ensure(&factory).expect("initial targets");

    assert_eq!(targets.resize(&factory, 0, 0).expect("resize"), ResizeOutcome::Deferred);
    assert_eq!(targets.resize(&factory, 320, 0).expect("resize"), ResizeOutcome::Deferred);
    assert!(targets.is_deferred());
    assert_eq!(targets.size(), (320, 240));

    assert_eq!(targets.resize(&factory, 640, 480).expect("resize"), ResizeOutcome::Recreated);
    assert!(!targets.is_deferred());
    assert_eq!(factory.live.get(), TargetSlot::ALL.len());
}

#[test]
fn occlusion_failure_disables_ssao_and_releases_its_targets() {
    let factory = TrackingFactory::default();
    factory.failing.borrow_mut().push(TargetSlot::Occlusion);
    let mut targets = FrameTargets::new(320, 240, 512);
    targets.ensure(&factory).expect("core targets still succeed");

    assert_eq!(targets.available(), Effects::SHADOWS);
    for slot in [TargetSlot::PrepassColor, TargetSlot::ViewPositions, TargetSlot::Occlusion, TargetSlot::BlurScratch] {
        assert!(targets.get(slot).is_none(), "{slot:?} should be released");
    }
    assert!(targets.get(TargetSlot::SceneDepth).is_some());
    assert!(targets.get(TargetSlot::ShadowMap).is_some());
    assert_eq!(factory.live.get(), targets.live_count());

    factory.failing.borrow_mut().clear();
    targets.resize(&factory, 400, 300).expect("resize");
    assert_eq!(targets.available(), Effects::SHADOWS);
}

#[test]
fn depth_failure_is_reported() {
    let factory = TrackingFactory::default();
    factory.failing.borrow_mut().push(TargetSlot::SceneDepth);
    let mut targets = FrameTargets::new(320, 240, 512);
    let err = targets.ensure(&factory).expect_err("depth is required");
    assert_eq!(err.slot(), TargetSlot::SceneDepth);
}

#[test]
fn failed_depth_resize_is_not_reported_as_deferred() {
    let factory = TrackingFactory::default();
    let mut targets = FrameTargets::new(320, 240, 512);
    targets.ensure(&factory).expect("initial targets");

    factory.failing.borrow_mut().push(TargetSlot::SceneDepth);
    assert_eq!(targets.resize_outcome(&factory, 640, 480), ResizeOutcome::Failed);
    assert!(!targets.is_deferred());
    assert!(targets.get(TargetSlot::SceneDepth).is_none());

    factory.failing.borrow_mut().clear();
    assert_eq!(targets.resize_outcome(&factory, 640, 480), ResizeOutcome::Recreated);
    assert!(targets.get(TargetSlot::SceneDepth).is_some());
    assert_eq!(factory.live.get(), targets.live_count());
}
