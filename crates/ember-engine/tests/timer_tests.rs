//! Timer behaviour under a virtual clock: drift, cancellation, stop

use ember_engine::{Clock, EventLoop, LoopOptions, ManualClock, SchedulerError};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn virtual_loop() -> (EventLoop, ManualClock) {
    let clock = ManualClock::new();
    let event_loop =
        EventLoop::with_options(LoopOptions::default().worker_count(1).clock(clock.clone()))
            .unwrap();
    (event_loop, clock)
}

fn millis_since(start: Instant, now: Instant) -> u128 {
    (now - start).as_millis()
}

#[test]
fn test_repeating_timer_drifts_instead_of_bursting() {
    let (mut event_loop, clock) = virtual_loop();
    let start = clock.now();
    let fires = Rc::new(RefCell::new(Vec::new()));

    let f = fires.clone();
    let c = clock.clone();
    event_loop
        .set_interval(Duration::from_millis(100), move |scope| {
            f.borrow_mut().push(millis_since(start, scope.now()));
            if f.borrow().len() == 1 {
                // Callback takes 250 ms
                c.advance(Duration::from_millis(250));
            } else if let Some(me) = scope.current_handle() {
                assert!(scope.cancel(me));
            }
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(*fires.borrow(), vec![100, 350]);
    assert_eq!(event_loop.stats().timers_fired, 2);
}

#[test]
fn test_interval_keeps_firing_until_cancelled() {
    let (mut event_loop, clock) = virtual_loop();
    let start = clock.now();
    let fires = Rc::new(RefCell::new(Vec::new()));

    let f = fires.clone();
    let ticker = event_loop
        .set_interval(Duration::from_millis(20), move |scope| {
            f.borrow_mut().push(millis_since(start, scope.now()));
        })
        .unwrap();
    event_loop
        .set_timeout(Duration::from_millis(70), move |scope| {
            assert!(scope.cancel(ticker));
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(*fires.borrow(), vec![20, 40, 60]);
    assert!(!event_loop.is_pending(ticker));
}

#[test]
fn test_zero_interval_is_clamped() {
    let (mut event_loop, clock) = virtual_loop();
    let start = clock.now();
    let fires = Rc::new(RefCell::new(Vec::new()));

    let f = fires.clone();
    event_loop
        .schedule_timer(Duration::ZERO, true, move |scope| {
            f.borrow_mut().push(millis_since(start, scope.now()));
            if f.borrow().len() == 3 {
                let me = scope.current_handle().unwrap();
                scope.cancel(me);
            }
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(*fires.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_cancel_is_idempotent() {
    let (mut event_loop, _clock) = virtual_loop();
    let fired = Rc::new(RefCell::new(false));

    let f = fired.clone();
    let handle = event_loop
        .set_timeout(Duration::from_millis(10), move |_| *f.borrow_mut() = true)
        .unwrap();

    assert!(event_loop.is_pending(handle));
    assert!(event_loop.cancel(handle));
    assert!(!event_loop.cancel(handle));
    assert!(matches!(
        event_loop.try_cancel(handle),
        Err(SchedulerError::InvalidHandle(h)) if h == handle
    ));

    event_loop.run_until_idle().unwrap();
    assert!(!*fired.borrow());
    assert_eq!(event_loop.stats().cancelled, 1);
}

#[test]
fn test_cancel_after_fire_returns_false() {
    let (mut event_loop, _clock) = virtual_loop();
    let handle = event_loop.set_timeout(Duration::ZERO, |_| ()).unwrap();

    event_loop.run_until_idle().unwrap();
    assert!(!event_loop.is_pending(handle));
    assert!(!event_loop.cancel(handle));
}

#[test]
fn test_one_shot_cannot_cancel_itself() {
    let (mut event_loop, _clock) = virtual_loop();
    let result = Rc::new(RefCell::new(None));

    let r = result.clone();
    event_loop
        .set_timeout(Duration::ZERO, move |scope| {
            let me = scope.current_handle().unwrap();
            *r.borrow_mut() = Some(scope.try_cancel(me));
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert!(matches!(
        result.borrow_mut().take(),
        Some(Err(SchedulerError::AlreadyStarted(_)))
    ));
}

#[test]
fn test_timer_cancelled_by_earlier_timer() {
    let (mut event_loop, _clock) = virtual_loop();
    let fired = Rc::new(RefCell::new(false));

    let f = fired.clone();
    let late = event_loop
        .set_timeout(Duration::from_millis(50), move |_| *f.borrow_mut() = true)
        .unwrap();
    event_loop
        .set_timeout(Duration::from_millis(50), move |scope| {
            // Already cancelled by the 10 ms timer
            assert!(!scope.cancel(late));
        })
        .unwrap();
    let timeout = event_loop
        .set_timeout(Duration::from_millis(10), move |scope| {
            assert!(scope.cancel(late));
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert!(!*fired.borrow());
    assert!(!event_loop.is_pending(timeout));
}

#[test]
fn test_stop_leaves_timers_pending() {
    let (mut event_loop, _clock) = virtual_loop();
    let count = Rc::new(RefCell::new(0));

    let c = count.clone();
    let ticker = event_loop
        .set_interval(Duration::from_millis(5), move |scope| {
            *c.borrow_mut() += 1;
            if *c.borrow() == 3 {
                scope.stop();
            }
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(*count.borrow(), 3);
    assert!(event_loop.is_pending(ticker));

    // A later run picks up where the last one stopped
    assert!(event_loop.cancel(ticker));
    event_loop.run_until_idle().unwrap();
    assert_eq!(*count.borrow(), 3);
}

#[test]
fn test_real_clock_timer_waits() {
    let mut event_loop =
        EventLoop::with_options(LoopOptions::default().worker_count(1)).unwrap();
    let start = Instant::now();
    event_loop
        .set_timeout(Duration::from_millis(30), |_| ())
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
}

// ===== Oversized delays =====

#[test]
fn test_max_delay_timer_can_be_cancelled() {
    let (mut event_loop, _clock) = virtual_loop();
    let fired = Rc::new(RefCell::new(false));

    let f = fired.clone();
    let timeout = event_loop
        .set_timeout(Duration::MAX, move |_| *f.borrow_mut() = true)
        .unwrap();
    assert!(event_loop.is_pending(timeout));

    assert!(event_loop.cancel(timeout));
    event_loop.run_until_idle().unwrap();
    assert!(!*fired.borrow());
}

#[test]
fn test_max_interval_rearms_without_overflow() {
    let (mut event_loop, clock) = virtual_loop();
    let start = clock.now();
    let count = Rc::new(RefCell::new(0));

    let c = count.clone();
    event_loop
        .set_interval(Duration::MAX, move |scope| {
            *c.borrow_mut() += 1;
            if *c.borrow() == 2 {
                if let Some(me) = scope.current_handle() {
                    assert!(scope.cancel(me));
                }
            }
        })
        .unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(*count.borrow(), 2);
    assert!(clock.now() > start);
}
