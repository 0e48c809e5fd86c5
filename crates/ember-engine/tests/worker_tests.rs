//! Worker pool jobs as seen from the loop

use ember_engine::{
    CompletionError, EventLoop, LoopOptions, SchedulerError, SharedBuffer, TaskKind, WaitResult,
};
use futures::executor::block_on;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn new_loop(workers: usize) -> EventLoop {
    EventLoop::with_options(LoopOptions::default().worker_count(workers)).unwrap()
}

#[test]
fn test_job_future_resolves() {
    let mut event_loop = new_loop(2);
    let sum = event_loop
        .submit_worker_job(|v: Vec<u64>| v.iter().sum::<u64>(), vec![1, 2, 3, 4])
        .unwrap();
    assert_eq!(event_loop.pending_count(TaskKind::WorkerJob), 1);

    event_loop.run_until_idle().unwrap();
    assert!(sum.is_ready());
    assert_eq!(block_on(sum), Ok(10));
    assert_eq!(event_loop.stats().completions, 1);
}

#[test]
fn test_panicking_job_is_isolated() {
    let mut event_loop = new_loop(1);
    let bad = event_loop
        .submit_worker_job(|_: ()| -> u32 { panic!("job exploded") }, ())
        .unwrap();
    let good = event_loop.submit_worker_job(|x: u32| x * 2, 21).unwrap();

    event_loop.run_until_idle().unwrap();
    assert_eq!(
        block_on(bad),
        Err(CompletionError::Panicked("job exploded".to_string()))
    );
    assert_eq!(block_on(good), Ok(42));

    // Same worker keeps serving
    let again = event_loop.submit_worker_job(|x: u32| x + 1, 1).unwrap();
    event_loop.run_until_idle().unwrap();
    assert_eq!(block_on(again), Ok(2));
}

#[test]
fn test_completion_callback_runs_on_loop() {
    let mut event_loop = new_loop(2);
    let results = Rc::new(RefCell::new(Vec::new()));

    for n in 0..4u64 {
        let r = results.clone();
        event_loop
            .submit_worker_job_with(
                |n: u64| n * n,
                n,
                move |scope, result: Result<u64, CompletionError>| {
                    let value = result?;
                    let r = r.clone();
                    scope
                        .enqueue_microtask(move |_| r.borrow_mut().push(value))
                        .map_err(|e| CompletionError::Failed(e.to_string()))
                },
            )
            .unwrap();
    }

    event_loop.run_until_idle().unwrap();
    let mut squares = results.borrow().clone();
    squares.sort_unstable();
    assert_eq!(squares, vec![0, 1, 4, 9]);
}

#[test]
fn test_cancel_queued_job() {
    let mut event_loop = new_loop(1);
    let gate = SharedBuffer::new(1);

    // Occupy the only worker until the gate opens
    let blocker = event_loop
        .submit_worker_job(
            |gate: SharedBuffer| gate.wait(0, 0, Some(Duration::from_secs(5))),
            gate.clone(),
        )
        .unwrap();
    let queued = event_loop.submit_worker_job(|x: u32| x, 7).unwrap();

    assert!(event_loop.cancel(queued.handle()));
    assert!(!event_loop.cancel(queued.handle()));

    gate.store(0, 1);
    gate.notify(0);
    event_loop.run_until_idle().unwrap();

    assert_eq!(block_on(queued), Err(CompletionError::Cancelled));
    assert!(matches!(
        block_on(blocker),
        Ok(WaitResult::Ok | WaitResult::NotEqual)
    ));
    assert_eq!(event_loop.stats().dropped_completions, 0);
}

#[test]
fn test_cannot_cancel_finished_job() {
    let mut event_loop = new_loop(1);
    let future = event_loop.submit_worker_job(|x: u32| x, 3).unwrap();
    let handle = future.handle();

    // Wait for the worker to finish without running the loop
    std::thread::sleep(Duration::from_millis(50));
    assert!(matches!(
        event_loop.try_cancel(handle),
        Err(SchedulerError::AlreadyStarted(h)) if h == handle
    ));

    event_loop.run_until_idle().unwrap();
    assert_eq!(block_on(future), Ok(3));
}

#[test]
fn test_shared_job_sees_buffer() {
    let mut event_loop = new_loop(4);
    let buffer = SharedBuffer::new(2);
    let done = Rc::new(RefCell::new(0));

    for _ in 0..8 {
        let d = done.clone();
        event_loop
            .submit_shared_job(
                |buf: &SharedBuffer, step: i32| buf.add(0, step),
                buffer.clone(),
                3,
                move |_, result: Result<i32, CompletionError>| {
                    assert!(result.is_ok());
                    *d.borrow_mut() += 1;
                },
            )
            .unwrap();
    }

    event_loop.run_until_idle().unwrap();
    assert_eq!(*done.borrow(), 8);
    assert_eq!(buffer.load(0), 24);
}

#[test]
fn test_shared_job_wait_notify() {
    let mut event_loop = new_loop(1);
    let buffer = SharedBuffer::new(1);
    let seen = Rc::new(RefCell::new(None));

    let s = seen.clone();
    event_loop
        .submit_shared_job(
            |buf: &SharedBuffer, _: ()| {
                buf.wait(0, 0, Some(Duration::from_secs(5)));
                buf.load(0)
            },
            buffer.clone(),
            (),
            move |_, result: Result<i32, CompletionError>| *s.borrow_mut() = Some(result),
        )
        .unwrap();

    buffer.store(0, 99);
    buffer.notify(0);
    event_loop.run_until_idle().unwrap();
    assert_eq!(*seen.borrow(), Some(Ok(99)));
}
