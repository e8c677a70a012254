use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::active::{ActiveObject, FlagStop, InterruptStop, RunContext};
use crate::channel::Channel;

use super::LONG_WAIT;

#[test]
fn flag_stop_ends_a_polling_loop() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);

    let ao = ActiveObject::builder()
        .name("poller")
        .build(FlagStop::new(), move |ctx: &RunContext| {
            while !ctx.stop_requested() {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

    ao.start().expect("start");
    std::thread::sleep(Duration::from_millis(20));
    assert!(
        ao.request_stop_within(*LONG_WAIT).expect("started"),
        "worker did not stop in time"
    );
    ao.join().expect("worker completed");
    assert!(ticks.load(Ordering::SeqCst) > 0);
}

#[test]
fn interrupt_stop_unblocks_a_channel_take() {
    let channel: Arc<Channel<u32>> = Arc::new(Channel::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let worker_channel = Arc::clone(&channel);
    let worker_seen = Arc::clone(&seen);
    let ao = ActiveObject::new(InterruptStop::new(), move |ctx: &RunContext| loop {
        match worker_channel.take() {
            Ok(item) => worker_seen.lock().unwrap().push(item),
            // A cancelled take is only an exit when a stop was requested.
            Err(_) if ctx.stop_requested() => break,
            Err(_) => {}
        }
    });

    ao.start().expect("start");
    channel.put(1);
    channel.put(2);
    std::thread::sleep(Duration::from_millis(30));

    // The worker is now parked on an empty channel; only the interrupt
    // strategy can get it out.
    assert!(
        ao.request_stop_within(*LONG_WAIT).expect("started"),
        "worker did not stop in time"
    );
    ao.join().expect("worker completed");
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[test]
fn stopped_hook_fires_once_on_normal_return() {
    let fired = Arc::new(AtomicUsize::new(0));
    let hook_fired = Arc::clone(&fired);

    let ao = ActiveObject::builder()
        .on_stopped(move || {
            hook_fired.fetch_add(1, Ordering::SeqCst);
        })
        .build(FlagStop::new(), |_ctx: &RunContext| {});

    ao.start().expect("start");
    ao.join().expect("worker completed");
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // The stopped event is latched; a timed join after the fact returns
    // immediately.
    assert!(ao.join_within(Duration::ZERO).expect("started"));
}

#[test]
fn join_within_times_out_while_the_worker_runs() {
    let channel: Arc<Channel<u32>> = Arc::new(Channel::new());

    let worker_channel = Arc::clone(&channel);
    let ao = ActiveObject::new(FlagStop::new(), move |_ctx: &RunContext| {
        worker_channel.force_take();
    });

    ao.start().expect("start");
    assert!(!ao.join_within(Duration::from_millis(30)).expect("started"));

    channel.put(0);
    assert!(ao.join_within(*LONG_WAIT).expect("started"));
    ao.join().expect("worker completed");
}
