use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{self, CancelToken, Cancelled};
use crate::channel::Channel;

#[test]
fn many_producers_one_consumer_exact_delivery() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 50;

    let channel = Arc::new(Channel::new());
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let channel = Arc::clone(&channel);
        producers.push(std::thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                channel.put((p, seq));
            }
        }));
    }

    let mut next_seq: HashMap<usize, usize> = HashMap::new();
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let (p, seq) = channel.force_take();
        // Per producer the sequence must arrive in put order.
        let expected = next_seq.entry(p).or_insert(0);
        assert_eq!(seq, *expected, "producer {p} delivered out of order");
        *expected += 1;
    }

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    assert!(channel.is_empty());
    assert_eq!(next_seq.len(), PRODUCERS);
    assert!(next_seq.values().all(|&count| count == PER_PRODUCER));
}

#[test]
fn cancel_wakes_a_blocked_take() {
    let channel: Arc<Channel<u32>> = Arc::new(Channel::new());
    let token = CancelToken::new();

    let taker = {
        let channel = Arc::clone(&channel);
        let token = token.clone();
        std::thread::spawn(move || {
            let _installed = cancel::install(token);
            channel.take()
        })
    };

    std::thread::sleep(Duration::from_millis(20));
    token.cancel();
    assert_eq!(taker.join().expect("taker panicked"), Err(Cancelled));

    // The aborted take removed nothing; a later take sees the next put.
    channel.put(9);
    assert_eq!(channel.force_take(), 9);
}
