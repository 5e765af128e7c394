use ordered_collector::{Event, ProducerQueue};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn full_queue_hands_back_newest_event() {
    let queue = ProducerQueue::new(2);
    assert!(queue.push(Event::new(1, "a")).is_ok());
    assert!(queue.push(Event::new(2, "b")).is_ok());
    let overrun = queue
        .push(Event::new(3, "c"))
        .expect_err("queue should be saturated");
    assert_eq!(overrun.capacity, 2);
    assert_eq!(overrun.event.id, 3);
    assert!(overrun.message().contains("dropped id 3"));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.try_pop().map(|event| event.id), Some(1));
    assert_eq!(queue.try_pop().map(|event| event.id), Some(2));
    assert!(queue.try_pop().is_none());
}

#[test]
fn zero_capacity_is_clamped() {
    let queue = ProducerQueue::<()>::new(0);
    assert_eq!(queue.capacity(), 1);
}

#[test]
fn resize_keeps_oldest_and_reports_dropped() {
    let queue = ProducerQueue::new(4);
    for id in 1..=4 {
        queue.push(Event::new(id, ())).unwrap();
    }
    assert_eq!(queue.resize(4), 0);
    assert_eq!(queue.resize(2), 2);
    assert_eq!(queue.capacity(), 2);
    assert_eq!(queue.try_pop().map(|event| event.id), Some(1));
    assert_eq!(queue.try_pop().map(|event| event.id), Some(2));
    assert!(queue.is_empty());

    assert_eq!(queue.resize(8), 0);
    assert_eq!(queue.capacity(), 8);
}

#[test]
fn wait_not_empty_times_out_on_idle_queue() {
    let queue = ProducerQueue::<()>::new(4);
    assert!(!queue.wait_not_empty(Duration::from_millis(20)));
    queue.wake();
    assert!(queue.is_empty());
}

#[test]
fn wait_not_empty_wakes_on_push() {
    let queue = Arc::new(ProducerQueue::new(4));
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            queue.push(Event::new(9, "late")).unwrap();
        })
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut ready = false;
    while !ready && Instant::now() < deadline {
        ready = queue.wait_not_empty(Duration::from_millis(500));
    }
    producer.join().unwrap();
    assert!(ready);
    assert_eq!(queue.try_pop().map(|event| event.payload), Some("late"));
}
