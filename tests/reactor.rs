use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use treadle::{BoundedFn, Interest, ReactiveQueue, Reactor, ReactorBuilder};

const TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_driver(reactor: &Arc<Reactor>) -> JoinHandle<()> {
    let reactor = reactor.clone();
    thread::spawn(move || reactor.run().unwrap())
}

fn nonblocking_pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

/// Spins until `condition` holds or the timeout elapses.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Reads everything currently buffered on `stream`.
fn drain(mut stream: &UnixStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }

    out
}

#[test]
fn test_read_callback_receives_data() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let (tx, rx) = mpsc::channel();

    let source = reader.try_clone().unwrap();
    assert!(reactor.add(reader.as_raw_fd(), Interest::READ, move || {
        let data = drain(&source);
        if !data.is_empty() {
            let _ = tx.send(data);
        }
    }));

    let driver = spawn_driver(&reactor);

    writer.write_all(b"ping").unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"ping");

    writer.write_all(b"pong").unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"pong");

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_add_rejects_duplicate_interest() {
    let reactor = Reactor::new().unwrap();
    let (_a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();

    assert!(reactor.add(fd, Interest::READ, || {}));
    assert!(
        !reactor.add(fd, Interest::READ, || {}),
        "Second read callback on the same fd should be refused"
    );
    assert!(
        !reactor.add(fd, Interest::BOTH, || {}),
        "BOTH overlaps the existing read callback"
    );
    assert!(
        reactor.add(fd, Interest::WRITE, || {}),
        "Write interest is independent of read interest"
    );
    assert_eq!(reactor.registered(), 1);
}

#[test]
fn test_add_rejects_empty_interest() {
    let reactor = Reactor::new().unwrap();
    let (_a, b) = nonblocking_pair();

    assert!(!reactor.add(b.as_raw_fd(), Interest::NONE, || {}));
    assert_eq!(reactor.registered(), 0);
}

#[test]
fn test_remove_semantics() {
    let reactor = Reactor::new().unwrap();
    let (_a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();

    assert!(!reactor.remove(fd, Interest::READ), "Nothing registered yet");

    assert!(reactor.add(fd, Interest::BOTH, || {}));
    assert!(reactor.remove(fd, Interest::WRITE));
    assert!(!reactor.remove(fd, Interest::WRITE), "Write already removed");
    assert_eq!(reactor.registered(), 1);

    assert!(reactor.remove(fd, Interest::READ));
    assert_eq!(reactor.registered(), 0);
}

#[test]
fn test_removed_callback_is_never_invoked() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let fd = reader.as_raw_fd();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let source = reader.try_clone().unwrap();
    let counter = hits.clone();
    assert!(reactor.add(fd, Interest::READ, move || {
        drain(&source);
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    }));

    let driver = spawn_driver(&reactor);

    writer.write_all(b"x").unwrap();
    rx.recv_timeout(TIMEOUT).unwrap();

    assert!(reactor.remove(fd, Interest::READ));
    let seen = hits.load(Ordering::SeqCst);

    writer.write_all(b"y").unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(
        hits.load(Ordering::SeqCst),
        seen,
        "Callback ran after remove returned"
    );

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_remove_after_close_succeeds() {
    let reactor = Reactor::new().unwrap();
    let (a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();

    assert!(reactor.add(fd, Interest::READ, || {}));
    drop(b);
    drop(a);

    assert!(reactor.remove(fd, Interest::READ));
    assert_eq!(reactor.registered(), 0);
}

#[test]
fn test_write_notification_is_one_shot() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (_a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = hits.clone();
    assert!(reactor.add(fd, Interest::WRITE, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    }));

    let driver = spawn_driver(&reactor);

    rx.recv_timeout(TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        hits.load(Ordering::SeqCst),
        1,
        "An always-writable socket should still notify only once"
    );

    assert!(reactor.request_write(fd));
    rx.recv_timeout(TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_request_write_requires_write_callback() {
    let reactor = Reactor::new().unwrap();
    let (_a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();

    assert!(!reactor.request_write(fd), "Unknown fd");

    assert!(reactor.add(fd, Interest::READ, || {}));
    assert!(!reactor.request_write(fd), "Read-only registration");

    assert!(reactor.add(fd, Interest::WRITE, || {}));
    assert!(reactor.request_write(fd), "Already armed is still a success");
}

#[test]
fn test_request_write_from_callback() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (_a, b) = nonblocking_pair();
    let fd = b.as_raw_fd();
    let (tx, rx) = mpsc::channel();

    let handle = reactor.clone();
    let mut rounds = 0;
    assert!(reactor.add(fd, Interest::WRITE, move || {
        rounds += 1;
        let _ = tx.send(rounds);
        if rounds < 3 {
            assert!(handle.request_write(fd));
        }
    }));

    let driver = spawn_driver(&reactor);

    for expected in 1..=3 {
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), expected);
    }
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_same_callback_serves_both_interests() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let source = reader.try_clone().unwrap();
    let counter = hits.clone();
    assert!(reactor.add(reader.as_raw_fd(), Interest::BOTH, move || {
        drain(&source);
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    }));

    let driver = spawn_driver(&reactor);

    // Initial write-ready notification.
    rx.recv_timeout(TIMEOUT).unwrap();

    writer.write_all(b"data").unwrap();
    rx.recv_timeout(TIMEOUT).unwrap();

    assert!(hits.load(Ordering::SeqCst) >= 2);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_wake_up_runs_each_callback_once() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    let reactor = Arc::new(Reactor::new().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let driver = spawn_driver(&reactor);

    let producers: Vec<_> = (0..THREADS)
        .map(|_| {
            let reactor = reactor.clone();
            let hits = hits.clone();
            let tx = tx.clone();

            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let hits = hits.clone();
                    let tx = tx.clone();
                    reactor.wake_up(Some(Box::new(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let _ = tx.send(thread::current().id());
                    })));
                    reactor.wake_up(None);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let driver_id = driver.thread().id();
    for _ in 0..THREADS * PER_THREAD {
        let ran_on = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ran_on, driver_id, "Wakeup callback left the driver thread");
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), THREADS * PER_THREAD);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_stop_from_callback() {
    let reactor = Arc::new(Reactor::new().unwrap());

    let handle = reactor.clone();
    reactor.wake_up(Some(Box::new(move || {
        handle.stop();
        handle.stop();
    })));

    reactor.run().unwrap();
    assert!(reactor.is_stopped());
}

#[test]
fn test_stop_before_run_is_sticky() {
    let reactor = ReactorBuilder::new().event_capacity(8).build().unwrap();

    assert!(!reactor.is_stopped());
    reactor.stop();
    reactor.stop();

    reactor.run().unwrap();
    reactor.run().unwrap();
    assert!(reactor.is_stopped());
}

#[test]
fn test_callback_can_register_other_fds() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let (mut second_writer, second_reader) = nonblocking_pair();
    let (tx, rx) = mpsc::channel();

    let handle = reactor.clone();
    let second_fd = second_reader.as_raw_fd();
    let source = reader.try_clone().unwrap();
    let second_source = second_reader.try_clone().unwrap();
    let mut pending = Some(tx);

    assert!(reactor.add(reader.as_raw_fd(), Interest::READ, move || {
        drain(&source);
        if let Some(tx) = pending.take() {
            let second_source = second_source.try_clone().unwrap();
            assert!(handle.add(second_fd, Interest::READ, move || {
                if !drain(&second_source).is_empty() {
                    let _ = tx.send(());
                }
            }));
        }
    }));

    let driver = spawn_driver(&reactor);

    writer.write_all(b"first").unwrap();
    while reactor.registered() < 2 {
        thread::sleep(Duration::from_millis(1));
    }

    second_writer.write_all(b"second").unwrap();
    rx.recv_timeout(TIMEOUT).unwrap();

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_reactive_queue_delivers_on_driver_thread() {
    const PRODUCERS: usize = 4;
    const ITEMS: usize = 100;

    let reactor = Arc::new(Reactor::new().unwrap());
    let queue = ReactiveQueue::new(reactor.clone());
    let (tx, rx) = mpsc::channel();

    let driver = spawn_driver(&reactor);
    let driver_id = driver.thread().id();

    queue.set_consumer(move |batch: Vec<(usize, usize)>| {
        assert_eq!(thread::current().id(), driver_id);
        for item in batch {
            let _ = tx.send(item);
        }
    });

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..ITEMS {
                    queue.push((p, i));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let mut next = [0usize; PRODUCERS];
    for _ in 0..PRODUCERS * ITEMS {
        let (p, i) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(i, next[p], "Items from one producer arrived out of order");
        next[p] += 1;
    }

    assert!(queue.is_empty());

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_reactive_queue_without_consumer_accumulates() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let queue = ReactiveQueue::new(reactor.clone());

    assert_eq!(queue.push(1), 1);
    assert_eq!(queue.push(2), 2);
    assert_eq!(queue.len(), 2);

    // Pending wakeups find no consumer and leave the items alone.
    reactor.wake_up(Some(Box::new({
        let reactor = reactor.clone();
        move || reactor.stop()
    })));
    reactor.run().unwrap();

    assert_eq!(queue.drain(), vec![1, 2]);
    assert!(queue.is_empty());
}

#[test]
fn test_event_for_removed_fd_skips_reused_number() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut first_writer, first_reader) = nonblocking_pair();
    let (mut second_writer, second_reader) = nonblocking_pair();
    let fds = [first_reader.as_raw_fd(), second_reader.as_raw_fd()];

    let readers = Arc::new(Mutex::new(HashMap::from([
        (fds[0], first_reader),
        (fds[1], second_reader),
    ])));
    let replacements = Arc::new(Mutex::new(Vec::new()));
    let swapped = Arc::new(AtomicBool::new(false));
    let spurious = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    // Both descriptors are ready in the same batch. Whichever callback runs
    // first closes the other one and registers fresh descriptors, which the
    // kernel is likely to give the freed number.
    for (fd, other) in [(fds[0], fds[1]), (fds[1], fds[0])] {
        let handle = reactor.clone();
        let readers = readers.clone();
        let replacements = replacements.clone();
        let swapped = swapped.clone();
        let spurious = spurious.clone();
        let tx = tx.clone();

        assert!(reactor.add(fd, Interest::READ, move || {
            if let Some(stream) = readers.lock().unwrap().get(&fd) {
                drain(stream);
            }

            if swapped.swap(true, Ordering::SeqCst) {
                return;
            }

            assert!(handle.remove(other, Interest::READ));
            drop(readers.lock().unwrap().remove(&other));

            let (a, b) = nonblocking_pair();
            for end in [&a, &b] {
                let counter = spurious.clone();
                assert!(handle.add(end.as_raw_fd(), Interest::READ, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
            replacements.lock().unwrap().push((a, b));

            let _ = tx.send(());
        }));
    }

    first_writer.write_all(b"first").unwrap();
    second_writer.write_all(b"second").unwrap();

    let driver = spawn_driver(&reactor);

    rx.recv_timeout(TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(
        spurious.load(Ordering::SeqCst),
        0,
        "An idle descriptor received the event of the one it replaced"
    );
    assert_eq!(reactor.registered(), 3);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_concurrent_add_remove_same_fd() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let reactor = Arc::new(Reactor::new().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let fd = reader.as_raw_fd();
    let reader = Arc::new(reader);

    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let churn_hits = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let driver = spawn_driver(&reactor);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let reactor = reactor.clone();
            let added = added.clone();
            let removed = removed.clone();
            let churn_hits = churn_hits.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for _ in 0..ROUNDS {
                    let counter = churn_hits.clone();
                    if reactor.add(fd, Interest::READ, move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }) {
                        added.fetch_add(1, Ordering::SeqCst);
                    }

                    if reactor.remove(fd, Interest::READ) {
                        removed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let added = added.load(Ordering::SeqCst);
    let removed = removed.load(Ordering::SeqCst);
    assert_eq!(
        added,
        removed + reactor.registered(),
        "Every successful add is matched by one successful remove or is still registered"
    );
    assert!(added > 0);

    if reactor.registered() == 1 {
        assert!(reactor.remove(fd, Interest::READ));
    }
    assert_eq!(reactor.registered(), 0);
    assert_eq!(churn_hits.load(Ordering::SeqCst), 0, "Nothing was ever readable");

    // The kernel set agrees with the table: a fresh add goes through and
    // its callback sees new data.
    let (tx, rx) = mpsc::channel();
    let source = reader.clone();
    assert!(reactor.add(fd, Interest::READ, move || {
        let data = drain(&source);
        if !data.is_empty() {
            let _ = tx.send(data);
        }
    }));

    writer.write_all(b"after").unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"after");
    assert_eq!(churn_hits.load(Ordering::SeqCst), 0);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_stop_after_run_returned() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let driver = spawn_driver(&reactor);

    thread::sleep(Duration::from_millis(20));
    reactor.stop();
    driver.join().unwrap();

    reactor.stop();
    assert!(reactor.is_stopped());

    reactor.run().unwrap();
}

#[test]
fn test_wakeups_are_dropped_once_stopped() {
    let reactor = Reactor::new().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let queued_dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(queued_dropped.clone());
    let counter = ran.clone();
    reactor.wake_up(Some(Box::new(move || {
        let _flag = &flag;
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    assert!(!queued_dropped.load(Ordering::SeqCst));

    reactor.stop();
    assert!(
        queued_dropped.load(Ordering::SeqCst),
        "Stop released the pending wakeup callback"
    );

    let late_dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(late_dropped.clone());
    let counter = ran.clone();
    reactor.wake_up(Some(Box::new(move || {
        let _flag = &flag;
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    assert!(
        late_dropped.load(Ordering::SeqCst),
        "A wakeup after stop is dropped right away"
    );

    reactor.run().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reactive_queue_after_stop_keeps_items() {
    let reactor = Arc::new(Reactor::new().unwrap());
    let queue = ReactiveQueue::new(reactor.clone());
    let batches = Arc::new(AtomicUsize::new(0));

    let counter = batches.clone();
    queue.set_consumer(move |_batch: Vec<u32>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    reactor.stop();

    for i in 0..10 {
        queue.push(i);
    }

    reactor.run().unwrap();

    assert_eq!(batches.load(Ordering::SeqCst), 0);
    assert_eq!(queue.drain(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_bounded_fn_storage() {
    let reactor = Arc::new(Reactor::<BoundedFn>::with_storage().unwrap());
    let (mut writer, reader) = nonblocking_pair();
    let fd = reader.as_raw_fd();
    let reader = Arc::new(reader);
    let received = Arc::new(AtomicUsize::new(0));

    let source = reader.clone();
    let counter = received.clone();
    assert!(reactor.add_callback(
        fd,
        Interest::READ,
        BoundedFn::new(move || {
            counter.fetch_add(drain(&source).len(), Ordering::SeqCst);
        }),
    ));
    assert!(!reactor.add_callback(fd, Interest::READ, BoundedFn::new(|| {})));

    let driver = {
        let reactor = reactor.clone();
        thread::spawn(move || reactor.run().unwrap())
    };

    writer.write_all(b"inline").unwrap();
    assert!(wait_until(|| received.load(Ordering::SeqCst) == 6));

    assert!(reactor.remove(fd, Interest::READ));
    assert_eq!(reactor.registered(), 0);

    reactor.stop();
    driver.join().unwrap();
}

#[test]
fn test_builder_with_storage() {
    let reactor = ReactorBuilder::new()
        .event_capacity(4)
        .build_with_storage::<BoundedFn>()
        .unwrap();
    let (_a, b) = nonblocking_pair();

    assert!(reactor.add_callback(b.as_raw_fd(), Interest::WRITE, BoundedFn::new(|| {})));
    assert!(reactor.request_write(b.as_raw_fd()));
    assert_eq!(reactor.registered(), 1);
}
