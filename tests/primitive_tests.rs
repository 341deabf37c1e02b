// osal-core: Integration tests across the synchronization primitives,
// exercised through OSAL tasks rather than bare host threads

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use osal_core as osal;
use osal::{OsError, Timeout};

fn wait_until(deadline_ms: u64, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_flush_releases_all_pending_tasks() {
    osal::init().unwrap();
    let sem = osal::binsem::create("flush_scn", 0, 0).unwrap();
    let released = Arc::new(AtomicU32::new(0));

    for i in 0..3 {
        let released = Arc::clone(&released);
        osal::task::create(
            &format!("flush_taker_{i}"),
            move || {
                if osal::binsem::take(sem).is_ok() {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            },
            0,
            100,
            osal::task::TaskFlags::empty(),
        )
        .unwrap();
    }

    // Let all three takers reach their pend.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(released.load(Ordering::SeqCst), 0);

    // All three return within the 50 ms window after the flush.
    osal::binsem::flush(sem).unwrap();
    assert!(wait_until(50, || released.load(Ordering::SeqCst) == 3));

    // Flush does not touch the value.
    assert_eq!(osal::binsem::get_info(sem).unwrap().value, 0);

    // Task identities retire as the entries return.
    assert!(wait_until(500, || {
        osal::task::get_id_by_name("flush_taker_0").is_err()
    }));
    osal::binsem::delete(sem).unwrap();
}

#[test]
fn test_binsem_boundary_values() {
    let over = osal::binsem::create("bound_over", 5, 0).unwrap();
    assert_eq!(osal::binsem::get_info(over).unwrap().value, 1);
    osal::binsem::delete(over).unwrap();

    let zero = osal::binsem::create("bound_zero", 0, 0).unwrap();
    assert_eq!(osal::binsem::timed_wait(zero, 0), Err(OsError::SemTimeout));
    osal::binsem::give(zero).unwrap();
    assert_eq!(osal::binsem::timed_wait(zero, 0), Ok(()));
    osal::binsem::delete(zero).unwrap();
}

#[test]
fn test_queue_fifo_through_tasks() {
    osal::init().unwrap();
    let q = osal::queue::create("fifo_scn", 4, 8, osal::queue::QueueFlags::empty()).unwrap();

    osal::task::create(
        "fifo_producer",
        move || {
            osal::queue::put(q, &[0x01], osal::queue::QueueFlags::empty()).unwrap();
            osal::queue::put(q, &[0x02, 0x03], osal::queue::QueueFlags::empty()).unwrap();
            osal::queue::put(q, &[0x04, 0x05, 0x06], osal::queue::QueueFlags::empty()).unwrap();
        },
        0,
        100,
        osal::task::TaskFlags::empty(),
    )
    .unwrap();

    let mut buf = [0u8; 8];
    let n = osal::queue::get(q, &mut buf, Timeout::Pend).unwrap();
    assert_eq!(&buf[..n], &[0x01]);
    let n = osal::queue::get(q, &mut buf, Timeout::Pend).unwrap();
    assert_eq!(&buf[..n], &[0x02, 0x03]);
    let n = osal::queue::get(q, &mut buf, Timeout::Pend).unwrap();
    assert_eq!(&buf[..n], &[0x04, 0x05, 0x06]);

    assert!(wait_until(500, || osal::task::get_id_by_name("fifo_producer").is_err()));
    osal::queue::delete(q).unwrap();
}

#[test]
fn test_pending_get_sees_arrival_and_deletion() {
    osal::init().unwrap();

    // Arrival case.
    let q = osal::queue::create("pend_arrive", 4, 8, osal::queue::QueueFlags::empty()).unwrap();
    let got = Arc::new(AtomicU32::new(0));
    {
        let got = Arc::clone(&got);
        osal::task::create(
            "pend_getter_a",
            move || {
                let mut buf = [0u8; 8];
                if osal::queue::get(q, &mut buf, Timeout::Pend).is_ok() {
                    got.store(u32::from(buf[0]), Ordering::SeqCst);
                }
            },
            0,
            100,
            osal::task::TaskFlags::empty(),
        )
        .unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));
    osal::queue::put(q, &[42], osal::queue::QueueFlags::empty()).unwrap();
    assert!(wait_until(500, || got.load(Ordering::SeqCst) == 42));
    osal::queue::delete(q).unwrap();

    // Deletion case.
    let q = osal::queue::create("pend_delete", 4, 8, osal::queue::QueueFlags::empty()).unwrap();
    let observed = Arc::new(AtomicU32::new(0));
    {
        let observed = Arc::clone(&observed);
        osal::task::create(
            "pend_getter_d",
            move || {
                let mut buf = [0u8; 8];
                if osal::queue::get(q, &mut buf, Timeout::Pend) == Err(OsError::InvalidId) {
                    observed.store(1, Ordering::SeqCst);
                }
            },
            0,
            100,
            osal::task::TaskFlags::empty(),
        )
        .unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));
    osal::queue::delete(q).unwrap();
    assert!(wait_until(500, || observed.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_mutex_serializes_tasks() {
    osal::init().unwrap();
    let mx = osal::mutex::create("serial_mx", 0).unwrap();
    let counter = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    for i in 0..4 {
        let counter = Arc::clone(&counter);
        let peak = Arc::clone(&peak);
        osal::task::create(
            &format!("serial_worker_{i}"),
            move || {
                for _ in 0..20 {
                    osal::mutex::take(mx).unwrap();
                    let inside = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(inside, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(200));
                    counter.fetch_sub(1, Ordering::SeqCst);
                    osal::mutex::give(mx).unwrap();
                }
            },
            0,
            100,
            osal::task::TaskFlags::empty(),
        )
        .unwrap();
    }

    assert!(wait_until(5000, || {
        osal::task::get_id_by_name("serial_worker_0").is_err()
            && osal::task::get_id_by_name("serial_worker_3").is_err()
    }));
    // The critical section never held two tasks at once.
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    osal::mutex::delete(mx).unwrap();
}

#[test]
fn test_countsem_bounded_producer_consumer() {
    osal::init().unwrap();
    let items = osal::countsem::create("pc_items", 0, 0).unwrap();
    let consumed = Arc::new(AtomicU32::new(0));

    {
        let consumed = Arc::clone(&consumed);
        osal::task::create(
            "pc_consumer",
            move || {
                for _ in 0..10 {
                    if osal::countsem::take(items).is_ok() {
                        consumed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            },
            0,
            100,
            osal::task::TaskFlags::empty(),
        )
        .unwrap();
    }

    for _ in 0..10 {
        osal::countsem::give(items).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(wait_until(1000, || consumed.load(Ordering::SeqCst) == 10));
    assert!(wait_until(500, || osal::task::get_id_by_name("pc_consumer").is_err()));
    osal::countsem::delete(items).unwrap();
}

#[test]
fn test_rwlock_reader_writer_interleaving() {
    let rw = osal::rwlock::create("rw_interleave", 0).unwrap();

    osal::rwlock::read_take(rw).unwrap();
    osal::rwlock::read_take(rw).unwrap();

    let writer_done = Arc::new(AtomicU32::new(0));
    let writer = {
        let writer_done = Arc::clone(&writer_done);
        std::thread::spawn(move || {
            osal::rwlock::write_take(rw).unwrap();
            writer_done.store(1, Ordering::SeqCst);
            osal::rwlock::write_give(rw).unwrap();
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(writer_done.load(Ordering::SeqCst), 0);

    osal::rwlock::read_give(rw).unwrap();
    osal::rwlock::read_give(rw).unwrap();
    writer.join().unwrap();
    assert_eq!(writer_done.load(Ordering::SeqCst), 1);

    osal::rwlock::delete(rw).unwrap();
}
