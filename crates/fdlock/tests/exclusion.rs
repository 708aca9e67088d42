use fdlock::{Registry, RegistryConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn one_holder_at_a_time() {
    init_logger();
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let reg = Registry::default();
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let reg = reg.clone();
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let conn = reg.resolve(21).unwrap();
                start.wait();
                for _ in 0..ROUNDS {
                    let token = conn.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    entered.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                    assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                    conn.unlock(token);
                }
                conn.release();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(entered.load(Ordering::Relaxed), THREADS * ROUNDS);
    assert!(reg.is_empty());
}

#[test]
fn distinct_descriptors_do_not_contend() {
    init_logger();
    let reg = Registry::default();
    let a = reg.resolve(1).unwrap();
    let b = reg.resolve(2).unwrap();

    let ta = a.lock();
    let tb = b.lock();
    assert!(a.is_locked() && b.is_locked());
    b.unlock(tb);
    a.unlock(ta);
}

#[test]
fn blocked_locker_proceeds_after_unlock() {
    init_logger();
    let reg = Registry::default();
    let t1 = reg.resolve(30).unwrap();
    let token = t1.lock();

    let acquired = Arc::new(AtomicBool::new(false));
    let t2 = {
        let reg = reg.clone();
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            let conn = reg.resolve(30).unwrap();
            let token = conn.lock();
            acquired.store(true, Ordering::SeqCst);
            assert!(conn.is_locked());
            conn.unlock(token);
            conn.release()
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst));
    assert!(t1.is_locked());

    t1.unlock(token);
    assert_eq!(t2.join().unwrap(), 1);
    assert!(acquired.load(Ordering::SeqCst));
    assert!(!t1.is_locked());
    assert_eq!(t1.release(), 0);
}

#[test]
fn guards_serialize_like_tokens() {
    init_logger();
    let reg = Registry::new(RegistryConfig::new().with_partitions(1));
    let total = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let reg = reg.clone();
            let total = Arc::clone(&total);
            thread::spawn(move || {
                let conn = reg.resolve(9).unwrap();
                for _ in 0..100 {
                    let _guard = conn.guard();
                    // Non-atomic read-modify-write is safe only under the lock.
                    let seen = total.load(Ordering::Relaxed);
                    thread::yield_now();
                    total.store(seen + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), 400);
    assert!(reg.is_empty());
}
