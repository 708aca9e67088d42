use fdlock::{FdLockError, FdLockRef, Registry, RegistryConfig};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry() -> Registry {
    Registry::new(RegistryConfig::new().with_signal_masking(false))
}

#[test]
fn two_resolvers_then_both_release() {
    init_logger();
    let reg = registry();

    let first = reg.resolve(5).unwrap();
    assert_eq!(first.refcount(), 1);
    let second = thread::scope(|s| s.spawn(|| reg.resolve(5).unwrap()).join().unwrap());
    assert_eq!(second.refcount(), 2);

    first.release();
    assert!(reg.contains(5));
    second.release();
    assert!(!reg.contains(5));
}

#[test]
fn concurrent_resolves_share_one_record() {
    init_logger();
    const THREADS: usize = 16;

    let reg = Registry::new(RegistryConfig::new().with_partitions(2));
    let start = Arc::new(Barrier::new(THREADS));
    let handles: Vec<FdLockRef> = (0..THREADS)
        .map(|_| {
            let reg = reg.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                reg.resolve(77).unwrap()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    assert_eq!(reg.len(), 1);
    assert_eq!(reg.refcount_of(77), Some(THREADS as i32));

    // Lock through one handle is visible through every other.
    let token = handles[0].lock();
    assert!(handles.iter().all(FdLockRef::is_locked));
    handles[0].unlock(token);

    let remaining: Vec<i32> = handles.into_iter().map(FdLockRef::release).collect();
    assert_eq!(remaining.last(), Some(&0));
    assert!(reg.is_empty());
}

#[test]
fn concurrent_churn_leaves_registry_empty() {
    init_logger();
    let reg = registry();
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let reg = reg.clone();
            thread::spawn(move || {
                for round in 0..500 {
                    let fd = ((i + round) % 5) as i32;
                    let conn = reg.resolve(fd).unwrap();
                    let token = conn.lock();
                    conn.unlock(token);
                    assert!(conn.release() >= 0);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(reg.is_empty());
    assert_eq!(reg.records().count(), 0);
}

#[test]
fn shutdown_ignores_outstanding_references() {
    init_logger();
    let reg = registry();
    let held: Vec<_> = (0..3).map(|_| reg.resolve(8).unwrap()).collect();
    let other = reg.resolve(9).unwrap();
    assert_eq!(reg.refcount_of(8), Some(3));

    assert_eq!(reg.shutdown_all(), 2);
    assert!(reg.is_empty());
    assert_eq!(reg.records().count(), 0);
    assert!(reg.is_shut_down());
    assert_eq!(reg.resolve(8).unwrap_err(), FdLockError::ShutDown);

    for h in held {
        assert!(h.is_drained());
        h.release();
    }
    other.release();
    assert!(reg.is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Resolve(i32),
    Release(i32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4i32).prop_map(Op::Resolve),
        (0..4i32).prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn record_present_iff_references_outstanding(ops in proptest::collection::vec(op(), 0..64)) {
        let reg = Registry::new(RegistryConfig::new().with_partitions(3));
        let mut held: Vec<Vec<FdLockRef>> = (0..4).map(|_| Vec::new()).collect();

        for op in ops {
            let fd = match op {
                Op::Resolve(fd) => {
                    held[fd as usize].push(reg.resolve(fd).unwrap());
                    fd
                }
                Op::Release(fd) => {
                    if let Some(h) = held[fd as usize].pop() {
                        let left = h.release();
                        prop_assert_eq!(left as usize, held[fd as usize].len());
                    }
                    fd
                }
            };
            let outstanding = held[fd as usize].len();
            prop_assert_eq!(reg.contains(fd), outstanding > 0);
            prop_assert_eq!(
                reg.refcount_of(fd),
                (outstanding > 0).then_some(outstanding as i32)
            );
        }

        let live = held.iter().filter(|h| !h.is_empty()).count();
        prop_assert_eq!(reg.len(), live);
    }
}
