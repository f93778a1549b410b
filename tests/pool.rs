use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::thread as scoped;
use rand::Rng;
use workpool::{PoolConfig, PoolError, TaskError, TaskResult, WorkerPool};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fails the test if `handle` has not finished within three seconds.
fn join_within<T>(what: &str, handle: thread::JoinHandle<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "hang: {}", what);
        thread::sleep(Duration::from_millis(5));
    }
    handle.join().unwrap()
}

/// Drains the pool's results on a separate thread until the sink closes.
fn collect<T: Send + 'static>(pool: &WorkerPool<T>) -> thread::JoinHandle<Vec<TaskResult<T>>> {
    let results = pool.results();
    thread::spawn(move || results.collect())
}

#[test]
fn squares_on_three_workers() {
    init_logger();
    let pool = WorkerPool::new(3).unwrap();
    let consumer = collect(&pool);

    for n in 0..10u64 {
        pool.submit(move |_| Ok(n * n)).unwrap();
    }
    pool.shutdown().unwrap();

    let mut values: Vec<u64> = consumer
        .join()
        .unwrap()
        .into_iter()
        .map(|r| r.outcome.unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
}

#[test]
fn every_task_yields_exactly_one_result() {
    init_logger();
    for &size in &[1usize, 2, 4, 7] {
        for &count in &[0usize, 1, 5, 50] {
            let pool = WorkerPool::new(size).unwrap();
            let consumer = collect(&pool);

            let mut submitted = HashSet::new();
            for i in 0..count {
                submitted.insert(pool.submit(move |_| Ok(i)).unwrap());
            }
            pool.shutdown().unwrap();

            let results = consumer.join().unwrap();
            assert_eq!(results.len(), count, "size {} count {}", size, count);
            let seen: HashSet<_> = results.iter().map(|r| r.task).collect();
            assert_eq!(seen, submitted);
            for result in &results {
                assert!(result.worker.0 >= 1 && result.worker.0 <= size);
            }
        }
    }
}

#[test]
fn concurrency_never_exceeds_size() {
    init_logger();
    let size = 4;
    let pool = WorkerPool::new(size).unwrap();
    let consumer = collect(&pool);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..40 {
        let running = running.clone();
        let peak = peak.clone();
        pool.submit(move |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let pause = rand::thread_rng().gen_range(1, 5);
            thread::sleep(Duration::from_millis(pause));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    pool.shutdown().unwrap();

    assert_eq!(consumer.join().unwrap().len(), 40);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= size, "peak {}", peak);
}

#[test]
fn panicking_task_is_reported_and_pool_keeps_working() {
    init_logger();
    let pool = WorkerPool::new(2).unwrap();
    let results = pool.results();

    pool.submit(|_| {
        panic_control::disable_hook_in_current_thread();
        panic!("bad input")
    })
    .unwrap();
    let failed = results.recv().unwrap();
    match failed.outcome {
        Err(TaskError::Panicked(msg)) => assert_eq!(msg, "bad input"),
        other => panic!("expected a panic, got {:?}", other),
    }

    pool.submit(|_| Err(anyhow::anyhow!("no such file"))).unwrap();
    let failed = results.recv().unwrap();
    assert!(matches!(failed.outcome, Err(TaskError::Failed(_))));

    for n in 0..4 {
        pool.submit(move |_| Ok(n + 1)).unwrap();
    }
    let sum: i32 = (0..4).map(|_| results.recv().unwrap().outcome.unwrap()).sum();
    assert_eq!(sum, 10);
    assert_eq!(pool.workers(), 2);

    pool.shutdown().unwrap();
    assert!(results.recv().is_none());
}

#[test]
fn submit_after_shutdown_fails_fast() {
    init_logger();
    let pool: WorkerPool<()> = WorkerPool::new(2).unwrap();
    pool.shutdown().unwrap();
    assert!(pool.is_closed());

    let start = Instant::now();
    assert!(matches!(pool.submit(|_| Ok(())), Err(PoolError::Closed)));
    assert!(matches!(pool.try_submit(|_| Ok(())), Err(PoolError::Closed)));
    assert!(matches!(pool.resize(4), Err(PoolError::Closed)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn shutdown_is_idempotent() {
    init_logger();
    let pool: WorkerPool<u32> = WorkerPool::new(3).unwrap();
    let consumer = collect(&pool);
    for i in 0..6 {
        pool.submit(move |_| Ok(i)).unwrap();
    }

    let barrier = Barrier::new(4);
    scoped::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                barrier.wait();
                pool.shutdown().unwrap();
            });
        }
    })
    .unwrap();
    pool.shutdown().unwrap();

    assert_eq!(consumer.join().unwrap().len(), 6);
    assert_eq!(pool.workers(), 0);
}

#[test]
fn shutdown_waits_for_running_task() {
    init_logger();
    let pool = WorkerPool::new(1).unwrap();
    let results = pool.results();
    let (started_tx, started_rx) = crossbeam::channel::bounded(1);

    pool.submit(move |_| {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
        Ok("done")
    })
    .unwrap();
    started_rx.recv().unwrap();

    let start = Instant::now();
    pool.shutdown().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(80));

    let result = results.try_recv().expect("result published before shutdown returned");
    assert_eq!(result.outcome.unwrap(), "done");
    assert!(results.recv().is_none());
}

#[test]
fn queued_tasks_run_before_shutdown_returns() {
    init_logger();
    let config = PoolConfig {
        queue_capacity: Some(8),
        result_capacity: Some(16),
        ..PoolConfig::new(1)
    };
    let pool = WorkerPool::with_config(config).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let ran = ran.clone();
        pool.submit(move |_| {
            thread::sleep(Duration::from_millis(5));
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    pool.shutdown().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 8);
    assert_eq!(pool.results().count(), 8);
}

#[test]
fn blocked_submitter_is_released_by_shutdown() {
    init_logger();
    let pool = Arc::new(WorkerPool::new(1).unwrap());
    let consumer = collect(&pool);
    let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
    let (started_tx, started_rx) = crossbeam::channel::bounded(1);

    // Occupy the worker, then fill the queue.
    pool.submit(move |_| {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
        Ok(0)
    })
    .unwrap();
    started_rx.recv().unwrap();
    pool.submit(|_| Ok(1)).unwrap();
    assert!(matches!(pool.try_submit(|_| Ok(2)), Err(PoolError::QueueFull)));

    let blocked = {
        let pool = pool.clone();
        thread::spawn(move || pool.submit(|_| Ok(3)))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    let stopper = {
        let pool = pool.clone();
        thread::spawn(move || pool.shutdown())
    };
    assert!(matches!(blocked.join().unwrap(), Err(PoolError::Closed)));

    drop(release_tx);
    stopper.join().unwrap().unwrap();
    let mut values: Vec<i32> = consumer
        .join()
        .unwrap()
        .into_iter()
        .map(|r| r.outcome.unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1]);
}

#[test]
fn zero_size_is_rejected() {
    assert!(matches!(
        WorkerPool::<()>::new(0),
        Err(PoolError::InvalidSize(0))
    ));
}

#[test]
fn dropping_an_open_pool_does_not_hang() {
    init_logger();
    let pool = WorkerPool::new(2).unwrap();
    for i in 0..2 {
        pool.submit(move |_| Ok(i)).unwrap();
    }
    let results = pool.results();
    drop(pool);
    assert!(results.count() <= 2);
}

#[test]
fn dropping_a_pool_with_a_full_sink_discards_results() {
    init_logger();
    let config = PoolConfig {
        queue_capacity: Some(1),
        result_capacity: Some(1),
        ..PoolConfig::new(1)
    };
    let pool = WorkerPool::with_config(config).unwrap();
    let results = pool.results();

    // One result fills the sink, the worker blocks publishing the second and
    // the third waits in the queue.
    for i in 0..3 {
        pool.submit(move |_| Ok(i)).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(3);
    while !(results.len() == 1 && pool.utilization().queued == 1) {
        assert!(Instant::now() < deadline, "pool never filled up");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(pool.try_submit(|_| Ok(3)), Err(PoolError::QueueFull)));

    join_within("drop with a full sink", thread::spawn(move || drop(pool)));
    // The sink holds one result, so at least two were thrown away.
    assert!(results.count() <= 1);
}

#[test]
fn shutdown_from_a_task_is_refused() {
    init_logger();
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let results = pool.results();

    let inner = pool.clone();
    pool.submit(move |_| Ok(inner.shutdown())).unwrap();
    let refused = results.recv().unwrap().outcome.unwrap();
    assert!(matches!(refused, Err(PoolError::ShutdownFromWorker)));
    assert!(!pool.is_closed());

    pool.submit(|_| Ok(Ok(()))).unwrap();
    assert!(results.recv().unwrap().outcome.unwrap().is_ok());
    pool.shutdown().unwrap();
    assert!(results.recv().is_none());
}

#[test]
fn dropping_the_last_handle_inside_a_task_does_not_hang() {
    init_logger();
    let pool = Arc::new(WorkerPool::new(1).unwrap());
    let results = pool.results();
    let (go_tx, go_rx) = crossbeam::channel::bounded::<()>(0);
    let (done_tx, done_rx) = crossbeam::channel::bounded(1);

    let inner = pool.clone();
    pool.submit(move |_| {
        let _ = go_rx.recv();
        drop(inner);
        done_tx.send(()).unwrap();
        Ok(1)
    })
    .unwrap();
    drop(pool);
    drop(go_tx);

    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("hang: last handle dropped inside a task");
    // The sink closes once the pool has finished stopping on its own.
    let drained = join_within("sink close", thread::spawn(move || results.count()));
    assert!(drained <= 1);
}
