use std::collections::HashSet;
use std::time::Duration;

use chunk_ecs::{BuildError, TaskError, WorkerPool};

#[test]
fn zero_threads_is_rejected() {
    assert!(matches!(WorkerPool::new(0), Err(BuildError::InvalidConfig(_))));
}

#[test]
fn typed_tasks_round_trip_through_workers() {
    let mut pool = WorkerPool::new(3).unwrap();
    let square = pool.create_typed_task(|n: u64| n * n);

    let ids: Vec<_> = (0..32u64).map(|n| (n, square.run(&mut pool, n))).collect();
    for (n, id) in ids {
        let output = pool.wait(id).unwrap();
        assert_eq!(*output.downcast::<u64>().unwrap(), n * n);
    }
    assert_eq!(pool.in_flight(), 0);
    pool.dispose();
}

#[test]
fn tasks_run_on_named_worker_threads() {
    let mut pool = WorkerPool::new(2).unwrap();
    let name = pool.create_typed_task(|_: ()| std::thread::current().name().map(str::to_owned));

    let mut names = HashSet::new();
    let ids: Vec<_> = (0..8).map(|_| name.run(&mut pool, ())).collect();
    for id in ids {
        let output = pool.wait(id).unwrap();
        names.insert(output.downcast::<Option<String>>().unwrap().unwrap_or_default());
    }
    assert!(names.iter().all(|n| n.starts_with("ecs-worker-")));
}

#[test]
fn more_tasks_than_workers_are_backlogged() {
    let mut pool = WorkerPool::new(2).unwrap();
    let nap = pool.create_typed_task(|ms: u64| {
        std::thread::sleep(Duration::from_millis(ms));
        ms
    });

    let ids: Vec<_> = (0..10).map(|_| nap.run(&mut pool, 5u64)).collect();
    assert_eq!(pool.in_flight(), 10);

    let mut finished = 0;
    while let Some((id, result)) = pool.next_finished() {
        assert!(ids.contains(&id));
        assert_eq!(*result.unwrap().downcast::<u64>().unwrap(), 5);
        finished += 1;
    }
    assert_eq!(finished, 10);
}

#[test]
fn panics_fail_only_their_task() {
    let mut pool = WorkerPool::new(1).unwrap();
    let checked = pool.create_typed_task(|n: i32| {
        if n < 0 {
            panic!("negative input {n}");
        }
        n
    });

    let bad = checked.run(&mut pool, -1);
    let good = checked.run(&mut pool, 4);

    match pool.wait(bad) {
        Err(TaskError::Panicked { message }) => assert!(message.contains("negative input -1")),
        other => panic!("expected a panic, got {:?}", other.map(|_| ())),
    }
    assert_eq!(*pool.wait(good).unwrap().downcast::<i32>().unwrap(), 4);
}

#[test]
fn wrong_parameter_types_are_reported() {
    let mut pool = WorkerPool::new(1).unwrap();
    let double = pool.create_typed_task(|n: u32| n * 2);

    let id = double.run(&mut pool, "not a number");
    assert!(matches!(pool.wait(id), Err(TaskError::BadParams)));
}

#[test]
fn unknown_tags_are_reported() {
    let mut pool = WorkerPool::new(1).unwrap();
    let id = pool.submit(99, Box::new(()));
    assert!(matches!(pool.wait(id), Err(TaskError::UnknownTag(99))));
}

#[test]
fn try_take_does_not_block() {
    let mut pool = WorkerPool::new(1).unwrap();
    let slow = pool.create_typed_task(|_: ()| std::thread::sleep(Duration::from_millis(50)));

    let id = slow.run(&mut pool, ());
    assert!(pool.is_pending(id));
    assert!(pool.try_take(id).is_none() || !pool.is_pending(id));
    pool.wait(id).ok();
    assert!(!pool.is_pending(id));
    assert!(pool.try_take(id).is_none());
}

#[test]
fn dispose_joins_idle_workers() {
    let pool = WorkerPool::new(4).unwrap();
    assert_eq!(pool.threads(), 4);
    pool.dispose();
}
