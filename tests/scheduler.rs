mod common;

use chansim::{Allocation, SimError, Simulation, StackSize, TaskState, UNNAMED_TASK};
use common::{log, simulation};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_ready_queue_is_round_robin() {
    let mut sim = simulation();
    let order = log();

    for name in ["a", "b"] {
        let order = order.clone();
        sim.spawn(move |cx| async move {
            for round in 0..3 {
                order.borrow_mut().push(format!("{name}{round}"));
                cx.yield_now().await;
            }
        })
        .unwrap();
    }

    let report = sim.run();

    assert!(report.is_quiescent());
    assert_eq!(*order.borrow(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[test]
fn test_lone_pause_advances_watermark_and_terminates() {
    let mut sim = simulation();
    let woke_at = Rc::new(Cell::new(None));

    let woke = woke_at.clone();
    sim.spawn(move |cx| async move {
        cx.pause(10).await;
        woke.set(Some(cx.now()));
    })
    .unwrap();

    let report = sim.run();

    assert_eq!(woke_at.get(), Some(10));
    assert_eq!(report.watermark, 10);
    assert_eq!(sim.now(), 10);
    assert!(report.is_quiescent(), "no task should remain: {:?}", report.parked);
    assert_eq!(sim.live_tasks(), 0);
}

#[test]
fn test_timers_release_in_wake_order() {
    let mut sim = simulation();
    let order = log();

    for delta in [30, 10, 20, 10] {
        let order = order.clone();
        sim.spawn(move |cx| async move {
            cx.pause(delta).await;
            order.borrow_mut().push((cx.id().as_u64(), cx.now()));
        })
        .unwrap();
    }

    sim.run();

    // Equal wake times keep insertion order.
    assert_eq!(*order.borrow(), [(1, 10), (3, 10), (2, 20), (0, 30)]);
}

#[test]
fn test_paused_task_is_released_by_a_later_task() {
    let mut sim = simulation();
    let order = log();

    let o = order.clone();
    sim.spawn(move |cx| async move {
        o.borrow_mut().push("a-pause");
        cx.pause(5).await;
        o.borrow_mut().push("a-wake");
    })
    .unwrap();

    let o = order.clone();
    sim.task()
        .start_at(100)
        .spawn(move |_cx| async move {
            o.borrow_mut().push("b");
        })
        .unwrap();

    let report = sim.run();

    assert_eq!(*order.borrow(), ["a-pause", "b", "a-wake"]);
    assert_eq!(report.watermark, 100);
}

#[test]
fn test_zero_pause_does_not_suspend() {
    let mut sim = simulation();
    let order = log();

    let o = order.clone();
    sim.spawn(move |cx| async move {
        o.borrow_mut().push("a1");
        cx.pause(0).await;
        o.borrow_mut().push("a2");
    })
    .unwrap();

    let o = order.clone();
    sim.spawn(move |_cx| async move {
        o.borrow_mut().push("b");
    })
    .unwrap();

    sim.run();
    assert_eq!(*order.borrow(), ["a1", "a2", "b"]);
}

#[test]
fn test_delay_moves_own_clock_without_suspending() {
    let mut sim = simulation();
    let seen = Rc::new(Cell::new(0));

    let s = seen.clone();
    sim.spawn(move |cx| async move {
        cx.delay(7);
        cx.delay(3);
        s.set(cx.now());
    })
    .unwrap();

    let report = sim.run();
    assert_eq!(seen.get(), 10);
    assert_eq!(report.steps, 1);
}

#[test]
fn test_exit_codes_are_recorded() {
    let mut sim = simulation();
    let after_exit = Rc::new(Cell::new(false));

    let flag = after_exit.clone();
    let failing = sim
        .spawn(move |cx| async move {
            cx.exit(3).await;
            flag.set(true);
        })
        .unwrap();
    let finishing = sim.spawn(|_cx| async {}).unwrap();

    let report = sim.run();

    assert!(!after_exit.get(), "code after exit must not run");
    assert_eq!(sim.exit_status(failing.id()), Some(3));
    assert_eq!(sim.exit_status(finishing.id()), Some(0));
    assert_eq!(report.exited.len(), 2);
}

#[test]
fn test_suspended_task_waits_for_start() {
    let mut sim = simulation();
    let ran = Rc::new(Cell::new(false));

    let r = ran.clone();
    let handle = sim
        .task()
        .name("late")
        .suspended()
        .spawn(move |_cx| async move {
            r.set(true);
        })
        .unwrap();

    let report = sim.run();
    assert!(!ran.get());
    assert_eq!(sim.state(handle), Some(TaskState::Created));
    assert_eq!(report.parked.len(), 1);
    assert_eq!(report.parked[0].name.as_deref(), Some("late"));

    sim.start(handle).unwrap();
    let report = sim.run();

    assert!(ran.get());
    assert!(report.is_quiescent());
    assert_eq!(sim.state(handle), None);
}

#[test]
fn test_starting_an_exited_task_fails() {
    let mut sim = simulation();
    let handle = sim.spawn(|_cx| async {}).unwrap();
    sim.run();

    let err = sim.start(handle).unwrap_err();
    assert!(matches!(err, SimError::UnknownTask(id) if id == handle.id()));
}

#[test]
fn test_tasks_spawned_by_tasks_run_after_parent_suspends() {
    let mut sim = simulation();
    let order = log();

    let o = order.clone();
    sim.spawn(move |cx| async move {
        let child_log = o.clone();
        cx.spawn(move |_cx| async move {
            child_log.borrow_mut().push("child");
        })
        .unwrap();

        o.borrow_mut().push("parent");
        cx.yield_now().await;
        o.borrow_mut().push("parent-again");
    })
    .unwrap();

    sim.run();
    assert_eq!(*order.borrow(), ["parent", "child", "parent-again"]);
}

#[test]
fn test_default_tasks_use_the_pool_until_it_is_full() {
    init();
    let sim = Simulation::builder()
        .without_env()
        .pool_capacity(1)
        .build()
        .unwrap();

    let first = sim.task().suspended().spawn(|_cx| async {}).unwrap();
    let second = sim.task().suspended().spawn(|_cx| async {}).unwrap();
    let custom = sim
        .task()
        .suspended()
        .stack_size(StackSize::Bytes(0x100))
        .spawn(|_cx| async {})
        .unwrap();

    assert_eq!(sim.allocation(first), Some(Allocation::Pooled));
    assert_eq!(sim.allocation(second), Some(Allocation::Dedicated));
    assert_eq!(sim.allocation(custom), Some(Allocation::Dedicated));
}

#[test]
fn test_foreign_suspension_stalls_the_task() {
    let mut sim = simulation();

    let handle = sim
        .spawn(|_cx| async {
            std::future::pending::<()>().await;
        })
        .unwrap();

    let report = sim.run();

    assert_eq!(report.parked.len(), 1);
    assert_eq!(report.parked[0].state, TaskState::Stalled);
    assert_eq!(sim.state(handle), Some(TaskState::Stalled));
}

#[test]
fn test_drain_hook_sees_the_report() {
    init();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let s = seen.clone();
    let mut sim = Simulation::builder()
        .without_env()
        .on_drain(move |report| s.borrow_mut().push((report.steps, report.watermark)))
        .build()
        .unwrap();

    sim.spawn(|cx| async move {
        cx.pause(4).await;
    })
    .unwrap();

    sim.run();
    sim.run();

    assert_eq!(*seen.borrow(), [(2, 4), (0, 4)]);
}

#[test]
fn test_names_and_descriptions() {
    let mut sim = simulation();
    let names = log();

    let n = names.clone();
    sim.spawn(move |cx| async move {
        n.borrow_mut().push(cx.name());
    })
    .unwrap();

    let n = names.clone();
    sim.task()
        .name("worker")
        .spawn(move |cx| async move {
            n.borrow_mut().push(cx.name());
            std::future::pending::<()>().await;
        })
        .unwrap();

    let report = sim.run();

    assert_eq!(*names.borrow(), [UNNAMED_TASK, "worker"]);
    let description = &report.parked[0].description;
    assert!(description.starts_with("[Task  1 (worker), created at"), "{description}");
    assert!(description.contains("scheduler.rs"), "{description}");
}

#[test]
#[should_panic(expected = "used while that task is not running")]
fn test_context_used_outside_its_task_panics() {
    let mut sim = simulation();
    let escaped = Rc::new(RefCell::new(None));

    let e = escaped.clone();
    sim.spawn(move |cx| async move {
        *e.borrow_mut() = Some(cx.clone());
    })
    .unwrap();
    sim.run();

    let cx = escaped.borrow_mut().take().unwrap();
    cx.now();
}

fn init() {
    common::init_test_logging();
}
