mod common;

use chansim::{ChannelSpec, Direction, SimError, TaskState};
use common::{log, simulation};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_rendezvous_with_waiting_receiver_equalizes_times() {
    let mut sim = simulation();
    let chan = sim.channel::<u32>(ChannelSpec::rendezvous()).unwrap();
    let got = Rc::new(Cell::new(None));
    let sender_time = Rc::new(Cell::new(0));

    let rx = chan.clone();
    let g = got.clone();
    sim.spawn(move |cx| async move {
        let value = rx.recv(&cx).await;
        g.set(Some((value, cx.now())));
    })
    .unwrap();

    let t = sender_time.clone();
    sim.task()
        .start_at(5)
        .spawn(move |cx| async move {
            assert_eq!(chan.pending(Direction::Recv), 1, "receiver should be waiting");
            chan.send(&cx, 42).await;
            t.set(cx.now());
        })
        .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent());
    assert_eq!(got.get(), Some((42, 5)));
    assert_eq!(sender_time.get(), 5);
}

#[test]
fn test_sender_blocks_once_slack_is_used_up() {
    let mut sim = simulation();
    let chan = sim.channel::<u32>(ChannelSpec::new(2, 0, 0)).unwrap();
    let events = log();

    let tx = chan.clone();
    let e = events.clone();
    sim.spawn(move |cx| async move {
        for value in 0..3 {
            tx.send(&cx, value).await;
            e.borrow_mut().push(format!("sent {value}"));
        }
    })
    .unwrap();

    let e = events.clone();
    sim.spawn(move |cx| async move {
        assert_eq!(chan.len(), 2);
        assert_eq!(chan.pending(Direction::Send), 1);
        assert!(!chan.can_send());

        let first = chan.recv(&cx).await;
        e.borrow_mut().push(format!("received {first}"));
        assert_eq!(chan.len(), 2, "the blocked value is committed by the receive");
        cx.yield_now().await;

        for _ in 0..2 {
            let value = chan.recv(&cx).await;
            e.borrow_mut().push(format!("received {value}"));
        }
    })
    .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent());
    assert_eq!(
        *events.borrow(),
        ["sent 0", "sent 1", "received 0", "sent 2", "received 1", "received 2"]
    );
}

#[test]
fn test_rendezvous_preserves_send_order() {
    let mut sim = simulation();
    let chan = sim.channel::<usize>(ChannelSpec::rendezvous()).unwrap();
    let received = log();

    let tx = chan.clone();
    sim.spawn(move |cx| async move {
        for value in 0..10 {
            tx.send(&cx, value).await;
        }
    })
    .unwrap();

    let r = received.clone();
    sim.spawn(move |cx| async move {
        for _ in 0..10 {
            let value = chan.recv(&cx).await;
            r.borrow_mut().push(value);
        }
    })
    .unwrap();

    sim.run();
    assert_eq!(*received.borrow(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_blocked_senders_keep_their_values_until_received() {
    let mut sim = simulation();
    let chan = sim.channel::<u32>(ChannelSpec::new(1, 0, 0)).unwrap();
    let received = log();

    for value in 1..=3 {
        let tx = chan.clone();
        sim.spawn(move |cx| async move {
            tx.send(&cx, value).await;
        })
        .unwrap();
    }

    let rx = chan.clone();
    let r = received.clone();
    sim.spawn(move |cx| async move {
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.pending(Direction::Send), 2);
        for _ in 0..3 {
            let value = rx.recv(&cx).await;
            r.borrow_mut().push(value);
        }
    })
    .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent(), "parked: {:?}", report.parked);
    assert_eq!(*received.borrow(), [1, 2, 3]);
    assert_eq!(chan.sent(), 3);
    assert_eq!(chan.received(), 3);
    assert!(chan.is_empty());
}

#[test]
fn test_rendezvous_serves_queued_senders_in_arrival_order() {
    let mut sim = simulation();
    let chan = sim.channel::<&str>(ChannelSpec::rendezvous()).unwrap();
    let received = log();

    for value in ["first", "second"] {
        let tx = chan.clone();
        sim.spawn(move |cx| async move {
            tx.send(&cx, value).await;
        })
        .unwrap();
    }

    let r = received.clone();
    sim.spawn(move |cx| async move {
        assert_eq!(chan.pending(Direction::Send), 2);
        for _ in 0..2 {
            let value = chan.recv(&cx).await;
            r.borrow_mut().push(value);
        }
    })
    .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent(), "parked: {:?}", report.parked);
    assert_eq!(*received.borrow(), ["first", "second"]);
}

#[test]
fn test_can_send_sees_waiting_receiver() {
    let mut sim = simulation();
    let chan = sim.channel::<u8>(ChannelSpec::rendezvous()).unwrap();
    let events = log();

    let rx = chan.clone();
    let e = events.clone();
    sim.spawn(move |cx| async move {
        assert!(!rx.can_receive());
        rx.recv(&cx).await;
        e.borrow_mut().push("received");
    })
    .unwrap();

    let e = events.clone();
    sim.spawn(move |cx| async move {
        assert_eq!(chan.pending(Direction::Recv), 1);
        assert!(chan.can_send());
        assert_eq!(chan.ready_time(Direction::Send), Some(0));

        chan.send(&cx, 5).await;
        e.borrow_mut().push("sent");
        assert_eq!(chan.pending(Direction::Send), 0);
        assert!(!chan.can_send());
    })
    .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent());
    // The sender finished its step before the released receiver ran.
    assert_eq!(*events.borrow(), ["sent", "received"]);
}

#[test]
fn test_buffered_value_carries_pipeline_latency() {
    let mut sim = simulation();
    let chan = sim.channel::<&str>(ChannelSpec::new(1, 4, 6)).unwrap();
    let times = log();

    let tx = chan.clone();
    let t = times.clone();
    sim.spawn(move |cx| async move {
        tx.send(&cx, "hello").await;
        t.borrow_mut().push(("sender", cx.now()));
    })
    .unwrap();

    let rx = chan.clone();
    let t = times.clone();
    sim.task()
        .suspended()
        .spawn(move |cx| async move {
            let value = rx.recv(&cx).await;
            assert_eq!(value, "hello");
            t.borrow_mut().push(("receiver", cx.now()));
        })
        .unwrap();

    sim.run();
    assert_eq!(*times.borrow(), [("sender", 0)]);
    assert_eq!(chan.ready_time(Direction::Recv), Some(4));
    assert!(chan.dump().contains(" *"), "{}", chan.dump());
}

#[test]
fn test_receiver_observes_latency_after_buffered_send() {
    let mut sim = simulation();
    let chan = sim.channel::<u8>(ChannelSpec::new(1, 4, 6)).unwrap();
    let receiver_time = Rc::new(Cell::new(0));

    let tx = chan.clone();
    sim.spawn(move |cx| async move {
        tx.send(&cx, 1).await;
        assert_eq!(cx.now(), 0, "a buffered send does not delay the sender");
    })
    .unwrap();

    let t = receiver_time.clone();
    sim.spawn(move |cx| async move {
        chan.recv(&cx).await;
        t.set(cx.now());
    })
    .unwrap();

    sim.run();
    assert_eq!(receiver_time.get(), 4);
}

#[test]
fn test_probes_follow_occupancy() {
    let mut sim = simulation();
    let chan = sim.channel::<u8>(ChannelSpec::new(1, 0, 0)).unwrap();

    assert!(chan.can_send());
    assert!(!chan.can_receive());
    assert_eq!(chan.ready_time(Direction::Recv), None);

    let tx = chan.clone();
    sim.spawn(move |cx| async move {
        tx.send(&cx, 9).await;
    })
    .unwrap();
    sim.run();

    assert!(!chan.can_send());
    assert!(chan.can_receive());
    assert_eq!(chan.len(), 1);
    assert_eq!(chan.sent(), 1);
    assert_eq!(chan.received(), 0);
}

#[test]
fn test_destroy_reports_blocked_parties() {
    let mut sim = simulation();
    let chan = sim.channel::<u64>(ChannelSpec::rendezvous()).unwrap();

    let rx = chan.clone();
    let handle = sim
        .task()
        .name("stuck")
        .spawn(move |cx| async move {
            rx.recv(&cx).await;
        })
        .unwrap();

    let report = sim.run();
    assert_eq!(report.parked.len(), 1);
    assert_eq!(sim.state(handle), Some(TaskState::RecvBlocked(chan.id())));

    let destroyed = chan.destroy();
    assert!(!destroyed.is_clean());
    assert!(destroyed.senders.is_empty());
    assert_eq!(destroyed.receivers.len(), 1);
    assert!(destroyed.receivers[0].contains("(stuck)"), "{:?}", destroyed.receivers);
}

#[test]
fn test_idle_channel_destroys_cleanly() {
    let sim = simulation();
    let chan = sim.channel::<u32>(ChannelSpec::new(3, 1, 2)).unwrap();

    assert_eq!(chan.element_size(), 4);
    assert!(!chan.is_traced());
    assert!(chan.destroy().is_clean());
}

#[test]
fn test_cycle_shorter_than_latency_is_rejected() {
    let sim = simulation();
    let err = sim.channel::<u8>(ChannelSpec::new(0, 5, 3)).unwrap_err();

    assert!(matches!(err, SimError::InvalidTiming { latency: 5, cycle: 3 }));
}

#[test]
fn test_channel_ids_are_distinct() {
    let sim = simulation();
    let a = sim.channel::<u8>(ChannelSpec::rendezvous()).unwrap();
    let b = sim.channel::<u8>(ChannelSpec::rendezvous()).unwrap();

    assert_ne!(a.id(), b.id());
    assert_eq!(a.clone().id(), a.id());
}
