mod common;

use chansim::{ChannelSpec, SimError, Simulation, TraceEvent, TraceKind, TraceLog, TraceSink};
use std::io;

fn traced(sink: impl TraceSink + 'static) -> Simulation {
    common::init_test_logging();
    Simulation::builder()
        .without_env()
        .trace(sink)
        .build()
        .unwrap()
}

#[test]
fn test_rendezvous_emits_enter_and_exit_records() {
    let log = TraceLog::new();
    let mut sim = traced(log.clone());
    let chan = sim.channel::<u32>(ChannelSpec::rendezvous()).unwrap();
    assert!(chan.is_traced());

    let tx = chan.clone();
    sim.task()
        .name("producer")
        .spawn(move |cx| async move {
            tx.send(&cx, 1).await;
        })
        .unwrap();

    sim.task()
        .name("consumer")
        .start_at(3)
        .spawn(move |cx| async move {
            chan.recv(&cx).await;
        })
        .unwrap();

    sim.run();

    let kinds: Vec<_> = log.events().iter().map(|e| (e.label.clone(), e.kind)).collect();
    assert_eq!(
        kinds,
        [
            ("producer".to_string(), TraceKind::EnterSend),
            ("consumer".to_string(), TraceKind::EnterRecv),
            ("consumer".to_string(), TraceKind::ExitRecv),
            ("producer".to_string(), TraceKind::ExitSend),
        ]
    );

    // The blocked sender's exit record carries the time it was released at.
    assert_eq!(
        log.lines(),
        [
            "producer 0        1 ES 0",
            "consumer 1        1 ER 3",
            "consumer 1        1 XR 3",
            "producer 0        1 XS 3",
        ]
    );
}

#[test]
fn test_untraced_simulation_records_nothing() {
    let mut sim = common::simulation();
    let chan = sim.channel::<u8>(ChannelSpec::new(1, 0, 0)).unwrap();
    assert!(!chan.is_traced());

    sim.spawn(move |cx| async move {
        chan.send(&cx, 1).await;
        chan.recv(&cx).await;
    })
    .unwrap();

    let report = sim.run();
    assert_eq!(report.trace_failures, 0);
}

struct Failing;

impl TraceSink for Failing {
    fn record(&mut self, _event: &TraceEvent) -> io::Result<()> {
        Err(io::Error::other("sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("sink closed"))
    }
}

#[test]
fn test_sink_failures_are_counted_not_fatal() {
    let mut sim = traced(Failing);
    let chan = sim.channel::<u8>(ChannelSpec::new(1, 0, 0)).unwrap();

    sim.spawn(move |cx| async move {
        chan.send(&cx, 1).await;
        chan.recv(&cx).await;
    })
    .unwrap();

    let report = sim.run();

    assert!(report.is_quiescent());
    assert_eq!(report.trace_failures, 4);
    assert!(matches!(sim.flush_trace(), Err(SimError::Io(_))));
}

#[test]
fn test_events_serialize_with_tags() {
    let log = TraceLog::new();
    let mut sim = traced(log.clone());
    let chan = sim.channel::<u8>(ChannelSpec::new(1, 2, 2)).unwrap();

    sim.spawn(move |cx| async move {
        chan.send(&cx, 1).await;
    })
    .unwrap();
    sim.run();

    let json = serde_json::to_string(&log.events()[1]).unwrap();
    assert_eq!(
        json,
        r#"{"label":"-unknown-","task":0,"channel":1,"kind":"XS","time":"0"}"#
    );
}
