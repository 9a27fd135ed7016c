#![allow(dead_code)]
//! Shared integration test utilities.

use chansim::Simulation;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Routes scheduler logs to the test harness output.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A simulation that ignores `CHANSIM_*` variables set in the test environment.
pub fn simulation() -> Simulation {
    init_test_logging();
    Simulation::builder()
        .without_env()
        .build()
        .expect("default simulation should build")
}

/// Shared event log tasks can append to.
pub type Log<T> = Rc<RefCell<Vec<T>>>;

pub fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}
