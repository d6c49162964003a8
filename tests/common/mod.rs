//! Shared driving loop for the integration tests: each test owns a real
//! loopback socket pair and steps the session's embeddable readiness
//! primitives directly, the same way an application embedding the engine in
//! its own reactor would.

use irc_session::fdset::{select, FdSet};
use irc_session::Session;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Runs `add_descriptors`/`select`/`process_descriptors` for up to
/// `iterations` passes, each blocking at most `per_iter_timeout` in
/// `select(2)`. Stops early once the session has nothing left to watch.
pub fn pump<Ctx>(session: &mut Session<Ctx>, iterations: usize, per_iter_timeout: Duration) {
    for _ in 0..iterations {
        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut maxfd: RawFd = -1;
        session.add_descriptors(&mut read_set, &mut write_set, &mut maxfd);
        if maxfd < 0 {
            break;
        }
        let _ = select(maxfd, &mut read_set, &mut write_set, Some(per_iter_timeout));
        session.process_descriptors(&read_set, &write_set);
    }
}
