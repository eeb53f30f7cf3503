mod leader_pinger;
mod stop_signal;
mod time;

pub(crate) use leader_pinger::LeaderPingerHandle;
#[cfg(test)]
pub(crate) use time::mocked_clock;
pub(crate) use time::{Clock, RealClock};
