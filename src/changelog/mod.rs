mod cache;
mod log;

pub(crate) use cache::ChangeLogCache;
pub(crate) use log::ChangeLog;
pub(crate) use log::ChangeLogError;
