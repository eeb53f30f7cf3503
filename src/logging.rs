use chrono::Utc;
use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Terminal logger, tagged with the peer's id. Handy for running a single peer by hand.
pub fn create_root_logger_for_stdout(peer_id: u32) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("PeerId" => peer_id))
}

/// File logger writing to `{directory}/info_log_{peer_id}/{timestamp}_info.log`.
pub fn create_root_logger_for_file<P: AsRef<Path>>(directory: P, peer_id: u32) -> io::Result<slog::Logger> {
    let log_directory = directory.as_ref().join(format!("info_log_{}", peer_id));
    fs::create_dir_all(&log_directory)?;

    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_directory.join(format!("{}_info.log", now)))?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!("PeerId" => peer_id)))
}

pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
