/// The leader election layer this peer reports to. Election itself happens elsewhere; it calls
/// back into `MetaStateManager::on_start_leading` and friends with its decisions.
pub trait ElectionManager: Send + Sync + 'static {
    /// Join elections for the first time.
    fn start(&self);

    /// Abandon the current epoch and run a new election.
    fn restart(&self);
}
