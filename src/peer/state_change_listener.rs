use crate::peer::types::PeerState;
use tokio::sync::watch;

pub(crate) fn new(initial_state: PeerState) -> (PeerStateChangeNotifier, PeerStateListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (PeerStateChangeNotifier { snd }, PeerStateListener { rcv })
}

pub(crate) struct PeerStateChangeNotifier {
    snd: watch::Sender<PeerState>,
}

impl PeerStateChangeNotifier {
    pub(crate) fn notify_new_state(&self, new_state: PeerState) {
        let _ = self.snd.send(new_state);
    }
}

/// Observes the peer's state transitions. Intermediate states may be skipped if the listener
/// falls behind; it always sees the latest one.
#[derive(Clone)]
pub struct PeerStateListener {
    rcv: watch::Receiver<PeerState>,
}

impl PeerStateListener {
    pub fn current(&self) -> PeerState {
        *self.rcv.borrow()
    }

    /// Waits for the next transition. `None` once the peer has shut down.
    pub async fn next(&mut self) -> Option<PeerState> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }

    /// Waits until the peer is in `state`, returning immediately if it already is.
    pub async fn wait_for(&mut self, state: PeerState) -> Option<()> {
        loop {
            if *self.rcv.borrow() == state {
                return Some(());
            }
            self.next().await?;
        }
    }
}
