use tokio::sync::broadcast;

const SIGNAL_CAPACITY: usize = 16;

/// Cross-component broadcast of the two payload-free engine signals. Any
/// number of listeners may subscribe; publishing with no listeners is a
/// no-op.
#[derive(Debug)]
pub struct SignalBus {
    plan_state_changed: broadcast::Sender<()>,
    milestones_synced: broadcast::Sender<()>,
}

impl Default for SignalBus {
    fn default() -> Self {
        let (plan_state_changed, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (milestones_synced, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            plan_state_changed,
            milestones_synced,
        }
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_plan_state_changed(&self) -> broadcast::Receiver<()> {
        self.plan_state_changed.subscribe()
    }

    pub fn subscribe_milestones_synced(&self) -> broadcast::Receiver<()> {
        self.milestones_synced.subscribe()
    }

    pub fn publish_plan_state_changed(&self) {
        let _ = self.plan_state_changed.send(());
    }

    pub fn publish_milestones_synced(&self) {
        let _ = self.milestones_synced.send(());
    }
}
