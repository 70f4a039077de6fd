//! Lockstep fan-out.
//!
//! One input, N rendezvous outputs. The next input item is not taken until every
//! live output has accepted the current one, so the slowest consumer sets the
//! pace for all of them and every output sees the same order.

use candles_core::rendezvous::{Receiver, Sender};
use tracing::{debug, warn};

/// Counters for one broadcaster run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Items taken from the input.
    pub items: u64,
    /// Outputs dropped because their consumer went away.
    pub detached_outputs: usize,
}

/// Replicates one ordered stream into several.
pub struct Broadcaster<T> {
    input: Receiver<T>,
    outputs: Vec<Option<Sender<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    /// Create a broadcaster over `outputs`, in delivery order.
    pub fn new(input: Receiver<T>, outputs: Vec<Sender<T>>) -> Self {
        Self {
            input,
            outputs: outputs.into_iter().map(Some).collect(),
        }
    }

    fn live_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    /// Forward until the input ends or no output is left, then close every output.
    pub async fn run(mut self) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        debug!(outputs = self.outputs.len(), "broadcaster started");

        while self.live_outputs() > 0 {
            let Some(item) = self.input.recv().await else {
                break;
            };
            stats.items += 1;

            for (index, slot) in self.outputs.iter_mut().enumerate() {
                let Some(output) = slot else {
                    continue;
                };
                if output.send(item.clone()).await.is_err() {
                    warn!(output = index, "broadcast consumer gone, detaching output");
                    *slot = None;
                    stats.detached_outputs += 1;
                }
            }
        }

        debug!(items = stats.items, "broadcaster finished");
        stats
    }
}
