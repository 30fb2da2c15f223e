// src/sequencer.rs
use crate::spsc::SpscRing;
use crate::types::ClientRequest;
use smallvec::SmallVec;
use std::sync::Arc;

struct Pending {
    rx_ns: u64,
    request: ClientRequest,
}

/// Collects the client requests of one gateway poll pass and publishes them
/// to the matching engine in ascending kernel-receive-time order. Ordering
/// across passes follows from the poll cadence itself.
pub struct FifoSequencer {
    pending: SmallVec<[Pending; 64]>,
    out: Arc<SpscRing<ClientRequest>>,
}

impl FifoSequencer {
    pub fn new(out: Arc<SpscRing<ClientRequest>>) -> Self {
        Self { pending: SmallVec::new(), out }
    }

    pub fn add(&mut self, rx_ns: u64, request: ClientRequest) {
        self.pending.push(Pending { rx_ns, request });
    }

    /// Stable sort, so same-timestamp requests keep their arrival order.
    pub fn sequence_and_publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.sort_by_key(|p| p.rx_ns);
        for p in self.pending.drain(..) {
            if self.out.push(p.request).is_err() {
                panic!("engine request ring overflow");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn req(client_order_id: OrderId) -> ClientRequest {
        ClientRequest {
            kind: RequestKind::New,
            client_id: 1,
            ticker_id: 0,
            client_order_id,
            side: Side::Buy,
            price: 100,
            qty: 1,
        }
    }

    #[test]
    fn publishes_in_rx_timestamp_order() {
        let ring = Arc::new(SpscRing::new(16));
        let mut seq = FifoSequencer::new(ring.clone());
        seq.add(300, req(3));
        seq.add(100, req(1));
        seq.add(200, req(2));
        seq.sequence_and_publish();
        let order: Vec<_> = std::iter::from_fn(|| ring.pop()).map(|r| r.client_order_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn timestamp_ties_keep_arrival_order() {
        let ring = Arc::new(SpscRing::new(16));
        let mut seq = FifoSequencer::new(ring.clone());
        seq.add(500, req(10));
        seq.add(500, req(11));
        seq.add(400, req(12));
        seq.sequence_and_publish();
        let order: Vec<_> = std::iter::from_fn(|| ring.pop()).map(|r| r.client_order_id).collect();
        assert_eq!(order, vec![12, 10, 11]);
    }

    #[test]
    fn batch_clears_between_passes() {
        let ring = Arc::new(SpscRing::new(16));
        let mut seq = FifoSequencer::new(ring.clone());
        seq.add(1, req(1));
        seq.sequence_and_publish();
        seq.sequence_and_publish();
        assert_eq!(ring.len(), 1);
    }
}
