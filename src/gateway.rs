// src/gateway.rs
//
// Order gateway: terminates client TCP sessions, enforces the per-client
// inbound sequence discipline, feeds the FIFO sequencer, and fans matching
// engine responses back to the owning session with per-client outbound
// sequence numbers.

use crate::metrics;
use crate::sequencer::FifoSequencer;
use crate::spsc::SpscRing;
use crate::tcp::{SessionHandler, TcpServer, TcpSession};
use crate::types::*;
use crate::util::{spin_wait, StopFlag};
use crate::wire::{self, OrderRequestFrame, ORDER_REQUEST_FRAME_SIZE};
use bytes::Buf;
use std::net::SocketAddrV4;
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

pub struct OrderGateway {
    server: TcpServer,
    inbound: InboundState,
    responses: Arc<SpscRing<ClientResponse>>,
    next_outbound_seq: Box<[u64]>,
}

/// Inbound half of the gateway; owned state of the gateway thread only.
struct InboundState {
    sequencer: FifoSequencer,
    next_expected_seq: Box<[u64]>,
    owning_session: Box<[Option<u64>]>,
}

impl SessionHandler for InboundState {
    fn on_recv(&mut self, session: &mut TcpSession, rx_ns: u64) {
        // Frames are fixed-size; a trailing partial frame stays buffered.
        while session.inbound.len() >= ORDER_REQUEST_FRAME_SIZE {
            let frame = OrderRequestFrame::read_from(&session.inbound[..ORDER_REQUEST_FRAME_SIZE])
                .expect("sized frame read");
            session.inbound.advance(ORDER_REQUEST_FRAME_SIZE);
            self.handle_frame(session.id, rx_ns, &frame);
        }
    }

    fn on_batch_end(&mut self) {
        self.sequencer.sequence_and_publish();
    }
}

impl InboundState {
    fn handle_frame(&mut self, session_id: u64, rx_ns: u64, frame: &OrderRequestFrame) {
        let Some((seq, request)) = wire::decode_request(frame) else {
            panic!(
                "malformed client request frame on session {session_id} (type {} side {})",
                frame.kind, frame.side
            );
        };
        let cid = request.client_id as usize;
        if cid >= self.next_expected_seq.len() {
            log::warn!("request for out-of-range client id {}; dropped", request.client_id);
            metrics::inc_gateway_drop("bad_client_id");
            return;
        }
        if self.owning_session[cid].is_none() {
            // First valid message from this client binds it to the session.
            self.owning_session[cid] = Some(session_id);
        }
        if self.owning_session[cid] != Some(session_id) {
            // TODO: emit a session-mismatch reject to the client instead of dropping.
            log::warn!(
                "client {} request on session {} but bound to session {:?}; dropped",
                request.client_id, session_id, self.owning_session[cid]
            );
            metrics::inc_gateway_drop("wrong_session");
            return;
        }
        let expected = self.next_expected_seq[cid];
        if seq != expected {
            log::warn!(
                "client {} sequence number {} != expected {}; dropped",
                request.client_id, seq, expected
            );
            metrics::inc_gateway_drop("seq_gap");
            return;
        }
        self.next_expected_seq[cid] = expected + 1;
        metrics::inc_gateway_requests();
        self.sequencer.add(rx_ns, request);
    }
}

impl OrderGateway {
    pub fn new(
        listen: SocketAddrV4,
        max_clients: usize,
        requests: Arc<SpscRing<ClientRequest>>,
        responses: Arc<SpscRing<ClientResponse>>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            server: TcpServer::bind(listen)?,
            inbound: InboundState {
                sequencer: FifoSequencer::new(requests),
                next_expected_seq: vec![1u64; max_clients].into_boxed_slice(),
                owning_session: vec![None; max_clients].into_boxed_slice(),
            },
            responses,
            next_outbound_seq: vec![1u64; max_clients].into_boxed_slice(),
        })
    }

    pub fn run(&mut self, stop: &StopFlag, spin_loops: u32) {
        log::info!("order gateway running");
        while !stop.is_raised() {
            self.server.poll();
            let received = self.server.send_and_recv(&mut self.inbound);
            let mut responded = false;
            while let Some(response) = self.responses.pop() {
                self.dispatch_response(&response);
                responded = true;
            }
            if !(received || responded) {
                spin_wait(spin_loops);
            }
        }
    }

    fn dispatch_response(&mut self, response: &ClientResponse) {
        let cid = response.client_id as usize;
        let session_id = self
            .inbound
            .owning_session
            .get(cid)
            .copied()
            .flatten()
            .unwrap_or_else(|| {
                panic!("response for client {} with no owning session", response.client_id)
            });
        let seq = self.next_outbound_seq[cid];
        self.next_outbound_seq[cid] = seq + 1;
        let frame = wire::encode_response(seq, response);
        match self.server.session_mut(session_id) {
            Some(session) => session.queue_send(frame.as_bytes()),
            None => log::warn!(
                "client {} disconnected; response seq {} dropped",
                response.client_id, seq
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(capacity: usize) -> (InboundState, Arc<SpscRing<ClientRequest>>) {
        let ring = Arc::new(SpscRing::new(64));
        let state = InboundState {
            sequencer: FifoSequencer::new(ring.clone()),
            next_expected_seq: vec![1u64; capacity].into_boxed_slice(),
            owning_session: vec![None; capacity].into_boxed_slice(),
        };
        (state, ring)
    }

    fn frame(seq: u64, client_id: ClientId, client_order_id: OrderId) -> OrderRequestFrame {
        wire::encode_request(
            seq,
            &ClientRequest {
                kind: RequestKind::New,
                client_id,
                ticker_id: 0,
                client_order_id,
                side: Side::Buy,
                price: 100,
                qty: 10,
            },
        )
    }

    #[test]
    fn sequence_gap_is_dropped() {
        let (mut state, ring) = inbound(8);
        state.handle_frame(1, 100, &frame(1, 7, 100));
        state.handle_frame(1, 200, &frame(3, 7, 101));
        state.on_batch_end();

        assert_eq!(state.next_expected_seq[7], 2);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop().unwrap().client_order_id, 100);
    }

    #[test]
    fn first_message_binds_session_and_other_sessions_are_ignored() {
        let (mut state, ring) = inbound(8);
        state.handle_frame(5, 100, &frame(1, 7, 100));
        assert_eq!(state.owning_session[7], Some(5));

        // Same client id from a different session: dropped, seq untouched.
        state.handle_frame(9, 150, &frame(2, 7, 200));
        assert_eq!(state.next_expected_seq[7], 2);

        state.handle_frame(5, 200, &frame(2, 7, 101));
        state.on_batch_end();
        let ids: Vec<_> = std::iter::from_fn(|| ring.pop()).map(|r| r.client_order_id).collect();
        assert_eq!(ids, vec![100, 101]);
    }

    #[test]
    fn out_of_range_client_is_dropped() {
        let (mut state, ring) = inbound(4);
        state.handle_frame(1, 100, &frame(1, 99, 100));
        state.on_batch_end();
        assert!(ring.is_empty());
    }

    #[test]
    #[should_panic(expected = "malformed client request frame")]
    fn unknown_type_byte_is_fatal() {
        let (mut state, _ring) = inbound(4);
        let mut f = frame(1, 1, 100);
        f.kind = 0x55;
        state.handle_frame(1, 100, &f);
    }
}
