//! Uplink payload sources.
//!
//! The controller does not encode telemetry itself; it asks a
//! [`PayloadSource`] for the next frame whenever an armed send fires.

/// Produces the bytes of the next uplink.
pub trait PayloadSource: Send {
    fn next_payload(&mut self) -> Vec<u8>;
}

impl<F> PayloadSource for F
where
    F: FnMut() -> Vec<u8> + Send,
{
    fn next_payload(&mut self) -> Vec<u8> {
        self()
    }
}

/// Default source: a big-endian sequence number, so every uplink differs.
#[derive(Debug, Default)]
pub struct CounterPayload {
    seq: u16,
}

impl PayloadSource for CounterPayload {
    fn next_payload(&mut self) -> Vec<u8> {
        let bytes = self.seq.to_be_bytes().to_vec();
        self.seq = self.seq.wrapping_add(1);
        bytes
    }
}
