// Lifecycle of a single request/response exchange on a transport.
//
//   Idle -> Receiving -> Dispatching -> Streaming -> Idle
//
// Any state may move to Error. Error may only go back to Idle.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Receiving,
    Dispatching,
    Streaming,
    Error,
}

impl ExchangeState {
    pub fn can_advance_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, next),
            (Idle, Receiving)
                | (Receiving, Dispatching)
                | (Dispatching, Streaming)
                | (Streaming, Idle)
                | (Error, Idle)
                | (Idle | Receiving | Dispatching | Streaming, Error)
        )
    }
}

/// Tracks one exchange. Illegal transitions are bugs in the transport; they
/// are logged and force the exchange into `Error` instead of panicking.
#[derive(Debug)]
pub struct Exchange {
    transport: &'static str,
    state: ExchangeState,
}

impl Exchange {
    pub fn new(transport: &'static str) -> Self {
        Self {
            transport,
            state: ExchangeState::Idle,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn advance(&mut self, next: ExchangeState) -> ExchangeState {
        if self.state.can_advance_to(next) {
            tracing::trace!(transport = self.transport, from = ?self.state, to = ?next, "Exchange transition");
            self.state = next;
        } else {
            tracing::error!(
                transport = self.transport,
                from = ?self.state,
                to = ?next,
                "Illegal exchange transition"
            );
            self.state = ExchangeState::Error;
        }
        self.state
    }

    /// Marks the exchange failed, e.g. on an unparseable body.
    pub fn fail(&mut self) {
        self.advance(ExchangeState::Error);
    }

    /// Closes a finished or failed exchange.
    pub fn finish(&mut self) {
        if self.state() == ExchangeState::Dispatching {
            self.advance(ExchangeState::Streaming);
        }
        self.advance(ExchangeState::Idle);
    }
}
