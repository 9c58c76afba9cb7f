//! The `100-continue` request-side state machine (spec §4.E).

use std::fmt;

/// States of the `Expect: 100-continue` handshake, per spec §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    Idle,
    ExpectSent,
    ContinueReceived,
    BodySent,
    ExpectationFailed,
    FinalResponseWithoutContinue,
}

/// Failure to even begin the handshake — caught before a request is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationError {
    /// `Expect: 100-continue` was set on a request with no body.
    ExpectImpliesBody,
    /// `Expect: 100-continue` is incompatible with a WebSocket upgrade.
    IncompatibleWithUpgrade,
    /// A transition was attempted from a terminal state.
    AlreadyTerminal(ContinuationState),
}

impl fmt::Display for ContinuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuationError::ExpectImpliesBody => {
                write!(f, "Expect: 100-continue requires a non-empty request body")
            }
            ContinuationError::IncompatibleWithUpgrade => {
                write!(f, "Expect: 100-continue is incompatible with a websocket upgrade")
            }
            ContinuationError::AlreadyTerminal(state) => {
                write!(f, "cannot transition from terminal state {state:?}")
            }
        }
    }
}

impl std::error::Error for ContinuationError {}

impl From<ContinuationError> for crate::error::PipelineError {
    fn from(err: ContinuationError) -> Self {
        crate::error::PipelineError::invalid_argument(err.to_string())
    }
}

/// Drives one request's `Expect: 100-continue` handshake.
///
/// The client must not send the request body until [`ExpectContinue::observe_interim`]
/// or [`ExpectContinue::observe_final`] say it may.
#[derive(Debug)]
pub struct ExpectContinue {
    state: ContinuationState,
}

impl ExpectContinue {
    /// Validate and start the handshake for a request that carries
    /// `Expect: 100-continue`.
    pub fn start(has_body: bool, is_websocket_upgrade: bool) -> Result<Self, ContinuationError> {
        if is_websocket_upgrade {
            return Err(ContinuationError::IncompatibleWithUpgrade);
        }
        if !has_body {
            return Err(ContinuationError::ExpectImpliesBody);
        }
        Ok(ExpectContinue {
            state: ContinuationState::ExpectSent,
        })
    }

    pub fn state(&self) -> ContinuationState {
        self.state
    }

    /// May the body be written yet?
    pub fn may_send_body(&self) -> bool {
        matches!(
            self.state,
            ContinuationState::ContinueReceived
                | ContinuationState::BodySent
                | ContinuationState::FinalResponseWithoutContinue
        )
    }

    /// The server sent an interim `1xx` response.
    pub fn observe_interim(&mut self, status: http::StatusCode) -> Result<(), ContinuationError> {
        self.require(ContinuationState::ExpectSent)?;
        self.state = if status == http::StatusCode::CONTINUE {
            ContinuationState::ContinueReceived
        } else {
            // Any other 1xx leaves us waiting for the real answer; spec only
            // names CONTINUE and EXPECTATION_FAILED as meaningful outcomes.
            ContinuationState::ExpectSent
        };
        Ok(())
    }

    /// The server sent the final (non-1xx) response before any interim one.
    pub fn observe_final(&mut self, status: http::StatusCode) -> Result<(), ContinuationError> {
        self.require(ContinuationState::ExpectSent)?;
        self.state = if status == http::StatusCode::EXPECTATION_FAILED {
            ContinuationState::ExpectationFailed
        } else {
            ContinuationState::FinalResponseWithoutContinue
        };
        Ok(())
    }

    /// Record that the body has now been written.
    pub fn observe_body_sent(&mut self) -> Result<(), ContinuationError> {
        self.require(ContinuationState::ContinueReceived)?;
        self.state = ContinuationState::BodySent;
        Ok(())
    }

    /// Whether the exchange must be cancelled instead of completed normally
    /// (spec §4.E: "the request stream is cancelled and cannot complete
    /// normally" for a non-1xx final response observed before 100).
    pub fn must_cancel_request_stream(&self) -> bool {
        matches!(
            self.state,
            ContinuationState::ExpectationFailed | ContinuationState::FinalResponseWithoutContinue
        )
    }

    fn require(&self, expected: ContinuationState) -> Result<(), ContinuationError> {
        if self.state != expected {
            return Err(ContinuationError::AlreadyTerminal(self.state));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_with_expect_fails_fast() {
        let err = ExpectContinue::start(false, false).unwrap_err();
        assert_eq!(err, ContinuationError::ExpectImpliesBody);
    }

    #[test]
    fn websocket_upgrade_is_incompatible() {
        let err = ExpectContinue::start(true, true).unwrap_err();
        assert_eq!(err, ContinuationError::IncompatibleWithUpgrade);
    }

    #[test]
    fn s1_continue_then_created() {
        let mut fsm = ExpectContinue::start(true, false).unwrap();
        assert!(!fsm.may_send_body());
        fsm.observe_interim(http::StatusCode::CONTINUE).unwrap();
        assert!(fsm.may_send_body());
        fsm.observe_body_sent().unwrap();
        assert_eq!(fsm.state(), ContinuationState::BodySent);
        assert!(!fsm.must_cancel_request_stream());
    }

    #[test]
    fn s2_expectation_failed_without_reading_body() {
        let mut fsm = ExpectContinue::start(true, false).unwrap();
        fsm.observe_final(http::StatusCode::EXPECTATION_FAILED).unwrap();
        assert!(!fsm.may_send_body());
        assert!(fsm.must_cancel_request_stream());
    }

    #[test]
    fn final_response_without_continue_also_skips_body() {
        let mut fsm = ExpectContinue::start(true, false).unwrap();
        fsm.observe_final(http::StatusCode::INTERNAL_SERVER_ERROR)
            .unwrap();
        assert!(!fsm.may_send_body());
        assert!(fsm.must_cancel_request_stream());
    }
}
