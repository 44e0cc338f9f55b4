//! Offer/answer handshake between the two probe endpoints

use bitprobe_core::{DiagnosticError, PeerConnection, ProbeError};
use std::fmt;
use tracing::debug;

/// Handshake step, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Sender creating the offer
    CreateOffer,
    /// Applying the offer on both sides
    ApplyOffer,
    /// Receiver creating the answer
    CreateAnswer,
    /// Applying the answer on both sides
    ApplyAnswer,
}

impl NegotiationStep {
    /// Message recorded when this step fails
    pub fn failure_message(&self) -> &'static str {
        match self {
            NegotiationStep::CreateOffer => "Unable to create offer",
            NegotiationStep::ApplyOffer => {
                "Unable to set local or remote description from createOffer"
            }
            NegotiationStep::CreateAnswer => "Unable to create answer",
            NegotiationStep::ApplyAnswer => {
                "Unable to set local or remote description from createAnswer"
            }
        }
    }

    fn error(self, cause: ProbeError) -> DiagnosticError {
        DiagnosticError::with_cause(self.failure_message(), &cause)
    }
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStep::CreateOffer => "create-offer",
            NegotiationStep::ApplyOffer => "apply-offer",
            NegotiationStep::CreateAnswer => "create-answer",
            NegotiationStep::ApplyAnswer => "apply-answer",
        };
        f.write_str(name)
    }
}

/// Run the full handshake. Each pair of description updates is applied
/// concurrently; the first failing step ends the handshake.
pub async fn negotiate(
    sender: &dyn PeerConnection,
    receiver: &dyn PeerConnection,
) -> Result<(), DiagnosticError> {
    let offer = sender
        .create_offer()
        .await
        .map_err(|e| NegotiationStep::CreateOffer.error(e))?;
    debug!("Offer created");

    futures::try_join!(
        sender.set_local_description(offer.clone()),
        receiver.set_remote_description(offer),
    )
    .map_err(|e| NegotiationStep::ApplyOffer.error(e))?;

    let answer = receiver
        .create_answer()
        .await
        .map_err(|e| NegotiationStep::CreateAnswer.error(e))?;
    debug!("Answer created");

    futures::try_join!(
        receiver.set_local_description(answer.clone()),
        sender.set_remote_description(answer),
    )
    .map_err(|e| NegotiationStep::ApplyAnswer.error(e))?;

    debug!("Negotiation complete");
    Ok(())
}
