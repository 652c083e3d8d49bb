//! Outbound bulk-mail transport seam
//!
//! Mail delivery is an external collaborator: the service renders a thread
//! email and hands `(subject, body, recipient)` triples to whatever
//! transport the host platform wires in. Delivery failures are the
//! transport's problem to report and the caller's problem to *log*: a
//! failed email must never fail a send.

use thiserror::Error;

/// One rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkMail {
    pub subject: String,
    pub body: String,
    pub recipient_email: String,
}

/// Transport failure. Carries only a message; the messaging core never
/// branches on the cause.
#[derive(Error, Debug)]
#[error("mail transport error: {0}")]
pub struct MailTransportError(pub String);

/// External mass-mail delivery.
///
/// Implementations must be safe to call from a background thread.
pub trait MailTransport: Send + Sync {
    /// Deliver a batch of emails. Best effort: partial delivery is allowed
    /// and indistinguishable from success at this interface.
    fn send_bulk(&self, mail: &[BulkMail]) -> Result<(), MailTransportError>;
}

/// A transport that drops everything. Used when bulk mail is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl MailTransport for NullTransport {
    fn send_bulk(&self, _mail: &[BulkMail]) -> Result<(), MailTransportError> {
        Ok(())
    }
}
