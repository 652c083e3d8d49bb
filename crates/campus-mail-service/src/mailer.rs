//! Fire-and-forget bulk mail queue
//!
//! Sends must never block on, or fail because of, the mail transport. The
//! mailer owns a bounded channel drained by a dedicated background thread;
//! `enqueue` is non-blocking and failures at every stage are logged and
//! swallowed.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::thread::JoinHandle;

use campus_mail_core::{BulkMail, MailTransport};

const MAILER_CHANNEL_CAPACITY: usize = 1024;

enum MailerMsg {
    Batch(Vec<BulkMail>),
    Flush(SyncSender<()>),
    Shutdown,
}

/// Handle to the background mail drain thread.
pub struct Mailer {
    sender: Option<SyncSender<MailerMsg>>,
    drain_handle: Option<JoinHandle<()>>,
}

impl Mailer {
    /// Spawn the drain thread over the given transport.
    #[must_use]
    pub fn start(transport: Arc<dyn MailTransport>) -> Self {
        let (tx, rx) = sync_channel(MAILER_CHANNEL_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("mailer-drain".into())
            .spawn(move || drain_loop(&rx, transport.as_ref()))
            .expect("failed to spawn mailer drain worker");

        Self {
            sender: Some(tx),
            drain_handle: Some(handle),
        }
    }

    /// A mailer that silently drops everything (bulk mail disabled).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            sender: None,
            drain_handle: None,
        }
    }

    /// Build from configuration: a live queue when bulk mail is enabled,
    /// otherwise the disabled mailer.
    #[must_use]
    pub fn from_config(config: &campus_mail_core::Config, transport: Arc<dyn MailTransport>) -> Self {
        if config.bulk_mail_enabled {
            Self::start(transport)
        } else {
            Self::disabled()
        }
    }

    /// Enqueue a batch for background delivery. Never blocks, never fails
    /// the caller: a full or closed queue drops the batch with a warning.
    pub fn enqueue(&self, batch: Vec<BulkMail>) {
        let Some(sender) = &self.sender else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        match sender.try_send(MailerMsg::Batch(batch)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("mailer queue full; dropping {count} emails");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("mailer queue closed; dropping {count} emails");
            }
        }
    }

    /// Wait until every batch enqueued so far has been handed to the
    /// transport. Test hook.
    pub fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done_tx, done_rx) = sync_channel(1);
        if sender.send(MailerMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for Mailer {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(MailerMsg::Shutdown);
        }
        if let Some(handle) = self.drain_handle.take() {
            let _ = handle.join();
        }
    }
}

fn drain_loop(rx: &Receiver<MailerMsg>, transport: &dyn MailTransport) {
    while let Ok(msg) = rx.recv() {
        match msg {
            MailerMsg::Batch(batch) => {
                if let Err(e) = transport.send_bulk(&batch) {
                    tracing::warn!("bulk mail delivery failed: {e}");
                }
            }
            MailerMsg::Flush(done_tx) => {
                let _ = done_tx.send(());
            }
            MailerMsg::Shutdown => break,
        }
    }
}
