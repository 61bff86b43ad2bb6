//! Sending a message and printing the reply as it streams in

use chathub_core::{MessageStatus, SendCoordinator, SendOutcome, Store, StoreEvent};
use std::io::Write;
use tokio::sync::broadcast::{Receiver, error::TryRecvError};

/// Prints streamed deltas for one conversation
pub struct ReplyPrinter<W: Write> {
    conversation_id: String,
    out: W,
    printed: bool,
}

impl<W: Write> ReplyPrinter<W> {
    pub fn new(conversation_id: impl Into<String>, out: W) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            out,
            printed: false,
        }
    }

    pub fn handle(&mut self, event: &StoreEvent) -> std::io::Result<()> {
        if let StoreEvent::StreamDelta {
            conversation_id,
            delta,
            ..
        } = event
        {
            if *conversation_id == self.conversation_id {
                write!(self.out, "{}", delta)?;
                self.out.flush()?;
                self.printed = true;
            }
        }
        Ok(())
    }

    fn drain(&mut self, events: &mut Receiver<StoreEvent>) -> std::io::Result<()> {
        loop {
            match events.try_recv() {
                Ok(event) => self.handle(&event)?,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Reply printer skipped {} events", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Print whatever the streamed deltas did not show: a reply that arrived
    /// whole, or the error text of a failed one
    fn finish(&mut self, store: &Store, outcome: &SendOutcome) -> std::io::Result<()> {
        let message = store
            .conversation(&self.conversation_id)
            .and_then(|c| c.message(&outcome.assistant_message_id).cloned());
        if let Some(message) = message {
            if message.is_error {
                if self.printed {
                    writeln!(self.out)?;
                }
                write!(self.out, "[{}]", message.content)?;
                self.printed = true;
            } else if !self.printed && !message.content.is_empty() {
                write!(self.out, "{}", message.content)?;
                self.printed = true;
            }
        }
        if outcome.stopped {
            if self.printed {
                writeln!(self.out)?;
            }
            write!(self.out, "[stopped]")?;
            self.printed = true;
        }
        if self.printed {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}

/// Send `text` and print the reply to `out` while it streams. If printing
/// fails the send is dropped, which stops the exchange.
pub async fn send_and_print<W: Write>(
    coordinator: &SendCoordinator,
    store: &Store,
    conversation_id: &str,
    text: &str,
    out: W,
) -> anyhow::Result<SendOutcome> {
    let mut events = store.subscribe();
    let mut printer = ReplyPrinter::new(conversation_id, out);

    let send = coordinator.send(conversation_id, text, Vec::new());
    tokio::pin!(send);
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome?,
            event = events.recv() => {
                if let Ok(event) = event {
                    printer.handle(&event)?;
                }
            }
        }
    };

    // Deltas published before completion are still queued
    printer.drain(&mut events)?;
    printer.finish(store, &outcome)?;

    if outcome.status == MessageStatus::Failed {
        tracing::debug!("Reply {} failed", outcome.assistant_message_id);
    }
    Ok(outcome)
}
