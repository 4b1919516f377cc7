//! Transport double for unit tests.

use super::{MailTransport, OutgoingMail};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays scripted results in order, then succeeds. Records every message.
#[derive(Default)]
pub(crate) struct Scripted {
    results: Mutex<VecDeque<Result<(), TransportError>>>,
    pub(crate) sent: Mutex<Vec<OutgoingMail>>,
}

impl Scripted {
    pub(crate) fn new(results: Vec<Result<(), TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            sent: Mutex::default(),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub(crate) fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(mail.clone());
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
