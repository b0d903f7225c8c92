use snafu::ensure;

use crate::error::{ChatResult, EmptyMessageSnafu, SendInFlightSnafu};

/// Draft text for the message input and its send lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    draft: String,
    in_flight: Option<String>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn can_send(&self) -> bool {
        !self.is_sending() && !self.draft.trim().is_empty()
    }

    /// Takes the trimmed draft for submission and clears the input.
    pub fn begin_send(&mut self) -> ChatResult<String> {
        ensure!(
            !self.is_sending(),
            SendInFlightSnafu {
                stage: "composer-begin-send",
            }
        );

        let text = self.draft.trim().to_string();
        ensure!(
            !text.is_empty(),
            EmptyMessageSnafu {
                stage: "composer-begin-send",
            }
        );

        self.draft.clear();
        self.in_flight = Some(text.clone());
        Ok(text)
    }

    /// Ends the in-flight send. A failed send puts its text back unless the user
    /// already started a new draft.
    pub fn finish_send(&mut self, succeeded: bool) {
        let Some(text) = self.in_flight.take() else {
            return;
        };

        if !succeeded && self.draft.trim().is_empty() {
            self.draft = text;
        }
    }
}
