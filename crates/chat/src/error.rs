use snafu::Snafu;

use crate::api::ApiError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("chat id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
    },
    #[snafu(display("cannot send an empty message"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("a message is already being sent"))]
    SendInFlight { stage: &'static str },
    #[snafu(display("sending message failed on `{stage}`: {source}"))]
    SendFailed {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("chat session for '{conversation_id}' is closed"))]
    SessionClosed {
        stage: &'static str,
        conversation_id: String,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
