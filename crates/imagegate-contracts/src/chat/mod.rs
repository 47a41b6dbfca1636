mod completion;
mod request;

pub use completion::{render_chat_completion, render_error_body};
pub use request::{image_request_from_chat_body, ChatRequestError};
