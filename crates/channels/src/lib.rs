//! Messaging transport contract.
//!
//! The relay core only talks to a chat platform through [`RelayOutbound`]:
//! send an editable status message, edit it with control buttons, upload a
//! file, delete a message. Telegram implements it in `relay-telegram`.

pub mod action;
pub mod error;
pub mod outbound;
#[cfg(any(test, feature = "testing"))]
pub mod recording;

pub use {
    action::{Action, StatusControls},
    error::{Error, Result},
    outbound::{FileUpload, MessageHandle, RelayOutbound},
};
