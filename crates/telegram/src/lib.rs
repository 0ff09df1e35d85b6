//! Telegram transport for the relay.
//!
//! [`TelegramOutbound`] implements the `RelayOutbound` contract on top of
//! teloxide; [`bot::start_polling`] runs the long-polling loop that turns
//! incoming messages and button presses into scheduler calls.

pub mod access;
pub mod bot;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod state;

pub use {
    bot::{Connected, connect, start_polling},
    error::{Error, Result},
    outbound::TelegramOutbound,
    state::BotState,
};
