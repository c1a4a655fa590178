//! Edges of the bot: the event loop that feeds platform events into the
//! engine, and the HTTP clients behind the `Platform` and `Translator` traits.

pub mod dispatcher;
pub mod rest;
pub mod translate;

pub use dispatcher::{DispatchError, Dispatcher, EventLoop};
pub use rest::DiscordRest;
pub use translate::HttpTranslator;
