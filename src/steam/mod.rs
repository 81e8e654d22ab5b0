pub mod bot;
pub mod controller;
pub mod gc;
pub mod vent;

pub use bot::{Bot, BotError, BotSettings, InspectOutcome};
pub use controller::BotController;
pub use gc::{GameSession, ItemInfoBlock, SessionConnector, SessionError, SessionEvent};
