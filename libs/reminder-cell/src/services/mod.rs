pub mod no_show;
pub mod reminder;
pub mod runner;
pub mod webhook;

pub use no_show::NoShowSweep;
pub use reminder::ReminderSweep;
pub use runner::{Sweep, SweepRunner};
pub use webhook::WebhookDispatcher;
