pub mod apn;
pub mod bearer;
pub mod bus;
pub mod cause;
pub mod cmd;
pub mod context;
pub mod dispatcher;
pub mod effect;
pub mod error;
pub mod event;
pub mod fsm;
pub mod radio;
pub mod retry;
pub mod server;
pub mod settings;
pub mod state;
pub mod sync;
pub mod tracker;

pub use apn::{ApnProfile, ApnType, ApnTypeRegistry};
pub use cause::{FailCause, FailureClass};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use settings::Settings;
pub use state::{Activity, DataState, State};
pub use tracker::Tracker;
