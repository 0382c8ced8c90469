pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod notifier;
pub mod orientation;
pub mod packet;
pub mod transport;
pub mod types;

mod listener;

// Re-export the controller and its common companions for easy access
pub use codec::VibrationParams;
pub use config::BeltConfig;
pub use controller::{BeltController, HandshakeReport};
pub use discovery::{BeltDiscovery, DiscoveredBelt, SerialPortDiscovery};
pub use error::BeltError;
pub use notifier::{BeltObserver, ObserverError};
pub use transport::BeltAddress;
pub use types::{BeltEvent, BeltMode, Intensity, ParameterId, StopTarget, VibrationPattern};
