//! A Kubernetes device plugin advertising fake devices.
//!
//! The plugin registers a synthetic resource with the kubelet, advertises a
//! fixed pool of healthy devices over `ListAndWatch` and answers allocation
//! calls with empty responses. It exercises the device plugin handshake on
//! nodes without the hardware.

pub mod config;
pub mod devices;
pub mod error;
pub mod fatal;
pub mod health;
pub mod plugin;
pub mod registration;
pub mod service;
pub mod uds;

pub use config::PluginConfig;
pub use devices::DeviceHealth;
pub use error::DevicePluginError;
pub use fatal::FatalHandler;
pub use health::HealthReporter;
pub use plugin::FakeDevicePlugin;
pub use plugin::LifecycleStage;
