//! D-Bus interface for the Pulse Panel daemon.
//!
//! Provides the `org.pulsepanel.Daemon1` interface on the session bus.

mod interface;

pub use interface::{run_dbus_server, Daemon1Interface};
