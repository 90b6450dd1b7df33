//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter      | Implements | Connects to                        |
//! |--------------|------------|------------------------------------|
//! | `sc16is741a` | Transport  | SC16IS741A SPI-UART bridge → BGx   |
//! | `platform`   | Platform   | ESP-IDF timer / FreeRTOS, or `std` |
//!
//! Notification sinks live in [`crate::notify`].

pub mod platform;
pub mod sc16is741a;
