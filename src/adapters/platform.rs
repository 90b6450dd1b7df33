//! Platform adapters: clock, yield and delay.
//!
//! - **feature `espidf`**: [`EspPlatform`] wraps `esp_timer_get_time()`
//!   and FreeRTOS delays; [`init_logging`] installs the ESP-IDF logger.
//! - **host**: [`StdPlatform`] uses `std::time::Instant` and thread
//!   sleeps for simulation and bench testing.

use crate::ports::Platform;

/// Host platform backed by `std`.
#[cfg(not(feature = "espidf"))]
pub struct StdPlatform {
    start: std::time::Instant,
}

#[cfg(not(feature = "espidf"))]
impl Default for StdPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(feature = "espidf"))]
impl StdPlatform {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(not(feature = "espidf"))]
impl Platform for StdPlatform {
    fn millis(&mut self) -> u32 {
        // Truncation gives the same wrapping tick as the MCU timer.
        self.start.elapsed().as_millis() as u32
    }

    fn yield_now(&mut self) {
        std::thread::yield_now();
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}

/// ESP32 platform on the ESP-IDF high-resolution timer.
#[cfg(feature = "espidf")]
#[derive(Default)]
pub struct EspPlatform;

#[cfg(feature = "espidf")]
impl EspPlatform {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "espidf")]
impl Platform for EspPlatform {
    fn millis(&mut self) -> u32 {
        ((unsafe { esp_idf_svc::sys::esp_timer_get_time() }) / 1000) as u32
    }

    fn yield_now(&mut self) {
        esp_idf_hal::task::do_yield();
    }

    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

/// Install the ESP-IDF logger as the `log` backend. Safe to call twice.
#[cfg(feature = "espidf")]
pub fn init_logging() {
    esp_idf_svc::sys::link_patches();
    if esp_idf_logger::init().is_err() {
        log::debug!("logger already installed");
    }
}
