//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises the engine against the
//! scripted modem in `mock_hw`. All tests run on the host with no real
//! hardware required.

mod mock_hw;
mod protocol_tests;
mod stream_tests;
