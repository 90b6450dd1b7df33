fn main() {
    // Host builds need no environment; ESP-IDF builds forward the sysenv
    // produced by esp-idf-sys so the linker finds the IDF libraries.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
