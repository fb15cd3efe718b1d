pub mod credentials;
#[macro_use]
pub mod serialization;
