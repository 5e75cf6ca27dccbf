pub mod capture;
pub mod cpal_host;
pub mod device;
pub mod ring;
pub mod synthetic;
