pub mod advertiser;
pub mod beacon;
pub mod serial;

pub use advertiser::BluerAdvertiser;
pub use serial::L2capSerial;
