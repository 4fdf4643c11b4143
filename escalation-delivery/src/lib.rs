pub mod apns;
pub mod callback;
pub mod fcm;
pub mod push;

pub use apns::ApnsSender;
pub use callback::HttpCallbackChannel;
pub use fcm::FcmSender;
pub use push::{DevicePushChannel, DeviceSender};
