pub mod chord;
pub mod error;
pub mod network;
pub mod protocol;
pub mod storage;
