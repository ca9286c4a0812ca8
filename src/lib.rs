#![no_std]
mod fmt;

mod client;
mod clock_divider;
mod command;
mod datalink;
pub mod error;
pub mod memory;
mod packet;
#[cfg(test)]
mod sim;

pub use client::{AtCaClient, MacCheck, MacKey, Memory, Random, Sha, TempKey};
pub use clock_divider::ClockDivider;
pub use command::{
    Block, Digest, KeyGenMode, Mac, NonceMode, PublicKey, Serial, TempKeySource, Word,
};
pub use datalink::{I2cConfig, PowerState};
pub use packet::{checksum, CommandFrame, Response, CRC16};
pub use signature;
