#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod bounce;
pub mod config;
pub mod diag;
pub mod error;
pub mod platform;
pub mod poll;
pub mod ring;
pub mod rx;
pub mod socket;
pub mod stats;
pub mod tx;
pub mod umem;
pub mod wait;
